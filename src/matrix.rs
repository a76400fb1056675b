//! Column statistics shared by the path builder, the estimators and the
//! sample generator.

use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix2};

/// Centered covariance `XᵀX / (n - ddof)` of the columns of `x`.
///
/// `ddof = 1` matches `numpy.cov`; `ddof = 0` is the maximum-likelihood
/// estimate used by the solvers. Returns `None` when there are not enough rows.
pub fn covariance<S: Data<Elem = f64>>(x: &ArrayBase<S, Ix2>, ddof: usize) -> Option<Array2<f64>> {
    let n = x.nrows();
    if n <= ddof || n == 0 {
        return None;
    }
    let mean = x.mean_axis(Axis(0))?;
    let centered = x - &mean.insert_axis(Axis(0));
    Some(centered.t().dot(&centered) / (n - ddof) as f64)
}

/// Column-wise mean and population standard deviation.
pub fn column_moments<S: Data<Elem = f64>>(x: &ArrayBase<S, Ix2>) -> (Array1<f64>, Array1<f64>) {
    let p = x.ncols();
    if x.nrows() == 0 {
        return (Array1::zeros(p), Array1::zeros(p));
    }
    let mean = x
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(p));
    let sd = x.std_axis(Axis(0), 0.0);
    (mean, sd)
}

/// Center every column and scale it to unit population variance.
///
/// Constant columns are only centered, so they come out as all zeros instead
/// of NaN.
pub fn standardize_columns<S: Data<Elem = f64>>(x: &ArrayBase<S, Ix2>) -> Array2<f64> {
    let (mean, sd) = column_moments(x);
    let mut out = x.to_owned();
    for (j, mut col) in out.axis_iter_mut(Axis(1)).enumerate() {
        let scale = if sd[j] > 0.0 && sd[j].is_finite() {
            sd[j]
        } else {
            1.0
        };
        col.mapv_inplace(|v| (v - mean[j]) / scale);
    }
    out
}

/// Pearson correlation of the columns; constant columns get zero correlation
/// with everything else and 1 on the diagonal.
pub fn correlation<S: Data<Elem = f64>>(x: &ArrayBase<S, Ix2>) -> Option<Array2<f64>> {
    let cov = covariance(x, 0)?;
    let p = cov.nrows();
    let sd: Array1<f64> = cov.diag().mapv(|v| v.max(0.0).sqrt());
    let mut corr = Array2::<f64>::zeros((p, p));
    for i in 0..p {
        corr[[i, i]] = 1.0;
        for j in (i + 1)..p {
            let denom = sd[i] * sd[j];
            let r = if denom > 0.0 { cov[[i, j]] / denom } else { 0.0 };
            let r = r.clamp(-1.0, 1.0);
            corr[[i, j]] = r;
            corr[[j, i]] = r;
        }
    }
    Some(corr)
}

/// max |A[i,j]| over i != j; zero for matrices smaller than 2×2.
pub fn max_abs_off_diagonal<S: Data<Elem = f64>>(a: &ArrayBase<S, Ix2>) -> f64 {
    let mut best = 0.0f64;
    for ((i, j), &v) in a.indexed_iter() {
        if i != j {
            if v.is_nan() {
                return f64::NAN;
            }
            best = best.max(v.abs());
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn covariance_matches_numpy_conventions() {
        let x = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.5]];
        let unbiased = covariance(&x, 1).expect("enough rows");
        assert_abs_diff_eq!(unbiased[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(unbiased[[0, 1]], 2.25, epsilon = 1e-12);
        let ml = covariance(&x, 0).expect("enough rows");
        assert_abs_diff_eq!(ml[[0, 0]], 2.0 / 3.0, epsilon = 1e-12);
        assert!(covariance(&x.slice(ndarray::s![..1, ..]), 1).is_none());
    }

    #[test]
    fn standardize_handles_constant_columns() {
        let x = array![[1.0, 5.0], [3.0, 5.0], [5.0, 5.0]];
        let z = standardize_columns(&x);
        let (mean, sd) = column_moments(&z);
        assert_abs_diff_eq!(mean[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sd[0], 1.0, epsilon = 1e-12);
        assert!(z.column(1).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn correlation_is_unit_diagonal_and_bounded() {
        let x = array![[1.0, 2.0, 0.0], [2.0, 1.0, 0.0], [3.0, 5.0, 0.0], [4.0, 3.0, 0.0]];
        let r = correlation(&x).expect("enough rows");
        for i in 0..3 {
            assert_eq!(r[[i, i]], 1.0);
            for j in 0..3 {
                assert!(r[[i, j]].abs() <= 1.0);
                assert_eq!(r[[i, j]], r[[j, i]]);
            }
        }
        assert_eq!(r[[0, 2]], 0.0);
    }

    #[test]
    fn max_abs_off_diagonal_skips_diagonal() {
        let a = array![[9.0, -0.4], [0.2, 9.0]];
        assert_abs_diff_eq!(max_abs_off_diagonal(&a), 0.4, epsilon = 1e-15);
        assert_eq!(max_abs_off_diagonal(&array![[3.0]]), 0.0);
    }
}
