use crate::linalg::faer_ndarray::{FaerCholesky, FaerEigh, FaerLinalgError};
use faer::Side;
use ndarray::Array2;

const MAX_FACTORIZATION_ATTEMPTS: usize = 6;

#[derive(Default, Clone, Copy)]
pub(crate) struct KahanSum {
    sum: f64,
    c: f64,
}

impl KahanSum {
    pub(crate) fn add(&mut self, value: f64) {
        let y = value - self.c;
        let t = self.sum + y;
        self.c = (t - self.sum) - y;
        self.sum = t;
    }

    pub(crate) fn sum(self) -> f64 {
        self.sum
    }
}

fn ensure_square(matrix: &Array2<f64>, label: &str) -> Result<usize, FaerLinalgError> {
    let (rows, cols) = matrix.dim();
    if rows != cols {
        return Err(FaerLinalgError::NotSquare {
            label: label.to_string(),
            rows,
            cols,
        });
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(FaerLinalgError::NonFinite {
            label: label.to_string(),
        });
    }
    Ok(rows)
}

pub(crate) fn max_abs_diag(matrix: &Array2<f64>) -> f64 {
    matrix
        .diag()
        .iter()
        .copied()
        .map(f64::abs)
        .fold(0.0, f64::max)
        .max(1.0)
}

pub(crate) fn add_ridge(matrix: &Array2<f64>, ridge: f64) -> Array2<f64> {
    let mut regularized = matrix.clone();
    if ridge <= 0.0 {
        return regularized;
    }
    for i in 0..regularized.nrows() {
        regularized[[i, i]] += ridge;
    }
    regularized
}

/// Average the two triangles so that roundoff from solves cannot leave the
/// result visibly asymmetric.
pub(crate) fn symmetrize_in_place(matrix: &mut Array2<f64>) {
    let p = matrix.nrows();
    for i in 0..p {
        for j in (i + 1)..p {
            let avg = 0.5 * (matrix[[i, j]] + matrix[[j, i]]);
            matrix[[i, j]] = avg;
            matrix[[j, i]] = avg;
        }
    }
}

/// Inverse of a symmetric positive-definite matrix.
///
/// The first attempt is an unregularized Cholesky solve. If that fails the
/// diagonal is loaded with a geometrically growing ridge, starting at 1e-10
/// of the diagonal scale, until the factorization succeeds.
pub(crate) fn invert_spd(matrix: &Array2<f64>, label: &str) -> Result<Array2<f64>, FaerLinalgError> {
    let p = ensure_square(matrix, label)?;
    let scale = max_abs_diag(matrix);
    let mut ridge = 0.0;
    let mut attempts = 0usize;
    let factor = loop {
        let h_eff = add_ridge(matrix, ridge);
        match h_eff.cholesky(Side::Lower) {
            Ok(chol) => break chol,
            Err(err) => {
                attempts += 1;
                if attempts > MAX_FACTORIZATION_ATTEMPTS {
                    return Err(err);
                }
                ridge = if ridge == 0.0 { scale * 1e-10 } else { ridge * 100.0 };
            }
        }
    };
    if ridge > 0.0 {
        log::warn!("Inverted {label} after loading ridge {ridge:.3e} on the diagonal");
    }

    let mut inv = factor.solve_mat(&Array2::<f64>::eye(p));
    symmetrize_in_place(&mut inv);
    Ok(inv)
}

/// Smallest eigenvalue of a symmetric matrix.
pub(crate) fn min_eigenvalue(matrix: &Array2<f64>, label: &str) -> Result<f64, FaerLinalgError> {
    ensure_square(matrix, label)?;
    let (values, _) = matrix.eigh(Side::Lower)?;
    Ok(values.iter().copied().fold(f64::INFINITY, f64::min))
}

/// Largest eigenvalue of a symmetric matrix.
pub(crate) fn max_eigenvalue(matrix: &Array2<f64>, label: &str) -> Result<f64, FaerLinalgError> {
    ensure_square(matrix, label)?;
    let (values, _) = matrix.eigh(Side::Lower)?;
    Ok(values.iter().copied().fold(f64::NEG_INFINITY, f64::max))
}

/// log det of an SPD matrix, `None` when it is not positive definite.
pub(crate) fn log_det_spd(matrix: &Array2<f64>) -> Option<f64> {
    if matrix.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let chol = matrix.cholesky(Side::Lower).ok()?;
    let log_det = chol.log_det();
    log_det.is_finite().then_some(log_det)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn kahan_sum_keeps_small_terms() {
        let mut acc = KahanSum::default();
        for _ in 0..1000 {
            acc.add(0.1);
        }
        assert!((acc.sum() - 100.0).abs() < 1e-12);
    }

    #[test]
    fn invert_spd_returns_symmetric_inverse() {
        let a = array![[2.0, 0.5, 0.0], [0.5, 1.5, 0.3], [0.0, 0.3, 1.0]];
        let inv = invert_spd(&a, "test").expect("SPD input");
        let ident = a.dot(&inv);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((ident[[i, j]] - expected).abs() < 1e-10);
                assert_eq!(inv[[i, j]], inv[[j, i]]);
            }
        }
    }

    #[test]
    fn invert_spd_rejects_non_square_and_non_finite() {
        let rect = Array2::<f64>::zeros((2, 3));
        assert!(matches!(
            invert_spd(&rect, "rect"),
            Err(FaerLinalgError::NotSquare { .. })
        ));
        let nan = array![[1.0, f64::NAN], [f64::NAN, 1.0]];
        assert!(matches!(
            invert_spd(&nan, "nan"),
            Err(FaerLinalgError::NonFinite { .. })
        ));
    }

    #[test]
    fn eigen_extremes_and_log_det() {
        let a = array![[2.0, 1.0], [1.0, 2.0]];
        assert!((min_eigenvalue(&a, "a").unwrap() - 1.0).abs() < 1e-12);
        assert!((max_eigenvalue(&a, "a").unwrap() - 3.0).abs() < 1e-12);
        assert!((log_det_spd(&a).unwrap() - 3.0f64.ln()).abs() < 1e-12);
        let indefinite = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(log_det_spd(&indefinite).is_none());
    }
}
