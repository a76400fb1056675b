use super::lasso::lasso_gram;
use super::{Deadline, NumericalFailure, SolverOptions, empirical_covariance, ensure_finite};
use crate::types::{CandidateMatrix, SampleMatrix};
use ndarray::{Array1, Array2};

const SOLVER: &str = "SCIO";

/// Sparse column-wise inverse operator.
///
/// Column i of the precision solves min ½βᵀSβ − eᵢᵀβ + λ‖β‖₁; the final
/// estimate keeps the smaller-magnitude entry of each symmetric pair.
#[derive(Debug, Clone)]
pub struct Scio {
    lambda: f64,
    options: SolverOptions,
    precision: Option<CandidateMatrix>,
}

impl Scio {
    pub fn new(lambda: f64, options: SolverOptions) -> Self {
        Self {
            lambda,
            options,
            precision: None,
        }
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    pub fn precision(&self) -> Option<&CandidateMatrix> {
        self.precision.as_ref()
    }

    pub fn fit(&mut self, x: &SampleMatrix) -> Result<(), NumericalFailure> {
        self.precision = None;
        let s = empirical_covariance(SOLVER, x)?;
        let p = s.nrows();
        let deadline = Deadline::start(SOLVER, &self.options);

        let mut columns = Array2::<f64>::zeros((p, p));
        for i in 0..p {
            let mut e = Array1::<f64>::zeros(p);
            e[i] = 1.0;
            let beta = lasso_gram(SOLVER, &s, &e, self.lambda, None, &self.options, &deadline)?;
            columns.column_mut(i).assign(&beta);
        }
        ensure_finite(SOLVER, &columns)?;
        self.precision = Some(CandidateMatrix::new(symmetrize_by_min_magnitude(&columns)));
        Ok(())
    }

    /// ½ tr(ΩSΩ) − tr(Ω) on the held-out covariance.
    pub(crate) fn held_out_loss(&self, test_covariance: &Array2<f64>) -> Option<f64> {
        self.precision
            .as_ref()
            .map(|omega| column_quadratic_loss(omega, test_covariance))
    }
}

pub(crate) fn symmetrize_by_min_magnitude(columns: &Array2<f64>) -> Array2<f64> {
    let p = columns.nrows();
    let mut out = columns.clone();
    for i in 0..p {
        for j in (i + 1)..p {
            let (a, b) = (columns[[i, j]], columns[[j, i]]);
            let v = if a.abs() <= b.abs() { a } else { b };
            out[[i, j]] = v;
            out[[j, i]] = v;
        }
    }
    out
}

pub(crate) fn column_quadratic_loss(omega: &Array2<f64>, s: &Array2<f64>) -> f64 {
    let quad = (&omega.t().dot(s) * &omega.t()).sum();
    0.5 * quad - omega.diag().sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::utils::invert_spd;
    use ndarray::array;

    #[test]
    fn zero_penalty_recovers_inverse_covariance() {
        let x = array![
            [1.2, 0.3, -0.5],
            [-0.7, 0.8, 0.1],
            [0.4, -1.1, 0.9],
            [-1.5, 0.2, -0.3],
            [0.9, 0.6, 0.4],
            [-0.3, -0.8, -0.6]
        ];
        let sample = SampleMatrix::new(x);
        let options = SolverOptions {
            tol: 1e-12,
            inner_max_iter: 100_000,
            ..SolverOptions::default()
        };
        let mut scio = Scio::new(0.0, options);
        scio.fit(&sample).expect("full-rank sample");
        let s = crate::matrix::covariance(&sample.0, 0).unwrap();
        let expected = invert_spd(&s, "S").unwrap();
        let got = scio.precision().unwrap();
        for i in 0..3 {
            for j in 0..3 {
                assert!(
                    (got[[i, j]] - expected[[i, j]]).abs() < 1e-6,
                    "({i},{j}): {} vs {}",
                    got[[i, j]],
                    expected[[i, j]]
                );
            }
        }
    }

    #[test]
    fn min_magnitude_symmetrization() {
        let cols = array![[1.0, 0.2], [-0.5, 2.0]];
        let sym = symmetrize_by_min_magnitude(&cols);
        assert_eq!(sym, array![[1.0, 0.2], [0.2, 2.0]]);
    }

    #[test]
    fn quadratic_loss_is_minimized_by_true_inverse() {
        let s = array![[2.0, 0.5], [0.5, 1.0]];
        let inv = invert_spd(&s, "s").unwrap();
        let best = column_quadratic_loss(&inv, &s);
        let worse = column_quadratic_loss(&(&inv * 1.1), &s);
        assert!(best < worse);
        // At Ω = S⁻¹ the loss is −½ tr(S⁻¹).
        assert!((best + 0.5 * inv.diag().sum()).abs() < 1e-12);
    }
}
