use super::lasso::lasso_gram;
use super::{Deadline, NumericalFailure, SolverOptions, empirical_covariance, ensure_finite};
use crate::linalg::utils::{log_det_spd, symmetrize_in_place};
use crate::types::{CandidateMatrix, SampleMatrix};
use ndarray::{Array1, Array2, Axis};

const SOLVER: &str = "graphical lasso";

/// Graphical lasso by Friedman–Hastie–Tibshirani block coordinate descent.
///
/// W starts at S + λI. Each sweep solves, for every column j, the lasso
/// min ½βᵀW₁₁β − s₁₂ᵀβ + λ‖β‖₁ warm-started from the previous sweep and
/// sets w₁₂ = W₁₁β. The precision is read off the final β's.
#[derive(Debug, Clone)]
pub struct GraphicalLasso {
    lambda: f64,
    options: SolverOptions,
    precision: Option<CandidateMatrix>,
    covariance: Option<Array2<f64>>,
}

impl GraphicalLasso {
    pub fn new(lambda: f64, options: SolverOptions) -> Self {
        Self {
            lambda,
            options,
            precision: None,
            covariance: None,
        }
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    pub fn precision(&self) -> Option<&CandidateMatrix> {
        self.precision.as_ref()
    }

    /// Regularized covariance W of the last fit.
    pub fn covariance(&self) -> Option<&Array2<f64>> {
        self.covariance.as_ref()
    }

    pub fn fit(&mut self, x: &SampleMatrix) -> Result<(), NumericalFailure> {
        self.precision = None;
        self.covariance = None;
        let s = empirical_covariance(SOLVER, x)?;
        let p = s.nrows();
        let deadline = Deadline::start(SOLVER, &self.options);

        let mut w = s.clone();
        for j in 0..p {
            w[[j, j]] += self.lambda;
        }
        let offdiag_scale = mean_abs_off_diagonal(&s);
        let threshold = if offdiag_scale > 0.0 {
            self.options.tol * offdiag_scale
        } else {
            self.options.tol
        };

        let others: Vec<Vec<usize>> = (0..p)
            .map(|j| (0..p).filter(|&k| k != j).collect())
            .collect();
        let mut betas: Vec<Array1<f64>> = vec![Array1::zeros(p.saturating_sub(1)); p];
        let mut converged = p < 2;
        let mut last_change = f64::INFINITY;

        for _ in 0..self.options.max_iter.max(1) {
            if converged {
                break;
            }
            deadline.check()?;
            let w_old = w.clone();
            for j in 0..p {
                let idx = &others[j];
                let w11 = w.select(Axis(0), idx).select(Axis(1), idx);
                let s12 = s.column(j).select(Axis(0), idx);
                let warm = std::mem::take(&mut betas[j]);
                let beta = lasso_gram(
                    SOLVER,
                    &w11,
                    &s12,
                    self.lambda,
                    Some(warm),
                    &self.options,
                    &deadline,
                )?;
                let w12 = w11.dot(&beta);
                for (k, &row) in idx.iter().enumerate() {
                    w[[row, j]] = w12[k];
                    w[[j, row]] = w12[k];
                }
                betas[j] = beta;
            }
            ensure_finite(SOLVER, &w)?;
            last_change = (&w - &w_old).mapv(f64::abs).mean().unwrap_or(0.0);
            converged = last_change <= threshold;
        }
        if !converged {
            return Err(NumericalFailure::DidNotConverge {
                solver: SOLVER,
                max_iter: self.options.max_iter,
                last_change,
            });
        }

        let mut theta = Array2::<f64>::zeros((p, p));
        for j in 0..p {
            let idx = &others[j];
            let beta = &betas[j];
            let w12 = w.column(j).select(Axis(0), idx);
            let denom = w[[j, j]] - w12.dot(beta);
            let theta_jj = 1.0 / denom;
            if !(theta_jj > 0.0 && theta_jj.is_finite()) {
                return Err(NumericalFailure::NotPositiveDefinite {
                    solver: SOLVER,
                    detail: format!("diagonal entry {j} is {theta_jj:.3e}"),
                });
            }
            theta[[j, j]] = theta_jj;
            for (k, &row) in idx.iter().enumerate() {
                theta[[row, j]] = -beta[k] * theta_jj;
            }
        }
        symmetrize_in_place(&mut theta);
        ensure_finite(SOLVER, &theta)?;
        self.precision = Some(CandidateMatrix::new(theta));
        self.covariance = Some(w);
        Ok(())
    }

    /// Gaussian negative log-likelihood −log det Θ + tr(SΘ).
    pub(crate) fn held_out_loss(&self, test_covariance: &Array2<f64>) -> Option<f64> {
        let theta = self.precision.as_ref()?;
        let log_det = log_det_spd(theta)?;
        Some(-log_det + (test_covariance * &theta.0).sum())
    }
}

fn mean_abs_off_diagonal(s: &Array2<f64>) -> f64 {
    let p = s.nrows();
    if p < 2 {
        return 0.0;
    }
    let mut total = 0.0;
    for ((i, j), v) in s.indexed_iter() {
        if i != j {
            total += v.abs();
        }
    }
    total / (p * (p - 1)) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::time::Duration;

    fn two_variable_sample() -> SampleMatrix {
        SampleMatrix::new(array![
            [1.0, 0.8],
            [-1.0, -0.6],
            [0.5, 0.7],
            [-0.5, -0.9],
            [0.2, -0.1],
            [-0.2, 0.1]
        ])
    }

    #[test]
    fn two_variables_match_closed_form() {
        // For p = 2 the off-diagonal of W is soft(s₁₂, λ).
        let x = two_variable_sample();
        let s = crate::matrix::covariance(&x.0, 0).unwrap();
        let lambda = 0.1;
        let options = SolverOptions {
            tol: 1e-10,
            ..SolverOptions::default()
        };
        let mut gl = GraphicalLasso::new(lambda, options);
        gl.fit(&x).expect("two-variable problem");
        let w = gl.covariance().unwrap();
        let expected = s[[0, 1]].signum() * (s[[0, 1]].abs() - lambda).max(0.0);
        assert_abs_diff_eq!(w[[0, 1]], expected, epsilon = 1e-8);
        assert_abs_diff_eq!(w[[0, 0]], s[[0, 0]] + lambda, epsilon = 1e-12);

        let theta = gl.precision().unwrap();
        let identity = theta.dot(w);
        assert_abs_diff_eq!(identity[[0, 0]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(identity[[0, 1]], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn large_penalty_gives_diagonal_precision() {
        let x = two_variable_sample();
        let s = crate::matrix::covariance(&x.0, 0).unwrap();
        let lambda = 10.0;
        let mut gl = GraphicalLasso::new(lambda, SolverOptions::default());
        gl.fit(&x).unwrap();
        let theta = gl.precision().unwrap();
        assert_eq!(theta[[0, 1]], 0.0);
        assert_abs_diff_eq!(theta[[0, 0]], 1.0 / (s[[0, 0]] + lambda), epsilon = 1e-12);
    }

    #[test]
    fn zero_time_budget_is_reported_as_timeout() {
        let options = SolverOptions {
            time_budget: Some(Duration::ZERO),
            ..SolverOptions::default()
        };
        let mut gl = GraphicalLasso::new(0.1, options);
        assert!(matches!(
            gl.fit(&two_variable_sample()),
            Err(NumericalFailure::TimedOut { .. })
        ));
        assert!(gl.precision().is_none());
    }

    #[test]
    fn held_out_loss_prefers_the_fitted_model_on_training_data() {
        let x = two_variable_sample();
        let s = crate::matrix::covariance(&x.0, 0).unwrap();
        let mut small = GraphicalLasso::new(0.01, SolverOptions::default());
        let mut large = GraphicalLasso::new(5.0, SolverOptions::default());
        small.fit(&x).unwrap();
        large.fit(&x).unwrap();
        assert!(small.held_out_loss(&s).unwrap() < large.held_out_loss(&s).unwrap());
    }
}
