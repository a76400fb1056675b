use super::lasso::soft_threshold;
use super::neighbourhood::regression_residual_loss;
use super::{Deadline, NumericalFailure, SolverOptions, empirical_covariance, ensure_finite};
use crate::types::{CandidateMatrix, SampleMatrix};
use ndarray::Array2;

const SOLVER: &str = "SPACE";

/// Re-weighting rounds of σⁱⁱ around the inner partial-correlation solve.
pub const DEFAULT_OUTER_ITERATIONS: usize = 2;

/// Sparse partial correlation estimation (joint sparse regression).
///
/// Minimizes ½ Σᵢ ‖Xᵢ − Σⱼ ρᵢⱼ √(σʲʲ/σⁱⁱ) Xⱼ‖² + λ Σ_{i<j} |ρᵢⱼ| over the
/// symmetric ρ by pairwise coordinate descent on S, alternating with the
/// residual-variance update of σⁱⁱ.
#[derive(Debug, Clone)]
pub struct Space {
    lambda: f64,
    options: SolverOptions,
    outer_iterations: usize,
    partial_correlation: Option<CandidateMatrix>,
    precision: Option<Array2<f64>>,
    coefficients: Option<Array2<f64>>,
}

impl Space {
    pub fn new(lambda: f64, options: SolverOptions) -> Self {
        Self {
            lambda,
            options,
            outer_iterations: DEFAULT_OUTER_ITERATIONS,
            partial_correlation: None,
            precision: None,
            coefficients: None,
        }
    }

    pub fn with_outer_iterations(mut self, iterations: usize) -> Self {
        self.outer_iterations = iterations.max(1);
        self
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Estimated partial correlations ρ with unit diagonal.
    pub fn partial_correlation(&self) -> Option<&CandidateMatrix> {
        self.partial_correlation.as_ref()
    }

    /// Precision implied by ρ and the fitted σⁱⁱ.
    pub fn precision(&self) -> Option<&Array2<f64>> {
        self.precision.as_ref()
    }

    pub fn fit(&mut self, x: &SampleMatrix) -> Result<(), NumericalFailure> {
        self.partial_correlation = None;
        self.precision = None;
        self.coefficients = None;
        let s = empirical_covariance(SOLVER, x)?;
        let p = s.nrows();
        let deadline = Deadline::start(SOLVER, &self.options);

        let mut sig = vec![1.0f64; p];
        let mut rho = Array2::<f64>::zeros((p, p));
        let mut coef = Array2::<f64>::zeros((p, p));
        for _ in 0..self.outer_iterations {
            solve_partial_correlations(
                &s,
                &sig,
                self.lambda,
                &mut rho,
                &mut coef,
                &self.options,
                &deadline,
            )?;
            sig = residual_precisions(&s, &coef)?;
            refresh_coefficients(&rho, &sig, &mut coef);
        }
        ensure_finite(SOLVER, &rho)?;

        let mut partial = rho.clone();
        let mut precision = Array2::<f64>::zeros((p, p));
        for i in 0..p {
            partial[[i, i]] = 1.0;
            precision[[i, i]] = sig[i];
            for j in 0..p {
                if i != j {
                    precision[[i, j]] = -rho[[i, j]] * (sig[i] * sig[j]).sqrt();
                }
            }
        }
        self.partial_correlation = Some(CandidateMatrix::new(partial));
        self.precision = Some(precision);
        self.coefficients = Some(coef);
        Ok(())
    }

    /// Held-out regression residual sum of squares of the implied β.
    pub(crate) fn held_out_loss(&self, test_covariance: &Array2<f64>) -> Option<f64> {
        self.coefficients
            .as_ref()
            .map(|b| regression_residual_loss(b, test_covariance))
    }
}

/// βᵢⱼ = ρᵢⱼ √(σʲʲ/σⁱⁱ).
fn refresh_coefficients(rho: &Array2<f64>, sig: &[f64], coef: &mut Array2<f64>) {
    let p = rho.nrows();
    for i in 0..p {
        for j in 0..p {
            coef[[i, j]] = if i == j {
                0.0
            } else {
                rho[[i, j]] * (sig[j] / sig[i]).sqrt()
            };
        }
    }
}

/// σⁱⁱ = 1 / residual variance of regression i.
fn residual_precisions(s: &Array2<f64>, coef: &Array2<f64>) -> Result<Vec<f64>, NumericalFailure> {
    let p = s.nrows();
    let mut sig = Vec::with_capacity(p);
    for i in 0..p {
        let b = coef.row(i);
        let rss = s[[i, i]] - 2.0 * b.dot(&s.column(i)) + b.dot(&s.dot(&b));
        if !(rss > 0.0 && rss.is_finite()) {
            return Err(NumericalFailure::Singular {
                solver: SOLVER,
                index: i,
            });
        }
        sig.push(1.0 / rss);
    }
    Ok(sig)
}

/// Pairwise coordinate descent on ρ for fixed σ. `rho` and `coef` are warm
/// starts and are updated in place.
fn solve_partial_correlations(
    s: &Array2<f64>,
    sig: &[f64],
    lambda: f64,
    rho: &mut Array2<f64>,
    coef: &mut Array2<f64>,
    options: &SolverOptions,
    deadline: &Deadline,
) -> Result<(), NumericalFailure> {
    let p = s.nrows();
    refresh_coefficients(rho, sig, coef);
    let mut last_change = f64::INFINITY;
    for _ in 0..options.inner_max_iter.max(1) {
        deadline.check()?;
        let mut max_change = 0.0f64;
        for i in 0..p {
            for j in (i + 1)..p {
                let b_ij = (sig[j] / sig[i]).sqrt();
                let b_ji = (sig[i] / sig[j]).sqrt();
                // Partial residual correlations with the (i, j) term removed.
                let ci = s[[i, j]] - coef.row(i).dot(&s.column(j)) + coef[[i, j]] * s[[j, j]];
                let cj = s[[j, i]] - coef.row(j).dot(&s.column(i)) + coef[[j, i]] * s[[i, i]];
                let a = b_ij * b_ij * s[[j, j]] + b_ji * b_ji * s[[i, i]];
                if !(a > 0.0 && a.is_finite()) {
                    return Err(NumericalFailure::Singular {
                        solver: SOLVER,
                        index: i,
                    });
                }
                let new = soft_threshold(b_ij * ci + b_ji * cj, lambda) / a;
                let delta = new - rho[[i, j]];
                if delta != 0.0 {
                    rho[[i, j]] = new;
                    rho[[j, i]] = new;
                    coef[[i, j]] = new * b_ij;
                    coef[[j, i]] = new * b_ji;
                    max_change = max_change.max(delta.abs());
                }
            }
        }
        if !max_change.is_finite() {
            return Err(NumericalFailure::NonFinite { solver: SOLVER });
        }
        last_change = max_change;
        if max_change < options.tol {
            return Ok(());
        }
    }
    Err(NumericalFailure::DidNotConverge {
        solver: SOLVER,
        max_iter: options.inner_max_iter,
        last_change,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample() -> SampleMatrix {
        let x = array![
            [1.0, 0.9, 0.3],
            [-1.0, -1.1, -0.2],
            [0.5, 0.6, 1.0],
            [-0.5, -0.4, -1.1],
            [2.0, 1.7, 0.1],
            [-2.0, -1.9, -0.1],
            [0.3, -0.2, 0.8],
            [-0.3, 0.4, -0.8]
        ];
        SampleMatrix::new(crate::matrix::standardize_columns(&x))
    }

    /// Stationarity of the pairwise objective at fixed σ.
    fn kkt_violation(s: &Array2<f64>, sig: &[f64], rho: &Array2<f64>, lambda: f64) -> f64 {
        let p = s.nrows();
        let mut coef = Array2::zeros((p, p));
        refresh_coefficients(rho, sig, &mut coef);
        let mut worst = 0.0f64;
        for i in 0..p {
            for j in (i + 1)..p {
                let b_ij = (sig[j] / sig[i]).sqrt();
                let b_ji = (sig[i] / sig[j]).sqrt();
                let ri = s[[i, j]] - coef.row(i).dot(&s.column(j));
                let rj = s[[j, i]] - coef.row(j).dot(&s.column(i));
                let grad = -(b_ij * ri + b_ji * rj);
                let r = rho[[i, j]];
                let v = if r != 0.0 {
                    (grad + lambda * r.signum()).abs()
                } else {
                    (grad.abs() - lambda).max(0.0)
                };
                worst = worst.max(v);
            }
        }
        worst
    }

    #[test]
    fn inner_solve_satisfies_kkt_conditions() {
        let x = sample();
        let s = crate::matrix::covariance(&x.0, 0).unwrap();
        let sig = vec![1.0, 1.5, 0.8];
        let options = SolverOptions {
            tol: 1e-12,
            inner_max_iter: 100_000,
            ..SolverOptions::default()
        };
        let deadline = Deadline::start("test", &options);
        for lambda in [0.01, 0.1, 0.4] {
            let mut rho = Array2::zeros((3, 3));
            let mut coef = Array2::zeros((3, 3));
            solve_partial_correlations(&s, &sig, lambda, &mut rho, &mut coef, &options, &deadline)
                .expect("small problem");
            assert!(kkt_violation(&s, &sig, &rho, lambda) < 1e-8, "lambda={lambda}");
        }
    }

    #[test]
    fn partial_correlation_has_unit_diagonal_and_is_symmetric() {
        let mut space = Space::new(0.05, SolverOptions::default());
        space.fit(&sample()).expect("well-posed problem");
        let rho = space.partial_correlation().unwrap();
        for i in 0..3 {
            assert_eq!(rho[[i, i]], 1.0);
            for j in 0..3 {
                assert_eq!(rho[[i, j]], rho[[j, i]]);
            }
        }
        assert!(rho[[0, 1]] > 0.0);
        let precision = space.precision().unwrap();
        assert!(precision.diag().iter().all(|&v| v > 0.0));
        assert!(precision[[0, 1]] < 0.0);
    }

    #[test]
    fn penalty_above_every_correlation_empties_the_graph() {
        let mut space = Space::new(100.0, SolverOptions::default());
        space.fit(&sample()).unwrap();
        assert_eq!(space.partial_correlation().unwrap().0, Array2::<f64>::eye(3));
    }
}
