use super::lasso::lasso_gram;
use super::{Deadline, NumericalFailure, SolverOptions, empirical_covariance};
use crate::types::{CandidateMatrix, SampleMatrix};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

const SOLVER: &str = "neighbourhood selection";

/// Floor on the coordinate-descent sweeps of each regression. At n ≈ p the
/// regressions stay bounded but are badly conditioned, and the shared default
/// runs out near the dense end of the path.
pub const MIN_REGRESSION_SWEEPS: usize = 100_000;

/// How the two directed neighbourhood estimates of a pair are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SymmetrizationRule {
    /// Edge if either regression selects the other node.
    #[default]
    Or,
    /// Edge only if both regressions select each other.
    And,
}

/// Meinshausen–Bühlmann neighbourhood selection: one lasso regression of
/// every variable on all others.
#[derive(Debug, Clone)]
pub struct NeighbourhoodSelection {
    lambda: f64,
    rule: SymmetrizationRule,
    options: SolverOptions,
    precision: Option<CandidateMatrix>,
    coefficients: Option<Array2<f64>>,
}

impl NeighbourhoodSelection {
    pub fn new(lambda: f64, rule: SymmetrizationRule, options: SolverOptions) -> Self {
        Self {
            lambda,
            rule,
            options,
            precision: None,
            coefficients: None,
        }
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Symmetrized neighbourhood pattern with unit diagonal.
    pub fn precision(&self) -> Option<&CandidateMatrix> {
        self.precision.as_ref()
    }

    pub fn fit(&mut self, x: &SampleMatrix) -> Result<(), NumericalFailure> {
        self.precision = None;
        self.coefficients = None;
        let s = empirical_covariance(SOLVER, x)?;
        let p = s.nrows();
        let deadline = Deadline::start(SOLVER, &self.options);
        let options = SolverOptions {
            inner_max_iter: self.options.inner_max_iter.max(MIN_REGRESSION_SWEEPS),
            ..self.options
        };

        let mut coef = Array2::<f64>::zeros((p, p));
        for i in 0..p {
            let others: Vec<usize> = (0..p).filter(|&k| k != i).collect();
            let gram = s.select(Axis(0), &others).select(Axis(1), &others);
            let rhs = s.row(i).select(Axis(0), &others);
            let beta = lasso_gram(SOLVER, &gram, &rhs, self.lambda, None, &options, &deadline)?;
            for (k, &j) in others.iter().enumerate() {
                coef[[i, j]] = beta[k];
            }
        }

        let mut precision = Array2::<f64>::eye(p);
        for i in 0..p {
            for j in (i + 1)..p {
                let (a, b) = (coef[[i, j]], coef[[j, i]]);
                let keep = match self.rule {
                    SymmetrizationRule::Or => a != 0.0 || b != 0.0,
                    SymmetrizationRule::And => a != 0.0 && b != 0.0,
                };
                if keep {
                    let v = 0.5 * (a + b);
                    precision[[i, j]] = v;
                    precision[[j, i]] = v;
                }
            }
        }
        self.precision = Some(CandidateMatrix::new(precision));
        self.coefficients = Some(coef);
        Ok(())
    }

    /// Held-out residual sum of squares, tr((I − B) S (I − B)ᵀ).
    pub(crate) fn held_out_loss(&self, test_covariance: &Array2<f64>) -> Option<f64> {
        self.coefficients
            .as_ref()
            .map(|b| regression_residual_loss(b, test_covariance))
    }
}

/// Σ_i Var(X_i − Σ_k B_ik X_k) under the covariance `s`.
pub(crate) fn regression_residual_loss(coef: &Array2<f64>, s: &Array2<f64>) -> f64 {
    let p = coef.nrows();
    let residual_map = Array2::<f64>::eye(p) - coef;
    let projected = residual_map.dot(s);
    (&projected * &residual_map).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn chain_sample() -> SampleMatrix {
        // x0 drives x1; x2 is unrelated.
        let x = array![
            [1.0, 0.9, 0.3],
            [-1.0, -1.1, -0.2],
            [0.5, 0.6, 1.0],
            [-0.5, -0.4, -1.1],
            [2.0, 1.9, 0.1],
            [-2.0, -2.1, -0.1]
        ];
        SampleMatrix::new(crate::matrix::standardize_columns(&x))
    }

    #[test]
    fn recovers_strong_pair_and_drops_weak_ones() {
        let mut ns =
            NeighbourhoodSelection::new(0.3, SymmetrizationRule::Or, SolverOptions::default());
        ns.fit(&chain_sample()).expect("small well-posed problem");
        let prec = ns.precision().unwrap();
        assert!(prec[[0, 1]] != 0.0);
        assert_eq!(prec[[0, 1]], prec[[1, 0]]);
        assert_eq!(prec[[0, 0]], 1.0);
    }

    #[test]
    fn and_rule_is_never_denser_than_or_rule() {
        let x = chain_sample();
        for lambda in [0.01, 0.1, 0.5] {
            let mut or =
                NeighbourhoodSelection::new(lambda, SymmetrizationRule::Or, SolverOptions::default());
            let mut and =
                NeighbourhoodSelection::new(lambda, SymmetrizationRule::And, SolverOptions::default());
            or.fit(&x).unwrap();
            and.fit(&x).unwrap();
            let nnz = |m: &CandidateMatrix| m.iter().filter(|&&v| v != 0.0).count();
            assert!(nnz(and.precision().unwrap()) <= nnz(or.precision().unwrap()));
        }
    }

    #[test]
    fn lambda_above_max_correlation_gives_empty_graph() {
        let mut ns =
            NeighbourhoodSelection::new(10.0, SymmetrizationRule::Or, SolverOptions::default());
        ns.fit(&chain_sample()).unwrap();
        assert_eq!(ns.precision().unwrap().0, Array2::<f64>::eye(3));
    }

    #[test]
    fn residual_loss_of_zero_coefficients_is_total_variance() {
        let s = array![[2.0, 0.5], [0.5, 3.0]];
        let b = Array2::<f64>::zeros((2, 2));
        assert!((regression_residual_loss(&b, &s) - 5.0).abs() < 1e-12);
    }
}
