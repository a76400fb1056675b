use super::{Deadline, NumericalFailure, SolverOptions};
use ndarray::{Array1, ArrayBase, Data, Ix1, Ix2};

#[inline]
pub(crate) fn soft_threshold(z: f64, lambda: f64) -> f64 {
    if z > lambda {
        z - lambda
    } else if z < -lambda {
        z + lambda
    } else {
        0.0
    }
}

/// Minimize ½βᵀGβ − rᵀβ + λ‖β‖₁ by cyclic coordinate descent.
///
/// `gram` must be symmetric with a positive diagonal. `Gβ` is kept up to date
/// incrementally so one sweep costs O(k²) for k coordinates. Converged when
/// the largest coordinate move of a sweep is below `options.tol`.
pub(crate) fn lasso_gram<S1, S2>(
    solver: &'static str,
    gram: &ArrayBase<S1, Ix2>,
    rhs: &ArrayBase<S2, Ix1>,
    lambda: f64,
    warm_start: Option<Array1<f64>>,
    options: &SolverOptions,
    deadline: &Deadline,
) -> Result<Array1<f64>, NumericalFailure>
where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
{
    let k = rhs.len();
    let mut beta = match warm_start {
        Some(b) if b.len() == k => b,
        _ => Array1::zeros(k),
    };
    if k == 0 {
        return Ok(beta);
    }
    for j in 0..k {
        let d = gram[[j, j]];
        if !(d > 0.0 && d.is_finite()) {
            return Err(NumericalFailure::Singular { solver, index: j });
        }
    }

    let mut g_beta = gram.dot(&beta);
    let mut last_change = f64::INFINITY;
    for _ in 0..options.inner_max_iter.max(1) {
        deadline.check()?;
        let mut max_change = 0.0f64;
        for j in 0..k {
            let old = beta[j];
            let d = gram[[j, j]];
            let z = rhs[j] - (g_beta[j] - d * old);
            let new = soft_threshold(z, lambda) / d;
            let delta = new - old;
            if delta != 0.0 {
                beta[j] = new;
                g_beta.scaled_add(delta, &gram.column(j));
                max_change = max_change.max(delta.abs());
            }
        }
        if !max_change.is_finite() {
            return Err(NumericalFailure::NonFinite { solver });
        }
        last_change = max_change;
        if max_change < options.tol {
            return Ok(beta);
        }
    }
    Err(NumericalFailure::DidNotConverge {
        solver,
        max_iter: options.inner_max_iter,
        last_change,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    fn kkt_violation(gram: &Array2<f64>, rhs: &Array1<f64>, beta: &Array1<f64>, lambda: f64) -> f64 {
        let grad = gram.dot(beta) - rhs;
        let mut worst = 0.0f64;
        for j in 0..beta.len() {
            let v = if beta[j] != 0.0 {
                (grad[j] + lambda * beta[j].signum()).abs()
            } else {
                (grad[j].abs() - lambda).max(0.0)
            };
            worst = worst.max(v);
        }
        worst
    }

    #[test]
    fn soft_threshold_shrinks_towards_zero() {
        assert_eq!(soft_threshold(3.0, 1.0), 2.0);
        assert_eq!(soft_threshold(-3.0, 1.0), -2.0);
        assert_eq!(soft_threshold(0.5, 1.0), 0.0);
    }

    #[test]
    fn solution_satisfies_kkt_conditions() {
        let gram = array![[1.0, 0.3, 0.1], [0.3, 1.0, -0.2], [0.1, -0.2, 1.0]];
        let rhs = array![0.8, -0.1, 0.4];
        let options = SolverOptions {
            tol: 1e-10,
            ..SolverOptions::default()
        };
        let deadline = Deadline::start("test", &options);
        for lambda in [0.0, 0.05, 0.2] {
            let beta = lasso_gram("test", &gram, &rhs, lambda, None, &options, &deadline)
                .expect("well-conditioned problem");
            assert!(kkt_violation(&gram, &rhs, &beta, lambda) < 1e-8, "lambda={lambda}");
        }
    }

    #[test]
    fn large_penalty_gives_zero_solution() {
        let gram = Array2::<f64>::eye(3);
        let rhs = array![0.5, -0.7, 0.2];
        let options = SolverOptions::default();
        let deadline = Deadline::start("test", &options);
        let beta = lasso_gram("test", &gram, &rhs, 1.0, None, &options, &deadline).unwrap();
        assert!(beta.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn non_positive_diagonal_is_singular() {
        let gram = array![[1.0, 0.0], [0.0, 0.0]];
        let rhs = array![1.0, 1.0];
        let options = SolverOptions::default();
        let deadline = Deadline::start("test", &options);
        assert!(matches!(
            lasso_gram("test", &gram, &rhs, 0.1, None, &options, &deadline),
            Err(NumericalFailure::Singular { index: 1, .. })
        ));
    }

    #[test]
    fn exhausted_budget_reports_non_convergence() {
        let gram = array![[1.0, 0.99], [0.99, 1.0]];
        let rhs = array![1.0, -1.0];
        let options = SolverOptions {
            tol: 1e-14,
            inner_max_iter: 2,
            ..SolverOptions::default()
        };
        let deadline = Deadline::start("test", &options);
        assert!(matches!(
            lasso_gram("test", &gram, &rhs, 0.0, None, &options, &deadline),
            Err(NumericalFailure::DidNotConverge { max_iter: 2, .. })
        ));
    }
}
