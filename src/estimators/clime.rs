use super::lasso::soft_threshold;
use super::scio::{column_quadratic_loss, symmetrize_by_min_magnitude};
use super::{Deadline, NumericalFailure, SolverOptions, empirical_covariance, ensure_finite};
use crate::linalg::utils::max_eigenvalue;
use crate::types::{CandidateMatrix, SampleMatrix};
use ndarray::{Array1, Array2, ArrayView1};

const SOLVER: &str = "CLIME";

/// ADMM rounds allowed per unit of `SolverOptions::max_iter`.
const ROUNDS_PER_ITER: usize = 20;

/// Constrained ℓ₁ inverse matrix estimation.
///
/// Column i solves min ‖β‖₁ s.t. ‖Sβ − eᵢ‖∞ ≤ λ by linearized ADMM on the
/// split z = Sβ − eᵢ, with step 1/σ² where σ is the largest eigenvalue of S.
#[derive(Debug, Clone)]
pub struct Clime {
    lambda: f64,
    options: SolverOptions,
    precision: Option<CandidateMatrix>,
}

impl Clime {
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
        let sigma = max_eigenvalue(&s, "sample covariance").map_err(|err| {
            NumericalFailure::NotPositiveDefinite {
                solver: SOLVER,
                detail: err.to_string(),
            }
        })?;
        let step = sigma * sigma;
        if !(step > 0.0 && step.is_finite()) {
            return Err(NumericalFailure::Singular {
                solver: SOLVER,
                index: 0,
            });
        }
        let deadline = Deadline::start(SOLVER, &self.options);

        let mut columns = Array2::<f64>::zeros((p, p));
        for i in 0..p {
            let beta = clime_column(&s, i, self.lambda, step, &self.options, &deadline)?;
            columns.column_mut(i).assign(&beta);
        }
        ensure_finite(SOLVER, &columns)?;
        self.precision = Some(CandidateMatrix::new(symmetrize_by_min_magnitude(&columns)));
        Ok(())
    }

    pub(crate) fn held_out_loss(&self, test_covariance: &Array2<f64>) -> Option<f64> {
        self.precision
            .as_ref()
            .map(|omega| column_quadratic_loss(omega, test_covariance))
    }
}

fn clip(v: f64, bound: f64) -> f64 {
    v.clamp(-bound, bound)
}

fn max_abs(v: ArrayView1<f64>) -> f64 {
    v.iter().fold(0.0f64, |acc, x| acc.max(x.abs()))
}

/// One CLIME column. `step` must dominate the squared spectral norm of `s`.
pub(crate) fn clime_column(
    s: &Array2<f64>,
    column: usize,
    lambda: f64,
    step: f64,
    options: &SolverOptions,
    deadline: &Deadline,
) -> Result<Array1<f64>, NumericalFailure> {
    let p = s.nrows();
    let mut e = Array1::<f64>::zeros(p);
    e[column] = 1.0;
    let bound = lambda.max(0.0);

    let mut beta = Array1::<f64>::zeros(p);
    let mut z = (-&e).mapv(|v| clip(v, bound));
    let mut u = Array1::<f64>::zeros(p);
    let mut s_beta = Array1::<f64>::zeros(p);

    let rounds = options.max_iter.max(1) * ROUNDS_PER_ITER;
    let mut last_change = f64::INFINITY;
    for round in 0..rounds {
        if round % ROUNDS_PER_ITER == 0 {
            deadline.check()?;
        }
        let resid = &s_beta - &z - &e + &u;
        let grad = s.dot(&resid);
        beta.zip_mut_with(&grad, |b, &g| *b = soft_threshold(*b - g / step, 1.0 / step));
        s_beta = s.dot(&beta);

        let z_old = z.clone();
        z = (&s_beta - &e + &u).mapv(|v| clip(v, bound));
        let primal = &s_beta - &z - &e;
        u += &primal;

        let primal_norm = max_abs(primal.view());
        let dual_norm = max_abs((&z - &z_old).view());
        if !(primal_norm.is_finite() && dual_norm.is_finite()) {
            return Err(NumericalFailure::NonFinite { solver: SOLVER });
        }
        last_change = primal_norm.max(dual_norm);
        if last_change < options.tol {
            return Ok(beta);
        }
    }
    Err(NumericalFailure::DidNotConverge {
        solver: SOLVER,
        max_iter: rounds,
        last_change,
    })
}
