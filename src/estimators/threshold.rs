use super::{Deadline, NumericalFailure, SolverOptions, empirical_covariance};
use crate::types::{CandidateMatrix, SampleMatrix};
use ndarray::Array2;

const SOLVER: &str = "covariance threshold";

/// Hard-thresholded sample covariance.
#[derive(Debug, Clone)]
pub struct ThresholdEstimator {
    lambda: f64,
    options: SolverOptions,
    covariance: Option<CandidateMatrix>,
}

impl ThresholdEstimator {
    pub fn new(lambda: f64, options: SolverOptions) -> Self {
        Self {
            lambda,
            options,
            covariance: None,
        }
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    pub fn covariance(&self) -> Option<&CandidateMatrix> {
        self.covariance.as_ref()
    }

    pub fn fit(&mut self, x: &SampleMatrix) -> Result<(), NumericalFailure> {
        self.covariance = None;
        if self.lambda.is_nan() || self.lambda < 0.0 {
            return Err(NumericalFailure::InvalidInput {
                solver: SOLVER,
                reason: format!("threshold must be non-negative, got {}", self.lambda),
            });
        }
        Deadline::start(SOLVER, &self.options).check()?;
        let mut s = empirical_covariance(SOLVER, x)?;
        for ((i, j), v) in s.indexed_iter_mut() {
            if i != j && v.abs() <= self.lambda {
                *v = 0.0;
            }
        }
        self.covariance = Some(CandidateMatrix::new(s));
        Ok(())
    }

    /// Squared Frobenius distance to the held-out covariance.
    pub(crate) fn held_out_loss(&self, test_covariance: &Array2<f64>) -> Option<f64> {
        let fitted = self.covariance.as_ref()?;
        Some((&fitted.0 - test_covariance).mapv(|v| v * v).sum())
    }
}
