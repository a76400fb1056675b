use super::{
    Estimator, EstimatorKind, FamilySettings, NumericalFailure, SolverOptions, StructureEstimator,
};
use crate::error::BenchError;
use crate::matrix::covariance;
use crate::path::build_regularization_path;
use crate::types::SampleMatrix;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

pub fn default_folds() -> usize {
    5
}

pub fn default_grid_len() -> usize {
    10
}

/// K-fold cross-validation settings for internally tuned estimators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CvConfig {
    #[serde(default = "default_folds")]
    pub folds: usize,
    #[serde(default = "default_grid_len")]
    pub grid_len: usize,
}

impl Default for CvConfig {
    fn default() -> Self {
        Self {
            folds: default_folds(),
            grid_len: default_grid_len(),
        }
    }
}

impl CvConfig {
    pub fn validate(&self) -> Result<(), BenchError> {
        if self.folds < 2 {
            return Err(BenchError::InvalidConfig(format!(
                "cross-validation needs at least 2 folds, got {}",
                self.folds
            )));
        }
        if self.grid_len == 0 {
            return Err(BenchError::InvalidConfig(
                "cross-validation grid must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// An estimator family whose λ is picked by minimizing the mean held-out
/// loss over contiguous folds, then refitted on the whole sample.
#[derive(Debug, Clone)]
pub struct CrossValidated {
    kind: EstimatorKind,
    config: CvConfig,
    lower_bound_fraction: f64,
    solver: SolverOptions,
    settings: FamilySettings,
    seed: u64,
    selected: Option<Box<Estimator>>,
    selected_lambda: Option<f64>,
    mean_losses: Vec<(f64, f64)>,
}

impl CrossValidated {
    pub fn new(
        kind: EstimatorKind,
        config: CvConfig,
        lower_bound_fraction: f64,
        solver: SolverOptions,
        seed: u64,
    ) -> Self {
        Self {
            kind,
            config,
            lower_bound_fraction,
            solver,
            settings: FamilySettings::default(),
            seed,
            selected: None,
            selected_lambda: None,
            mean_losses: Vec::new(),
        }
    }

    /// Family-specific settings applied to every fold fit and the refit.
    pub fn with_family_settings(mut self, settings: FamilySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn kind(&self) -> EstimatorKind {
        self.kind
    }

    /// The estimator refitted at the chosen λ.
    pub fn selected(&self) -> Option<&Estimator> {
        self.selected.as_deref()
    }

    pub fn selected_lambda(&self) -> Option<f64> {
        self.selected_lambda
    }

    /// (λ, mean held-out loss) for every grid value of the last fit.
    pub fn mean_losses(&self) -> &[(f64, f64)] {
        &self.mean_losses
    }

    pub fn fit(&mut self, x: &SampleMatrix) -> Result<(), NumericalFailure> {
        self.selected = None;
        self.selected_lambda = None;
        self.mean_losses.clear();
        let solver = self.kind.name();
        let n = x.n_samples();
        let folds = self.config.folds;
        if folds < 2 || n < 2 * folds {
            return Err(NumericalFailure::InvalidInput {
                solver,
                reason: format!("{n} rows cannot be split into {folds} folds of at least 2"),
            });
        }
        let grid = build_regularization_path(x, self.lower_bound_fraction, self.config.grid_len)
            .map_err(|err| NumericalFailure::InvalidInput {
                solver,
                reason: err.to_string(),
            })?;

        let splits = contiguous_folds(x, folds)?;
        let mut best: Option<(f64, f64)> = None;
        for &lambda in grid.iter() {
            let mut total = 0.0;
            for (train, test_cov) in &splits {
                let mut estimator =
                    self.kind
                        .build_fixed(lambda, self.solver, self.settings, self.seed);
                let loss = match estimator.fit(train) {
                    Ok(()) => estimator.held_out_loss(test_cov).unwrap_or(f64::INFINITY),
                    Err(_) => f64::INFINITY,
                };
                total += loss;
            }
            let mean = total / folds as f64;
            self.mean_losses.push((lambda, mean));
            // Ties go to the sparser (larger) λ since the grid ascends.
            if mean.is_finite() && best.is_none_or(|(_, b)| mean <= b) {
                best = Some((lambda, mean));
            }
        }

        let Some((lambda, loss)) = best else {
            return Err(NumericalFailure::NoViableTuning {
                solver,
                candidates: grid.len(),
            });
        };
        log::debug!("{solver}: cross-validation picked lambda={lambda:.4e} (loss {loss:.4e})");
        let mut refit = self
            .kind
            .build_fixed(lambda, self.solver, self.settings, self.seed);
        refit.fit(x)?;
        self.selected = Some(Box::new(refit));
        self.selected_lambda = Some(lambda);
        Ok(())
    }
}

/// (training sample, held-out ML covariance) for each of `folds` contiguous blocks.
fn contiguous_folds(
    x: &SampleMatrix,
    folds: usize,
) -> Result<Vec<(SampleMatrix, Array2<f64>)>, NumericalFailure> {
    let n = x.n_samples();
    let mut out = Vec::with_capacity(folds);
    for k in 0..folds {
        let start = k * n / folds;
        let end = (k + 1) * n / folds;
        let train_rows: Vec<usize> = (0..n).filter(|&r| r < start || r >= end).collect();
        let test_rows: Vec<usize> = (start..end).collect();
        let train = SampleMatrix::new(x.select(Axis(0), &train_rows));
        let test = x.select(Axis(0), &test_rows);
        let test_cov = covariance(&test, 0).ok_or_else(|| NumericalFailure::InvalidInput {
            solver: "cross-validation",
            reason: format!("fold {k} is empty"),
        })?;
        out.push((train, test_cov));
    }
    Ok(out)
}
