//! Structure estimators and the contract the benchmark drives them through.
//!
//! Every family fixes its tuning value at construction, fits against a
//! [`SampleMatrix`] and exposes exactly one family-named accessor for the
//! recovered matrix. [`Estimator`] closes over the known families and maps
//! that accessor onto [`StructureEstimator::estimate`] by declared
//! [`OutputKind`].

pub mod clime;
pub mod cv;
pub mod glasso;
pub(crate) mod lasso;
pub mod neighbourhood;
pub mod permutation;
pub mod scio;
pub mod space;
pub mod threshold;

pub use clime::Clime;
pub use cv::{CrossValidated, CvConfig};
pub use glasso::GraphicalLasso;
pub use neighbourhood::{NeighbourhoodSelection, SymmetrizationRule};
pub use permutation::CorrelationPermutationNetwork;
pub use scio::Scio;
pub use space::Space;
pub use threshold::ThresholdEstimator;

use crate::error::BenchError;
use crate::matrix::covariance;
use crate::types::{CandidateMatrix, OutputKind, SampleMatrix};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Expected, recoverable failure of a single fit at a single tuning value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NumericalFailure {
    #[error("{solver} did not converge within {max_iter} iterations (last change {last_change:.3e})")]
    DidNotConverge {
        solver: &'static str,
        max_iter: usize,
        last_change: f64,
    },

    #[error("{solver} hit a singular system at coordinate {index}")]
    Singular { solver: &'static str, index: usize },

    #[error("{solver} produced a matrix that is not positive definite: {detail}")]
    NotPositiveDefinite { solver: &'static str, detail: String },

    #[error("{solver} produced non-finite values")]
    NonFinite { solver: &'static str },

    #[error("{solver} exceeded its time budget of {budget:?}")]
    TimedOut {
        solver: &'static str,
        budget: Duration,
    },

    #[error("{solver} found no tuning value with a finite held-out loss among {candidates} candidates")]
    NoViableTuning {
        solver: &'static str,
        candidates: usize,
    },

    #[error("{solver} rejected its input: {reason}")]
    InvalidInput {
        solver: &'static str,
        reason: String,
    },

    #[error("fit succeeded but exposed no estimate")]
    MissingEstimate,
}

pub fn default_tolerance() -> f64 {
    1e-4
}

pub fn default_max_iter() -> usize {
    500
}

pub fn default_inner_max_iter() -> usize {
    1000
}

/// Iteration and wall-clock budgets shared by every solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverOptions {
    #[serde(default = "default_tolerance")]
    pub tol: f64,
    /// Outer sweeps (graphical lasso, SPACE) or ADMM rounds / 20 (CLIME).
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    /// Coordinate-descent sweeps of each inner lasso problem.
    #[serde(default = "default_inner_max_iter")]
    pub inner_max_iter: usize,
    /// Exceeding this is reported as [`NumericalFailure::TimedOut`].
    #[serde(default)]
    pub time_budget: Option<Duration>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            tol: default_tolerance(),
            max_iter: default_max_iter(),
            inner_max_iter: default_inner_max_iter(),
            time_budget: None,
        }
    }
}

fn default_permutations() -> usize {
    permutation::DEFAULT_PERMUTATIONS
}

fn default_alpha() -> f64 {
    permutation::DEFAULT_ALPHA
}

fn default_space_outer_iterations() -> usize {
    space::DEFAULT_OUTER_ITERATIONS
}

/// Settings that only one family reads; the others ignore them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FamilySettings {
    /// Neighbourhood selection: how the two directed estimates of a pair combine.
    #[serde(default)]
    pub symmetrization: SymmetrizationRule,
    /// Correlation permutation network: number of shuffles.
    #[serde(default = "default_permutations")]
    pub permutations: usize,
    /// Correlation permutation network: significance level.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// SPACE: alternations between σ and ρ updates.
    #[serde(default = "default_space_outer_iterations")]
    pub space_outer_iterations: usize,
}

impl Default for FamilySettings {
    fn default() -> Self {
        Self {
            symmetrization: SymmetrizationRule::default(),
            permutations: default_permutations(),
            alpha: default_alpha(),
            space_outer_iterations: default_space_outer_iterations(),
        }
    }
}

impl FamilySettings {
    pub fn validate(&self) -> Result<(), BenchError> {
        if self.permutations == 0 {
            return Err(BenchError::InvalidConfig(
                "permutation count must be at least 1".to_string(),
            ));
        }
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(BenchError::InvalidConfig(format!(
                "significance level must lie in (0, 1], got {}",
                self.alpha
            )));
        }
        if self.space_outer_iterations == 0 {
            return Err(BenchError::InvalidConfig(
                "SPACE needs at least 1 outer iteration".to_string(),
            ));
        }
        Ok(())
    }
}

/// Wall-clock guard checked between solver sweeps.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Deadline {
    solver: &'static str,
    started: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    pub(crate) fn start(solver: &'static str, options: &SolverOptions) -> Self {
        Self {
            solver,
            started: Instant::now(),
            budget: options.time_budget,
        }
    }

    pub(crate) fn check(&self) -> Result<(), NumericalFailure> {
        match self.budget {
            Some(budget) if self.started.elapsed() >= budget => Err(NumericalFailure::TimedOut {
                solver: self.solver,
                budget,
            }),
            _ => Ok(()),
        }
    }
}

/// ML covariance of the sample, the common input of every solver.
pub(crate) fn empirical_covariance(
    solver: &'static str,
    x: &SampleMatrix,
) -> Result<Array2<f64>, NumericalFailure> {
    if x.n_features() == 0 {
        return Err(NumericalFailure::InvalidInput {
            solver,
            reason: "sample has no features".to_string(),
        });
    }
    let s = covariance(&x.0, 0).ok_or_else(|| NumericalFailure::InvalidInput {
        solver,
        reason: format!("sample has {} rows", x.n_samples()),
    })?;
    if s.iter().any(|v| !v.is_finite()) {
        return Err(NumericalFailure::NonFinite { solver });
    }
    Ok(s)
}

pub(crate) fn ensure_finite(
    solver: &'static str,
    m: &Array2<f64>,
) -> Result<(), NumericalFailure> {
    if m.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(NumericalFailure::NonFinite { solver })
    }
}

/// The fit/estimate contract every structure estimator satisfies.
pub trait StructureEstimator {
    fn output_kind(&self) -> OutputKind;

    fn fit(&mut self, x: &SampleMatrix) -> Result<(), NumericalFailure>;

    /// Recovered matrix of the last successful fit.
    fn estimate(&self) -> Option<&CandidateMatrix>;

    /// Tuning value picked during `fit`, for estimators that choose their own.
    fn selected_lambda(&self) -> Option<f64> {
        None
    }
}

/// The closed set of supported estimator families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EstimatorKind {
    NeighbourhoodSelection,
    Scio,
    Space,
    Clime,
    GraphicalLasso,
    Threshold,
    CorrelationPermutation,
}

impl EstimatorKind {
    pub const ALL: [EstimatorKind; 7] = [
        EstimatorKind::GraphicalLasso,
        EstimatorKind::NeighbourhoodSelection,
        EstimatorKind::Scio,
        EstimatorKind::Space,
        EstimatorKind::Clime,
        EstimatorKind::Threshold,
        EstimatorKind::CorrelationPermutation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EstimatorKind::NeighbourhoodSelection => "Neighbourhood Selection",
            EstimatorKind::Scio => "SCIO",
            EstimatorKind::Space => "SPACE",
            EstimatorKind::Clime => "CLIME",
            EstimatorKind::GraphicalLasso => "Graphical Lasso",
            EstimatorKind::Threshold => "Threshold",
            EstimatorKind::CorrelationPermutation => "Correlation Permutation",
        }
    }

    pub fn output_kind(self) -> OutputKind {
        match self {
            EstimatorKind::NeighbourhoodSelection
            | EstimatorKind::Scio
            | EstimatorKind::Clime
            | EstimatorKind::GraphicalLasso => OutputKind::Precision,
            EstimatorKind::Space => OutputKind::PartialCorrelation,
            EstimatorKind::Threshold => OutputKind::Covariance,
            EstimatorKind::CorrelationPermutation => OutputKind::Correlation,
        }
    }

    /// Lower end of the sweep as a fraction of λmax.
    pub fn default_lower_bound_fraction(self) -> f64 {
        match self {
            EstimatorKind::NeighbourhoodSelection
            | EstimatorKind::GraphicalLasso
            | EstimatorKind::Space => 1e-3,
            EstimatorKind::Scio
            | EstimatorKind::Clime
            | EstimatorKind::Threshold
            | EstimatorKind::CorrelationPermutation => 1e-4,
        }
    }

    /// False for families that take no external tuning value.
    pub fn takes_lambda(self) -> bool {
        !matches!(self, EstimatorKind::CorrelationPermutation)
    }

    /// Build a fresh estimator with λ fixed.
    pub fn build_fixed(
        self,
        lambda: f64,
        options: SolverOptions,
        settings: FamilySettings,
        seed: u64,
    ) -> Estimator {
        match self {
            EstimatorKind::NeighbourhoodSelection => Estimator::NeighbourhoodSelection(
                NeighbourhoodSelection::new(lambda, settings.symmetrization, options),
            ),
            EstimatorKind::Scio => Estimator::Scio(Scio::new(lambda, options)),
            EstimatorKind::Space => Estimator::Space(
                Space::new(lambda, options).with_outer_iterations(settings.space_outer_iterations),
            ),
            EstimatorKind::Clime => Estimator::Clime(Clime::new(lambda, options)),
            EstimatorKind::GraphicalLasso => {
                Estimator::GraphicalLasso(GraphicalLasso::new(lambda, options))
            }
            EstimatorKind::Threshold => {
                Estimator::Threshold(ThresholdEstimator::new(lambda, options))
            }
            EstimatorKind::CorrelationPermutation => Estimator::CorrelationPermutation(
                CorrelationPermutationNetwork::new(seed, options)
                    .with_permutations(settings.permutations)
                    .with_alpha(settings.alpha),
            ),
        }
    }
}

/// A configured estimator instance from one of the known families.
#[derive(Debug, Clone)]
pub enum Estimator {
    NeighbourhoodSelection(NeighbourhoodSelection),
    Scio(Scio),
    Space(Space),
    Clime(Clime),
    GraphicalLasso(GraphicalLasso),
    Threshold(ThresholdEstimator),
    CorrelationPermutation(CorrelationPermutationNetwork),
    CrossValidated(CrossValidated),
}

impl Estimator {
    /// Loss of the fitted model on a held-out covariance, lower is better.
    /// `None` when the family has no such loss or the fit cannot be scored.
    pub(crate) fn held_out_loss(&self, test_covariance: &Array2<f64>) -> Option<f64> {
        let loss = match self {
            Estimator::NeighbourhoodSelection(e) => e.held_out_loss(test_covariance),
            Estimator::Scio(e) => e.held_out_loss(test_covariance),
            Estimator::Space(e) => e.held_out_loss(test_covariance),
            Estimator::Clime(e) => e.held_out_loss(test_covariance),
            Estimator::GraphicalLasso(e) => e.held_out_loss(test_covariance),
            Estimator::Threshold(e) => e.held_out_loss(test_covariance),
            Estimator::CorrelationPermutation(_) | Estimator::CrossValidated(_) => None,
        }?;
        loss.is_finite().then_some(loss)
    }
}

impl StructureEstimator for Estimator {
    fn output_kind(&self) -> OutputKind {
        match self {
            Estimator::NeighbourhoodSelection(_) => {
                EstimatorKind::NeighbourhoodSelection.output_kind()
            }
            Estimator::Scio(_) => EstimatorKind::Scio.output_kind(),
            Estimator::Space(_) => EstimatorKind::Space.output_kind(),
            Estimator::Clime(_) => EstimatorKind::Clime.output_kind(),
            Estimator::GraphicalLasso(_) => EstimatorKind::GraphicalLasso.output_kind(),
            Estimator::Threshold(_) => EstimatorKind::Threshold.output_kind(),
            Estimator::CorrelationPermutation(_) => {
                EstimatorKind::CorrelationPermutation.output_kind()
            }
            Estimator::CrossValidated(e) => e.kind().output_kind(),
        }
    }

    fn fit(&mut self, x: &SampleMatrix) -> Result<(), NumericalFailure> {
        match self {
            Estimator::NeighbourhoodSelection(e) => e.fit(x),
            Estimator::Scio(e) => e.fit(x),
            Estimator::Space(e) => e.fit(x),
            Estimator::Clime(e) => e.fit(x),
            Estimator::GraphicalLasso(e) => e.fit(x),
            Estimator::Threshold(e) => e.fit(x),
            Estimator::CorrelationPermutation(e) => e.fit(x),
            Estimator::CrossValidated(e) => e.fit(x),
        }
    }

    fn estimate(&self) -> Option<&CandidateMatrix> {
        match (self.output_kind(), self) {
            (OutputKind::Precision, Estimator::NeighbourhoodSelection(e)) => e.precision(),
            (OutputKind::Precision, Estimator::Scio(e)) => e.precision(),
            (OutputKind::Precision, Estimator::Clime(e)) => e.precision(),
            (OutputKind::Precision, Estimator::GraphicalLasso(e)) => e.precision(),
            (OutputKind::PartialCorrelation, Estimator::Space(e)) => e.partial_correlation(),
            (OutputKind::Covariance, Estimator::Threshold(e)) => e.covariance(),
            (OutputKind::Correlation, Estimator::CorrelationPermutation(e)) => e.correlation(),
            (_, Estimator::CrossValidated(e)) => e.selected().and_then(|inner| inner.estimate()),
            _ => None,
        }
    }

    fn selected_lambda(&self) -> Option<f64> {
        match self {
            Estimator::CrossValidated(e) => e.selected_lambda(),
            _ => None,
        }
    }
}

/// How an estimator spec picks its tuning value.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Tuning {
    /// Swept across the shared regularization path.
    #[default]
    Path,
    /// λ chosen internally by K-fold cross-validation; scored as one point.
    CrossValidated(CvConfig),
}

/// Factory for fresh estimator instances of one family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorSpec {
    pub kind: EstimatorKind,
    #[serde(default)]
    pub lower_bound_fraction: Option<f64>,
    #[serde(default)]
    pub tuning: Tuning,
    #[serde(default)]
    pub solver: SolverOptions,
    #[serde(default)]
    pub family: FamilySettings,
}

impl EstimatorSpec {
    pub fn new(kind: EstimatorKind) -> Self {
        Self {
            kind,
            lower_bound_fraction: None,
            tuning: Tuning::Path,
            solver: SolverOptions::default(),
            family: FamilySettings::default(),
        }
    }

    pub fn cross_validated(kind: EstimatorKind, config: CvConfig) -> Self {
        Self {
            tuning: Tuning::CrossValidated(config),
            ..Self::new(kind)
        }
    }

    pub fn with_solver(mut self, solver: SolverOptions) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_family_settings(mut self, family: FamilySettings) -> Self {
        self.family = family;
        self
    }

    pub fn with_lower_bound_fraction(mut self, fraction: f64) -> Self {
        self.lower_bound_fraction = Some(fraction);
        self
    }

    pub fn lower_bound_fraction(&self) -> f64 {
        self.lower_bound_fraction
            .unwrap_or_else(|| self.kind.default_lower_bound_fraction())
    }

    /// Whether this spec is swept across the shared path rather than scored
    /// as a single internally tuned point.
    pub fn sweeps_path(&self) -> bool {
        self.kind.takes_lambda() && matches!(self.tuning, Tuning::Path)
    }

    pub fn label(&self) -> String {
        match self.tuning {
            Tuning::CrossValidated(_) => format!("{} (CV)", self.kind.name()),
            Tuning::Path => self.kind.name().to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), BenchError> {
        let fraction = self.lower_bound_fraction();
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(BenchError::InvalidConfig(format!(
                "{}: lower-bound fraction must lie in (0, 1), got {fraction}",
                self.label()
            )));
        }
        if !(self.solver.tol > 0.0 && self.solver.tol.is_finite()) {
            return Err(BenchError::InvalidConfig(format!(
                "{}: solver tolerance must be positive, got {}",
                self.label(),
                self.solver.tol
            )));
        }
        self.family.validate()?;
        if let Tuning::CrossValidated(cv) = self.tuning {
            if !self.kind.takes_lambda() {
                return Err(BenchError::InvalidConfig(format!(
                    "{} has no tuning value to cross-validate",
                    self.kind.name()
                )));
            }
            cv.validate()?;
        }
        Ok(())
    }

    /// Fresh estimator with λ fixed, for one point of a sweep.
    pub fn build(&self, lambda: f64, seed: u64) -> Estimator {
        self.kind.build_fixed(lambda, self.solver, self.family, seed)
    }

    /// Fresh estimator that chooses its own tuning value.
    pub fn build_internal(&self, seed: u64) -> Estimator {
        match self.tuning {
            Tuning::CrossValidated(config) => Estimator::CrossValidated(CrossValidated::new(
                self.kind,
                config,
                self.lower_bound_fraction(),
                self.solver,
                seed,
            )
            .with_family_settings(self.family)),
            Tuning::Path => self.kind.build_fixed(f64::NAN, self.solver, self.family, seed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, StandardNormal};

    #[test]
    fn every_kind_builds_an_estimator_of_its_declared_output_kind() {
        for kind in EstimatorKind::ALL {
            let est = kind.build_fixed(0.1, SolverOptions::default(), FamilySettings::default(), 7);
            assert_eq!(est.output_kind(), kind.output_kind(), "{}", kind.name());
            assert!(est.estimate().is_none());
        }
    }

    #[test]
    fn zero_time_budget_times_out_immediately() {
        let options = SolverOptions {
            time_budget: Some(Duration::ZERO),
            ..SolverOptions::default()
        };
        let deadline = Deadline::start("test", &options);
        assert!(matches!(
            deadline.check(),
            Err(NumericalFailure::TimedOut { .. })
        ));
        assert!(Deadline::start("test", &SolverOptions::default()).check().is_ok());
    }

    #[test]
    fn spec_validation_rejects_bad_configs() {
        assert!(EstimatorSpec::new(EstimatorKind::Scio).validate().is_ok());
        assert!(
            EstimatorSpec::new(EstimatorKind::Scio)
                .with_lower_bound_fraction(1.5)
                .validate()
                .is_err()
        );
        assert!(
            EstimatorSpec::cross_validated(
                EstimatorKind::CorrelationPermutation,
                CvConfig::default()
            )
            .validate()
            .is_err()
        );
    }

    #[test]
    fn only_lambda_families_sweep_the_path() {
        assert!(EstimatorSpec::new(EstimatorKind::GraphicalLasso).sweeps_path());
        assert!(!EstimatorSpec::new(EstimatorKind::CorrelationPermutation).sweeps_path());
        assert!(
            !EstimatorSpec::cross_validated(EstimatorKind::Space, CvConfig::default())
                .sweeps_path()
        );
        assert_eq!(
            EstimatorSpec::cross_validated(EstimatorKind::Space, CvConfig::default()).label(),
            "SPACE (CV)"
        );
    }

    fn paired_sample(n: usize, seed: u64) -> SampleMatrix {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut x = Array2::<f64>::zeros((n, 4));
        for i in 0..n {
            let shared: f64 = StandardNormal.sample(&mut rng);
            for j in 0..4 {
                let e: f64 = StandardNormal.sample(&mut rng);
                x[[i, j]] = if j < 2 { shared + 0.3 * e } else { e };
            }
        }
        SampleMatrix::new(x)
    }

    #[test]
    fn family_settings_reach_the_built_estimator() {
        let x = paired_sample(40, 4);
        let spec = EstimatorSpec::new(EstimatorKind::CorrelationPermutation).with_family_settings(
            FamilySettings {
                permutations: 9,
                ..FamilySettings::default()
            },
        );
        let mut est = spec.build_internal(1);
        est.fit(&x).unwrap();
        let Estimator::CorrelationPermutation(net) = &est else {
            panic!("expected a permutation network");
        };
        for &pv in net.p_values().unwrap() {
            let scaled = pv * 10.0;
            assert!((scaled - scaled.round()).abs() < 1e-9);
            assert!(pv >= 0.1 - 1e-12);
        }

        let support = |rule| {
            let mut est = EstimatorSpec::new(EstimatorKind::NeighbourhoodSelection)
                .with_family_settings(FamilySettings {
                    symmetrization: rule,
                    ..FamilySettings::default()
                })
                .build(0.05, 0);
            est.fit(&x).unwrap();
            est.estimate().unwrap().iter().filter(|&&v| v != 0.0).count()
        };
        assert!(support(SymmetrizationRule::And) <= support(SymmetrizationRule::Or));
    }

    #[test]
    fn family_settings_are_validated_and_default_from_json() {
        let spec: EstimatorSpec = serde_json::from_str(r#"{"kind": "Scio"}"#).unwrap();
        assert_eq!(spec.family, FamilySettings::default());
        let bad_alpha = EstimatorSpec::new(EstimatorKind::CorrelationPermutation)
            .with_family_settings(FamilySettings {
                alpha: 0.0,
                ..FamilySettings::default()
            });
        assert!(matches!(bad_alpha.validate(), Err(BenchError::InvalidConfig(_))));
        let no_shuffles = FamilySettings {
            permutations: 0,
            ..FamilySettings::default()
        };
        assert!(no_shuffles.validate().is_err());
    }
}
