//! Repeated randomized trials and their per-estimator AUC statistics.

use crate::auc::trapezoid_auc;
use crate::error::BenchError;
use crate::estimators::{EstimatorKind, EstimatorSpec};
use crate::generative::ProblemGenerator;
use crate::linalg::utils::KahanSum;
use crate::path::{DEFAULT_PATH_LENGTH, RegularizationPath, build_regularization_path};
use crate::roc::{RocPoint, score_single_point};
use crate::types::{GroundTruthMatrix, SampleMatrix};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

fn default_p() -> usize {
    50
}

fn default_n() -> usize {
    50
}

fn default_trials() -> usize {
    10
}

fn default_path_len() -> usize {
    DEFAULT_PATH_LENGTH
}

fn default_parallel() -> bool {
    true
}

/// Size and seeding of a benchmark run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrialConfig {
    #[serde(default = "default_p")]
    pub p: usize,
    #[serde(default = "default_n")]
    pub n: usize,
    #[serde(default = "default_trials")]
    pub trials: usize,
    #[serde(default = "default_path_len")]
    pub path_len: usize,
    /// Trial t runs on `StdRng::seed_from_u64(base_seed.wrapping_add(t))`.
    #[serde(default)]
    pub base_seed: u64,
    #[serde(default = "default_parallel")]
    pub parallel: bool,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            p: default_p(),
            n: default_n(),
            trials: default_trials(),
            path_len: default_path_len(),
            base_seed: 0,
            parallel: default_parallel(),
        }
    }
}

impl TrialConfig {
    pub fn validate(&self) -> Result<(), BenchError> {
        if self.p < 2 {
            return Err(BenchError::InvalidConfig(format!(
                "p must be at least 2, got {}",
                self.p
            )));
        }
        if self.n < 2 {
            return Err(BenchError::InvalidConfig(format!(
                "n must be at least 2, got {}",
                self.n
            )));
        }
        if self.trials == 0 {
            return Err(BenchError::InvalidConfig("trials must be positive".to_string()));
        }
        if self.path_len == 0 {
            return Err(BenchError::InvalidConfig(
                "path length must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn trial_seed(&self, trial: usize) -> u64 {
        self.base_seed.wrapping_add(trial as u64)
    }
}

/// (fpr, tpr, precision) of a single scored fit, or a mean of several.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct OperatingPoint {
    pub fpr: f64,
    pub tpr: f64,
    pub precision: f64,
}

impl From<&RocPoint> for OperatingPoint {
    fn from(pt: &RocPoint) -> Self {
        Self {
            fpr: pt.fpr,
            tpr: pt.tpr,
            precision: pt.precision,
        }
    }
}

/// What one estimator produced in one trial.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EstimatorTrialOutcome {
    pub label: String,
    pub kind: EstimatorKind,
    /// `None` when the curve had fewer than two points.
    pub auc: Option<f64>,
    pub points: usize,
    pub skipped: usize,
    /// Set for internally tuned estimators.
    pub operating_point: Option<OperatingPoint>,
    pub selected_lambda: Option<f64>,
}

impl EstimatorTrialOutcome {
    fn missing(spec: &EstimatorSpec) -> Self {
        Self {
            label: spec.label(),
            kind: spec.kind,
            auc: None,
            points: 0,
            skipped: 0,
            operating_point: None,
            selected_lambda: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrialRecord {
    pub trial: usize,
    pub seed: u64,
    /// Off-diagonal edge pairs of the ground truth, when one was generated.
    pub true_edges: Option<usize>,
    /// Generation or path-construction failure that left outcomes missing.
    pub error: Option<String>,
    pub outcomes: Vec<EstimatorTrialOutcome>,
}

/// Mean and population standard deviation of the non-missing AUC samples.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct AucResult {
    pub mean: f64,
    pub std: f64,
}

impl AucResult {
    /// `None` for an empty sample.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let count = samples.len() as f64;
        let mut total = KahanSum::default();
        samples.iter().for_each(|&v| total.add(v));
        let mean = total.sum() / count;
        let mut squares = KahanSum::default();
        samples.iter().for_each(|&v| squares.add((v - mean) * (v - mean)));
        Some(Self {
            mean,
            std: (squares.sum() / count).sqrt(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EstimatorSummary {
    pub label: String,
    pub kind: EstimatorKind,
    pub auc: Option<AucResult>,
    /// Trials whose AUC entered the statistic.
    pub contributing: usize,
    pub missing: usize,
    /// Mean operating point over trials, for internally tuned estimators.
    pub operating_point: Option<OperatingPoint>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BenchmarkReport {
    pub config: TrialConfig,
    pub trials: Vec<TrialRecord>,
    pub summaries: Vec<EstimatorSummary>,
}

/// Run `config.trials` independent trials of every spec and summarize them.
///
/// Failures stay inside the trial and estimator that produced them: a failed
/// trial marks its AUCs missing and the run goes on.
pub fn run_trials<G>(
    config: &TrialConfig,
    specs: &[EstimatorSpec],
    generator: &G,
) -> Result<BenchmarkReport, BenchError>
where
    G: ProblemGenerator + ?Sized,
{
    config.validate()?;
    if specs.is_empty() {
        return Err(BenchError::InvalidConfig(
            "at least one estimator is required".to_string(),
        ));
    }
    for spec in specs {
        spec.validate()?;
    }
    log::info!(
        "running {} trial(s) of {} estimator(s) at p={} n={}",
        config.trials,
        specs.len(),
        config.p,
        config.n
    );

    let trials: Vec<TrialRecord> = if config.parallel {
        (0..config.trials)
            .into_par_iter()
            .map(|t| run_single_trial(t, config, specs, generator))
            .collect()
    } else {
        (0..config.trials)
            .map(|t| run_single_trial(t, config, specs, generator))
            .collect()
    };

    let summaries: Vec<EstimatorSummary> = specs
        .iter()
        .enumerate()
        .map(|(idx, spec)| summarize(idx, spec, &trials))
        .collect();
    for s in &summaries {
        match s.auc {
            Some(auc) => log::info!(
                "{}: AUC {:.3} ± {:.3} over {} trial(s)",
                s.label,
                auc.mean,
                auc.std,
                s.contributing
            ),
            None => log::info!("{}: no AUC ({} missing)", s.label, s.missing),
        }
    }
    Ok(BenchmarkReport {
        config: config.clone(),
        trials,
        summaries,
    })
}

/// One trial with its own seeded random source.
pub fn run_single_trial<G>(
    trial: usize,
    config: &TrialConfig,
    specs: &[EstimatorSpec],
    generator: &G,
) -> TrialRecord
where
    G: ProblemGenerator + ?Sized,
{
    let seed = config.trial_seed(trial);
    let mut rng = StdRng::seed_from_u64(seed);
    let (truth, x) = match generator.generate(config.p, config.n, &mut rng) {
        Ok(problem) => problem,
        Err(err) => {
            log::warn!("trial {trial}: {err}; every AUC of this trial is missing");
            return TrialRecord {
                trial,
                seed,
                true_edges: None,
                error: Some(err.to_string()),
                outcomes: specs.iter().map(EstimatorTrialOutcome::missing).collect(),
            };
        }
    };
    let true_edges = truth.edge_count();

    // One path per distinct lower-bound fraction. A fraction whose path cannot
    // be built leaves only the specs sweeping it missing.
    let mut paths: Vec<(f64, RegularizationPath)> = Vec::new();
    let mut path_error: Option<BenchError> = None;
    let mut tried: Vec<f64> = Vec::new();
    for spec in specs.iter().filter(|s| s.sweeps_path()) {
        let fraction = spec.lower_bound_fraction();
        if tried.contains(&fraction) {
            continue;
        }
        tried.push(fraction);
        match build_regularization_path(&x, fraction, config.path_len) {
            Ok(path) => paths.push((fraction, path)),
            Err(err) => {
                log::warn!("trial {trial}: {err}; AUCs swept over this path are missing");
                path_error.get_or_insert(err);
            }
        }
    }
    log::debug!("trial {trial}: seed {seed}, {true_edges} true edge(s)");

    let outcomes = specs
        .iter()
        .map(|spec| score_spec(trial, spec, &paths, &x, &truth, seed))
        .collect();

    TrialRecord {
        trial,
        seed,
        true_edges: Some(true_edges),
        error: path_error.map(|err| err.to_string()),
        outcomes,
    }
}

fn score_spec(
    trial: usize,
    spec: &EstimatorSpec,
    paths: &[(f64, RegularizationPath)],
    x: &SampleMatrix,
    truth: &GroundTruthMatrix,
    seed: u64,
) -> EstimatorTrialOutcome {
    let label = spec.label();
    if !spec.sweeps_path() {
        // A single operating point never yields an AUC.
        let curve = score_single_point(spec.build_internal(seed), x, truth);
        let point = curve.points().first();
        log::debug!(
            "trial {trial}: {label} scored {} operating point(s)",
            curve.len()
        );
        return EstimatorTrialOutcome {
            label,
            kind: spec.kind,
            auc: None,
            points: curve.len(),
            skipped: curve.skipped().len(),
            operating_point: point.map(OperatingPoint::from),
            selected_lambda: point.and_then(|pt| pt.lambda),
        };
    }

    let fraction = spec.lower_bound_fraction();
    let Some((_, path)) = paths.iter().find(|(f, _)| *f == fraction) else {
        return EstimatorTrialOutcome::missing(spec);
    };
    let curve = spec.score(path, x, truth, seed);
    let auc = match trapezoid_auc(&curve) {
        Ok(v) => Some(v),
        Err(err) => {
            log::warn!("trial {trial}: {label} has no AUC: {err}");
            None
        }
    };
    EstimatorTrialOutcome {
        label,
        kind: spec.kind,
        auc,
        points: curve.len(),
        skipped: curve.skipped().len(),
        operating_point: None,
        selected_lambda: None,
    }
}

fn summarize(idx: usize, spec: &EstimatorSpec, trials: &[TrialRecord]) -> EstimatorSummary {
    let outcomes: Vec<&EstimatorTrialOutcome> =
        trials.iter().filter_map(|t| t.outcomes.get(idx)).collect();
    let samples: Vec<f64> = outcomes.iter().filter_map(|o| o.auc).collect();
    let points: Vec<OperatingPoint> = outcomes.iter().filter_map(|o| o.operating_point).collect();
    let operating_point = (!points.is_empty()).then(|| {
        let count = points.len() as f64;
        let mut fpr = KahanSum::default();
        let mut tpr = KahanSum::default();
        let mut precision = KahanSum::default();
        for pt in &points {
            fpr.add(pt.fpr);
            tpr.add(pt.tpr);
            precision.add(pt.precision);
        }
        OperatingPoint {
            fpr: fpr.sum() / count,
            tpr: tpr.sum() / count,
            precision: precision.sum() / count,
        }
    });
    EstimatorSummary {
        label: spec.label(),
        kind: spec.kind,
        auc: AucResult::from_samples(&samples),
        contributing: samples.len(),
        missing: trials.len() - samples.len(),
        operating_point,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn population_standard_deviation() {
        let r = AucResult::from_samples(&[0.5, 0.7, 0.9]).unwrap();
        assert_abs_diff_eq!(r.mean, 0.7, epsilon = 1e-12);
        assert_abs_diff_eq!(r.std, (0.08f64 / 3.0).sqrt(), epsilon = 1e-12);
        let single = AucResult::from_samples(&[0.42]).unwrap();
        assert_eq!(single.std, 0.0);
        assert_eq!(single.mean, 0.42);
        assert!(AucResult::from_samples(&[]).is_none());
    }

    #[test]
    fn trial_seeds_wrap() {
        let config = TrialConfig {
            base_seed: u64::MAX,
            ..TrialConfig::default()
        };
        assert_eq!(config.trial_seed(0), u64::MAX);
        assert_eq!(config.trial_seed(1), 0);
    }

    #[test]
    fn config_defaults_from_empty_json() {
        let config: TrialConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, TrialConfig::default());
        assert_eq!(config.path_len, DEFAULT_PATH_LENGTH);
        let partial: TrialConfig = serde_json::from_str(r#"{"p": 12, "parallel": false}"#).unwrap();
        assert_eq!(partial.p, 12);
        assert!(!partial.parallel);
        assert_eq!(partial.trials, 10);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let bad = TrialConfig {
            trials: 0,
            ..TrialConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = TrialConfig {
            p: 1,
            ..TrialConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
