//! Driving estimators over a regularization path and scoring every point.

use crate::estimators::{EstimatorSpec, NumericalFailure, StructureEstimator};
use crate::path::RegularizationPath;
use crate::scoring::{ConfusionCounts, StructureScore, score};
use crate::types::{GroundTruthMatrix, SampleMatrix};
use serde::Serialize;

/// One scored fit.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RocPoint {
    /// Tuning value of the fit; `None` for internally tuned estimators that
    /// expose no λ.
    pub lambda: Option<f64>,
    pub fpr: f64,
    pub tpr: f64,
    pub precision: f64,
    pub counts: ConfusionCounts,
}

/// A path value at which no point was produced.
#[derive(Clone, Debug, PartialEq)]
pub struct SkippedPoint {
    pub lambda: Option<f64>,
    pub reason: NumericalFailure,
}

/// Scored points in evaluation order, never re-sorted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RocCurve {
    points: Vec<RocPoint>,
    skipped: Vec<SkippedPoint>,
}

impl RocCurve {
    pub fn points(&self) -> &[RocPoint] {
        &self.points
    }

    pub fn skipped(&self) -> &[SkippedPoint] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// (fpr, tpr) pairs in curve order.
    pub fn fpr_tpr(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.points.iter().map(|pt| (pt.fpr, pt.tpr))
    }

    fn record<E: StructureEstimator>(
        &mut self,
        lambda: Option<f64>,
        estimator: &mut E,
        x: &SampleMatrix,
        truth: &GroundTruthMatrix,
    ) {
        match fit_and_score(estimator, x, truth) {
            Ok(counts) => {
                let s = StructureScore::from(counts);
                self.points.push(RocPoint {
                    lambda,
                    fpr: s.fpr,
                    tpr: s.tpr,
                    precision: s.precision,
                    counts,
                });
            }
            Err(reason) => {
                match lambda {
                    Some(l) => log::warn!("skipping lambda={l:.4e}: {reason}"),
                    None => log::warn!("skipping internally tuned fit: {reason}"),
                }
                self.skipped.push(SkippedPoint { lambda, reason });
            }
        }
    }
}

fn fit_and_score<E: StructureEstimator>(
    estimator: &mut E,
    x: &SampleMatrix,
    truth: &GroundTruthMatrix,
) -> Result<ConfusionCounts, NumericalFailure> {
    estimator.fit(x)?;
    let candidate = estimator
        .estimate()
        .ok_or(NumericalFailure::MissingEstimate)?;
    score(truth, candidate)
        .map(|s| s.counts)
        .map_err(|err| NumericalFailure::InvalidInput {
            solver: "structure scoring",
            reason: err.to_string(),
        })
}

/// Fit a fresh estimator at every λ of `path` and score it against `truth`.
///
/// A failed fit skips its λ; the rest of the path still runs.
pub fn build_roc_curve<F, E>(
    factory: F,
    path: &RegularizationPath,
    x: &SampleMatrix,
    truth: &GroundTruthMatrix,
) -> RocCurve
where
    F: Fn(f64) -> E,
    E: StructureEstimator,
{
    let mut curve = RocCurve::default();
    for &lambda in path.iter() {
        let mut estimator = factory(lambda);
        curve.record(Some(lambda), &mut estimator, x, truth);
    }
    curve
}

/// One-point curve for an estimator that chooses its own tuning value.
pub fn score_single_point<E: StructureEstimator>(
    mut estimator: E,
    x: &SampleMatrix,
    truth: &GroundTruthMatrix,
) -> RocCurve {
    let mut curve = RocCurve::default();
    curve.record(None, &mut estimator, x, truth);
    if let Some(point) = curve.points.first_mut() {
        point.lambda = estimator.selected_lambda();
    }
    curve
}

impl EstimatorSpec {
    /// Sweep the path, or score one internally tuned fit, per this spec's
    /// tuning mode.
    pub fn score(
        &self,
        path: &RegularizationPath,
        x: &SampleMatrix,
        truth: &GroundTruthMatrix,
        seed: u64,
    ) -> RocCurve {
        if self.sweeps_path() {
            build_roc_curve(|lambda| self.build(lambda, seed), path, x, truth)
        } else {
            score_single_point(self.build_internal(seed), x, truth)
        }
    }
}
