use crate::error::BenchError;
use crate::types::{CandidateMatrix, GroundTruthMatrix, off_diagonal_count};
use ndarray::{Array2, ArrayBase, Data, Ix2};
use serde::{Deserialize, Serialize};

/// Magnitude at or below which a recovered entry counts as absent.
pub const SUPPORT_TOLERANCE: f64 = 1e-3;

/// Zero every entry with |value| <= `eps`; with `binary`, survivors become 1.
///
/// NaN never survives. Applying the same call twice gives the same matrix as
/// applying it once; in binary mode this needs `eps < 1`, since an indicator
/// of 1 would otherwise be cleared by the second pass.
pub fn threshold_matrix<S: Data<Elem = f64>>(
    m: &ArrayBase<S, Ix2>,
    eps: f64,
    binary: bool,
) -> Array2<f64> {
    m.mapv(|v| {
        if v.is_nan() || v.abs() <= eps {
            0.0
        } else if binary {
            1.0
        } else {
            v
        }
    })
}

/// Off-diagonal confusion counts of a recovered support against the truth.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    pub fn_: usize,
}

impl ConfusionCounts {
    pub fn total(&self) -> usize {
        self.tp + self.fp + self.tn + self.fn_
    }

    /// TP / (TP + FN), 0 when the truth has no edges.
    pub fn tpr(&self) -> f64 {
        ratio_or_zero(self.tp, self.tp + self.fn_)
    }

    /// FP / (FP + TN), 0 when the truth has no non-edges.
    pub fn fpr(&self) -> f64 {
        ratio_or_zero(self.fp, self.fp + self.tn)
    }

    /// TP / (TP + FP), 0 when nothing was predicted.
    pub fn precision(&self) -> f64 {
        ratio_or_zero(self.tp, self.tp + self.fp)
    }
}

#[inline]
fn ratio_or_zero(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// Rates derived from one set of confusion counts.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StructureScore {
    pub counts: ConfusionCounts,
    pub tpr: f64,
    pub fpr: f64,
    pub precision: f64,
}

impl From<ConfusionCounts> for StructureScore {
    fn from(counts: ConfusionCounts) -> Self {
        Self {
            counts,
            tpr: counts.tpr(),
            fpr: counts.fpr(),
            precision: counts.precision(),
        }
    }
}

/// Binary support of the ground truth: exact zeros are non-edges.
pub fn truth_support(truth: &GroundTruthMatrix) -> Array2<f64> {
    threshold_matrix(&truth.0, 0.0, true)
}

/// Compare two binary supports over the off-diagonal positions.
pub fn confusion_counts<S1, S2>(
    truth_support: &ArrayBase<S1, Ix2>,
    predicted_support: &ArrayBase<S2, Ix2>,
) -> Result<ConfusionCounts, BenchError>
where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
{
    if truth_support.dim() != predicted_support.dim() || !truth_support.is_square() {
        return Err(BenchError::DimensionMismatch(format!(
            "truth is {:?} but candidate is {:?}",
            truth_support.dim(),
            predicted_support.dim()
        )));
    }
    let mut counts = ConfusionCounts::default();
    for ((i, j), &t) in truth_support.indexed_iter() {
        if i == j {
            continue;
        }
        let actual = t != 0.0;
        let predicted = predicted_support[[i, j]] != 0.0;
        match (actual, predicted) {
            (true, true) => counts.tp += 1,
            (false, true) => counts.fp += 1,
            (false, false) => counts.tn += 1,
            (true, false) => counts.fn_ += 1,
        }
    }
    debug_assert_eq!(counts.total(), off_diagonal_count(truth_support.nrows()));
    Ok(counts)
}

/// Score a candidate against the truth at the default support tolerance.
pub fn score(
    truth: &GroundTruthMatrix,
    candidate: &CandidateMatrix,
) -> Result<StructureScore, BenchError> {
    score_with_tolerance(truth, candidate, SUPPORT_TOLERANCE)
}

pub fn score_with_tolerance(
    truth: &GroundTruthMatrix,
    candidate: &CandidateMatrix,
    eps: f64,
) -> Result<StructureScore, BenchError> {
    let predicted = threshold_matrix(&candidate.0, eps, true);
    let counts = confusion_counts(&truth_support(truth), &predicted)?;
    Ok(StructureScore::from(counts))
}
