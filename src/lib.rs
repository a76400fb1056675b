//! Recovery-evaluation engine for sparse precision-matrix estimators.
//!
//! A benchmark run draws a sparse ground-truth precision matrix and a sample
//! per trial, sweeps every estimator over a regularization path, scores each
//! recovered support against the truth and integrates the resulting ROC
//! curve into an AUC. See [`trials::run_trials`] for the entry point.

pub mod auc;
pub mod error;
pub mod estimators;
pub mod generative;
pub mod linalg;
pub mod matrix;
pub mod path;
pub mod report;
pub mod roc;
pub mod scoring;
pub mod trials;
pub mod types;

pub use auc::{trapezoid_auc, trapezoid_auc_pairs};
pub use error::BenchError;
pub use estimators::{
    CvConfig, Estimator, EstimatorKind, EstimatorSpec, FamilySettings, NumericalFailure,
    SolverOptions, StructureEstimator, SymmetrizationRule, Tuning,
};
pub use generative::{
    NetworkStructure, PerturbationConfig, ProblemGenerator, StructureConfig, SyntheticGenerator,
    generate_ground_truth, generate_sample,
};
pub use path::{DEFAULT_PATH_LENGTH, RegularizationPath, build_regularization_path};
pub use roc::{RocCurve, RocPoint, build_roc_curve, score_single_point};
pub use scoring::{ConfusionCounts, StructureScore, score, threshold_matrix};
pub use trials::{AucResult, BenchmarkReport, EstimatorSummary, TrialConfig, run_trials};
pub use types::{CandidateMatrix, GroundTruthMatrix, OutputKind, SampleMatrix};
