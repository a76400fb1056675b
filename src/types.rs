use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// What an estimator's recovered matrix represents.
///
/// Scoring only looks at the support, so all three kinds are compared against
/// the true precision support without any inversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputKind {
    Precision,
    Covariance,
    Correlation,
    PartialCorrelation,
}

/// Number of ordered off-diagonal positions in a p×p matrix.
#[inline]
pub fn off_diagonal_count(p: usize) -> usize {
    p * p.saturating_sub(1)
}

/// True precision matrix K of one trial.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct GroundTruthMatrix(pub Array2<f64>);

impl GroundTruthMatrix {
    pub fn new(values: Array2<f64>) -> Self {
        Self(values)
    }

    pub fn dim_p(&self) -> usize {
        self.0.nrows()
    }

    /// Number of unordered pairs i<j with K[i,j] != 0.
    pub fn edge_count(&self) -> usize {
        let p = self.0.nrows();
        let mut count = 0;
        for i in 0..p {
            for j in (i + 1)..p {
                if self.0[[i, j]] != 0.0 {
                    count += 1;
                }
            }
        }
        count
    }
}

/// n×p sample drawn from the distribution implied by a ground truth.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct SampleMatrix(pub Array2<f64>);

impl SampleMatrix {
    pub fn new(values: Array2<f64>) -> Self {
        Self(values)
    }

    pub fn n_samples(&self) -> usize {
        self.0.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.0.ncols()
    }
}

/// p×p matrix recovered by an estimator at one tuning value.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateMatrix(pub Array2<f64>);

impl CandidateMatrix {
    pub fn new(values: Array2<f64>) -> Self {
        Self(values)
    }
}

macro_rules! matrix_newtype_impls {
    ($name:ident) => {
        impl Deref for $name {
            type Target = Array2<f64>;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl AsRef<Array2<f64>> for $name {
            fn as_ref(&self) -> &Array2<f64> {
                &self.0
            }
        }

        impl From<Array2<f64>> for $name {
            fn from(values: Array2<f64>) -> Self {
                Self(values)
            }
        }

        impl From<$name> for Array2<f64> {
            fn from(values: $name) -> Self {
                values.0
            }
        }
    };
}

matrix_newtype_impls!(GroundTruthMatrix);
matrix_newtype_impls!(SampleMatrix);
matrix_newtype_impls!(CandidateMatrix);
