use crate::error::BenchError;
use crate::matrix::{covariance, max_abs_off_diagonal, standardize_columns};
use crate::types::SampleMatrix;
use serde::{Deserialize, Serialize};
use std::ops::Deref;

pub const DEFAULT_PATH_LENGTH: usize = 50;

/// Ascending, strictly positive, log-spaced tuning values ending at λmax.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegularizationPath {
    lambdas: Vec<f64>,
    lambda_max: f64,
    lower_bound_fraction: f64,
}

impl RegularizationPath {
    /// A caller-supplied path. Values must be finite, strictly positive and
    /// strictly increasing.
    pub fn from_values(lambdas: Vec<f64>) -> Result<Self, BenchError> {
        let (Some(&first), Some(&last)) = (lambdas.first(), lambdas.last()) else {
            return Err(BenchError::DegenerateInput("path is empty".to_string()));
        };
        let valid = lambdas.iter().all(|l| l.is_finite() && *l > 0.0)
            && lambdas.windows(2).all(|w| w[0] < w[1]);
        if !valid {
            return Err(BenchError::DegenerateInput(
                "path values must be finite, positive and strictly increasing".to_string(),
            ));
        }
        Ok(Self {
            lambdas,
            lambda_max: last,
            lower_bound_fraction: first / last,
        })
    }

    pub fn lambdas(&self) -> &[f64] {
        &self.lambdas
    }

    pub fn lambda_max(&self) -> f64 {
        self.lambda_max
    }

    pub fn lower_bound_fraction(&self) -> f64 {
        self.lower_bound_fraction
    }
}

impl Deref for RegularizationPath {
    type Target = [f64];

    fn deref(&self) -> &Self::Target {
        &self.lambdas
    }
}

/// `len` points evenly spaced in log10 between `lo` and `hi` inclusive.
///
/// Unlike `Array1::logspace`, the last point is `hi` exactly rather than
/// `10^log10(hi)`, so the sweep always ends on λmax itself, where every
/// off-diagonal entry is penalized away.
pub fn logspace(lo: f64, hi: f64, len: usize) -> Vec<f64> {
    match len {
        0 => Vec::new(),
        1 => vec![hi],
        _ => {
            let (a, b) = (lo.log10(), hi.log10());
            let step = (b - a) / (len - 1) as f64;
            (0..len)
                .map(|k| {
                    if k == len - 1 {
                        hi
                    } else {
                        10f64.powf(a + step * k as f64)
                    }
                })
                .collect()
        }
    }
}

/// λmax = max |S[i,j]|, i != j, where S is the unbiased covariance of the
/// standardized sample.
pub fn lambda_max(x: &SampleMatrix) -> Result<f64, BenchError> {
    let (n, p) = x.dim();
    if p < 2 || n < 2 {
        return Err(BenchError::DegenerateInput(format!(
            "need at least 2 samples and 2 features to build a path, got {n}x{p}"
        )));
    }
    let z = standardize_columns(&x.0);
    let s = covariance(&z, 1).ok_or_else(|| {
        BenchError::DegenerateInput(format!("covariance undefined for {n} samples"))
    })?;
    let lam = max_abs_off_diagonal(&s);
    if !lam.is_finite() || lam <= 0.0 {
        return Err(BenchError::DegenerateInput(format!(
            "lambda_max must be positive and finite, got {lam}"
        )));
    }
    Ok(lam)
}

/// Sweep from `fraction * λmax` up to λmax in `len` log-spaced steps.
pub fn build_regularization_path(
    x: &SampleMatrix,
    fraction: f64,
    len: usize,
) -> Result<RegularizationPath, BenchError> {
    if len == 0 {
        return Err(BenchError::DegenerateInput(
            "path length must be at least 1".to_string(),
        ));
    }
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(BenchError::DegenerateInput(format!(
            "lower-bound fraction must lie in (0, 1), got {fraction}"
        )));
    }
    let lam_max = lambda_max(x)?;
    let lambdas = logspace(fraction * lam_max, lam_max, len);
    log::debug!(
        "regularization path: {len} points in [{:.3e}, {lam_max:.3e}]",
        fraction * lam_max
    );
    Ok(RegularizationPath {
        lambdas,
        lambda_max: lam_max,
        lower_bound_fraction: fraction,
    })
}
