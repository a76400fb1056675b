use super::{Deadline, NumericalFailure, SolverOptions};
use crate::matrix::standardize_columns;
use crate::types::{CandidateMatrix, SampleMatrix};
use ndarray::Array2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

const SOLVER: &str = "correlation permutation";

pub const DEFAULT_PERMUTATIONS: usize = 100;
pub const DEFAULT_ALPHA: f64 = 0.05;

/// Mixed into the trial seed so the permutation stream is independent of the
/// generator stream that drew the sample.
const SEED_SALT: u64 = 0x9E37_79B9_7F4A_7C15;

/// Sample correlation with entries that fail a permutation test zeroed.
///
/// Every permutation shuffles each column independently, which breaks all
/// cross-column dependence while keeping the marginals. The p-value of an
/// entry is (1 + #{|R_perm| ≥ |R|}) / (1 + B).
#[derive(Debug, Clone)]
pub struct CorrelationPermutationNetwork {
    seed: u64,
    permutations: usize,
    alpha: f64,
    options: SolverOptions,
    correlation: Option<CandidateMatrix>,
    p_values: Option<Array2<f64>>,
}

impl CorrelationPermutationNetwork {
    pub fn new(seed: u64, options: SolverOptions) -> Self {
        Self {
            seed,
            permutations: DEFAULT_PERMUTATIONS,
            alpha: DEFAULT_ALPHA,
            options,
            correlation: None,
            p_values: None,
        }
    }

    pub fn with_permutations(mut self, permutations: usize) -> Self {
        self.permutations = permutations;
        self
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Correlation matrix with non-significant off-diagonal entries zeroed.
    pub fn correlation(&self) -> Option<&CandidateMatrix> {
        self.correlation.as_ref()
    }

    pub fn p_values(&self) -> Option<&Array2<f64>> {
        self.p_values.as_ref()
    }

    pub fn fit(&mut self, x: &SampleMatrix) -> Result<(), NumericalFailure> {
        self.correlation = None;
        self.p_values = None;
        let (n, p) = x.dim();
        if n < 2 || p == 0 {
            return Err(NumericalFailure::InvalidInput {
                solver: SOLVER,
                reason: format!("need at least 2 rows and 1 column, got {n}x{p}"),
            });
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(NumericalFailure::NonFinite { solver: SOLVER });
        }
        let deadline = Deadline::start(SOLVER, &self.options);

        let z = standardize_columns(&x.0);
        let observed = cross_product(&z, n);
        let mut exceed = Array2::<usize>::zeros((p, p));
        let mut rng = StdRng::seed_from_u64(self.seed ^ SEED_SALT);
        let mut shuffled = z.clone();
        let mut column_buf = vec![0.0f64; n];
        for _ in 0..self.permutations {
            deadline.check()?;
            for j in 0..p {
                column_buf
                    .iter_mut()
                    .zip(z.column(j))
                    .for_each(|(dst, &src)| *dst = src);
                column_buf.shuffle(&mut rng);
                shuffled
                    .column_mut(j)
                    .iter_mut()
                    .zip(&column_buf)
                    .for_each(|(dst, &src)| *dst = src);
            }
            let permuted = cross_product(&shuffled, n);
            ndarray::Zip::from(&mut exceed)
                .and(&permuted)
                .and(&observed)
                .for_each(|count, &perm, &obs| {
                    if perm.abs() >= obs.abs() {
                        *count += 1;
                    }
                });
        }

        let denom = (1 + self.permutations) as f64;
        let p_values = exceed.mapv(|count| (1 + count) as f64 / denom);
        let mut correlation = observed;
        for ((i, j), v) in correlation.indexed_iter_mut() {
            if i == j {
                *v = 1.0;
            } else if p_values[[i, j]] > self.alpha {
                *v = 0.0;
            }
        }
        self.correlation = Some(CandidateMatrix::new(correlation));
        self.p_values = Some(p_values);
        Ok(())
    }
}

/// ZᵀZ / n for column-standardized Z, i.e. the correlation matrix.
fn cross_product(z: &Array2<f64>, n: usize) -> Array2<f64> {
    z.t().dot(z) / n as f64
}
