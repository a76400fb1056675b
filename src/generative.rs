//! Synthetic problems: sparse SPD ground truths and perturbed Gaussian samples.

use crate::error::BenchError;
use crate::linalg::faer_ndarray::FaerCholesky;
use crate::linalg::utils::{invert_spd, min_eigenvalue};
use crate::matrix::standardize_columns;
use crate::types::{GroundTruthMatrix, SampleMatrix};
use faer::Side;
use ndarray::{Array1, Array2};
use rand::RngExt;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand_distr::{Distribution, Normal, StandardNormal, StudentT};
use serde::{Deserialize, Serialize};

/// Attachments per new node in the power-law topology.
pub const BARABASI_ALBERT_M: usize = 5;
pub const CAVE_SIZE: usize = 5;
pub const HEAVY_TAIL_DOF: f64 = 5.0;
const SMALLEST_COEF: f64 = 0.1;
const LARGEST_COEF: f64 = 0.9;
/// Margin added on top of the eigenvalue deficit when a topology is shifted.
const PD_MARGIN: f64 = 0.1;

/// Topology family of the ground-truth precision matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkStructure {
    #[default]
    Uniform,
    PowerLaw,
    Caveman,
}

impl NetworkStructure {
    pub fn name(self) -> &'static str {
        match self {
            NetworkStructure::Uniform => "uniform",
            NetworkStructure::PowerLaw => "power-law",
            NetworkStructure::Caveman => "caveman",
        }
    }
}

pub fn default_density() -> f64 {
    0.95
}

pub fn default_coupling() -> f64 {
    0.8
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StructureConfig {
    #[serde(default)]
    pub structure: NetworkStructure,
    /// Probability that an entry of the uniform factor is zero.
    #[serde(default = "default_density")]
    pub density: f64,
    /// Edge weight c in K = (1 − c)I + c(A + I) for graph topologies.
    #[serde(default = "default_coupling")]
    pub coupling: f64,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            structure: NetworkStructure::default(),
            density: default_density(),
            coupling: default_coupling(),
        }
    }
}

impl StructureConfig {
    pub fn validate(&self) -> Result<(), BenchError> {
        if !(0.0..=1.0).contains(&self.density) {
            return Err(BenchError::InvalidConfig(format!(
                "density must lie in [0, 1], got {}",
                self.density
            )));
        }
        if !(self.coupling.is_finite() && self.coupling >= 0.0) {
            return Err(BenchError::InvalidConfig(format!(
                "coupling must be non-negative, got {}",
                self.coupling
            )));
        }
        Ok(())
    }
}

/// Departures from a clean Gaussian draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PerturbationConfig {
    /// Add N(0, 1) noise to every entry.
    #[serde(default)]
    pub noise: bool,
    /// Draw Student-t rows instead of Gaussian ones.
    #[serde(default)]
    pub heavy_tails: bool,
    /// Rows (drawn with replacement) overwritten by N(1, I).
    #[serde(default)]
    pub outliers: usize,
}

/// p×p sparse SPD precision matrix of the requested topology.
pub fn generate_ground_truth<R: rand::Rng + ?Sized>(
    p: usize,
    config: &StructureConfig,
    rng: &mut R,
) -> Result<GroundTruthMatrix, BenchError> {
    if p == 0 {
        return Err(BenchError::InvalidConfig(
            "ground truth needs at least one variable".to_string(),
        ));
    }
    config.validate()?;
    let k = match config.structure {
        NetworkStructure::Uniform => sparse_spd_matrix(p, config.density, rng),
        NetworkStructure::PowerLaw => {
            let adjacency = barabasi_albert(p, BARABASI_ALBERT_M, rng);
            ensure_positive_definite(coupled_precision(&adjacency, config.coupling), "power-law")?
        }
        NetworkStructure::Caveman => {
            let adjacency = caveman(p, CAVE_SIZE);
            ensure_positive_definite(coupled_precision(&adjacency, config.coupling), "caveman")?
        }
    };
    Ok(GroundTruthMatrix::new(k))
}

/// K = CᵀC with C = −I + PLPᵀ for a random sparse strictly lower-triangular
/// L and permutation P, rescaled to a unit diagonal.
fn sparse_spd_matrix<R: rand::Rng + ?Sized>(p: usize, alpha: f64, rng: &mut R) -> Array2<f64> {
    let mut lower = Array2::<f64>::zeros((p, p));
    for i in 0..p {
        for j in 0..i {
            if rng.random::<f64>() >= alpha {
                lower[[i, j]] = rng.random_range(SMALLEST_COEF..LARGEST_COEF);
            }
        }
    }
    let mut perm: Vec<usize> = (0..p).collect();
    perm.shuffle(rng);
    let mut chol = -Array2::<f64>::eye(p);
    for i in 0..p {
        for j in 0..p {
            chol[[i, j]] += lower[[perm[i], perm[j]]];
        }
    }
    let k = chol.t().dot(&chol);
    let scale: Array1<f64> = k.diag().mapv(|d| 1.0 / d.sqrt());
    let mut out = k;
    for ((i, j), v) in out.indexed_iter_mut() {
        *v *= scale[i] * scale[j];
    }
    for i in 0..p {
        out[[i, i]] = 1.0;
    }
    out
}

/// Preferential attachment seeded from a star on m + 1 nodes.
fn barabasi_albert<R: rand::Rng + ?Sized>(p: usize, m: usize, rng: &mut R) -> Array2<f64> {
    let mut adjacency = Array2::<f64>::zeros((p, p));
    let m = m.min(p.saturating_sub(1));
    if m == 0 {
        return adjacency;
    }
    // Each node appears once per incident edge.
    let mut repeated: Vec<usize> = Vec::new();
    for leaf in 1..=m {
        adjacency[[0, leaf]] = 1.0;
        adjacency[[leaf, 0]] = 1.0;
        repeated.push(0);
        repeated.push(leaf);
    }
    for source in (m + 1)..p {
        let mut targets: Vec<usize> = Vec::with_capacity(m);
        while targets.len() < m {
            let candidate = repeated[rng.random_range(0..repeated.len())];
            if !targets.contains(&candidate) {
                targets.push(candidate);
            }
        }
        for &t in &targets {
            adjacency[[source, t]] = 1.0;
            adjacency[[t, source]] = 1.0;
            repeated.push(t);
            repeated.push(source);
        }
    }
    adjacency
}

/// ⌊p / size⌋ disjoint cliques; leftover nodes are isolated.
fn caveman(p: usize, size: usize) -> Array2<f64> {
    let mut adjacency = Array2::<f64>::zeros((p, p));
    for cave in 0..(p / size) {
        let start = cave * size;
        for i in start..start + size {
            for j in start..start + size {
                if i != j {
                    adjacency[[i, j]] = 1.0;
                }
            }
        }
    }
    adjacency
}

fn coupled_precision(adjacency: &Array2<f64>, coupling: f64) -> Array2<f64> {
    let p = adjacency.nrows();
    let identity = Array2::<f64>::eye(p);
    &identity * (1.0 - coupling) + (adjacency + &identity) * coupling
}

/// Shift the diagonal when `k` fails a Cholesky factorization.
fn ensure_positive_definite(mut k: Array2<f64>, label: &str) -> Result<Array2<f64>, BenchError> {
    if k.cholesky(Side::Lower).is_ok() {
        return Ok(k);
    }
    let lowest = min_eigenvalue(&k, label)?;
    let shift = (-lowest).max(0.0) + PD_MARGIN;
    log::warn!("{label} ground truth is not positive definite (min eigenvalue {lowest:.4}); shifting diagonal by {shift:.4}");
    for i in 0..k.nrows() {
        k[[i, i]] += shift;
    }
    k.cholesky(Side::Lower)?;
    Ok(k)
}

/// n rows from N(0, K⁻¹) with the configured perturbations, standardized
/// column-wise.
pub fn generate_sample<R: rand::Rng + ?Sized>(
    truth: &GroundTruthMatrix,
    n: usize,
    perturbation: &PerturbationConfig,
    rng: &mut R,
) -> Result<SampleMatrix, BenchError> {
    let p = truth.dim_p();
    if n == 0 || p == 0 {
        return Err(BenchError::InvalidConfig(format!(
            "sample must be non-empty, got {n}x{p}"
        )));
    }
    let sigma = invert_spd(&truth.0, "ground truth")?;
    let l = sigma.cholesky(Side::Lower)?.lower_triangular();

    let mut z = Array2::<f64>::zeros((n, p));
    if perturbation.heavy_tails {
        let t = StudentT::new(HEAVY_TAIL_DOF)
            .map_err(|e| BenchError::InvalidConfig(format!("Student-t: {e}")))?;
        z.mapv_inplace(|_| t.sample(rng));
    } else {
        z.mapv_inplace(|_| StandardNormal.sample(rng));
    }
    // Row i is L zᵢ.
    let mut x = z.dot(&l.t());

    if perturbation.noise {
        x.mapv_inplace(|v| {
            let e: f64 = StandardNormal.sample(rng);
            v + e
        });
    }
    if perturbation.outliers > 0 {
        let shifted = Normal::new(1.0, 1.0)
            .map_err(|e| BenchError::InvalidConfig(format!("outlier distribution: {e}")))?;
        for _ in 0..perturbation.outliers {
            let row = rng.random_range(0..n);
            x.row_mut(row).mapv_inplace(|_| shifted.sample(rng));
        }
    }
    Ok(SampleMatrix::new(standardize_columns(&x)))
}

/// Source of one trial's ground truth and sample.
pub trait ProblemGenerator: Sync {
    fn generate(
        &self,
        p: usize,
        n: usize,
        rng: &mut StdRng,
    ) -> Result<(GroundTruthMatrix, SampleMatrix), BenchError>;
}

/// The built-in topologies and sample perturbations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SyntheticGenerator {
    #[serde(default)]
    pub structure: StructureConfig,
    #[serde(default)]
    pub perturbation: PerturbationConfig,
}

impl ProblemGenerator for SyntheticGenerator {
    fn generate(
        &self,
        p: usize,
        n: usize,
        rng: &mut StdRng,
    ) -> Result<(GroundTruthMatrix, SampleMatrix), BenchError> {
        let truth = generate_ground_truth(p, &self.structure, rng)?;
        let sample = generate_sample(&truth, n, &self.perturbation, rng)?;
        Ok((truth, sample))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn is_symmetric(k: &Array2<f64>) -> bool {
        let p = k.nrows();
        (0..p).all(|i| (0..p).all(|j| (k[[i, j]] - k[[j, i]]).abs() < 1e-12))
    }

    #[test]
    fn every_topology_is_symmetric_positive_definite() {
        for structure in [
            NetworkStructure::Uniform,
            NetworkStructure::PowerLaw,
            NetworkStructure::Caveman,
        ] {
            for p in [3usize, 12, 40] {
                let mut rng = StdRng::seed_from_u64(p as u64);
                let config = StructureConfig {
                    structure,
                    ..StructureConfig::default()
                };
                let k = generate_ground_truth(p, &config, &mut rng).unwrap();
                assert!(is_symmetric(&k), "{} p={p}", structure.name());
                let lowest = min_eigenvalue(&k.0, "k").unwrap();
                assert!(lowest > 0.0, "{} p={p}: {lowest}", structure.name());
            }
        }
    }

    #[test]
    fn uniform_truth_has_unit_diagonal() {
        let mut rng = StdRng::seed_from_u64(1);
        let config = StructureConfig {
            density: 0.5,
            ..StructureConfig::default()
        };
        let k = generate_ground_truth(10, &config, &mut rng).unwrap();
        assert!(k.diag().iter().all(|&d| (d - 1.0).abs() < 1e-12));
        assert!(k.edge_count() > 0);
    }

    #[test]
    fn caveman_edges_stay_inside_caves() {
        let adjacency = caveman(12, 5);
        assert_eq!(adjacency.sum(), 2.0 * 2.0 * 10.0);
        assert_eq!(adjacency[[0, 4]], 1.0);
        assert_eq!(adjacency[[4, 5]], 0.0);
        assert!(adjacency.row(11).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn barabasi_albert_edge_count() {
        let mut rng = StdRng::seed_from_u64(3);
        let p = 20;
        let adjacency = barabasi_albert(p, 5, &mut rng);
        // Star of 5 edges, then 5 per added node.
        assert_eq!(adjacency.sum() / 2.0, (5 + 5 * (p - 6)) as f64);
        assert!(is_symmetric(&adjacency));
        assert!(adjacency.diag().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn noise_is_added_on_top_of_heavy_tailed_draws() {
        let (n, p) = (6, 3);
        let truth = GroundTruthMatrix::new(Array2::eye(p));
        let perturbation = PerturbationConfig {
            noise: true,
            heavy_tails: true,
            outliers: 0,
        };
        let x = generate_sample(&truth, n, &perturbation, &mut StdRng::seed_from_u64(5)).unwrap();

        // With K = I the draw is z itself, so replaying the stream rebuilds it.
        let mut rng = StdRng::seed_from_u64(5);
        let t = StudentT::new(HEAVY_TAIL_DOF).unwrap();
        let mut expected = Array2::<f64>::zeros((n, p));
        expected.mapv_inplace(|_| t.sample(&mut rng));
        expected.mapv_inplace(|v| {
            let e: f64 = StandardNormal.sample(&mut rng);
            v + e
        });
        let expected = standardize_columns(&expected);
        for (a, b) in x.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn samples_are_standardized_and_reproducible() {
        let generator = SyntheticGenerator {
            perturbation: PerturbationConfig {
                noise: true,
                heavy_tails: true,
                outliers: 3,
            },
            ..SyntheticGenerator::default()
        };
        let (k1, x1) = generator
            .generate(8, 30, &mut StdRng::seed_from_u64(99))
            .unwrap();
        let (k2, x2) = generator
            .generate(8, 30, &mut StdRng::seed_from_u64(99))
            .unwrap();
        assert_eq!(k1, k2);
        assert_eq!(x1, x2);
        assert_eq!(x1.dim(), (30, 8));
        for col in x1.columns() {
            let mean = col.sum() / 30.0;
            let var = col.mapv(|v| (v - mean) * (v - mean)).sum() / 30.0;
            assert!(mean.abs() < 1e-10);
            assert!((var - 1.0).abs() < 1e-10);
        }
    }

    #[test]
    fn empty_requests_are_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(generate_ground_truth(0, &StructureConfig::default(), &mut rng).is_err());
        let k = GroundTruthMatrix::new(Array2::eye(3));
        assert!(generate_sample(&k, 0, &PerturbationConfig::default(), &mut rng).is_err());
    }
}
