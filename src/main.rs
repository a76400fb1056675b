use clap::{Args, Parser, Subcommand, ValueEnum};
use comfy_table::{Cell, ContentArrangement, Row, Table, presets::UTF8_FULL};
use csv::WriterBuilder;
use ndarray::Array2;
use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use sparsebench::estimators::{
    CvConfig, EstimatorKind, EstimatorSpec, SymmetrizationRule, Tuning,
};
use sparsebench::generative::{NetworkStructure, ProblemGenerator, SyntheticGenerator};
use sparsebench::report::{format_auc, summary_lines};
use sparsebench::trials::{BenchmarkReport, TrialConfig, run_trials};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "sparsebench")]
#[command(about = "Structure-recovery benchmark for sparse precision-matrix estimators", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_version = concat!(
    env!("CARGO_PKG_VERSION"),
    " (build ",
    env!("SPARSEBENCH_BUILD_TIMESTAMP"),
    ")"
))]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run repeated trials and report per-estimator AUC statistics.
    #[command(alias = "bench")]
    Run(RunArgs),
    /// Write one seeded ground truth and sample as CSV.
    #[command(alias = "simulate")]
    Generate(GenerateArgs),
}

#[derive(Args, Debug, Clone)]
struct ProblemArgs {
    #[arg(long = "structure", value_enum)]
    structure: Option<StructureArg>,
    /// Probability that a factor entry of the uniform topology is zero.
    #[arg(long = "density")]
    density: Option<f64>,
    /// Edge weight of the power-law and caveman topologies.
    #[arg(long = "coupling")]
    coupling: Option<f64>,
    #[arg(long = "noise", default_value_t = false)]
    noise: bool,
    #[arg(long = "heavy-tails", default_value_t = false)]
    heavy_tails: bool,
    #[arg(long = "outliers")]
    outliers: Option<usize>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// JSON file with `trial`, `generator` and `estimators` sections.
    #[arg(long = "config")]
    config: Option<PathBuf>,
    #[arg(short = 'p', long = "p")]
    p: Option<usize>,
    #[arg(short = 'n', long = "n")]
    n: Option<usize>,
    #[arg(short = 't', long = "trials")]
    trials: Option<usize>,
    #[command(flatten)]
    problem: ProblemArgs,
    #[arg(long = "seed")]
    seed: Option<u64>,
    #[arg(long = "path-len")]
    path_len: Option<usize>,
    /// Comma-separated estimator list; replaces the configured one.
    #[arg(long = "estimators", value_enum, value_delimiter = ',')]
    estimators: Vec<EstimatorArg>,
    /// Also score a cross-validated variant of every λ-tuned estimator.
    #[arg(long = "cv", default_value_t = false)]
    cv: bool,
    #[arg(long = "folds", default_value_t = 5)]
    folds: usize,
    /// How neighbourhood selection combines the two regressions of a pair.
    #[arg(long = "symmetrization", value_enum)]
    symmetrization: Option<SymmetrizationArg>,
    /// Shuffles used by the correlation permutation network.
    #[arg(long = "permutations")]
    permutations: Option<usize>,
    /// Significance level of the correlation permutation network.
    #[arg(long = "alpha")]
    alpha: Option<f64>,
    /// Per-fit wall-clock budget; a fit that exceeds it is skipped.
    #[arg(long = "time-budget-ms")]
    time_budget_ms: Option<u64>,
    #[arg(long = "serial", default_value_t = false)]
    serial: bool,
    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
    /// Write every (trial, estimator) AUC sample to this CSV file.
    #[arg(long = "trials-csv")]
    trials_csv: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    #[arg(short = 'p', long = "p", default_value_t = 50)]
    p: usize,
    #[arg(short = 'n', long = "n", default_value_t = 50)]
    n: usize,
    #[command(flatten)]
    problem: ProblemArgs,
    #[arg(long = "seed", default_value_t = 0)]
    seed: u64,
    #[arg(long = "truth-out")]
    truth_out: PathBuf,
    #[arg(long = "sample-out")]
    sample_out: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StructureArg {
    Uniform,
    PowerLaw,
    Caveman,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EstimatorArg {
    Glasso,
    Ns,
    Scio,
    Space,
    Clime,
    Threshold,
    Permutation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SymmetrizationArg {
    Or,
    And,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Latex,
    Json,
}

impl From<StructureArg> for NetworkStructure {
    fn from(arg: StructureArg) -> Self {
        match arg {
            StructureArg::Uniform => NetworkStructure::Uniform,
            StructureArg::PowerLaw => NetworkStructure::PowerLaw,
            StructureArg::Caveman => NetworkStructure::Caveman,
        }
    }
}

impl From<EstimatorArg> for EstimatorKind {
    fn from(arg: EstimatorArg) -> Self {
        match arg {
            EstimatorArg::Glasso => EstimatorKind::GraphicalLasso,
            EstimatorArg::Ns => EstimatorKind::NeighbourhoodSelection,
            EstimatorArg::Scio => EstimatorKind::Scio,
            EstimatorArg::Space => EstimatorKind::Space,
            EstimatorArg::Clime => EstimatorKind::Clime,
            EstimatorArg::Threshold => EstimatorKind::Threshold,
            EstimatorArg::Permutation => EstimatorKind::CorrelationPermutation,
        }
    }
}

fn default_estimators() -> Vec<EstimatorSpec> {
    [
        EstimatorKind::GraphicalLasso,
        EstimatorKind::NeighbourhoodSelection,
        EstimatorKind::Scio,
        EstimatorKind::Space,
        EstimatorKind::Clime,
        EstimatorKind::Threshold,
    ]
    .into_iter()
    .map(EstimatorSpec::new)
    .collect()
}

/// Everything a `run` needs, as read from `--config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BenchmarkConfig {
    #[serde(default)]
    trial: TrialConfig,
    #[serde(default)]
    generator: SyntheticGenerator,
    #[serde(default = "default_estimators")]
    estimators: Vec<EstimatorSpec>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            trial: TrialConfig::default(),
            generator: SyntheticGenerator::default(),
            estimators: default_estimators(),
        }
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_benchmark(args),
        Command::Generate(args) => run_generate(args),
    }
}

fn load_config(path: Option<&Path>) -> Result<BenchmarkConfig, String> {
    let Some(path) = path else {
        return Ok(BenchmarkConfig::default());
    };
    let text = fs::read_to_string(path)
        .map_err(|e| format!("failed to read config '{}': {e}", path.display()))?;
    serde_json::from_str(&text)
        .map_err(|e| format!("failed to parse config '{}': {e}", path.display()))
}

fn apply_problem_args(generator: &mut SyntheticGenerator, args: &ProblemArgs) {
    if let Some(structure) = args.structure {
        generator.structure.structure = structure.into();
    }
    if let Some(density) = args.density {
        generator.structure.density = density;
    }
    if let Some(coupling) = args.coupling {
        generator.structure.coupling = coupling;
    }
    if args.noise {
        generator.perturbation.noise = true;
    }
    if args.heavy_tails {
        generator.perturbation.heavy_tails = true;
    }
    if let Some(outliers) = args.outliers {
        generator.perturbation.outliers = outliers;
    }
}

fn run_benchmark(args: RunArgs) -> Result<(), String> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(p) = args.p {
        config.trial.p = p;
    }
    if let Some(n) = args.n {
        config.trial.n = n;
    }
    if let Some(trials) = args.trials {
        config.trial.trials = trials;
    }
    if let Some(seed) = args.seed {
        config.trial.base_seed = seed;
    }
    if let Some(path_len) = args.path_len {
        config.trial.path_len = path_len;
    }
    if args.serial {
        config.trial.parallel = false;
    }
    apply_problem_args(&mut config.generator, &args.problem);
    config
        .generator
        .structure
        .validate()
        .map_err(|e| e.to_string())?;

    if !args.estimators.is_empty() {
        config.estimators = args
            .estimators
            .iter()
            .map(|&arg| EstimatorSpec::new(arg.into()))
            .collect();
    }
    if args.cv {
        let cv = CvConfig {
            folds: args.folds,
            ..CvConfig::default()
        };
        let tuned: Vec<EstimatorSpec> = config
            .estimators
            .iter()
            .filter(|spec| spec.sweeps_path())
            .map(|spec| EstimatorSpec {
                tuning: Tuning::CrossValidated(cv),
                ..spec.clone()
            })
            .collect();
        config.estimators.extend(tuned);
    }
    for spec in &mut config.estimators {
        if let Some(ms) = args.time_budget_ms {
            spec.solver.time_budget = Some(Duration::from_millis(ms));
        }
        if let Some(rule) = args.symmetrization {
            spec.family.symmetrization = match rule {
                SymmetrizationArg::Or => SymmetrizationRule::Or,
                SymmetrizationArg::And => SymmetrizationRule::And,
            };
        }
        if let Some(permutations) = args.permutations {
            spec.family.permutations = permutations;
        }
        if let Some(alpha) = args.alpha {
            spec.family.alpha = alpha;
        }
    }

    let report = run_trials(&config.trial, &config.estimators, &config.generator)
        .map_err(|e| format!("benchmark failed: {e}"))?;

    match args.format {
        OutputFormat::Table => print_summary_table(&report),
        OutputFormat::Latex => {
            for line in summary_lines(&report) {
                println!("{line}");
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&report)
                .map_err(|e| format!("failed to serialize report: {e}"))?;
            println!("{json}");
        }
    }
    if let Some(path) = args.trials_csv.as_deref() {
        write_trials_csv(path, &report)?;
        println!("wrote per-trial AUCs to {}", path.display());
    }
    Ok(())
}

fn print_summary_table(report: &BenchmarkReport) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            "estimator",
            "p",
            "n",
            "AUC (mean ± std)",
            "trials",
            "operating point (fpr / tpr / precision)",
        ]);
    let total = report.trials.len();
    for s in &report.summaries {
        let operating = match s.operating_point {
            Some(op) => format!("{:.3} / {:.3} / {:.3}", op.fpr, op.tpr, op.precision),
            None => "-".to_string(),
        };
        table.add_row(Row::from(vec![
            Cell::new(&s.label),
            Cell::new(report.config.p),
            Cell::new(report.config.n),
            Cell::new(format_auc(s.auc)),
            Cell::new(format!("{}/{total}", s.contributing)),
            Cell::new(operating),
        ]));
    }
    let failed = report.trials.iter().filter(|t| t.error.is_some()).count();
    println!(
        "Structure recovery over {total} trial(s), seed {}:",
        report.config.base_seed
    );
    println!("{table}");
    if failed > 0 {
        println!("{failed} trial(s) recorded an error; see --format json for details");
    }
}

fn write_trials_csv(path: &Path, report: &BenchmarkReport) -> Result<(), String> {
    let mut wtr = WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| format!("failed to create output csv '{}': {e}", path.display()))?;
    wtr.write_record([
        "trial", "seed", "estimator", "auc", "points", "skipped", "error",
    ])
    .map_err(|e| format!("failed to write csv header: {e}"))?;
    for trial in &report.trials {
        for outcome in &trial.outcomes {
            let auc = outcome.auc.map(|v| format!("{v:.12}")).unwrap_or_default();
            wtr.write_record([
                trial.trial.to_string(),
                trial.seed.to_string(),
                outcome.label.clone(),
                auc,
                outcome.points.to_string(),
                outcome.skipped.to_string(),
                trial.error.clone().unwrap_or_default(),
            ])
            .map_err(|e| format!("failed to write csv row: {e}"))?;
        }
    }
    wtr.flush()
        .map_err(|e| format!("failed to flush csv '{}': {e}", path.display()))?;
    Ok(())
}

fn run_generate(args: GenerateArgs) -> Result<(), String> {
    let mut generator = SyntheticGenerator::default();
    apply_problem_args(&mut generator, &args.problem);
    let mut rng = StdRng::seed_from_u64(args.seed);
    let (truth, sample) = generator
        .generate(args.p, args.n, &mut rng)
        .map_err(|e| format!("generation failed: {e}"))?;
    write_matrix_csv(&args.truth_out, &truth, "k")?;
    write_matrix_csv(&args.sample_out, &sample, "x")?;
    println!(
        "wrote {}x{} ground truth ({} edges) to {} and {}x{} sample to {}",
        args.p,
        args.p,
        truth.edge_count(),
        args.truth_out.display(),
        args.n,
        args.p,
        args.sample_out.display()
    );
    Ok(())
}

fn write_matrix_csv(path: &Path, mat: &Array2<f64>, prefix: &str) -> Result<(), String> {
    let mut wtr = WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| format!("failed to create output csv '{}': {e}", path.display()))?;
    let headers = (0..mat.ncols())
        .map(|j| format!("{prefix}_{j}"))
        .collect::<Vec<_>>();
    wtr.write_record(headers)
        .map_err(|e| format!("failed to write csv header: {e}"))?;
    for i in 0..mat.nrows() {
        let row = (0..mat.ncols())
            .map(|j| format!("{:.12}", mat[[i, j]]))
            .collect::<Vec<_>>();
        wtr.write_record(row)
            .map_err(|e| format!("failed to write csv row: {e}"))?;
    }
    wtr.flush()
        .map_err(|e| format!("failed to flush csv '{}': {e}", path.display()))?;
    Ok(())
}
