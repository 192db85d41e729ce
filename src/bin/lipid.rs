//! lipid - lipidomics analysis CLI
//!
//! Command-line interface for composable lipidomics analysis.

use clap::{Parser, Subcommand, ValueEnum};
use composable_lipidomics::data::{Contrast, Experiment, SampleAnnotation};
use composable_lipidomics::error::{LipidError, Result};
use composable_lipidomics::normalize::{normalize, ExcludeFilter, NormalizationMethod, NormalizeOptions};
use composable_lipidomics::pipeline::{run_and_write, PipelineConfig};
use composable_lipidomics::qc::{profile_cv, profile_total_intensity, SampleSelection};
use composable_lipidomics::summarize::{summarize_transitions, SummaryMethod};
use composable_lipidomics::test::differential_test;
use std::path::{Path, PathBuf};

/// CLI-friendly normalization choice
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliNormalization {
    /// Probabilistic quotient normalization
    Pqn,
    /// Internal standard normalization (flagged or d7/d9-labelled rows)
    Istd,
}

impl From<CliNormalization> for NormalizationMethod {
    fn from(method: CliNormalization) -> Self {
        match method {
            CliNormalization::Pqn => NormalizationMethod::Pqn,
            CliNormalization::Istd => NormalizationMethod::Istd {
                selector: Default::default(),
                match_class: true,
            },
        }
    }
}

/// Composable lipidomics analysis
#[derive(Parser)]
#[command(name = "lipid")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every branch of a YAML or JSON pipeline configuration
    Run {
        /// Path to pipeline configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Directory for result tables
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Profile per-sample totals and per-feature CVs
    Qc {
        /// Wide-format intensity export
        #[arg(short, long)]
        data: PathBuf,

        /// Sample annotation table
        #[arg(short, long)]
        annotation: Option<PathBuf>,

        /// Measure name for the loaded values
        #[arg(short, long, default_value = "Area")]
        measure: String,

        /// Compute CVs over pooled QC samples only
        #[arg(long)]
        qc_only: bool,

        /// Output prefix; writes <prefix>_total_intensity.csv and <prefix>_cv.csv
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Normalize and run a moderated two-group test
    De {
        /// Wide-format intensity export
        #[arg(short, long)]
        data: PathBuf,

        /// Sample annotation table
        #[arg(short, long)]
        annotation: PathBuf,

        /// Numerator group
        #[arg(long)]
        group_a: String,

        /// Reference group
        #[arg(long)]
        group_b: String,

        /// Measure name for the loaded values
        #[arg(short, long, default_value = "Area")]
        measure: String,

        /// Normalization method
        #[arg(long, value_enum, default_value = "pqn")]
        normalization: CliNormalization,

        /// Group kept out of the normalization reference (e.g. Blank)
        #[arg(long)]
        exclude_group: Option<String>,

        /// Collapse duplicate transitions by averaging
        #[arg(long)]
        summarize: bool,

        /// Output path for results CSV
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Generate an example pipeline configuration
    Example {
        /// Output path for example config
        #[arg(short, long, default_value = "pipeline.yaml")]
        output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let result = match cli.command {
        Commands::Run { config, output } => cmd_run(&config, &output),

        Commands::Qc {
            data,
            annotation,
            measure,
            qc_only,
            output,
        } => cmd_qc(&data, annotation.as_deref(), &measure, qc_only, output.as_deref()),

        Commands::De {
            data,
            annotation,
            group_a,
            group_b,
            measure,
            normalization,
            exclude_group,
            summarize,
            output,
        } => cmd_de(
            &data,
            &annotation,
            &Contrast::new(&group_a, &group_b),
            &measure,
            normalization,
            exclude_group,
            summarize,
            &output,
        ),

        Commands::Example { output } => cmd_example(&output),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Load an export and optionally join its annotation.
fn load(data: &Path, annotation: Option<&Path>, measure: &str) -> Result<Experiment> {
    eprintln!("Loading data from {:?}...", data);
    let mut exp = Experiment::from_csv(data, measure)?;
    if let Some(path) = annotation {
        let annotation = SampleAnnotation::from_csv(path)?;
        exp = exp.annotate(&annotation);
    }
    eprintln!(
        "Loaded {} features x {} samples ({} annotated)",
        exp.n_features(),
        exp.n_samples(),
        exp.grouped_sample_count()
    );
    Ok(exp)
}

/// Run a pipeline configuration
fn cmd_run(config_path: &Path, output_dir: &Path) -> Result<()> {
    eprintln!("Loading pipeline configuration from {:?}...", config_path);
    let config = PipelineConfig::from_file(config_path)?;

    eprintln!(
        "Running pipeline '{}' ({} branch(es))...",
        config.name,
        config.branches.len()
    );
    let results = run_and_write(&config, output_dir);

    let mut n_failed = 0;
    for result in &results {
        match result {
            Ok(report) => eprint!("{}", report),
            Err(e) => {
                n_failed += 1;
                eprintln!("Error: {}", e);
            }
        }
    }

    if n_failed > 0 {
        return Err(LipidError::Pipeline(format!(
            "{} of {} branch(es) failed",
            n_failed,
            results.len()
        )));
    }
    eprintln!("Done! Tables written to {:?}", output_dir);
    Ok(())
}

/// Profile sample totals and feature CVs
fn cmd_qc(
    data: &Path,
    annotation: Option<&Path>,
    measure: &str,
    qc_only: bool,
    output: Option<&Path>,
) -> Result<()> {
    let exp = load(data, annotation, measure)?;

    let totals = profile_total_intensity(&exp, measure, true)?;
    let selection = if qc_only {
        SampleSelection::Qc
    } else {
        SampleSelection::All
    };
    let cv = profile_cv(&exp, measure, &selection)?;

    println!("{}", totals);
    println!(
        "Median CV: {:.3} ({} feature(s) above 0.2)",
        cv.median_cv(),
        cv.unstable(0.2).len()
    );

    if let Some(prefix) = output {
        let with_suffix = |suffix: &str| {
            let mut name = prefix.as_os_str().to_owned();
            name.push(suffix);
            PathBuf::from(name)
        };
        totals.to_csv(with_suffix("_total_intensity.csv"))?;
        cv.to_csv(with_suffix("_cv.csv"))?;
        eprintln!("QC tables written with prefix {:?}", prefix);
    }
    Ok(())
}

/// Normalize and test one contrast
#[allow(clippy::too_many_arguments)]
fn cmd_de(
    data: &Path,
    annotation: &Path,
    contrast: &Contrast,
    measure: &str,
    normalization: CliNormalization,
    exclude_group: Option<String>,
    summarize: bool,
    output: &Path,
) -> Result<()> {
    let mut exp = load(data, Some(annotation), measure)?;

    if summarize {
        exp = summarize_transitions(&exp, SummaryMethod::Average)?;
        eprintln!("Summarized to {} features", exp.n_features());
    }

    let mut options = NormalizeOptions::new(measure);
    if let Some(group) = exclude_group {
        options = options.exclude(ExcludeFilter::Group(group));
    }
    let method: NormalizationMethod = normalization.into();
    eprintln!("Normalizing ({:?})...", normalization);
    let exp = normalize(&exp, &method, &options)?;

    eprintln!("Testing {}...", contrast);
    let results = differential_test(&exp, measure, contrast)?;

    eprintln!("Writing results to {:?}...", output);
    results.to_csv(output)?;

    let summary = results.summary();
    eprintln!("Done! {} features tested", results.len());
    eprintln!("{}", summary);
    Ok(())
}

/// Generate an example configuration
fn cmd_example(output: &Path) -> Result<()> {
    let config = PipelineConfig::example();
    let yaml = config.to_yaml()?;
    std::fs::write(output, &yaml)?;
    eprintln!("Example configuration written to {:?}", output);
    Ok(())
}
