//! transeval - compiler-feedback evaluation of code translations
//!
//! ## Commands
//!
//! - `run`: translate a sample manifest with one or more models, refining
//!   each candidate from compiler diagnostics, and append results as JSONL
//! - `score`: structural similarity between a reference and a candidate
//! - `classify`: classify compiler diagnostics into the error taxonomy
//! - `aggregate`: summarize (or compare) previously recorded results

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use evaluation::aggregate::{self, format_comparison};
use evaluation::{
    BatchRunner, CompilationProbe, ErrorClassifier, EvaluationResult, ResultAggregator,
    TargetLanguage,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use transeval::{
    read_results, CompilerProbe, ModelRegistry, RunnerConfig, SampleManifest, TelemetrySink,
};

#[derive(Parser)]
#[command(name = "transeval")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compiler-feedback evaluation of code translations", long_about = None)]
struct Cli {
    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a sample manifest against configured models
    Run {
        /// Runner config (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Sample manifest (JSON Lines)
        #[arg(short, long)]
        samples: PathBuf,

        /// Model to evaluate; repeatable (default: every configured model)
        #[arg(short, long = "model")]
        models: Vec<String>,

        /// Results file, appended as JSON Lines
        #[arg(short, long, default_value = "results.jsonl")]
        output: PathBuf,

        /// Write report.md and report.json here
        #[arg(long)]
        report_dir: Option<PathBuf>,

        /// Stop after the first compilation (no corrective rounds)
        #[arg(long)]
        no_feedback: bool,
    },

    /// Score a candidate translation against a reference
    Score {
        reference: PathBuf,
        candidate: PathBuf,

        /// Target language (default: from config, else cpp)
        #[arg(short, long)]
        language: Option<TargetLanguage>,

        /// Config supplying similarity weights
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Classify compiler diagnostics from a file or stdin
    Classify {
        input: Option<PathBuf>,
    },

    /// Aggregate recorded results
    Aggregate {
        /// Results files (JSON Lines)
        #[arg(required = true)]
        results: Vec<PathBuf>,

        /// Baseline results to compare against
        #[arg(long)]
        baseline: Vec<PathBuf>,

        /// Print JSON instead of Markdown
        #[arg(long)]
        json: bool,

        /// Config supplying bootstrap settings
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Run {
            config,
            samples,
            models,
            output,
            report_dir,
            no_feedback,
        } => {
            run(
                config.as_deref(),
                &samples,
                &models,
                &output,
                report_dir.as_deref(),
                no_feedback,
            )
            .await
        }
        Commands::Score {
            reference,
            candidate,
            language,
            config,
        } => score(&reference, &candidate, language, config.as_deref()),
        Commands::Classify { input } => classify(input.as_deref()),
        Commands::Aggregate {
            results,
            baseline,
            json,
            config,
        } => aggregate_results(&results, &baseline, json, config.as_deref()),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(
    config_path: Option<&Path>,
    samples_path: &Path,
    models: &[String],
    output: &Path,
    report_dir: Option<&Path>,
    no_feedback: bool,
) -> Result<()> {
    let mut config = RunnerConfig::load(config_path)?;
    if no_feedback {
        config.evaluation.refinement.feedback_enabled = false;
    }
    let samples = SampleManifest::load(samples_path)?;
    let registry = ModelRegistry::from_config(&config)?;
    let generators = registry.select(models)?;
    let probe: Arc<dyn CompilationProbe> = Arc::new(CompilerProbe::from_config(
        &config.compiler,
        config.evaluation.similarity.language,
    )?);
    let aggregator = ResultAggregator::new(config.evaluation.aggregate.clone())?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; abandoning in-flight samples");
            on_signal.cancel();
        }
    });

    let mut sink = TelemetrySink::open(output)?;
    info!(
        samples = samples.len(),
        models = generators.len(),
        compiler = %config.compiler.program,
        run_id = %sink.run_id(),
        "Evaluation starting"
    );

    let mut per_model: Vec<(String, Vec<EvaluationResult>)> = Vec::new();
    for generator in generators {
        if cancel.is_cancelled() {
            break;
        }
        let runner = BatchRunner::new(generator, probe.clone(), &config.evaluation)?;
        info!(model = %runner.model(), "Evaluating model");
        let results = runner
            .run_with(samples.clone(), &cancel, |result| {
                info!(
                    model = %result.model,
                    sample_id = %result.sample_id,
                    terminal = %result.terminal,
                    iterations = result.iteration_count,
                    "Sample finished"
                );
                if let Err(e) = sink.record(result) {
                    warn!(error = %e, "Failed to record result");
                }
            })
            .await;
        per_model.push((runner.model().to_string(), results));
    }

    let all: Vec<EvaluationResult> = per_model
        .iter()
        .flat_map(|(_, results)| results.iter().cloned())
        .collect();
    let report = aggregator.aggregate(&all);
    let mut markdown = report.format_report();

    if let Some(((baseline_name, baseline), rest)) = per_model.split_first() {
        for (name, results) in rest {
            let delta = aggregate::compare(
                aggregator.aggregate(baseline),
                aggregator.aggregate(results),
            );
            markdown.push_str(&format!("\n_{name} vs {baseline_name}_\n\n"));
            markdown.push_str(&format_comparison(&delta));
        }
    }
    println!("{markdown}");

    if let Some(dir) = report_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        std::fs::write(dir.join("report.md"), &markdown).context("Failed to write report.md")?;
        std::fs::write(dir.join("report.json"), report.to_json()?)
            .context("Failed to write report.json")?;
        info!(dir = %dir.display(), "Report written");
    }
    Ok(())
}

fn score(
    reference: &Path,
    candidate: &Path,
    language: Option<TargetLanguage>,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = RunnerConfig::load(config_path)?;
    let mut similarity = config.evaluation.similarity;
    if let Some(language) = language {
        similarity.language = language;
    }
    let scorer = similarity.scorer()?;

    let reference = std::fs::read_to_string(reference)
        .with_context(|| format!("Failed to read {}", reference.display()))?;
    let candidate = std::fs::read_to_string(candidate)
        .with_context(|| format!("Failed to read {}", candidate.display()))?;

    let breakdown = scorer.score(&reference, &candidate);
    println!("{}", serde_json::to_string_pretty(&breakdown)?);
    Ok(())
}

fn classify(input: Option<&Path>) -> Result<()> {
    let diagnostics = match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            text
        }
    };

    let records = ErrorClassifier::default().classify(&diagnostics);
    let summary = ErrorClassifier::summarize(&records);
    let output = serde_json::json!({
        "records": records,
        "summary": summary,
        "blocking": summary.has_blocking(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn aggregate_results(
    results: &[PathBuf],
    baseline: &[PathBuf],
    json: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = RunnerConfig::load(config_path)?;
    let aggregator = ResultAggregator::new(config.evaluation.aggregate)?;
    let candidate = read_results(results)?;

    if baseline.is_empty() {
        let report = aggregator.aggregate(&candidate);
        if json {
            println!("{}", report.to_json()?);
        } else {
            println!("{}", report.format_report());
        }
        return Ok(());
    }

    let baseline = read_results(baseline)?;
    let delta = aggregator.compare(&baseline, &candidate);
    if json {
        println!("{}", delta.to_json()?);
    } else {
        println!("{}", format_comparison(&delta));
    }
    Ok(())
}
