//! testbatch CLI - balanced test batches from historical timings.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use testbatch::batch::summary::format_duration;
use testbatch::batch::{BatchFilter, BatchWriter, makespan, plan_batches, print_summary};
use testbatch::config::{self, Config, DEFAULT_CONFIG_FILE, DEFAULT_CONFIG_TEMPLATE};
use testbatch::report::MalformedReportPolicy;

#[derive(Parser)]
#[command(name = "testbatch")]
#[command(about = "Split a test suite into balanced batches using previous run timings", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path [default: testbatch.toml]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Group previous test results into batches and write the manifests
    Group {
        /// Directory containing JUnit XML reports
        #[arg(long)]
        results_dir: Option<PathBuf>,

        /// Directory to write batch manifests to
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Number of batches
        #[arg(short = 'n', long = "batches", env = "NUMBER_OF_BATCHES", allow_negative_numbers = true)]
        batches: Option<i64>,

        /// Skip reports that cannot be parsed instead of failing
        #[arg(long)]
        skip_malformed: bool,

        /// Print the assignment as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Print include patterns for one batch
    Filter {
        /// 1-based batch number
        #[arg(long, env = "BATCH_NUMBER", allow_negative_numbers = true)]
        batch_number: i64,

        /// Directory containing batch manifests
        #[arg(long)]
        batches_dir: Option<PathBuf>,
    },

    /// List tests found in previous results
    List {
        /// Directory containing JUnit XML reports
        #[arg(long)]
        results_dir: Option<PathBuf>,

        /// Skip reports that cannot be parsed instead of failing
        #[arg(long)]
        skip_malformed: bool,
    },

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays usable by scripts.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let explicit = cli.config.is_some();
    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    match cli.command {
        Commands::Group {
            results_dir,
            output_dir,
            batches,
            skip_malformed,
            json,
        } => {
            let mut config = config::load_config_or_default(&config_path, explicit)?;
            let batching = &mut config.batching;
            if let Some(dir) = results_dir {
                batching.results_dir = dir;
            }
            if let Some(dir) = output_dir {
                batching.output_dir = dir;
            }
            if batches.is_some() {
                batching.number_of_batches = batches;
            }
            if skip_malformed {
                batching.on_malformed_report = MalformedReportPolicy::Skip;
            }
            group_tests(&config, json).await
        }
        Commands::Filter {
            batch_number,
            batches_dir,
        } => {
            let config = config::load_config_or_default(&config_path, explicit)?;
            let dir = batches_dir.unwrap_or(config.batching.output_dir);
            filter_batch(&dir, batch_number)
        }
        Commands::List {
            results_dir,
            skip_malformed,
        } => {
            let mut config = config::load_config_or_default(&config_path, explicit)?;
            if let Some(dir) = results_dir {
                config.batching.results_dir = dir;
            }
            if skip_malformed {
                config.batching.on_malformed_report = MalformedReportPolicy::Skip;
            }
            list_tests(&config).await
        }
        Commands::Validate => validate_config(&config_path, explicit),
        Commands::Init { force } => init_config(&config_path, force),
    }
}

async fn group_tests(config: &Config, json: bool) -> Result<()> {
    let batching = &config.batching;

    // Validate everything before touching the output directory.
    let count = batching.batch_count()?;
    let collector = batching.report_collector()?.with_progress(report_progress()?);

    let results = collector
        .collect(&batching.results_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to collect test results from {}",
                batching.results_dir.display()
            )
        })?;
    let total_tests = results.len();

    let batches = plan_batches(count, results);
    let index = BatchWriter::with_default_formats(&batching.output_dir).write(&batches)?;
    info!(
        "Longest batch takes {} (fingerprint {})",
        format_duration(makespan(&batches)),
        &index.fingerprint[..12]
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&batches)?);
    } else {
        print_summary(total_tests, &batches);
    }

    Ok(())
}

fn filter_batch(dir: &Path, batch_number: i64) -> Result<()> {
    if batch_number < 1 {
        bail!("Batch number must be a positive integer, got {batch_number}");
    }

    let filter = BatchFilter::resolve(dir, batch_number)
        .with_context(|| format!("Failed to load batch {batch_number} from {}", dir.display()))?;
    for pattern in filter.include_patterns() {
        println!("{pattern}");
    }

    Ok(())
}

async fn list_tests(config: &Config) -> Result<()> {
    let batching = &config.batching;
    let results = batching
        .report_collector()?
        .collect(&batching.results_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to collect test results from {}",
                batching.results_dir.display()
            )
        })?;

    for result in &results {
        println!("{}", result.id());
    }
    println!("Found {} tests", results.len());

    Ok(())
}

fn validate_config(config_path: &Path, explicit: bool) -> Result<()> {
    let config = config::load_config_or_default(config_path, explicit)?;
    let batching = &config.batching;
    batching.report_collector()?;

    println!("Configuration is valid!");
    println!();
    println!("Settings:");
    match batching.number_of_batches {
        Some(_) => println!("  Number of batches: {}", batching.batch_count()?.get()),
        None => println!("  Number of batches: (not set, pass --batches)"),
    }
    println!("  Results dir: {}", batching.results_dir.display());
    println!("  Output dir: {}", batching.output_dir.display());
    println!("  Report pattern: {}", batching.report_pattern);
    println!(
        "  On malformed report: {}",
        match batching.on_malformed_report {
            MalformedReportPolicy::Fail => "fail",
            MalformedReportPolicy::Skip => "skip",
        }
    );
    println!("  Require results: {}", batching.require_results);
    if let Some(max) = batching.max_concurrent_reads {
        println!("  Max concurrent reads: {max}");
    }

    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists. Remove it first, edit it manually or pass --force.",
            path.display()
        );
    }

    std::fs::write(path, DEFAULT_CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Created {}", path.display());
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  testbatch group");

    Ok(())
}

fn report_progress() -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} reports")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}
