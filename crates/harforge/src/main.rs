//! harforge - AI-assisted API client generation from captured HTTP traffic

mod agent;
mod cli;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use harforge_core::{
    PricingTable, RunController, RunIdentity, RunOptions, RunStrategy, TokenUsage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "harforge",
    version,
    about = "Generate API clients from captured HTTP traffic with an AI coding agent",
    long_about = "Analyzes a HAR capture with an external AI coding agent and turns the\n\
                  recorded API calls into a working client.\n\
                  \n\
                  Examples:\n\
                    harforge run capture.har \"download my invoices\"\n\
                    harforge run capture.har \"scrape the catalog\" --sync\n\
                    harforge pricing\n\
                    harforge cost --model claude-opus-4-5 --input 500000 --output 20000\n\
                  \n\
                  Environment Variables:\n\
                    HARFORGE_OUTPUT_DIR              # Override run output root\n\
                    HARFORGE_ENABLE_SYNC             # Mirror generated scripts locally\n\
                    HARFORGE_SDK                     # Agent CLI to drive (default: claude)\n\
                    HARFORGE_MODEL                   # Model override\n\
                    HARFORGE_PRICING_FILE            # TOML pricing-table override"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze a HAR capture and generate an API client
    Run {
        /// Path to the captured HAR file
        har: PathBuf,

        /// What the generated client should accomplish
        goal: String,

        /// Run identifier (default: timestamp-derived)
        #[arg(long, env = "HARFORGE_RUN_ID")]
        run_id: Option<String>,

        /// Model override passed to the agent and used for pricing
        #[arg(long, env = "HARFORGE_MODEL")]
        model: Option<String>,

        /// Additional free-text instructions appended to the prompt
        #[arg(long)]
        instructions: Option<String>,

        /// Root directory for run output (default: ~/.harforge/runs)
        #[arg(long, env = "HARFORGE_OUTPUT_DIR")]
        output_dir: Option<PathBuf>,

        /// Mirror generated scripts into a local workspace as they change
        #[arg(long, env = "HARFORGE_ENABLE_SYNC")]
        sync: bool,

        /// Parent directory for mirrored workspaces
        #[arg(long, default_value = "scripts")]
        mirror_root: PathBuf,

        /// Agent CLI to drive
        #[arg(long, env = "HARFORGE_SDK", default_value = "claude")]
        sdk: String,

        /// Ignore the previous implementation and start from scratch
        #[arg(long)]
        fresh: bool,

        /// TOML pricing-table override
        #[arg(long, env = "HARFORGE_PRICING_FILE")]
        pricing_file: Option<PathBuf>,

        /// Quiet period before mirroring a burst of changes (milliseconds)
        #[arg(long, default_value_t = 500)]
        debounce_ms: u64,
    },
    /// Print the active pricing table
    Pricing {
        /// TOML pricing-table override
        #[arg(long, env = "HARFORGE_PRICING_FILE")]
        pricing_file: Option<PathBuf>,
    },
    /// Estimate cost for a token-usage breakdown
    Cost {
        /// Model identifier (unknown models price as the fallback)
        #[arg(long)]
        model: Option<String>,

        #[arg(long, default_value_t = 0)]
        input: u64,

        #[arg(long, default_value_t = 0)]
        output: u64,

        #[arg(long, default_value_t = 0)]
        cache_creation: u64,

        #[arg(long, default_value_t = 0)]
        cache_read: u64,

        #[arg(long, default_value_t = 0)]
        reasoning: u64,

        /// TOML pricing-table override
        #[arg(long, env = "HARFORGE_PRICING_FILE")]
        pricing_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            har,
            goal,
            run_id,
            model,
            instructions,
            output_dir,
            sync,
            mirror_root,
            sdk,
            fresh,
            pricing_file,
            debounce_ms,
        } => {
            run_analysis(RunArgs {
                har,
                goal,
                run_id,
                model,
                instructions,
                output_dir,
                sync,
                mirror_root,
                sdk,
                fresh,
                pricing_file,
                debounce_ms,
            })
            .await
        }
        Command::Pricing { pricing_file } => {
            let pricing = load_pricing(pricing_file.as_deref())?;
            println!("{}", cli::format_pricing_table(&pricing));
            Ok(())
        }
        Command::Cost {
            model,
            input,
            output,
            cache_creation,
            cache_read,
            reasoning,
            pricing_file,
        } => {
            let pricing = load_pricing(pricing_file.as_deref())?;
            let usage = TokenUsage {
                input,
                output,
                cache_creation,
                cache_read,
                reasoning,
            };
            println!("{}", cli::format_cost_summary(&usage, pricing.cost(model.as_deref(), &usage)));
            Ok(())
        }
    }
}

struct RunArgs {
    har: PathBuf,
    goal: String,
    run_id: Option<String>,
    model: Option<String>,
    instructions: Option<String>,
    output_dir: Option<PathBuf>,
    sync: bool,
    mirror_root: PathBuf,
    sdk: String,
    fresh: bool,
    pricing_file: Option<PathBuf>,
    debounce_ms: u64,
}

async fn run_analysis(args: RunArgs) -> Result<()> {
    anyhow::ensure!(
        args.har.is_file(),
        "HAR file not found: {}",
        args.har.display()
    );

    let pricing = Arc::new(load_pricing(args.pricing_file.as_deref())?);
    let run_id = args.run_id.unwrap_or_else(generate_run_id);
    let output_root = args
        .output_dir
        .unwrap_or_else(harforge_core::run::default_output_root);

    let identity = RunIdentity {
        run_id: run_id.clone(),
        har_path: args.har,
        goal: args.goal,
        model: args.model,
        additional_instructions: args.instructions,
        output_root,
    };

    let mut run = RunController::new(
        identity,
        pricing,
        RunOptions {
            enable_sync: args.sync,
            mirror_root: args.mirror_root,
            debounce: Duration::from_millis(args.debounce_ms),
        },
    );

    // Sync is a convenience mirror; failing to start it with sync enabled is
    // a real failure, but errors after start never abort the run.
    if let Some(dest) = run.start_sync().context("Failed to start script sync")? {
        println!("Mirroring generated scripts to {}", dest.display());
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner.set_message(format!("Agent analyzing {run_id}..."));

    let _forwarder = run.forward_notifications(Arc::new(cli::ConsoleSink::new(spinner.clone())));

    let mut strategy = agent::AgentProcess::new(args.sdk, args.fresh);
    let outcome = strategy.analyze_and_generate(&mut run).await;

    // Always stop the mirror before reporting, even when the agent failed.
    run.stop_sync();
    spinner.finish_and_clear();

    println!("{}", cli::format_cost_summary(run.total_usage(), run.total_cost()));
    println!("Scripts: {}", run.identity().scripts_dir().display());
    println!("Messages: {}", run.messages().path().display());

    outcome
}

fn load_pricing(path: Option<&std::path::Path>) -> Result<PricingTable> {
    match path {
        Some(path) => PricingTable::load(path)
            .with_context(|| format!("Failed to load pricing table from {}", path.display())),
        None => Ok(PricingTable::builtin()),
    }
}

fn generate_run_id() -> String {
    format!("run-{}", chrono::Utc::now().format("%Y%m%d-%H%M%S"))
}
