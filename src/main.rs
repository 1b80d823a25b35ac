//! NordGuard - PII Detection and Consistent Anonymization Pipeline
//!
//! Scans record batches for personal data, links findings to identities and
//! applies consistent privacy transformations, with a full audit trail.

use anyhow::Result;
use clap::{Parser, Subcommand};
use nordguard::{
    config::NordGuardConfig,
    ledger::AuditLedger,
    pipeline::Pipeline,
    record::{MemorySource, Record},
    report::BatchReport,
    store::MemoryStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "nordguard")]
#[command(version)]
#[command(about = "PII detection and consistent anonymization pipeline")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "NORDGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a batch of records and emit a report
    Scan {
        /// JSON file with the records to process
        input: PathBuf,

        /// Write the audit ledger to this JSONL file
        #[arg(long)]
        ledger: Option<PathBuf>,

        /// Emit the report as JSON instead of text
        #[arg(long)]
        json: bool,

        /// Use a fresh random pseudonymization salt for this run
        #[arg(long)]
        random_salt: bool,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("nordguard={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = if let Some(config_path) = &cli.config {
        let content = std::fs::read_to_string(config_path)?;
        toml::from_str(&content)?
    } else {
        NordGuardConfig::default()
    };

    match cli.command {
        Commands::Scan {
            input,
            ledger,
            json,
            random_salt,
        } => {
            if random_salt {
                config.transform.salt = nordguard::config::TransformConfig::random_salt();
            }
            run_scan(config, input, ledger, json).await?;
        }
        Commands::Config { default } => {
            let shown = if default {
                NordGuardConfig::default()
            } else {
                config
            };
            println!("{}", toml::to_string_pretty(&shown)?);
        }
    }

    Ok(())
}

async fn run_scan(
    config: NordGuardConfig,
    input: PathBuf,
    ledger_path: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let content = tokio::fs::read_to_string(&input).await?;
    let records: Vec<Record> = serde_json::from_str(&content)?;
    tracing::info!(records = records.len(), input = %input.display(), "loaded batch");
    let source = MemorySource::new(records);

    let ledger = match ledger_path.or_else(|| config.ledger.path.clone()) {
        Some(path) => Arc::new(AuditLedger::with_sink(&path).await?),
        None => Arc::new(AuditLedger::new()),
    };
    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::new(&config, Arc::clone(&ledger), store)?;

    // Ctrl+C stops the batch at the next stage boundary
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping at next stage boundary");
            signal_cancel.cancel();
        }
    });

    let output = pipeline.run_source(&source, &cancel).await?;
    let report = BatchReport::from_output(&output);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render());
    }

    if output.summary.cancelled {
        std::process::exit(130);
    }
    Ok(())
}
