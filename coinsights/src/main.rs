//! coinsights: resolution attestation for exchange complaint tracking
//!
//! Commands:
//! - `hash <file>` prints the commitment for an evidence JSON file
//! - `demo` runs the issue, resolution, attestation and verification
//!   workflow against an in-memory ledger
//! - `config` prints the effective configuration

mod demo;
mod settings;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use resolution::{hash_evidence, CommitmentAlgorithm, Evidence};
use serde_json::json;
use tracing::info;

use settings::Overrides;

#[derive(Parser)]
#[command(name = "coinsights")]
#[command(about = "Evidence commitments and ledger attestation for exchange issue resolutions")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "coinsights.yaml")]
    config: PathBuf,

    /// Network name (overrides config file)
    #[arg(long, env = "COINSIGHTS_NETWORK")]
    network: Option<String>,

    /// Commitment hash algorithm, keccak256 or sha256 (overrides config file)
    #[arg(long, env = "COINSIGHTS_HASH_ALGORITHM")]
    algorithm: Option<CommitmentAlgorithm>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the commitment for an evidence JSON file
    Hash {
        /// Evidence file
        path: PathBuf,
    },

    /// Run the full workflow against an in-memory ledger
    Demo {
        /// Exchange name
        #[arg(long, default_value = "coinbase")]
        exchange: String,
        /// Issue category
        #[arg(long, default_value = "withdrawal_delays")]
        category: String,
    },

    /// Print the effective configuration as YAML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("coinsights=info".parse()?);
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let config = settings::load(
        &cli.config,
        Overrides {
            network: cli.network,
            algorithm: cli.algorithm,
        },
    )?;
    info!(
        network = %config.network,
        algorithm = %config.attestation.algorithm,
        "Configuration loaded"
    );

    match cli.command {
        Command::Hash { path } => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let evidence: Evidence = serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            evidence.validate(config.engine.percentage_tolerance)?;
            let commitment = hash_evidence(&evidence, config.attestation.algorithm)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "evidence_hash": commitment,
                    "algorithm": config.attestation.algorithm,
                }))?
            );
        }
        Command::Demo { exchange, category } => {
            let output = demo::run(config, &exchange, &category).await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Config => {
            print!("{}", config.to_yaml()?);
        }
    }

    Ok(())
}
