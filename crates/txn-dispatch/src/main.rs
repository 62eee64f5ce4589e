use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use txn_dispatch::{
    DispatchConfig, Dispatcher, ExecutionUnit, WorkloadDescriptor, load_descriptors,
};

#[derive(Parser)]
#[command(name = "txn-dispatch")]
#[command(about = "Dispatch ledger workloads concurrently and verify peers stay in sync")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dispatch configuration (YAML)
    #[arg(long, global = true, default_value = "dispatch.yaml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every descriptor concurrently, then check peer consistency
    Run {
        /// JSON array of workload descriptors
        #[arg(long)]
        descriptors: PathBuf,

        /// Write a JSON batch report here
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Check peer consistency for a channel without running any workload
    Check {
        #[arg(long)]
        channel: String,

        #[arg(long)]
        chaincode: String,

        /// Organizations whose peers are compared
        #[arg(long, value_delimiter = ',', required = true)]
        orgs: Vec<String>,

        /// Connection profile path handed to the topology lookup
        #[arg(long, default_value = ".")]
        connection_profile: PathBuf,
    },

    /// Validate the configuration file and exit
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&cli.log_level)
        .init();

    let config = DispatchConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Run {
            descriptors,
            output,
        } => {
            let batch = load_descriptors(&descriptors)
                .with_context(|| format!("loading {}", descriptors.display()))?;
            let dispatcher = Dispatcher::new(ExecutionUnit::from_config(&config)?);
            let outcome = dispatcher.run(batch).await;

            let report = outcome.to_report();
            println!("{}", report.summary);
            for unit in report.units.iter().filter(|u| !u.success) {
                println!(
                    "  [{}] {}: {}",
                    unit.index,
                    unit.channel,
                    unit.error.as_deref().unwrap_or("unknown error")
                );
            }

            if let Some(path) = output {
                let json = serde_json::to_string_pretty(&report)?;
                std::fs::write(&path, json)
                    .with_context(|| format!("writing {}", path.display()))?;
                info!("Report written to {}", path.display());
            }

            if !outcome.all_succeeded() {
                anyhow::bail!("{} of {} units failed", report.summary.failed, report.summary.total);
            }
        }

        Commands::Check {
            channel,
            chaincode,
            orgs,
            connection_profile,
        } => {
            let unit = ExecutionUnit::from_config(&config)?;
            let descriptor = WorkloadDescriptor::new(channel, chaincode, orgs, connection_profile);
            match unit.verify(&descriptor).await {
                Ok(report) => {
                    println!(
                        "channel {}: {} peer(s) in sync{}",
                        report.channel,
                        report.peers_checked,
                        report
                            .reference
                            .map(|state| format!(" at {}", state))
                            .unwrap_or_default()
                    );
                }
                Err(e) => {
                    error!("Consistency check failed: {}", e);
                    return Err(e.into());
                }
            }
        }

        Commands::Validate => {
            println!(
                "{} is valid: {} organization(s)",
                cli.config.display(),
                config.topology.organizations.len()
            );
        }
    }

    Ok(())
}
