use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use prometheus::Encoder;
use sha2::{Digest, Sha256};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vget_core::delivery::SqliteLedger;
use vget_core::notify::{NoopMailer, PlainReportBuilder, TracingNotifier};
use vget_core::{load_config, validate_config, IngestController, IngestOutcome, SubmissionLedger};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "vget", version = VERSION, about = "Correlator archive ingestion and post-solve delivery")]
struct Cli {
    /// Configuration file. Defaults to $VGET_CONFIG, then ./vget.toml.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dump pipeline metrics in Prometheus text format on exit
    #[arg(long, global = true)]
    show_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download and process one session from an archive center
    Fetch {
        /// Archive center code (e.g. cddis)
        center: String,
        /// Database name (e.g. 24JAN02XE)
        db_name: String,
    },
    /// Walk a center's watched tree and ingest every new bundle
    Scan {
        /// Archive center code
        center: String,
    },
    /// Re-drive queued pending deliveries through the primary data center
    Resubmit,
    /// Show recent submission ledger entries
    Status {
        /// Number of entries to show
        #[arg(short, long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let metrics_registry = prometheus::Registry::new();
    vget_core::metrics::register_all(&metrics_registry)
        .context("Failed to register pipeline metrics")?;

    // Determine config path
    let config_path = cli
        .config
        .or_else(|| std::env::var("VGET_CONFIG").map(PathBuf::from).ok())
        .unwrap_or_else(|| PathBuf::from("vget.toml"));

    info!("Loading configuration from {config_path:?}");
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {config_path:?}"))?;
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        "Configuration loaded (agency {}, hash {})",
        config.agency.code,
        &config_hash[..16]
    );

    let ledger: Arc<dyn SubmissionLedger> = Arc::new(
        SqliteLedger::new(&config.database.path).context("Failed to open submission ledger")?,
    );
    let ledger_view = Arc::clone(&ledger);

    let agency = config.agency.code.clone();
    let controller = IngestController::from_config(
        config,
        ledger,
        Arc::new(TracingNotifier),
        Arc::new(PlainReportBuilder::new(agency)),
        Arc::new(NoopMailer),
    )
    .context("Failed to build pipeline")?;

    match cli.command {
        Command::Fetch { center, db_name } => {
            let outcome = controller.fetch(&center, &db_name).await?;
            print_outcome(&outcome);
        }
        Command::Scan { center } => {
            let outcomes = controller.scan(&center).await?;
            if outcomes.is_empty() {
                println!("nothing new at {center}");
            }
            for outcome in &outcomes {
                print_outcome(outcome);
            }
        }
        Command::Resubmit => {
            let receipt = controller.delivery().resubmit_pending().await?;
            for name in &receipt.confirmed {
                println!("{name} uploaded");
            }
            for name in &receipt.pending {
                println!("{name} still pending");
            }
            if receipt.confirmed.is_empty() && receipt.pending.is_empty() {
                println!("pending queue is empty");
            }
        }
        Command::Status { limit } => {
            for record in ledger_view.recent(limit).context("Ledger query failed")? {
                println!(
                    "{} | {} | user {} | {} | {}",
                    record.submitted_at.format("%Y-%m-%d %H:%M:%S"),
                    record.file_name,
                    record.user,
                    record.origin,
                    record.status.as_str(),
                );
            }
        }
    }

    if cli.show_metrics {
        let mut buf = Vec::new();
        prometheus::TextEncoder::new()
            .encode(&metrics_registry.gather(), &mut buf)
            .context("Failed to encode metrics")?;
        print!("{}", String::from_utf8_lossy(&buf));
    }

    Ok(())
}

fn print_outcome(outcome: &IngestOutcome) {
    match outcome {
        IngestOutcome::Ready { db_name, action } => {
            println!("{db_name}: installed ({}) and ready for processing", action.as_str())
        }
        IngestOutcome::AutoProcessed { db_name, ok } => println!(
            "{db_name}: automatically processed{}",
            if *ok { "" } else { " with problems" }
        ),
        IngestOutcome::NoUpdate { db_name, reason } => {
            println!("{db_name}: no update [{reason}]")
        }
        IngestOutcome::Busy { db_name, holder } => {
            println!("{db_name}: busy, held by interactive session {holder}")
        }
        IngestOutcome::Rejected { name } => println!("{name}: not an acceptable bundle name"),
        IngestOutcome::DownloadFailed { name } => println!("{name}: download failed"),
        IngestOutcome::InstallFailed { db_name, reason } => {
            println!("{db_name}: installation failed [{reason}]")
        }
        IngestOutcome::StageFailed {
            db_name,
            failed_step,
        } => println!("{db_name}: processing stopped at {failed_step}"),
    }
}
