use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flatwatch_notify::{LogNotifier, Notifier, SmsNotifier, TwilioConfig};
use flatwatch_sync::{CycleDriver, IngestionPipeline, SyncConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "flatwatch")]
#[command(about = "Watches rental listing sites and texts you about new offers")]
struct Cli {
    /// Send SMS notifications for new offers (otherwise they are only logged)
    #[arg(long)]
    notify: bool,

    /// Path of the offer history database
    #[arg(long)]
    database: Option<PathBuf>,

    /// Seconds to sleep between the end of one cycle and the next
    #[arg(long)]
    interval_secs: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the watch loop until killed (default)
    Run,
    /// Run a single cycle and exit
    Once,
}

fn notifier_from_flags(notify: bool) -> Result<Box<dyn Notifier>> {
    if notify {
        let config = TwilioConfig::from_env().context("loading Twilio credentials")?;
        Ok(Box::new(SmsNotifier::new(reqwest::Client::new(), config)))
    } else {
        Ok(Box::new(LogNotifier))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = SyncConfig::from_env();
    if let Some(database) = cli.database {
        config.database_path = database;
    }
    if let Some(secs) = cli.interval_secs {
        config.interval = Duration::from_secs(secs);
    }

    let notifier = notifier_from_flags(cli.notify)?;
    let pipeline = IngestionPipeline::from_config(&config, notifier).await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Once => {
            let summary = pipeline.run_once().await.context("running cycle")?;
            println!("New offers: {}", summary.new_offers);
        }
        Commands::Run => {
            info!(
                database = %config.database_path.display(),
                interval_secs = config.interval.as_secs(),
                sources = config.queries.len(),
                "starting watch loop"
            );
            CycleDriver::new(pipeline, config.interval).run().await;
        }
    }

    Ok(())
}
