//! Reserve delivery workers - notification and webhook outbox processing.

mod app;
mod config;
mod logging;

use clap::{Parser, Subcommand};
use config::WorkerConfig;

/// Reserve delivery worker command-line interface.
#[derive(Parser)]
#[command(name = "reserve-workerd")]
#[command(about = "Reserve outbox delivery workers (notifications and webhooks)")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = config::DEFAULT_LOG_LEVEL, global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run both delivery workers until interrupted
    Run,
    /// Reset a failed row back to pending
    Requeue {
        /// Notification outbox id to requeue
        #[arg(long)]
        notification: Option<String>,
        /// Webhook delivery id to requeue
        #[arg(long)]
        webhook: Option<String>,
    },
    /// Show queue depths per status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = WorkerConfig::from_env();

    logging::init(&cli.log_level, config.log_json);

    match cli.command {
        Some(Commands::Run) | None => {
            app::run_workers(config).await?;
        }
        Some(Commands::Requeue {
            notification,
            webhook,
        }) => {
            if notification.is_none() && webhook.is_none() {
                anyhow::bail!("pass --notification <id> and/or --webhook <id>");
            }
            app::requeue(&config, notification, webhook).await?;
        }
        Some(Commands::Status) => {
            app::status(&config).await?;
        }
    }

    Ok(())
}
