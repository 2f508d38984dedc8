use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod util;

use util::{load_config, usage_error};

#[derive(Parser)]
#[command(name = "dosegate", version, about = "Dosegate CLI: evaluate and replay dosing ticks through the safety and audit layer")]
struct Cli {
    /// API base URL
    #[arg(long, env = "DOSEGATE_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Layer config file (JSON). Defaults to ~/.config/dosegate/config.json when present
    #[arg(long, global = true, env = "DOSEGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one tick locally and print the outcome
    Evaluate {
        /// JSON file with {proposed, context, now?} ("-" for stdin)
        #[arg(long, default_value = "-")]
        input: String,
        /// Evaluation instant (RFC3339); overrides `now` in the input
        #[arg(long)]
        now: Option<DateTime<Utc>>,
        /// Wait for a dispatched external audit and report its terminal status
        #[arg(long)]
        await_audit: bool,
    },
    /// Run a recorded tick sequence through one session, in time order
    Replay {
        /// JSON file with an array of {at, proposed, context} ("-" for stdin)
        #[arg(long, default_value = "-")]
        input: String,
    },
    /// Print the effective, validated layer configuration
    Config,
    /// Check API health
    Health,
    /// Show the audit status of the API session
    Status,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    // Logs go to stderr so stdout stays machine-readable JSON
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Health => commands::health::run(&cli.api_url).await,
        Commands::Status => commands::status::run(&cli.api_url).await,
        Commands::Config => commands::config::run(cli.config.as_deref()),
        Commands::Evaluate {
            input,
            now,
            await_audit,
        } => match load_config(cli.config.as_deref()) {
            Ok(config) => commands::evaluate::run(&input, now, await_audit, config).await,
            Err(e) => usage_error(&e, None),
        },
        Commands::Replay { input } => match load_config(cli.config.as_deref()) {
            Ok(config) => commands::replay::run(&input, config).await,
            Err(e) => usage_error(&e, None),
        },
    };

    std::process::exit(code);
}
