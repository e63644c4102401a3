use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnstile::clock::{Clock, SystemClock};
use turnstile::config::TurnstileConfig;
use turnstile::ratelimit::FixedWindowRateLimiter;
use turnstile::store;

#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about = "Fixed-window rate limiter")]
struct Cli {
    /// YAML configuration file; `TURNSTILE__*` environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the registered limits as JSON
    Limits,
    /// Run admission checks against the configured store
    Check {
        /// Action name
        #[arg(short, long)]
        action: String,
        /// Identifier to check; repeat for a joint check
        #[arg(short = 'i', long = "id", required = true)]
        identifiers: Vec<String>,
        /// Number of consecutive checks
        #[arg(short = 'n', long, default_value_t = 1)]
        repeat: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = TurnstileConfig::load(cli.config.as_deref())?;
    info!(
        backend = ?config.store.backend,
        limits = config.limits.len(),
        "Configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let store = store::connect(&config.store, clock.clone()).await?;
    let limiter = FixedWindowRateLimiter::from_config(&config, store, clock)?;

    let outcome = run(&cli.command, &limiter).await;
    // Release the store whether or not the command succeeded.
    limiter.close().await?;
    outcome
}

async fn run(command: &Command, limiter: &FixedWindowRateLimiter) -> anyhow::Result<()> {
    match command {
        Command::Limits => {
            let report = serde_json::json!({
                "unknown_actions": limiter.unknown_action_policy(),
                "limits": limiter.limits(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Check {
            action,
            identifiers,
            repeat,
        } => {
            for attempt in 1..=*repeat {
                let admitted = limiter.check(identifiers.as_slice(), action).await?;
                let verdict = if admitted { "allowed" } else { "denied" };
                println!("{attempt}\t{action}\t{verdict}");
            }
        }
    }
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
