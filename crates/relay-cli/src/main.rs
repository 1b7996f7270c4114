use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use relay_bot::Bot;
use relay_cli::{load_config, BuiltinCommands};
use relay_slack::{ChatSession, RtmSession};

#[derive(Debug, Parser)]
#[command(
    name = "relay",
    about = "Authorization-gated real-time Slack message dispatcher",
    version
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "relay.toml")]
    config: PathBuf,
    /// Enable debug logging (RUST_LOG still takes precedence).
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = load_config(&args.config)?;
    let session: Arc<dyn ChatSession> = Arc::new(RtmSession::new(config.session_config())?);

    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    let commands = Arc::new(BuiltinCommands::new(session.clone(), internal_tx));

    let (bot, events) = Bot::initialize(config.bot_config(), session, commands).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    bot.handle_messages(events, internal_rx, shutdown_rx).await;
    Ok(())
}
