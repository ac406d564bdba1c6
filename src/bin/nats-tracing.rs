//! nats-tracing CLI: run the publisher or the consumer role.

use clap::{Parser, Subcommand};
use nats_tracing::config::Config;
use nats_tracing::roles::{run_consumer, run_publisher};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "nats-tracing", about = "Traced work queue over NATS JetStream")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Publish a work item on every tick
    #[command(alias = "p")]
    Publisher,
    /// Consume and acknowledge work items
    #[command(alias = "c")]
    Consumer,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal.cancel();
    });

    match cli.command {
        Command::Publisher => run_publisher(config, cancel).await?,
        Command::Consumer => run_consumer(config, cancel).await?,
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => {
            tokio::signal::ctrl_c().await.ok();
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}
