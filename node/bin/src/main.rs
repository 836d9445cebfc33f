mod mocks;
mod scenario;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scenario {
    /// Two channels interleave during live processing.
    LiveInterleaving,
    /// Replay reproduces the original interleaving despite reordered buffer arrival.
    Replay,
    /// A non-`EndOfPartition` event mid-stream aborts processing.
    FatalEvent,
    /// A recovery thread rebuilds a subpartition while an async determinant fires.
    Recovery,
}

#[derive(Debug, Parser)]
#[command(name = "causalstream-node", about = "Demonstrates the causal-replay input core")]
struct Cli {
    /// Which end-to-end scenario to run.
    #[arg(value_enum)]
    scenario: Scenario,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.scenario {
        Scenario::LiveInterleaving => scenario::live_two_channel_interleaving().await,
        Scenario::Replay => scenario::replay_reproduces_interleaving().await,
        Scenario::FatalEvent => scenario::fatal_event_aborts_processing().await,
        Scenario::Recovery => scenario::recovery_rebuilds_subpartition_and_fires_async_determinant().await,
    }
}
