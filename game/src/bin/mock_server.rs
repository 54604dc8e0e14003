use std::env;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use spotdiff::config::resolve_mock_addr;
use spotdiff::logging;
use spotdiff::mock_server::{MockConfig, MockState, router};

#[derive(Debug, Parser)]
#[command(name = "spotdiff-mock-server")]
#[command(about = "In-memory spot-the-difference game server for local play")]
struct Cli {
    /// Listen address; defaults to SPOTDIFF_MOCK_ADDR / SPOTDIFF_MOCK_PORT or 127.0.0.1:8000.
    #[arg(long)]
    addr: Option<SocketAddr>,
    #[arg(long, default_value_t = 3)]
    stages: u32,
    #[arg(long, default_value_t = 2)]
    waiting_polls: u32,
    /// Omit width/height on found regions.
    #[arg(long, default_value_t = false)]
    regions_without_size: bool,
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.debug);

    let config = MockConfig {
        stages: cli.stages.max(1),
        waiting_polls: cli.waiting_polls,
        regions_without_size: cli.regions_without_size,
        ..MockConfig::demo()
    };
    let app = router(MockState::new(config));

    let addr = cli
        .addr
        .unwrap_or_else(|| resolve_mock_addr(|k| env::var(k).ok()));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("mock game server listening on http://{addr}/api/v1");

    axum::serve(listener, app)
        .await
        .context("mock game server stopped")?;
    Ok(())
}
