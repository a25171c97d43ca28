mod api;
mod cli;
mod router;
mod startup;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use concierge_core::Config;
use concierge_gateway::conversation::spawn_idle_sweeper;
use concierge_gateway::rate_limit::spawn_sweeper;

use crate::cli::{CliArgs, Command};
use crate::state::AppState;

async fn serve(config: Config) -> anyhow::Result<()> {
    config.log_summary();

    let backend = concierge_llm::create_backend(&config.llm)
        .context("failed to create reasoning backend")?;
    let executor = startup::build_executor(&config)?;
    let gateway = startup::build_gateway(&config, backend, executor)?;

    let sweep_every = Duration::from_secs(config.gateway.rate_limit_sweep_secs.max(1));
    let sweeper = spawn_sweeper(gateway.rate_store().clone(), sweep_every);
    let idle_sweeper = spawn_idle_sweeper(gateway.conversations().clone(), sweep_every);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState { gateway, config });
    let app = router::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;

    sweeper.abort();
    idle_sweeper.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG may come from .env
    concierge_core::config::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let config = Config::for_profile(&args.profile);

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config.redacted_summary())?);
            Ok(())
        }
    }
}
