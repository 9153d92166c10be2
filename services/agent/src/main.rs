//! Agent binary.
//!
//! Runs the reconciliation engine in poll mode against the configured
//! control plane until interrupted.

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use agentsdk_agent::{Agent, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.as_str().into());
    if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!(
        agent_type = ?config.agent_type,
        environment = %config.central.environment,
        central_url = %config.central.url,
        topic = %config.watch_topic_self_link(),
        "Starting agent"
    );

    let agent = Agent::builder(config)
        .build()
        .context("failed to build agent")?;

    if let Err(e) = agent.start().await {
        error!(error = %e, code = e.code(), "Agent failed to start");
        agent.shutdown().await;
        return Err(e.into());
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    agent.shutdown().await;
    info!("Agent shutdown complete");
    Ok(())
}
