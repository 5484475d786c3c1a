//! # syncer Agent
//!
//! Demo runtime replicating a telemetry value over MQTT.
//!
//! ## Roles
//!
//! - **Server**: owns a `Telemetry` value, changes it every update interval
//!   and publishes each change as a versioned patch
//! - **Client**: replicates the value and logs every routed change to
//!   `/counter` and `/readings/{name}`

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod config;
mod runtime;
mod telemetry;

pub use config::AgentConfig;
pub use runtime::Agent;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting syncer agent");

    let config = AgentConfig::from_env()?;
    let agent_id = config.agent_id.unwrap_or_else(Uuid::new_v4);
    tracing::info!(%agent_id, role = %config.role, "Agent initialized");

    Agent::new(config, agent_id)?.run().await
}
