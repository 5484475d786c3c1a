//! Agent runtime orchestration.

use crate::config::{AgentConfig, Role};
use crate::telemetry::{logging_router, Telemetry};
use anyhow::{Context, Result};
use syncer::{Client, ClientOptions, Server};
use syncer_adapter_mqtt::{MqttBackend, MqttConfig, MqttParams};
use uuid::Uuid;

/// The agent runtime.
pub struct Agent {
    config: AgentConfig,
    backend: MqttBackend,
}

impl Agent {
    /// Create a new agent.
    ///
    /// # Errors
    ///
    /// Returns error if the MQTT configuration is invalid.
    pub fn new(config: AgentConfig, agent_id: Uuid) -> Result<Self> {
        let mut mqtt = MqttConfig::new(&config.mqtt_broker).with_tenant(&config.tenant);
        mqtt.client_id = format!("syncer-{}", agent_id.simple());
        let backend = MqttBackend::new(mqtt).context("Failed to create MQTT backend")?;

        Ok(Self { config, backend })
    }

    /// Run the configured role until Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns error if the endpoints cannot be opened.
    pub async fn run(self) -> Result<()> {
        let req = MqttParams::new(&self.config.req_endpoint);
        let publish = MqttParams::new(&self.config.pub_endpoint);

        tracing::info!(role = %self.config.role, tenant = %self.config.tenant, "Starting agent runtime");

        match self.config.role {
            Role::Server => self.run_server(&req, &publish).await,
            Role::Client => self.run_client(&req, &publish).await,
        }
    }

    async fn run_server(&self, req: &MqttParams, publish: &MqttParams) -> Result<()> {
        let mut telemetry = Telemetry::default();
        let server = Server::bind(&self.backend, req, publish, &telemetry)
            .await
            .context("Failed to bind server")?;

        let mut interval = tokio::time::interval(self.config.update_interval);
        tracing::info!("Server running, press Ctrl+C to stop");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    telemetry.advance();
                    if let Some(version) = server.update(&telemetry).await {
                        tracing::debug!(version, counter = telemetry.counter, "Published telemetry");
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        server.shutdown().await;
        tracing::info!("Agent stopped");
        Ok(())
    }

    async fn run_client(&self, req: &MqttParams, publish: &MqttParams) -> Result<()> {
        let router = logging_router().context("Failed to build router")?;
        let options = ClientOptions {
            request_timeout: self.config.request_timeout,
        };
        let client = Client::<Telemetry>::connect_with_options(&self.backend, req, publish, router, options)
            .await
            .context("Failed to connect client")?;

        tracing::info!("Client running, press Ctrl+C to stop");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        tracing::info!("Shutdown signal received");

        match client.data() {
            Ok(data) => tracing::info!(version = ?client.version(), counter = data.counter, "Final replica"),
            Err(err) => tracing::warn!(error = %err, "Replica unreadable"),
        }
        client.shutdown().await;
        tracing::info!("Agent stopped");
        Ok(())
    }
}
