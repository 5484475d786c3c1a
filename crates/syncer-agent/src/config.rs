//! Agent configuration.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Which side of the replication the agent runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Owns the telemetry state and publishes changes
    Server,
    /// Replicates the state and logs routed changes
    Client,
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "server" => Ok(Role::Server),
            "client" => Ok(Role::Client),
            other => bail!("unknown role '{other}', expected 'server' or 'client'"),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => write!(f, "server"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Agent unique identifier
    pub agent_id: Option<Uuid>,

    /// Role to run
    pub role: Role,

    /// MQTT broker URL
    pub mqtt_broker: String,

    /// Tenant identifier
    pub tenant: String,

    /// Endpoint serving full state
    pub req_endpoint: String,

    /// Endpoint carrying patches
    pub pub_endpoint: String,

    /// Interval between server updates
    pub update_interval: Duration,

    /// Client full-state request timeout
    pub request_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: None,
            role: Role::Server,
            mqtt_broker: "tcp://localhost:1883".to_string(),
            tenant: "default".to_string(),
            req_endpoint: "telemetry-req".to_string(),
            pub_endpoint: "telemetry-pub".to_string(),
            update_interval: Duration::from_secs(1),
            request_timeout: syncer::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SYNCER_AGENT_ID`: Agent UUID
    /// - `SYNCER_ROLE`: "server" or "client"
    /// - `SYNCER_MQTT_BROKER`: MQTT broker URL
    /// - `SYNCER_TENANT`: Tenant identifier
    /// - `SYNCER_REQ_ENDPOINT`: Full-state endpoint name
    /// - `SYNCER_PUB_ENDPOINT`: Patch endpoint name
    /// - `SYNCER_UPDATE_INTERVAL_MS`: Server update interval
    /// - `SYNCER_REQUEST_TIMEOUT_MS`: Client request timeout
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(id) = lookup("SYNCER_AGENT_ID") {
            config.agent_id = Some(Uuid::parse_str(&id).context("Invalid SYNCER_AGENT_ID")?);
        }

        if let Some(role) = lookup("SYNCER_ROLE") {
            config.role = role.parse().context("Invalid SYNCER_ROLE")?;
        }

        if let Some(mqtt) = lookup("SYNCER_MQTT_BROKER") {
            config.mqtt_broker = mqtt;
        }

        if let Some(tenant) = lookup("SYNCER_TENANT") {
            config.tenant = tenant;
        }

        if let Some(endpoint) = lookup("SYNCER_REQ_ENDPOINT") {
            config.req_endpoint = endpoint;
        }

        if let Some(endpoint) = lookup("SYNCER_PUB_ENDPOINT") {
            config.pub_endpoint = endpoint;
        }

        if let Some(ms) = lookup("SYNCER_UPDATE_INTERVAL_MS") {
            config.update_interval = parse_millis(&ms).context("Invalid SYNCER_UPDATE_INTERVAL_MS")?;
        }

        if let Some(ms) = lookup("SYNCER_REQUEST_TIMEOUT_MS") {
            config.request_timeout = parse_millis(&ms).context("Invalid SYNCER_REQUEST_TIMEOUT_MS")?;
        }

        Ok(config)
    }
}

fn parse_millis(value: &str) -> Result<Duration> {
    let ms: u64 = value.trim().parse()?;
    if ms == 0 {
        bail!("must be greater than zero");
    }
    Ok(Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AgentConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        AgentConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let config = load(&[]).unwrap();
        assert_eq!(config.role, Role::Server);
        assert_eq!(config.tenant, "default");
        assert_eq!(config.update_interval, Duration::from_secs(1));
        assert!(config.agent_id.is_none());
    }

    #[test]
    fn overrides_from_variables() {
        let config = load(&[
            ("SYNCER_ROLE", "Client"),
            ("SYNCER_MQTT_BROKER", "mqtt://broker:1884"),
            ("SYNCER_TENANT", "plant-7"),
            ("SYNCER_PUB_ENDPOINT", "patches"),
            ("SYNCER_UPDATE_INTERVAL_MS", "250"),
            ("SYNCER_REQUEST_TIMEOUT_MS", "2000"),
        ])
        .unwrap();

        assert_eq!(config.role, Role::Client);
        assert_eq!(config.mqtt_broker, "mqtt://broker:1884");
        assert_eq!(config.tenant, "plant-7");
        assert_eq!(config.req_endpoint, "telemetry-req");
        assert_eq!(config.pub_endpoint, "patches");
        assert_eq!(config.update_interval, Duration::from_millis(250));
        assert_eq!(config.request_timeout, Duration::from_secs(2));
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(load(&[("SYNCER_ROLE", "observer")]).is_err());
        assert!(load(&[("SYNCER_AGENT_ID", "nope")]).is_err());
        assert!(load(&[("SYNCER_UPDATE_INTERVAL_MS", "0")]).is_err());
        assert!(load(&[("SYNCER_REQUEST_TIMEOUT_MS", "soon")]).is_err());
    }
}
