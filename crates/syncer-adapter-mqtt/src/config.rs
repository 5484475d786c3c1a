//! MQTT backend configuration.

use crate::error::MqttError;
use rumqttc::QoS;
use std::time::Duration;
use syncer_proto::{Message, TopicScheme};
use url::Url;

const DEFAULT_PORT: u16 = 1883;

/// Configuration for [`MqttBackend`](crate::MqttBackend).
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// MQTT broker URL (e.g., <tcp://localhost:1883>)
    pub broker: String,
    /// Client ID prefix; each socket appends its role and a random suffix
    pub client_id: String,
    /// Keep-alive interval
    pub keep_alive: Duration,
    /// Delivery guarantee for all traffic
    pub qos: QoS,
    /// Largest packet accepted or sent
    pub max_packet_size: usize,
    /// Settling time for subscriptions after a publisher binds
    pub connect_period: Duration,
    /// How long `open` waits for the broker to acknowledge
    pub connect_timeout: Duration,
    /// Topic layout
    pub topics: TopicScheme,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "tcp://localhost:1883".to_string(),
            client_id: "syncer".to_string(),
            keep_alive: Duration::from_secs(30),
            qos: QoS::AtLeastOnce,
            max_packet_size: Message::MAX_SIZE + 4096,
            connect_period: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(5),
            topics: TopicScheme::default(),
        }
    }
}

impl MqttConfig {
    /// Configuration for the given broker with defaults elsewhere.
    #[must_use]
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            ..Self::default()
        }
    }

    /// Use the given tenant in the topic layout.
    #[must_use]
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.topics.tenant = tenant.into();
        self
    }
}

/// Parse MQTT URL into host and port.
///
/// Accepts `tcp://host[:port]`, `mqtt://host[:port]` or `host[:port]`.
pub(crate) fn parse_mqtt_url(input: &str) -> Result<(String, u16), MqttError> {
    if input.contains("://") {
        let url =
            Url::parse(input).map_err(|e| MqttError::InvalidBrokerUrl(format!("{input}: {e}")))?;

        match url.scheme() {
            "tcp" | "mqtt" => {}
            scheme => {
                return Err(MqttError::InvalidBrokerUrl(format!(
                    "{input}: unsupported scheme '{scheme}'"
                )));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| MqttError::InvalidBrokerUrl(format!("{input}: missing host")))?;
        let port = url.port().unwrap_or(DEFAULT_PORT);

        return Ok((host.to_string(), port));
    }

    let mut parts = input.split(':');
    let host = parts
        .next()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| MqttError::InvalidBrokerUrl(format!("{input}: missing host")))?;
    let port = match parts.next() {
        None => DEFAULT_PORT,
        Some(port) => port
            .parse()
            .map_err(|_| MqttError::InvalidBrokerUrl(format!("{input}: invalid port '{port}'")))?,
    };
    if parts.next().is_some() {
        return Err(MqttError::InvalidBrokerUrl(format!(
            "{input}: too many ':' separators"
        )));
    }

    Ok((host.to_string(), port))
}

/// Check that an identifier can be used as a single topic level.
pub(crate) fn validate_topic_level(level: &str) -> Result<(), MqttError> {
    if level.is_empty() || level.contains(|c| matches!(c, '/' | '+' | '#')) {
        return Err(MqttError::InvalidTopicLevel(level.to_string()));
    }
    Ok(())
}
