//! MQTT transport backend.

use crate::config::{parse_mqtt_url, validate_topic_level, MqttConfig};
use crate::error::MqttError;
use crate::socket::{drive, Correlation, MqttSocket};
use async_trait::async_trait;
use rumqttc::{AsyncClient, MqttOptions};
use std::sync::Arc;
use std::time::Duration;
use syncer_proto::{Backend, SocketRole, TransportError};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 100;

/// Endpoint parameters for [`MqttBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttParams {
    /// Endpoint name, one topic level
    pub endpoint: String,
    /// Subject prefix filter for subscribers (empty accepts everything)
    pub subject: String,
}

impl MqttParams {
    /// Parameters for the named endpoint without a subject filter.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            subject: String::new(),
        }
    }

    /// Restrict a subscriber to subjects starting with `subject`.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }
}

impl From<&str> for MqttParams {
    fn from(endpoint: &str) -> Self {
        Self::new(endpoint)
    }
}

#[derive(Debug)]
struct Inner {
    config: MqttConfig,
    host: String,
    port: u16,
}

/// Transport backend over an MQTT broker.
///
/// Every socket opens its own broker connection. Binding is not exclusive:
/// the broker cannot tell whether another publisher or replier already
/// serves an endpoint.
#[derive(Debug, Clone)]
pub struct MqttBackend {
    inner: Arc<Inner>,
}

impl MqttBackend {
    /// Create a backend for the configured broker.
    ///
    /// # Errors
    ///
    /// Returns error if the broker URL, tenant or client ID prefix is invalid.
    pub fn new(config: MqttConfig) -> Result<Self, MqttError> {
        let (host, port) = parse_mqtt_url(&config.broker)?;
        validate_topic_level(&config.topics.tenant)?;
        validate_topic_level(&config.client_id)?;

        Ok(Self {
            inner: Arc::new(Inner { config, host, port }),
        })
    }

    /// The configuration this backend was created with.
    #[must_use]
    pub fn config(&self) -> &MqttConfig {
        &self.inner.config
    }
}

#[async_trait]
impl Backend for MqttBackend {
    type Params = MqttParams;
    type Socket = MqttSocket;

    fn connect_period(&self) -> Duration {
        self.inner.config.connect_period
    }

    async fn open(
        &self,
        role: SocketRole,
        params: &MqttParams,
    ) -> Result<MqttSocket, TransportError> {
        validate_topic_level(&params.endpoint)?;

        let config = &self.inner.config;
        let client_id = format!("{}-{role}-{}", config.client_id, Uuid::new_v4().simple());
        let correlation = Correlation::new(
            role,
            config.topics.clone(),
            params.endpoint.clone(),
            client_id.clone(),
            params.subject.clone(),
        );

        let mut options = MqttOptions::new(&client_id, &self.inner.host, self.inner.port);
        options.set_keep_alive(config.keep_alive);
        options.set_max_packet_size(config.max_packet_size, config.max_packet_size);
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, CHANNEL_CAPACITY);
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let driver = tokio::spawn(drive(
            eventloop,
            client.clone(),
            correlation.filter(),
            config.qos,
            tx,
            ready_tx,
        ));

        if !matches!(
            tokio::time::timeout(config.connect_timeout, ready_rx).await,
            Ok(Ok(()))
        ) {
            driver.abort();
            return Err(TransportError::Connection(format!(
                "{}: no acknowledgement within {:?}",
                config.broker, config.connect_timeout
            )));
        }

        tracing::info!(%role, endpoint = %params.endpoint, client_id, "Opened MQTT socket");
        Ok(MqttSocket::new(
            client,
            rx,
            driver,
            correlation,
            config.qos,
            config.max_packet_size,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_configuration() {
        assert!(MqttBackend::new(MqttConfig::new("http://localhost")).is_err());
        assert!(MqttBackend::new(MqttConfig::new("localhost").with_tenant("a/b")).is_err());

        let mut config = MqttConfig::new("localhost");
        config.client_id = "bad+id".to_string();
        assert!(MqttBackend::new(config).is_err());
    }

    #[test]
    fn accepts_valid_configuration() {
        let backend = MqttBackend::new(MqttConfig::new("tcp://broker:1884")).unwrap();
        assert_eq!(backend.inner.host, "broker");
        assert_eq!(backend.inner.port, 1884);
        assert_eq!(backend.connect_period(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn invalid_endpoint_is_rejected_before_connecting() {
        let backend = MqttBackend::new(MqttConfig::new("localhost")).unwrap();
        let result = backend
            .open(SocketRole::Subscriber, &MqttParams::new("a/#"))
            .await;
        assert!(matches!(result, Err(TransportError::Connection(_))));
    }
}
