//! Errors for the MQTT backend.

use syncer_proto::TransportError;

/// Errors for MQTT backend setup.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MqttError {
    /// Invalid MQTT broker URL
    #[error("invalid MQTT broker URL: {0}")]
    InvalidBrokerUrl(String),
    /// Identifier unusable as a topic level
    #[error("invalid topic level '{0}': must be non-empty without '/', '+' or '#'")]
    InvalidTopicLevel(String),
}

impl From<MqttError> for TransportError {
    fn from(err: MqttError) -> Self {
        TransportError::Connection(err.to_string())
    }
}
