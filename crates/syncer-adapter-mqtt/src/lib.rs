//! # syncer MQTT Adapter
//!
//! [`Backend`](syncer_proto::Backend) implementation over an MQTT broker.
//!
//! Topics follow [`TopicScheme`](syncer_proto::TopicScheme): broadcasts go
//! to `.../{endpoint}/pub[/{subject}]`, requests to
//! `.../{endpoint}/req/{client}/{seq}` and replies to
//! `.../{endpoint}/rep/{client}/{seq}`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod config;
pub mod error;
pub mod socket;

pub use backend::{MqttBackend, MqttParams};
pub use config::MqttConfig;
pub use error::MqttError;
pub use socket::MqttSocket;
pub use rumqttc::QoS;
