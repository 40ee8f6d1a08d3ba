//! Pub/sub transport seam.
//!
//! ```text
//! Connector::open(url, options)
//!       │
//!       ├──► Arc<dyn Link>            publish / subscribe / close
//!       └──► Receiver<TransportEvent> connected, reconnecting, offline,
//!                                     closed, error, message
//! ```
//!
//! The link owns its own background I/O. Dropping the receiver does not
//! close the link; `close()` does, immediately and without a graceful
//! handshake.

pub mod memory;
pub mod mqtt;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::settings::ConnectionSettings;

pub use memory::{Handshake, MemoryBroker};
pub use mqtt::MqttConnector;

/// Buffered lifecycle/message events per link.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted by a link's background I/O.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Reconnecting,
    Offline,
    Closed,
    Error(String),
    Message { topic: String, payload: Vec<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Qos {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl Qos {
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => Self::AtMostOnce,
            1 => Self::AtLeastOnce,
            _ => Self::ExactlyOnce,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Client error: {0}")]
    Client(String),

    #[error("No async runtime available")]
    NoRuntime,
}

/// Client options derived from settings. Two equal option sets (with the
/// same URL) describe the same connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientOptions {
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub clean: bool,
    pub keepalive_secs: u64,
    pub reconnect_period_ms: u64,
}

impl ClientOptions {
    pub fn from_settings(settings: &ConnectionSettings, client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            clean: settings.clean,
            keepalive_secs: settings.keepalive,
            reconnect_period_ms: settings.reconnect_period,
        }
    }

    /// Identity of (url, options), used to detect settings changes that
    /// require a new connection.
    pub fn fingerprint(&self, url: &str) -> String {
        let options = serde_json::to_string(self).unwrap_or_default();
        format!("{url}|{options}")
    }
}

/// A live connection to a broker.
pub trait Link: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>, qos: Qos) -> Result<(), TransportError>;
    fn subscribe(&self, topic: &str, qos: Qos) -> Result<(), TransportError>;
    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;
    fn is_connected(&self) -> bool;
    /// Force-close. Safe to call more than once.
    fn close(&self);
}

/// Opens links. Must be called from within a tokio runtime.
pub trait Connector: Send + Sync {
    fn open(
        &self,
        url: &str,
        options: &ClientOptions,
    ) -> Result<(Arc<dyn Link>, mpsc::Receiver<TransportEvent>), TransportError>;
}

/// MQTT topic filter match with `+` and `#` wildcards.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
