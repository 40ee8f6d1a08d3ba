//! Runtime connection telemetry.
//!
//! One `RuntimeConnectionInfo` per manager, held in a watch channel. Every
//! change goes through [`Telemetry::apply`], so observers only ever see whole
//! snapshots.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Offline,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Offline => "offline",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostics snapshot of the live connection.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConnectionInfo {
    pub status: ConnectionStatus,
    pub connected: bool,
    pub url: String,
    pub client_id: String,
    /// Epoch milliseconds.
    pub last_connected_at: Option<u64>,
    /// Epoch milliseconds.
    pub last_disconnected_at: Option<u64>,
    pub reconnect_count: u64,
    pub last_error: Option<String>,
}

/// A lifecycle step that changes the telemetry.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Connecting { url: String, client_id: String },
    Connected,
    Reconnecting,
    Offline,
    Closed,
    Error { message: String, connected: bool },
    /// The manager dropped the connection and its identity.
    TornDown,
}

impl RuntimeConnectionInfo {
    /// Apply one transition at time `now` (epoch ms).
    pub fn apply(&mut self, transition: Transition, now: u64) {
        match transition {
            Transition::Connecting { url, client_id } => {
                self.status = ConnectionStatus::Connecting;
                self.connected = false;
                self.url = url;
                self.client_id = client_id;
            }
            Transition::Connected => {
                self.status = ConnectionStatus::Connected;
                self.connected = true;
                self.last_connected_at = Some(now);
                self.last_error = None;
            }
            Transition::Reconnecting => {
                self.status = ConnectionStatus::Reconnecting;
                self.connected = false;
                self.reconnect_count = self.reconnect_count.saturating_add(1);
            }
            Transition::Offline => {
                self.status = ConnectionStatus::Offline;
                self.connected = false;
                self.last_disconnected_at = Some(now);
            }
            Transition::Closed => {
                self.status = ConnectionStatus::Disconnected;
                self.connected = false;
                self.last_disconnected_at = Some(now);
            }
            Transition::Error { message, connected } => {
                self.status = ConnectionStatus::Error;
                self.connected = connected;
                self.last_error = Some(message);
            }
            Transition::TornDown => {
                self.status = ConnectionStatus::Disconnected;
                self.connected = false;
                self.url.clear();
                self.client_id.clear();
                self.reconnect_count = 0;
                self.last_disconnected_at = Some(now);
            }
        }
    }
}

impl fmt::Display for RuntimeConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;
        if !self.url.is_empty() {
            write!(f, " {}", self.url)?;
        }
        if !self.client_id.is_empty() {
            write!(f, " as {}", self.client_id)?;
        }
        if self.reconnect_count > 0 {
            write!(f, ", reconnects: {}", self.reconnect_count)?;
        }
        if let Some(error) = &self.last_error {
            write!(f, ", last error: {error}")?;
        }
        Ok(())
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Shared handle to the telemetry snapshot.
#[derive(Clone)]
pub struct Telemetry {
    tx: Arc<watch::Sender<RuntimeConnectionInfo>>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(RuntimeConnectionInfo::default());
        Self { tx: Arc::new(tx) }
    }

    /// The single update path.
    pub fn apply(&self, transition: Transition) {
        let now = now_millis();
        self.tx.send_modify(|info| info.apply(transition, now));
    }

    /// Apply only while `alive` holds. The flag is read under the channel's
    /// write lock, so a transition can never land after the owner cleared it.
    pub fn apply_if(&self, alive: &AtomicBool, transition: Transition) -> bool {
        let now = now_millis();
        self.tx.send_if_modified(|info| {
            if !alive.load(Ordering::SeqCst) {
                return false;
            }
            info.apply(transition, now);
            true
        })
    }

    pub fn snapshot(&self) -> RuntimeConnectionInfo {
        self.tx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.tx.borrow().connected
    }

    pub fn subscribe(&self) -> watch::Receiver<RuntimeConnectionInfo> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connecting() -> Transition {
        Transition::Connecting {
            url: "mqtt://broker".into(),
            client_id: "scada_1".into(),
        }
    }

    #[test]
    fn test_transition_table() {
        let mut info = RuntimeConnectionInfo::default();
        assert_eq!(info.status, ConnectionStatus::Disconnected);

        info.apply(connecting(), 1);
        assert_eq!(info.status, ConnectionStatus::Connecting);
        assert_eq!(info.url, "mqtt://broker");
        assert_eq!(info.client_id, "scada_1");

        info.apply(
            Transition::Error {
                message: "refused".into(),
                connected: false,
            },
            2,
        );
        assert_eq!(info.status, ConnectionStatus::Error);
        assert_eq!(info.last_error.as_deref(), Some("refused"));

        info.apply(Transition::Connected, 3);
        assert!(info.connected);
        assert_eq!(info.last_connected_at, Some(3));
        assert_eq!(info.last_error, None);

        info.apply(Transition::Reconnecting, 4);
        info.apply(Transition::Reconnecting, 5);
        assert_eq!(info.status, ConnectionStatus::Reconnecting);
        assert_eq!(info.reconnect_count, 2);

        info.apply(Transition::Connected, 6);
        assert_eq!(info.reconnect_count, 2);

        info.apply(Transition::Offline, 7);
        assert_eq!(info.status, ConnectionStatus::Offline);
        assert_eq!(info.last_disconnected_at, Some(7));

        info.apply(Transition::Closed, 8);
        assert_eq!(info.status, ConnectionStatus::Disconnected);
        assert!(!info.connected);
        assert_eq!(info.last_disconnected_at, Some(8));
    }

    #[test]
    fn test_error_keeps_live_flag() {
        let mut info = RuntimeConnectionInfo::default();
        info.apply(Transition::Connected, 1);
        info.apply(
            Transition::Error {
                message: "publish failed".into(),
                connected: true,
            },
            2,
        );
        assert!(info.connected);
        assert_eq!(info.status, ConnectionStatus::Error);
    }

    #[test]
    fn test_teardown_resets_identity() {
        let mut info = RuntimeConnectionInfo::default();
        info.apply(connecting(), 1);
        info.apply(Transition::Reconnecting, 2);
        info.apply(Transition::TornDown, 3);
        assert_eq!(info.url, "");
        assert_eq!(info.client_id, "");
        assert_eq!(info.reconnect_count, 0);
        assert_eq!(info.last_disconnected_at, Some(3));
    }

    #[test]
    fn test_display_summary() {
        let mut info = RuntimeConnectionInfo::default();
        info.apply(connecting(), 1);
        info.apply(Transition::Reconnecting, 2);
        assert_eq!(info.to_string(), "reconnecting mqtt://broker as scada_1, reconnects: 1");
    }

    #[test]
    fn test_apply_if_respects_liveness() {
        let telemetry = Telemetry::new();
        let alive = AtomicBool::new(true);
        assert!(telemetry.apply_if(&alive, Transition::Connected));
        alive.store(false, Ordering::SeqCst);
        assert!(!telemetry.apply_if(&alive, Transition::Reconnecting));
        assert_eq!(telemetry.snapshot().status, ConnectionStatus::Connected);
        assert_eq!(telemetry.snapshot().reconnect_count, 0);
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let telemetry = Telemetry::new();
        let mut rx = telemetry.subscribe();
        telemetry.apply(Transition::Connected);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().status, ConnectionStatus::Connected);
        assert!(telemetry.is_connected());
    }
}
