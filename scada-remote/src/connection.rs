//! Connection manager.
//!
//! Owns at most one broker link at a time and drives its lifecycle:
//!
//! ```text
//!   disconnected ──► connecting ──► connected ◄──► reconnecting
//!                                      │
//!                                      ├──► offline / error
//!                                      └──► disconnected (close, teardown)
//! ```
//!
//! Each link gets one event task that feeds telemetry, keeps the inbound
//! subscription in sync, and hands inbound commands to the [`Dispatcher`].
//! A per-link liveness flag keeps a superseded link from touching anything.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use scada_core::SharedDesigner;

use crate::dispatcher::{Dispatcher, Origin};
use crate::events::{self, EventPublisher};
use crate::settings::{ConnectionSettings, SettingsStore};
use crate::telemetry::{RuntimeConnectionInfo, Telemetry, Transition};
use crate::transport::{ClientOptions, Connector, Link, Qos, TransportError, TransportEvent};

/// Default bound for [`ConnectionManager::test_connection`].
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(5000);

/// A random client id of the form `scada_<8 hex>`.
pub fn generate_client_id() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    format!("scada_{}", &simple[..8])
}

// ---------------------------------------------------------------
// Outbound path
// ---------------------------------------------------------------

/// Publish handle onto whatever link is currently live. Cheap to clone;
/// shared by responses and the event publisher.
#[derive(Clone)]
pub struct Outbound {
    link: Arc<RwLock<Option<Arc<dyn Link>>>>,
    telemetry: Telemetry,
}

impl Outbound {
    fn new(telemetry: Telemetry) -> Self {
        Self {
            link: Arc::new(RwLock::new(None)),
            telemetry,
        }
    }

    fn current(&self) -> Option<Arc<dyn Link>> {
        match self.link.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, link: Option<Arc<dyn Link>>) {
        match self.link.write() {
            Ok(mut guard) => *guard = link,
            Err(poisoned) => *poisoned.into_inner() = link,
        }
    }

    /// The live link, if connected.
    pub fn connected_link(&self) -> Option<Arc<dyn Link>> {
        self.current().filter(|link| link.is_connected())
    }

    pub fn is_connected(&self) -> bool {
        self.connected_link().is_some()
    }

    /// Publish JSON. Dropped (returns `false`) when not connected.
    pub fn publish(&self, topic: &str, payload: &Value, qos: Qos) -> bool {
        let Some(link) = self.connected_link() else {
            return false;
        };
        let bytes = match serde_json::to_vec(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("unserializable payload for {topic}: {e}");
                return false;
            }
        };
        match link.publish(topic, bytes, qos) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("publish to {topic} failed: {e}");
                self.telemetry.apply(Transition::Error {
                    message: e.to_string(),
                    connected: link.is_connected(),
                });
                false
            }
        }
    }
}

/// Outcome of [`ConnectionManager::test_connection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProbeResult {
    fn ok() -> Self {
        Self { ok: true, message: None }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
        }
    }
}

struct LiveLink {
    fingerprint: String,
    link: Arc<dyn Link>,
    alive: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl LiveLink {
    fn close(self) {
        self.alive.store(false, Ordering::SeqCst);
        self.task.abort();
        self.link.close();
    }
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    settings: SettingsStore,
    designer: SharedDesigner,
    telemetry: Telemetry,
    outbound: Outbound,
    /// Inbound topic currently subscribed on the live link.
    subscribed: Arc<Mutex<Option<String>>>,
    live: Option<LiveLink>,
    /// Generated client id, kept until teardown.
    identity: Option<String>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, settings: SettingsStore, designer: SharedDesigner) -> Self {
        let telemetry = Telemetry::new();
        Self {
            connector,
            settings,
            designer,
            outbound: Outbound::new(telemetry.clone()),
            telemetry,
            subscribed: Arc::new(Mutex::new(None)),
            live: None,
            identity: None,
        }
    }

    /// Bring the connection in line with `settings`.
    ///
    /// An empty URL tears down. Unchanged url and client options keep the
    /// live link (and re-sync the inbound subscription); anything else
    /// replaces it. Failures end up in telemetry as `error`.
    pub fn connect(&mut self, settings: &ConnectionSettings) {
        if settings.url.is_empty() {
            self.teardown();
            return;
        }

        let client_id = if settings.client_id.is_empty() {
            self.identity.get_or_insert_with(generate_client_id).clone()
        } else {
            settings.client_id.clone()
        };
        let options = ClientOptions::from_settings(settings, client_id.clone());
        let fingerprint = options.fingerprint(&settings.url);

        if let Some(live) = &self.live {
            if live.fingerprint == fingerprint {
                if live.link.is_connected() {
                    sync_subscription(live.link.as_ref(), settings, &self.subscribed);
                }
                return;
            }
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                self.telemetry.apply(Transition::Connecting {
                    url: settings.url.clone(),
                    client_id,
                });
                self.fail(&settings.url, TransportError::NoRuntime);
                return;
            }
        };

        self.drop_live();
        self.telemetry.apply(Transition::Connecting {
            url: settings.url.clone(),
            client_id: client_id.clone(),
        });
        log::info!("connecting to {} as {client_id}", settings.url);

        let (link, events) = match self.connector.open(&settings.url, &options) {
            Ok(opened) => opened,
            Err(e) => {
                self.fail(&settings.url, e);
                return;
            }
        };

        let alive = Arc::new(AtomicBool::new(true));
        let driver = LinkDriver {
            link: link.clone(),
            alive: alive.clone(),
            telemetry: self.telemetry.clone(),
            settings: self.settings.clone(),
            designer: self.designer.clone(),
            dispatcher: Dispatcher::new(self.settings.clone(), self.telemetry.clone()),
            outbound: self.outbound.clone(),
            subscribed: self.subscribed.clone(),
        };
        let task = runtime.spawn(driver.run(events));

        self.outbound.replace(Some(link.clone()));
        self.live = Some(LiveLink {
            fingerprint,
            link,
            alive,
            task,
        });
    }

    /// `connect` with the store's current settings.
    pub fn ensure_connected(&mut self) {
        let settings = self.settings.get();
        self.connect(&settings);
    }

    fn drop_live(&mut self) {
        if let Some(previous) = self.live.take() {
            log::info!("replacing connection to {}", self.telemetry.snapshot().url);
            previous.close();
        }
        self.outbound.replace(None);
        self.reset_subscription();
    }

    /// No link is left behind: the next `connect` retries from scratch.
    fn fail(&mut self, url: &str, error: TransportError) {
        log::warn!("cannot connect to {url}: {error}");
        self.drop_live();
        self.telemetry.apply(Transition::Error {
            message: error.to_string(),
            connected: false,
        });
    }

    /// Force-close the live link and forget its identity. Never fails.
    pub fn teardown(&mut self) {
        if let Some(live) = self.live.take() {
            log::info!("tearing down connection to {}", self.telemetry.snapshot().url);
            live.close();
        }
        self.outbound.replace(None);
        self.reset_subscription();
        self.identity = None;
        self.telemetry.apply(Transition::TornDown);
    }

    fn reset_subscription(&self) {
        if let Ok(mut subscribed) = self.subscribed.lock() {
            *subscribed = None;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.outbound.is_connected()
    }

    /// Publish JSON on the live link. `false` when not connected.
    pub fn publish(&self, topic: &str, payload: &Value) -> bool {
        let qos = Qos::from_level(self.settings.get().qos);
        self.outbound.publish(topic, payload, qos)
    }

    pub fn subscribe(&self, topic: &str) -> bool {
        let Some(link) = self.outbound.connected_link() else {
            return false;
        };
        let qos = Qos::from_level(self.settings.get().qos);
        link.subscribe(topic, qos)
            .map_err(|e| log::warn!("subscribe to {topic} failed: {e}"))
            .is_ok()
    }

    pub fn unsubscribe(&self, topic: &str) -> bool {
        let Some(link) = self.outbound.connected_link() else {
            return false;
        };
        link.unsubscribe(topic)
            .map_err(|e| log::debug!("unsubscribe from {topic} failed: {e}"))
            .is_ok()
    }

    /// Gate and publish an event. `data` should carry `eventType`.
    pub fn publish_event(&self, settings: &ConnectionSettings, topic: Option<&str>, data: &Map<String, Value>) -> bool {
        events::publish_event(&self.outbound, settings, topic, data)
    }

    /// An event sink bound to this manager's live link.
    pub fn event_publisher(&self) -> EventPublisher {
        EventPublisher::new(self.outbound.clone(), self.settings.clone())
    }

    pub fn diagnostics(&self) -> RuntimeConnectionInfo {
        self.telemetry.snapshot()
    }

    pub fn watch_info(&self) -> watch::Receiver<RuntimeConnectionInfo> {
        self.telemetry.subscribe()
    }

    pub fn telemetry(&self) -> Telemetry {
        self.telemetry.clone()
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Run a command as the host, bypassing the edit-mode gate.
    pub fn dispatch_local(&self, message: &Value) -> Option<Value> {
        let dispatcher = Dispatcher::new(self.settings.clone(), self.telemetry.clone());
        let mut designer = match self.designer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        dispatcher.dispatch(&mut *designer, message, Origin::Local)
    }

    /// Probe `settings` on a separate link. The live connection and its
    /// telemetry are left alone.
    pub async fn test_connection(&self, settings: &ConnectionSettings, timeout: Duration) -> ProbeResult {
        ConnectionProbe::new(self.connector.clone()).run(settings, timeout).await
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(live) = self.live.take() {
            live.close();
        }
    }
}

// ---------------------------------------------------------------
// Probe
// ---------------------------------------------------------------

/// One-shot handshake check.
pub struct ConnectionProbe {
    connector: Arc<dyn Connector>,
}

impl ConnectionProbe {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    /// Resolves on handshake, error or timeout. The probe link is always
    /// closed before returning.
    pub async fn run(&self, settings: &ConnectionSettings, timeout: Duration) -> ProbeResult {
        if settings.url.is_empty() {
            return ProbeResult::failed("URL is empty");
        }
        let client_id = if settings.client_id.is_empty() {
            generate_client_id()
        } else {
            format!("{}_probe", settings.client_id)
        };
        let mut options = ClientOptions::from_settings(settings, client_id);
        options.reconnect_period_ms = 0;

        let (link, mut events) = match self.connector.open(&settings.url, &options) {
            Ok(opened) => opened,
            Err(e) => return ProbeResult::failed(e.to_string()),
        };

        let outcome = tokio::time::timeout(timeout, async {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Connected => return Ok(()),
                    TransportEvent::Error(message) => return Err(message),
                    TransportEvent::Offline | TransportEvent::Closed => {
                        return Err("Connection closed".to_string())
                    }
                    _ => {}
                }
            }
            Err("Connection closed".to_string())
        })
        .await;
        link.close();

        match outcome {
            Ok(Ok(())) => ProbeResult::ok(),
            Ok(Err(message)) => ProbeResult::failed(message),
            Err(_) => ProbeResult::failed("Timeout"),
        }
    }
}

// ---------------------------------------------------------------
// Event task
// ---------------------------------------------------------------

struct LinkDriver {
    link: Arc<dyn Link>,
    alive: Arc<AtomicBool>,
    telemetry: Telemetry,
    settings: SettingsStore,
    designer: SharedDesigner,
    dispatcher: Dispatcher,
    outbound: Outbound,
    subscribed: Arc<Mutex<Option<String>>>,
}

impl LinkDriver {
    async fn run(self, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            if !self.alive.load(Ordering::SeqCst) {
                break;
            }
            match event {
                TransportEvent::Connected => {
                    if self.telemetry.apply_if(&self.alive, Transition::Connected) {
                        log::info!("connected: {}", self.telemetry.snapshot());
                        sync_subscription(self.link.as_ref(), &self.settings.get(), &self.subscribed);
                    }
                }
                TransportEvent::Reconnecting => self.lost(Transition::Reconnecting),
                TransportEvent::Offline => self.lost(Transition::Offline),
                TransportEvent::Closed => self.lost(Transition::Closed),
                TransportEvent::Error(message) => {
                    log::warn!("transport error: {message}");
                    self.telemetry.apply_if(
                        &self.alive,
                        Transition::Error {
                            message,
                            connected: self.link.is_connected(),
                        },
                    );
                }
                TransportEvent::Message { topic, payload } => self.handle_message(&topic, &payload),
            }
        }
    }

    fn lost(&self, transition: Transition) {
        if let Ok(mut subscribed) = self.subscribed.lock() {
            *subscribed = None;
        }
        if self.telemetry.apply_if(&self.alive, transition) {
            log::info!("{}", self.telemetry.snapshot());
        }
    }

    fn handle_message(&self, topic: &str, payload: &[u8]) {
        // Settings may have changed since connect.
        let settings = self.settings.get();
        let Some(inbound) = settings.inbound_topic() else {
            log::debug!("remote control off, dropping message on {topic}");
            return;
        };
        if topic != inbound {
            log::debug!("dropping message on {topic}");
            return;
        }

        let message: Value = serde_json::from_slice(payload).unwrap_or(Value::Null);
        let response = {
            let mut designer = match self.designer.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            self.dispatcher.dispatch(&mut *designer, &message, Origin::Remote)
        };

        if let Some(response) = response {
            // Resolved now, not at connect time.
            let settings = self.settings.get();
            if settings.response_topic.is_empty() {
                return;
            }
            self.outbound
                .publish(&settings.response_topic, &response, Qos::from_level(settings.qos));
        }
    }
}

/// Subscribe to the desired inbound topic, dropping the old one.
fn sync_subscription(link: &dyn Link, settings: &ConnectionSettings, subscribed: &Mutex<Option<String>>) {
    let desired = settings.inbound_topic().map(str::to_string);
    let mut current = match subscribed.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if *current == desired {
        return;
    }
    if let Some(old) = current.take() {
        if let Err(e) = link.unsubscribe(&old) {
            log::debug!("unsubscribe from {old} failed: {e}");
        }
    }
    if let Some(topic) = desired {
        match link.subscribe(&topic, Qos::from_level(settings.qos)) {
            Ok(()) => {
                log::info!("listening for commands on {topic}");
                *current = Some(topic);
            }
            Err(e) => log::warn!("subscribe to {topic} failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_client_id_shape() {
        let id = generate_client_id();
        assert!(id.starts_with("scada_"));
        assert_eq!(id.len(), "scada_".len() + 8);
        assert!(id["scada_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_connect_outside_runtime_records_error() {
        use crate::transport::MemoryBroker;
        use scada_core::Workspace;

        let broker = MemoryBroker::new();
        let designer: SharedDesigner = Arc::new(Mutex::new(Workspace::new()));
        let mut manager = ConnectionManager::new(Arc::new(broker.clone()), SettingsStore::default(), designer);
        let settings = ConnectionSettings {
            url: "memory://local".into(),
            ..ConnectionSettings::default()
        };
        manager.connect(&settings);

        let info = manager.diagnostics();
        assert_eq!(info.status, crate::telemetry::ConnectionStatus::Error);
        assert!(!info.connected);
        assert_eq!(info.url, "memory://local");
        assert_eq!(info.last_error.as_deref(), Some("No async runtime available"));
        assert_eq!(broker.opened_total(), 0);
        assert!(!manager.is_connected());
    }

    #[test]
    fn test_probe_result_wire_form() {
        assert_eq!(serde_json::to_value(ProbeResult::ok()).unwrap(), serde_json::json!({"ok": true}));
        assert_eq!(
            serde_json::to_value(ProbeResult::failed("Timeout")).unwrap(),
            serde_json::json!({"ok": false, "message": "Timeout"})
        );
    }
}
