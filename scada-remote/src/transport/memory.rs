//! In-process broker.
//!
//! Routes publishes between links opened from the same [`MemoryBroker`],
//! records everything published, and lets callers inject lifecycle events.
//! Used by the integration tests and by `scada-bridge --memory`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use super::{
    topic_matches, ClientOptions, Connector, Link, Qos, TransportError, TransportEvent,
    EVENT_CHANNEL_CAPACITY,
};

/// How the broker answers a new connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Handshake {
    /// Acknowledge immediately.
    #[default]
    Accept,
    /// Never answer.
    Silent,
    /// Fail with the given message.
    Refuse(String),
}

/// A message seen by the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub client_id: Option<String>,
}

impl Published {
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.payload).ok()
    }
}

#[derive(Default)]
struct BrokerState {
    handshake: Handshake,
    links: Vec<Arc<MemoryLink>>,
    published: Vec<Published>,
    opened: usize,
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_handshake(&self, handshake: Handshake) {
        self.state().handshake = handshake;
    }

    /// Publish as an external client.
    pub fn deliver(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        route(&self.state, topic, payload.into(), None);
    }

    /// Send a lifecycle event to every open link.
    pub fn inject(&self, event: TransportEvent) {
        let links = self.state().links.clone();
        for link in links {
            match &event {
                TransportEvent::Connected => link.connected.store(true, Ordering::SeqCst),
                TransportEvent::Offline | TransportEvent::Closed | TransportEvent::Reconnecting => {
                    link.connected.store(false, Ordering::SeqCst)
                }
                _ => {}
            }
            link.send(event.clone());
        }
    }

    /// Everything published so far on `topic`.
    pub fn published_on(&self, topic: &str) -> Vec<Published> {
        self.state()
            .published
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    pub fn published(&self) -> Vec<Published> {
        self.state().published.clone()
    }

    pub fn clear_published(&self) {
        self.state().published.clear();
    }

    /// Links currently open.
    pub fn open_links(&self) -> usize {
        self.state().links.len()
    }

    /// Links opened over the broker's lifetime.
    pub fn opened_total(&self) -> usize {
        self.state().opened
    }

    /// Topic filters subscribed by open links.
    pub fn subscriptions(&self) -> Vec<String> {
        let links = self.state().links.clone();
        let mut filters: Vec<String> = links.iter().flat_map(|l| l.filters()).collect();
        filters.sort();
        filters
    }
}

fn route(state: &Arc<Mutex<BrokerState>>, topic: &str, payload: Vec<u8>, client_id: Option<String>) {
    let links = {
        let mut state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.published.push(Published {
            topic: topic.to_string(),
            payload: payload.clone(),
            client_id,
        });
        state.links.clone()
    };
    for link in links {
        if link.filters().iter().any(|f| topic_matches(f, topic)) {
            link.send(TransportEvent::Message {
                topic: topic.to_string(),
                payload: payload.clone(),
            });
        }
    }
}

impl Connector for MemoryBroker {
    fn open(
        &self,
        url: &str,
        options: &ClientOptions,
    ) -> Result<(Arc<dyn Link>, mpsc::Receiver<TransportEvent>), TransportError> {
        let (scheme, _) = url
            .split_once("://")
            .ok_or_else(|| TransportError::InvalidUrl(url.to_string()))?;
        if !scheme.eq_ignore_ascii_case("memory") {
            return Err(TransportError::UnsupportedScheme(scheme.to_string()));
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let link = Arc::new(MemoryLink {
            client_id: options.client_id.clone(),
            broker: self.state.clone(),
            tx,
            filters: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        let handshake = {
            let mut state = self.state();
            state.opened += 1;
            state.links.push(link.clone());
            state.handshake.clone()
        };
        match handshake {
            Handshake::Accept => {
                link.connected.store(true, Ordering::SeqCst);
                link.send(TransportEvent::Connected);
            }
            Handshake::Silent => {}
            Handshake::Refuse(message) => link.send(TransportEvent::Error(message)),
        }
        Ok((link, rx))
    }
}

struct MemoryLink {
    client_id: String,
    broker: Arc<Mutex<BrokerState>>,
    tx: mpsc::Sender<TransportEvent>,
    filters: Mutex<Vec<String>>,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl MemoryLink {
    fn send(&self, event: TransportEvent) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if self.tx.try_send(event).is_err() {
            log::debug!("memory link {} dropped an event", self.client_id);
        }
    }

    fn filters(&self) -> Vec<String> {
        self.filters
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default()
    }

    fn edit_filters(&self, edit: impl FnOnce(&mut Vec<String>)) {
        let mut filters = self.filters.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        edit(&mut filters);
    }
}

impl Link for MemoryLink {
    fn publish(&self, topic: &str, payload: Vec<u8>, _qos: Qos) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        route(&self.broker, topic, payload, Some(self.client_id.clone()));
        Ok(())
    }

    fn subscribe(&self, topic: &str, _qos: Qos) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.edit_filters(|filters| {
            if !filters.iter().any(|f| f == topic) {
                filters.push(topic.to_string());
            }
        });
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.edit_filters(|filters| filters.retain(|f| f != topic));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.connected.store(false, Ordering::SeqCst);
        let mut state = self.broker.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.links.retain(|l| !std::ptr::eq(Arc::as_ptr(l), self));
    }
}
