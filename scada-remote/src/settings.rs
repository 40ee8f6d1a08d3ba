//! Plugin settings: total coercion from whatever the host stored, plus a
//! store that notifies subscribers when the stored value changes.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::value::{as_bool, as_string, as_u64};

pub const DEFAULT_REMOTE_TOPIC: &str = "scada/rc";
pub const DEFAULT_RESPONSE_TOPIC: &str = "scada/rc/resp";
pub const DEFAULT_EVENT_TOPIC: &str = "scada/events";
pub const DEFAULT_KEEPALIVE_SECS: u64 = 60;
pub const DEFAULT_RECONNECT_PERIOD_MS: u64 = 1000;

/// Fully-populated connection and behavior settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSettings {
    /// Broker URL. Empty disables the connection.
    pub url: String,
    pub username: String,
    pub password: String,
    /// Empty means "generate one per connection identity".
    pub client_id: String,
    pub clean: bool,
    /// Seconds.
    pub keepalive: u64,
    /// Milliseconds. Zero disables the transport's own reconnect.
    pub reconnect_period: u64,
    pub qos: u8,

    pub remote_control_enabled: bool,
    pub remote_topic: String,
    pub response_topic: String,

    pub event_output_enabled: bool,
    pub publish_canvas_events: bool,
    pub publish_element_events: bool,
    pub force_publish_canvas_events: bool,
    pub force_publish_element_events: bool,
    pub default_event_topic: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            client_id: String::new(),
            clean: true,
            keepalive: DEFAULT_KEEPALIVE_SECS,
            reconnect_period: DEFAULT_RECONNECT_PERIOD_MS,
            qos: 0,
            remote_control_enabled: false,
            remote_topic: DEFAULT_REMOTE_TOPIC.to_string(),
            response_topic: DEFAULT_RESPONSE_TOPIC.to_string(),
            event_output_enabled: false,
            publish_canvas_events: true,
            publish_element_events: true,
            force_publish_canvas_events: false,
            force_publish_element_events: false,
            default_event_topic: DEFAULT_EVENT_TOPIC.to_string(),
        }
    }
}

impl ConnectionSettings {
    /// Coerce any stored value into settings. Never fails.
    pub fn coerce(value: &Value) -> Self {
        let mut settings = Self::default();
        let Some(object) = value.as_object() else {
            return settings;
        };

        let string = |key: &str, slot: &mut String| {
            if let Some(s) = object.get(key).and_then(as_string) {
                *slot = s;
            }
        };
        let boolean = |key: &str, slot: &mut bool| {
            if let Some(b) = object.get(key).and_then(as_bool) {
                *slot = b;
            }
        };
        let unsigned = |key: &str, slot: &mut u64| {
            if let Some(n) = object.get(key).and_then(as_u64) {
                *slot = n;
            }
        };

        string("url", &mut settings.url);
        string("username", &mut settings.username);
        // Passwords are taken verbatim.
        if let Some(p) = object.get("password").and_then(Value::as_str) {
            settings.password = p.to_string();
        }
        string("clientId", &mut settings.client_id);
        boolean("clean", &mut settings.clean);
        unsigned("keepalive", &mut settings.keepalive);
        unsigned("reconnectPeriod", &mut settings.reconnect_period);
        let mut qos = u64::from(settings.qos);
        unsigned("qos", &mut qos);
        settings.qos = qos.min(2) as u8;

        boolean("remoteControlEnabled", &mut settings.remote_control_enabled);
        string("remoteTopic", &mut settings.remote_topic);
        string("responseTopic", &mut settings.response_topic);

        boolean("eventOutputEnabled", &mut settings.event_output_enabled);
        boolean("publishCanvasEvents", &mut settings.publish_canvas_events);
        boolean("publishElementEvents", &mut settings.publish_element_events);
        boolean("forcePublishCanvasEvents", &mut settings.force_publish_canvas_events);
        boolean("forcePublishElementEvents", &mut settings.force_publish_element_events);
        string("defaultEventTopic", &mut settings.default_event_topic);

        settings
    }

    /// The inbound command topic, when remote control is on and configured.
    pub fn inbound_topic(&self) -> Option<&str> {
        if self.remote_control_enabled && !self.remote_topic.is_empty() {
            Some(&self.remote_topic)
        } else {
            None
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Holds the raw stored settings value and broadcasts changes.
///
/// Cloning shares the same underlying value.
#[derive(Clone)]
pub struct SettingsStore {
    tx: Arc<watch::Sender<Value>>,
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(Value::Null)
    }
}

impl SettingsStore {
    pub fn new(initial: Value) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Current settings, coerced.
    pub fn get(&self) -> ConnectionSettings {
        ConnectionSettings::coerce(&self.tx.borrow())
    }

    /// The raw stored value.
    pub fn raw(&self) -> Value {
        self.tx.borrow().clone()
    }

    /// Replace the stored value and notify subscribers.
    pub fn set(&self, value: Value) {
        self.tx.send_replace(value);
    }

    /// Shallow-merge an object into the stored value.
    pub fn merge(&self, patch: &Map<String, Value>) {
        self.tx.send_modify(|current| {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            if let Some(object) = current.as_object_mut() {
                for (key, value) in patch {
                    object.insert(key.clone(), value.clone());
                }
            }
        });
    }

    /// A receiver notified on every `set`/`merge`.
    pub fn subscribe(&self) -> watch::Receiver<Value> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_non_object_gives_defaults() {
        for value in [Value::Null, json!(42), json!("mqtt://x"), json!([1, 2])] {
            assert_eq!(ConnectionSettings::coerce(&value), ConnectionSettings::default());
        }
    }

    #[test]
    fn test_coerce_reads_every_field() {
        let settings = ConnectionSettings::coerce(&json!({
            "url": " mqtt://broker:1883 ",
            "username": "op",
            "password": " secret ",
            "clientId": "hmi-1",
            "clean": false,
            "keepalive": "30",
            "reconnectPeriod": 2500,
            "qos": 1,
            "remoteControlEnabled": "true",
            "remoteTopic": "plant/rc",
            "responseTopic": "plant/rc/resp",
            "eventOutputEnabled": 1,
            "publishCanvasEvents": false,
            "publishElementEvents": false,
            "forcePublishCanvasEvents": true,
            "forcePublishElementEvents": true,
            "defaultEventTopic": "plant/events"
        }));
        assert_eq!(settings.url, "mqtt://broker:1883");
        assert_eq!(settings.password, " secret ");
        assert_eq!(settings.client_id, "hmi-1");
        assert!(!settings.clean);
        assert_eq!(settings.keepalive, 30);
        assert_eq!(settings.reconnect_period, 2500);
        assert_eq!(settings.qos, 1);
        assert!(settings.remote_control_enabled);
        assert_eq!(settings.inbound_topic(), Some("plant/rc"));
        assert!(settings.event_output_enabled);
        assert!(!settings.publish_canvas_events);
        assert!(settings.force_publish_element_events);
        assert_eq!(settings.default_event_topic, "plant/events");
    }

    #[test]
    fn test_coerce_wrong_types_fall_back() {
        let settings = ConnectionSettings::coerce(&json!({
            "url": 12,
            "keepalive": "soon",
            "clean": "perhaps",
            "qos": 9,
            "remoteTopic": {"nested": true}
        }));
        assert_eq!(settings.url, "");
        assert_eq!(settings.keepalive, DEFAULT_KEEPALIVE_SECS);
        assert!(settings.clean);
        assert_eq!(settings.qos, 2);
        assert_eq!(settings.remote_topic, DEFAULT_REMOTE_TOPIC);
    }

    #[test]
    fn test_inbound_topic_requires_enable_and_topic() {
        let mut settings = ConnectionSettings::default();
        assert_eq!(settings.inbound_topic(), None);
        settings.remote_control_enabled = true;
        assert_eq!(settings.inbound_topic(), Some(DEFAULT_REMOTE_TOPIC));
        settings.remote_topic.clear();
        assert_eq!(settings.inbound_topic(), None);
    }

    #[test]
    fn test_wire_form_roundtrips_through_coerce() {
        let mut settings = ConnectionSettings::default();
        settings.url = "ws://localhost:9001".into();
        settings.remote_control_enabled = true;
        assert_eq!(ConnectionSettings::coerce(&settings.to_value()), settings);
    }

    #[tokio::test]
    async fn test_store_notifies_on_merge() {
        let store = SettingsStore::default();
        let mut rx = store.subscribe();

        let mut patch = Map::new();
        patch.insert("url".into(), json!("mqtt://a"));
        store.merge(&patch);

        rx.changed().await.unwrap();
        assert_eq!(store.get().url, "mqtt://a");
        assert_eq!(store.raw(), json!({"url": "mqtt://a"}));
    }
}
