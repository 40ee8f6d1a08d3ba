//! Outbound editor events.
//!
//! Gates canvas and element events against the settings and resolves the
//! topic: per-call topic, then the element's own topic, then the default.

use serde_json::{Map, Value};

use scada_core::{EditorEvent, EventSink};

use crate::connection::Outbound;
use crate::settings::{ConnectionSettings, SettingsStore};
use crate::transport::Qos;

/// Per-call topic value that means "use the default".
pub const DEFAULT_TOPIC_PLACEHOLDER: &str = "$default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    Canvas,
    Element,
    Other,
}

impl EventCategory {
    /// `canvas`, `canvas:*` and `canvas.*` are canvas events; likewise for
    /// `element`.
    pub fn of(event_type: &str) -> Self {
        let has_prefix = |prefix: &str| {
            event_type
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(':') || rest.starts_with('.'))
        };
        if has_prefix("canvas") {
            Self::Canvas
        } else if has_prefix("element") {
            Self::Element
        } else {
            Self::Other
        }
    }
}

/// Whether an event of `category` may be published. `listening` is the
/// element's own listener flag.
pub fn event_allowed(settings: &ConnectionSettings, category: EventCategory, listening: bool) -> bool {
    if !settings.event_output_enabled {
        return false;
    }
    match category {
        EventCategory::Canvas => settings.publish_canvas_events || settings.force_publish_canvas_events,
        EventCategory::Element => {
            (settings.publish_element_events && listening) || settings.force_publish_element_events
        }
        EventCategory::Other => true,
    }
}

/// Pick the topic for an event. `None` when nothing is configured.
pub fn resolve_topic(
    settings: &ConnectionSettings,
    call_topic: Option<&str>,
    element_topic: Option<&str>,
) -> Option<String> {
    let usable = |topic: &&str| !topic.is_empty() && *topic != DEFAULT_TOPIC_PLACEHOLDER;
    call_topic
        .map(str::trim)
        .filter(usable)
        .or_else(|| element_topic.map(str::trim).filter(usable))
        .or_else(|| Some(settings.default_event_topic.trim()).filter(|t| !t.is_empty()))
        .map(str::to_string)
}

/// Gate, resolve and publish one event. `data` must carry `eventType`.
/// Returns whether anything was sent.
pub fn publish_event(
    outbound: &Outbound,
    settings: &ConnectionSettings,
    topic: Option<&str>,
    data: &Map<String, Value>,
) -> bool {
    let event_type = data.get("eventType").and_then(Value::as_str).unwrap_or_default();
    if !event_allowed(settings, EventCategory::of(event_type), true) {
        return false;
    }
    let Some(topic) = resolve_topic(settings, topic, None) else {
        return false;
    };
    outbound.publish(&topic, &Value::Object(data.clone()), Qos::from_level(settings.qos))
}

/// The payload published for an editor event.
pub fn event_payload(event: &EditorEvent) -> Map<String, Value> {
    let mut data = event.data.clone();
    data.insert("eventType".into(), Value::String(event.event_type.clone()));
    if let Some(id) = &event.element_id {
        data.insert("elementId".into(), Value::String(id.clone()));
    }
    data
}

/// [`EventSink`] that republishes editor events onto the live connection.
#[derive(Clone)]
pub struct EventPublisher {
    outbound: Outbound,
    settings: SettingsStore,
}

impl EventPublisher {
    pub fn new(outbound: Outbound, settings: SettingsStore) -> Self {
        Self { outbound, settings }
    }
}

impl EventSink for EventPublisher {
    fn publish(&self, event: EditorEvent) {
        let settings = self.settings.get();
        let category = EventCategory::of(&event.event_type);
        if !event_allowed(&settings, category, event.listening) {
            return;
        }
        let Some(topic) = resolve_topic(&settings, None, event.element_topic.as_deref()) else {
            return;
        };
        let payload = Value::Object(event_payload(&event));
        if !self
            .outbound
            .publish(&topic, &payload, Qos::from_level(settings.qos))
        {
            log::debug!("event {} not published to {topic}", event.event_type);
        }
    }
}
