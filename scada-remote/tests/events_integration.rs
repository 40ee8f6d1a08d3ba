//! Editor events republished onto the broker.

mod common;

use std::sync::{Arc, Mutex};

use serde_json::{json, Map, Value};

use scada_core::{Designer, EditorEvent, Element, ElementKind, EventSink, Workspace};
use scada_remote::ConnectionSettings;

use common::{base_settings, Rig};

const DEFAULT_TOPIC: &str = "scada/events";

fn data(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn workspace() -> Workspace {
    let mut ws = Workspace::new();
    let mut pump = Element::new("pump", ElementKind::Custom);
    pump.id = "p1".into();
    pump.click_events = true;
    pump.event_topic = Some("plant/a".into());
    ws.create_element(pump).unwrap();

    let mut valve = Element::new("valve", ElementKind::Custom);
    valve.id = "v1".into();
    ws.create_element(valve).unwrap();
    ws
}

fn settings_with(overrides: Value) -> Value {
    let mut settings = base_settings();
    let target = settings.as_object_mut().unwrap();
    for (key, value) in overrides.as_object().unwrap() {
        target.insert(key.clone(), value.clone());
    }
    settings
}

#[tokio::test]
async fn test_element_event_uses_element_topic() {
    let rig = Rig::start(workspace()).await;
    assert!(rig.ws().emit_element_event("p1", "click", data(json!({"button": 0}))));

    let published = rig.payloads("plant/a");
    assert_eq!(published.len(), 1);
    assert_eq!(
        published[0],
        json!({"button": 0, "eventType": "element:click", "elementId": "p1"})
    );
    assert!(rig.payloads(DEFAULT_TOPIC).is_empty());
}

#[tokio::test]
async fn test_element_listener_flag_and_force() {
    let rig = Rig::start(workspace()).await;
    // v1 does not listen for hover.
    rig.ws().emit_element_event("v1", "hover", Map::new());
    assert!(rig.payloads(DEFAULT_TOPIC).is_empty());

    let mut patch = Map::new();
    patch.insert("forcePublishElementEvents".into(), json!(true));
    rig.settings.merge(&patch);
    rig.ws().emit_element_event("v1", "hover", Map::new());

    let published = rig.payloads(DEFAULT_TOPIC);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0]["eventType"], "element:hover");
    assert_eq!(published[0]["elementId"], "v1");
}

#[tokio::test]
async fn test_canvas_events_gated_and_forced() {
    let rig = Rig::with_settings(workspace(), settings_with(json!({"publishCanvasEvents": false}))).await;
    rig.ws().emit_canvas_event("click", data(json!({"x": 1, "y": 2})));
    assert!(rig.payloads(DEFAULT_TOPIC).is_empty());

    let mut patch = Map::new();
    patch.insert("forcePublishCanvasEvents".into(), json!(true));
    rig.settings.merge(&patch);
    rig.ws().emit_canvas_event("click", data(json!({"x": 1, "y": 2})));

    assert_eq!(
        rig.payloads(DEFAULT_TOPIC),
        vec![json!({"x": 1, "y": 2, "eventType": "canvas:click"})]
    );
}

#[tokio::test]
async fn test_master_switch_drops_everything() {
    let rig = Rig::with_settings(
        workspace(),
        settings_with(json!({
            "eventOutputEnabled": false,
            "forcePublishCanvasEvents": true,
            "forcePublishElementEvents": true
        })),
    )
    .await;
    rig.ws().emit_canvas_event("zoom", Map::new());
    rig.ws().emit_element_event("p1", "click", Map::new());

    assert!(rig.payloads(DEFAULT_TOPIC).is_empty());
    assert!(rig.payloads("plant/a").is_empty());
}

#[tokio::test]
async fn test_disconnected_events_are_dropped() {
    let rig = Rig::with_settings(workspace(), json!({"eventOutputEnabled": true})).await;
    assert!(!rig.handle.diagnostics().connected);
    rig.ws().emit_canvas_event("click", Map::new());
    assert!(rig.broker.published().is_empty());
}

#[tokio::test]
async fn test_manager_publish_event_topics() {
    let rig = Rig::start(workspace()).await;
    let manager = rig.handle.manager();
    let manager = manager.lock().await;
    let settings = ConnectionSettings::coerce(&base_settings());
    let event = data(json!({"eventType": "alarm:raised", "level": "high"}));

    assert!(manager.publish_event(&settings, Some("plant/alarms"), &event));
    assert!(manager.publish_event(&settings, Some("$default"), &event));

    let mut silent = settings.clone();
    silent.default_event_topic.clear();
    assert!(!manager.publish_event(&silent, None, &event));

    assert_eq!(rig.payloads("plant/alarms"), vec![Value::Object(event.clone())]);
    assert_eq!(rig.payloads(DEFAULT_TOPIC), vec![Value::Object(event)]);
}

#[derive(Default)]
struct RecordingSink(Mutex<Vec<String>>);

impl EventSink for RecordingSink {
    fn publish(&self, event: EditorEvent) {
        self.0.lock().unwrap().push(event.event_type);
    }
}

#[tokio::test]
async fn test_deactivate_restores_previous_sink() {
    let recorder = Arc::new(RecordingSink::default());
    let mut ws = workspace();
    ws.set_event_sink(Some(recorder.clone()));

    let mut rig = Rig::start(ws).await;
    rig.ws().emit_canvas_event("click", Map::new());
    assert!(recorder.0.lock().unwrap().is_empty());
    assert_eq!(rig.payloads(DEFAULT_TOPIC).len(), 1);

    let handle = rig.handle;
    handle.deactivate(&mut rig.host).await;
    rig.workspace.lock().unwrap().emit_canvas_event("click", Map::new());

    assert_eq!(*recorder.0.lock().unwrap(), vec!["canvas:click".to_string()]);
    assert_eq!(rig.broker.published_on(DEFAULT_TOPIC).len(), 1);
}
