//! Diagram elements and the closed set of core element attributes.
//!
//! An element is a flat record of core attributes (geometry, styling,
//! event-listener flags) plus an open `props` bag of extension properties.
//! Only `custom` elements are expected to carry meaningful extension
//! properties; every kind still has the bag so tags can be attached.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::DesignerError;

/// Wire keys that address core element attributes.
///
/// Everything outside this set is an extension property.
pub const ELEMENT_FIELD_KEYS: &[&str] = &[
    "id",
    "type",
    "kind",
    "name",
    "locked",
    "hidden",
    "parentId",
    "zIndex",
    "rotation",
    "flipX",
    "flipY",
    "opacity",
    "stroke",
    "strokeWidth",
    "fill",
    "clickEvents",
    "hoverEvents",
    "changeEvents",
    "eventTopic",
    "x",
    "y",
    "width",
    "height",
    "props",
];

/// Extension property used for tag resolution.
pub const TAG_PROP: &str = "tag";

/// Returns true when `key` names a core element attribute.
pub fn is_field_key(key: &str) -> bool {
    ELEMENT_FIELD_KEYS.contains(&key)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    #[default]
    Shape,
    Text,
    Image,
    Group,
    Custom,
}

/// A single diagram element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Element {
    pub id: String,
    #[serde(rename = "type")]
    pub element_type: String,
    pub kind: ElementKind,
    pub name: String,
    pub locked: bool,
    pub hidden: bool,
    pub parent_id: Option<String>,
    pub z_index: i64,
    pub rotation: f64,
    pub flip_x: bool,
    pub flip_y: bool,
    pub opacity: f64,
    pub stroke: String,
    pub stroke_width: f64,
    pub fill: String,
    /// Element emits `element:click` events.
    pub click_events: bool,
    /// Element emits `element:hover` events.
    pub hover_events: bool,
    /// Element emits `element:change` events when its state changes.
    pub change_events: bool,
    /// Per-element event topic override.
    pub event_topic: Option<String>,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub props: Map<String, Value>,
}

impl Default for Element {
    fn default() -> Self {
        Self {
            id: String::new(),
            element_type: "rect".to_string(),
            kind: ElementKind::Shape,
            name: String::new(),
            locked: false,
            hidden: false,
            parent_id: None,
            z_index: 0,
            rotation: 0.0,
            flip_x: false,
            flip_y: false,
            opacity: 1.0,
            stroke: "#000000".to_string(),
            stroke_width: 1.0,
            fill: "#ffffff".to_string(),
            click_events: false,
            hover_events: false,
            change_events: false,
            event_topic: None,
            x: 0.0,
            y: 0.0,
            width: 100.0,
            height: 100.0,
            props: Map::new(),
        }
    }
}

impl Element {
    /// Create an element with a fresh id.
    pub fn new(element_type: impl Into<String>, kind: ElementKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            element_type: element_type.into(),
            kind,
            ..Self::default()
        }
    }

    pub fn with_bounds(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.x = x;
        self.y = y;
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: Value) -> Self {
        self.props.insert(key.into(), value);
        self
    }

    /// The element's `tag` extension property, if it is a string.
    pub fn tag(&self) -> Option<&str> {
        self.props.get(TAG_PROP).and_then(Value::as_str)
    }

    /// Apply a core-field patch.
    ///
    /// Keys outside [`ELEMENT_FIELD_KEYS`] are ignored, `id` is immutable,
    /// and a `props` object is merged into the extension bag. The element is
    /// left untouched if any value has the wrong type.
    pub fn apply_fields(&mut self, fields: &Map<String, Value>) -> Result<(), DesignerError> {
        let mut value = serde_json::to_value(&*self)
            .map_err(|e| DesignerError::InvalidPatch(e.to_string()))?;
        let Some(object) = value.as_object_mut() else {
            return Err(DesignerError::InvalidPatch("element is not an object".into()));
        };

        for (key, field) in fields {
            match key.as_str() {
                "id" => continue,
                "props" => {
                    if let (Some(Value::Object(bag)), Value::Object(extra)) =
                        (object.get_mut("props"), field)
                    {
                        merge_props(bag, extra);
                    }
                }
                k if is_field_key(k) => {
                    object.insert(key.clone(), field.clone());
                }
                _ => {}
            }
        }

        let patched: Element = serde_json::from_value(value)
            .map_err(|e| DesignerError::InvalidPatch(e.to_string()))?;
        *self = patched;
        Ok(())
    }

    /// Merge extension properties. A `null` value removes the property.
    pub fn apply_props(&mut self, props: &Map<String, Value>) {
        merge_props(&mut self.props, props);
    }
}

fn merge_props(bag: &mut Map<String, Value>, extra: &Map<String, Value>) {
    for (key, value) in extra {
        if value.is_null() {
            bag.remove(key);
        } else {
            bag.insert(key.clone(), value.clone());
        }
    }
}
