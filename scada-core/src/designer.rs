//! The editor surface consumed by the remote-control runtime.
//!
//! [`Designer`] is the seam between the runtime and whatever editor hosts
//! it. [`crate::Workspace`] is the in-memory implementation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Document, Element, ElementPatch};

/// Errors raised by editor operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DesignerError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Duplicate element id: {0}")]
    DuplicateId(String),

    #[error("Invalid patch: {0}")]
    InvalidPatch(String),

    #[error("Invalid project: {0}")]
    InvalidProject(String),

    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    #[error("Unknown action '{action}' on element {id}")]
    UnknownAction { id: String, action: String },

    #[error("Action '{action}' failed: {reason}")]
    ActionFailed { action: String, reason: String },
}

/// Document-wide editing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    /// Authoring. Remote mutation is blocked.
    #[default]
    Edit,
    /// Deployed / kiosk. Remote mutation goes through the runtime overlay.
    View,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub zoom: f64,
    pub pan_x: f64,
    pub pan_y: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            pan_x: 0.0,
            pan_y: 0.0,
        }
    }
}

impl Viewport {
    pub const MIN_ZOOM: f64 = 0.1;
    pub const MAX_ZOOM: f64 = 50.0;

    pub fn with_zoom(mut self, zoom: f64) -> Self {
        self.zoom = zoom.clamp(Self::MIN_ZOOM, Self::MAX_ZOOM);
        self
    }
}

/// Panel visibility and focus state of the editor chrome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UiLayout {
    pub panels: BTreeMap<String, bool>,
    pub focused: Option<String>,
    pub sidebar_width: f64,
}

impl Default for UiLayout {
    fn default() -> Self {
        let panels = ["toolbar", "properties", "layers", "library"]
            .into_iter()
            .map(|name| (name.to_string(), true))
            .collect();
        Self {
            panels,
            focused: None,
            sidebar_width: 280.0,
        }
    }
}

impl UiLayout {
    /// Merge a partial layout value. Panels not mentioned keep their state.
    pub fn merge(&mut self, patch: &Value) -> Result<(), DesignerError> {
        let Some(object) = patch.as_object() else {
            return Err(DesignerError::InvalidLayout("layout must be an object".into()));
        };
        let mut next = self.clone();
        if let Some(panels) = object.get("panels") {
            let panels: BTreeMap<String, bool> = serde_json::from_value(panels.clone())
                .map_err(|e| DesignerError::InvalidLayout(e.to_string()))?;
            next.panels.extend(panels);
        }
        if let Some(focused) = object.get("focused") {
            next.focused = serde_json::from_value(focused.clone())
                .map_err(|e| DesignerError::InvalidLayout(e.to_string()))?;
        }
        if let Some(width) = object.get("sidebarWidth") {
            next.sidebar_width = width
                .as_f64()
                .ok_or_else(|| DesignerError::InvalidLayout("sidebarWidth must be a number".into()))?;
        }
        *self = next;
        Ok(())
    }
}

/// An event raised by the editor (canvas or element interaction).
#[derive(Debug, Clone, PartialEq)]
pub struct EditorEvent {
    /// `canvas:*` or `element:*` by convention.
    pub event_type: String,
    pub element_id: Option<String>,
    /// The element's own topic override, if any.
    pub element_topic: Option<String>,
    /// Whether the element's listener flag for this event is enabled.
    /// Always true for canvas events.
    pub listening: bool,
    pub data: Map<String, Value>,
}

impl EditorEvent {
    pub fn canvas(event_type: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            event_type: event_type.into(),
            element_id: None,
            element_topic: None,
            listening: true,
            data,
        }
    }
}

/// Receiver of editor events. Installed by the remote-control plugin.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: EditorEvent);
}

/// A callable action defined by an element type.
pub type ElementAction = Arc<dyn Fn(&Element, &Value) -> Result<Value, String> + Send + Sync>;

/// The editor surface.
///
/// Persisted mutations (`create_element`, `update_fields`, `update_props`,
/// `delete_elements`, ...) target the active document and record undo
/// history. `apply_runtime_patch` targets every open document and never does.
pub trait Designer: Send {
    fn documents(&self) -> &[Document];
    fn active_document(&self) -> &Document;

    /// Effective element state, searched in the active document first.
    fn element(&self, id: &str) -> Option<Element>;
    /// Ids of elements whose `tag` property equals `tag`, across all open
    /// documents, without duplicates.
    fn find_by_tag(&self, tag: &str) -> Vec<String>;

    /// Insert `element` into the active document as given. An empty id is
    /// replaced with a generated one.
    fn create_element(&mut self, element: Element) -> Result<String, DesignerError>;
    fn delete_elements(&mut self, ids: &[String]) -> usize;
    fn delete_all(&mut self) -> usize;
    fn update_fields(&mut self, id: &str, fields: &Map<String, Value>) -> Result<(), DesignerError>;
    fn update_props(&mut self, id: &str, props: &Map<String, Value>) -> Result<(), DesignerError>;
    fn begin_batch(&mut self);
    fn end_batch(&mut self);
    /// Structural edits between these calls are not undoable.
    fn begin_untracked(&mut self);
    fn end_untracked(&mut self);
    /// Apply a transient patch to every element with one of `ids` in every
    /// open document. Returns how many element instances changed.
    fn apply_runtime_patch(&mut self, ids: &[String], patch: &ElementPatch) -> Result<usize, DesignerError>;
    /// Like `apply_runtime_patch` for one id, but the patch is built per
    /// document from that document's effective element. `None` skips it.
    fn apply_runtime_with(
        &mut self,
        id: &str,
        build: &mut dyn FnMut(&Element) -> Option<ElementPatch>,
    ) -> Result<usize, DesignerError>;

    fn view_mode(&self) -> ViewMode;
    fn set_view_mode(&mut self, mode: ViewMode);
    fn selection(&self) -> &[String];
    fn select(&mut self, ids: Vec<String>);
    fn clear_selection(&mut self);
    fn tool(&self) -> &str;
    fn set_tool(&mut self, tool: &str);
    fn viewport(&self) -> Viewport;
    fn set_viewport(&mut self, viewport: Viewport);
    /// Group the current selection. Returns the new group id.
    fn group_selection(&mut self) -> Option<String>;
    /// Dissolve selected groups. Returns how many groups were dissolved.
    fn ungroup_selection(&mut self) -> usize;

    fn export_project(&self) -> Result<String, DesignerError>;
    fn import_project(&mut self, text: &str) -> Result<(), DesignerError>;

    fn layout(&self) -> &UiLayout;
    fn set_layout(&mut self, patch: &Value) -> Result<(), DesignerError>;
    fn toggle_panel(&mut self, panel: &str, visible: Option<bool>) -> bool;
    fn focus_element(&mut self, id: &str) -> bool;

    fn invoke_action(&mut self, id: &str, action: &str, args: &Value) -> Result<Value, DesignerError>;

    /// Swap the event sink, returning the previous one.
    fn set_event_sink(&mut self, sink: Option<Arc<dyn EventSink>>) -> Option<Arc<dyn EventSink>>;
}

/// The designer as shared between the host and the runtime.
pub type SharedDesigner = Arc<Mutex<dyn Designer>>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_layout_merge_keeps_unmentioned_panels() {
        let mut layout = UiLayout::default();
        layout.merge(&json!({"panels": {"layers": false}})).unwrap();
        assert_eq!(layout.panels.get("layers"), Some(&false));
        assert_eq!(layout.panels.get("toolbar"), Some(&true));
    }

    #[test]
    fn test_layout_merge_is_atomic() {
        let mut layout = UiLayout::default();
        let result = layout.merge(&json!({"panels": {"layers": false}, "sidebarWidth": "wide"}));
        assert!(result.is_err());
        assert_eq!(layout, UiLayout::default());
    }

    #[test]
    fn test_viewport_zoom_clamped() {
        assert_eq!(Viewport::default().with_zoom(500.0).zoom, Viewport::MAX_ZOOM);
        assert_eq!(Viewport::default().with_zoom(0.0).zoom, Viewport::MIN_ZOOM);
    }

    #[test]
    fn test_view_mode_wire_names() {
        assert_eq!(serde_json::to_value(ViewMode::View).unwrap(), json!("view"));
        assert_eq!(serde_json::from_value::<ViewMode>(json!("edit")).unwrap(), ViewMode::Edit);
    }
}
