//! In-memory editor: a set of open documents plus editor state.
//!
//! `Workspace` is the single source of truth for the running editor. It
//! holds every open document, the active document index, selection, tool,
//! viewport, UI layout, registered element actions, and the event sink.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::designer::{Designer, EditorEvent, ElementAction, EventSink, UiLayout, ViewMode, Viewport};
use crate::{DesignerError, Document, Element, ElementKind, ElementPatch};

pub const DEFAULT_TOOL: &str = "select";

pub struct Workspace {
    documents: Vec<Document>,
    active: usize,
    mode: ViewMode,
    selection: Vec<String>,
    tool: String,
    viewport: Viewport,
    layout: UiLayout,
    /// element type → action name → callable
    actions: HashMap<String, HashMap<String, ElementAction>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Workspace {
    /// A workspace with one empty document.
    pub fn new() -> Self {
        Self {
            documents: vec![Document::new("Page 1")],
            active: 0,
            mode: ViewMode::Edit,
            selection: Vec::new(),
            tool: DEFAULT_TOOL.to_string(),
            viewport: Viewport::default(),
            layout: UiLayout::default(),
            actions: HashMap::new(),
            sink: None,
        }
    }

    /// Open another document and return its index.
    pub fn open_document(&mut self, document: Document) -> usize {
        self.documents.push(document);
        self.documents.len() - 1
    }

    pub fn activate(&mut self, index: usize) -> bool {
        if index >= self.documents.len() {
            return false;
        }
        self.active = index;
        self.selection.clear();
        true
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn document_mut(&mut self, index: usize) -> Option<&mut Document> {
        self.documents.get_mut(index)
    }

    pub fn register_action(&mut self, element_type: impl Into<String>, name: impl Into<String>, action: ElementAction) {
        self.actions
            .entry(element_type.into())
            .or_default()
            .insert(name.into(), action);
    }

    pub fn undo(&mut self) -> bool {
        self.active_mut().undo()
    }

    pub fn redo(&mut self) -> bool {
        self.active_mut().redo()
    }

    // ---------------------------------------------------------------
    // Event emission
    // ---------------------------------------------------------------

    /// Emit a canvas-level event (`canvas:<name>`).
    pub fn emit_canvas_event(&self, name: &str, data: Map<String, Value>) {
        self.emit(EditorEvent::canvas(format!("canvas:{name}"), data));
    }

    /// Emit an element-level event (`element:<name>`) for `id`.
    ///
    /// The listener flag is looked up from the element: `click` and `hover`
    /// map to their own flags, anything else to `changeEvents`.
    pub fn emit_element_event(&self, id: &str, name: &str, data: Map<String, Value>) -> bool {
        let Some(element) = self.element(id) else {
            return false;
        };
        let listening = match name {
            "click" => element.click_events,
            "hover" => element.hover_events,
            _ => element.change_events,
        };
        self.emit(EditorEvent {
            event_type: format!("element:{name}"),
            element_id: Some(element.id.clone()),
            element_topic: element.event_topic.clone().filter(|t| !t.is_empty()),
            listening,
            data,
        });
        true
    }

    fn emit(&self, event: EditorEvent) {
        if let Some(sink) = &self.sink {
            sink.publish(event);
        }
    }

    fn notify_changed(&self, ids: &[String]) {
        for id in ids {
            if let Some(element) = self.element(id) {
                if element.change_events {
                    let mut data = Map::new();
                    data.insert("element".into(), serde_json::to_value(&element).unwrap_or(Value::Null));
                    self.emit_element_event(id, "change", data);
                }
            }
        }
    }

    fn active_mut(&mut self) -> &mut Document {
        &mut self.documents[self.active]
    }
}

impl Designer for Workspace {
    fn documents(&self) -> &[Document] {
        &self.documents
    }

    fn active_document(&self) -> &Document {
        &self.documents[self.active]
    }

    fn element(&self, id: &str) -> Option<Element> {
        self.active_document()
            .effective(id)
            .or_else(|| self.documents.iter().find_map(|doc| doc.effective(id)))
    }

    fn find_by_tag(&self, tag: &str) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for doc in &self.documents {
            for id in doc.ids_with_tag(tag) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    fn create_element(&mut self, mut element: Element) -> Result<String, DesignerError> {
        if element.id.is_empty() {
            element.id = Uuid::new_v4().to_string();
        }
        let id = element.id.clone();
        self.active_mut().insert(element)?;
        log::debug!("created element {id}");
        Ok(id)
    }

    fn delete_elements(&mut self, ids: &[String]) -> usize {
        let removed = self.active_mut().remove(ids);
        self.selection.retain(|id| !ids.contains(id));
        removed
    }

    fn delete_all(&mut self) -> usize {
        self.selection.clear();
        self.active_mut().clear()
    }

    fn update_fields(&mut self, id: &str, fields: &Map<String, Value>) -> Result<(), DesignerError> {
        self.active_mut().update_fields(id, fields)?;
        self.notify_changed(&[id.to_string()]);
        Ok(())
    }

    fn update_props(&mut self, id: &str, props: &Map<String, Value>) -> Result<(), DesignerError> {
        self.active_mut().update_props(id, props)?;
        self.notify_changed(&[id.to_string()]);
        Ok(())
    }

    fn begin_batch(&mut self) {
        self.active_mut().begin_batch();
    }

    fn end_batch(&mut self) {
        self.active_mut().end_batch();
    }

    fn begin_untracked(&mut self) {
        self.active_mut().begin_untracked();
    }

    fn end_untracked(&mut self) {
        self.active_mut().end_untracked();
    }

    fn apply_runtime_patch(&mut self, ids: &[String], patch: &ElementPatch) -> Result<usize, DesignerError> {
        let mut changed = 0;
        for doc in &mut self.documents {
            for id in ids {
                if doc.apply_runtime(id, patch)? {
                    changed += 1;
                }
            }
        }
        if changed > 0 {
            self.notify_changed(ids);
        }
        Ok(changed)
    }

    fn apply_runtime_with(
        &mut self,
        id: &str,
        build: &mut dyn FnMut(&Element) -> Option<ElementPatch>,
    ) -> Result<usize, DesignerError> {
        let mut changed = 0;
        for doc in &mut self.documents {
            let Some(current) = doc.effective(id) else {
                continue;
            };
            let Some(patch) = build(&current).filter(|p| !p.is_empty()) else {
                continue;
            };
            if doc.apply_runtime(id, &patch)? {
                changed += 1;
            }
        }
        if changed > 0 {
            self.notify_changed(&[id.to_string()]);
        }
        Ok(changed)
    }

    fn view_mode(&self) -> ViewMode {
        self.mode
    }

    fn set_view_mode(&mut self, mode: ViewMode) {
        if self.mode == mode {
            return;
        }
        // Runtime state does not survive a return to authoring.
        if mode == ViewMode::Edit {
            for doc in &mut self.documents {
                doc.clear_runtime();
            }
        }
        self.mode = mode;
        log::info!("view mode set to {mode:?}");
    }

    fn selection(&self) -> &[String] {
        &self.selection
    }

    fn select(&mut self, ids: Vec<String>) {
        let doc = &self.documents[self.active];
        self.selection = ids.into_iter().filter(|id| doc.contains(id)).collect();
    }

    fn clear_selection(&mut self) {
        self.selection.clear();
    }

    fn tool(&self) -> &str {
        &self.tool
    }

    fn set_tool(&mut self, tool: &str) {
        self.tool = tool.to_string();
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport.with_zoom(viewport.zoom);
    }

    fn group_selection(&mut self) -> Option<String> {
        if self.selection.len() < 2 {
            return None;
        }
        let members: Vec<Element> = self
            .selection
            .iter()
            .filter_map(|id| self.active_document().element(id).cloned())
            .collect();
        if members.len() < 2 {
            return None;
        }

        let left = members.iter().map(|e| e.x).fold(f64::INFINITY, f64::min);
        let top = members.iter().map(|e| e.y).fold(f64::INFINITY, f64::min);
        let right = members.iter().map(|e| e.x + e.width).fold(f64::NEG_INFINITY, f64::max);
        let bottom = members.iter().map(|e| e.y + e.height).fold(f64::NEG_INFINITY, f64::max);
        let group = Element::new("group", ElementKind::Group).with_bounds(left, top, right - left, bottom - top);
        let group_id = group.id.clone();

        let doc = self.active_mut();
        doc.begin_batch();
        let mut parent = Map::new();
        parent.insert("parentId".into(), Value::String(group_id.clone()));
        let result = doc.insert(group).and_then(|_| {
            members
                .iter()
                .try_for_each(|member| doc.update_fields(&member.id, &parent))
        });
        doc.end_batch();
        if let Err(e) = result {
            log::warn!("group failed: {e}");
            return None;
        }

        self.selection = vec![group_id.clone()];
        Some(group_id)
    }

    fn ungroup_selection(&mut self) -> usize {
        let groups: Vec<String> = self
            .selection
            .iter()
            .filter(|id| {
                self.active_document()
                    .element(id)
                    .is_some_and(|e| e.kind == ElementKind::Group)
            })
            .cloned()
            .collect();
        if groups.is_empty() {
            return 0;
        }

        let mut released = Vec::new();
        let doc = self.active_mut();
        doc.begin_batch();
        let mut orphan = Map::new();
        orphan.insert("parentId".into(), Value::Null);
        for group in &groups {
            let children: Vec<String> = doc
                .elements()
                .iter()
                .filter(|e| e.parent_id.as_deref() == Some(group.as_str()))
                .map(|e| e.id.clone())
                .collect();
            for child in children {
                if doc.update_fields(&child, &orphan).is_ok() {
                    released.push(child);
                }
            }
        }
        doc.remove(&groups);
        doc.end_batch();

        self.selection = released;
        groups.len()
    }

    fn export_project(&self) -> Result<String, DesignerError> {
        self.active_document().export_project()
    }

    fn import_project(&mut self, text: &str) -> Result<(), DesignerError> {
        self.active_mut().import_project(text)?;
        self.selection.clear();
        Ok(())
    }

    fn layout(&self) -> &UiLayout {
        &self.layout
    }

    fn set_layout(&mut self, patch: &Value) -> Result<(), DesignerError> {
        self.layout.merge(patch)
    }

    fn toggle_panel(&mut self, panel: &str, visible: Option<bool>) -> bool {
        let current = self.layout.panels.get(panel).copied().unwrap_or(false);
        let next = visible.unwrap_or(!current);
        self.layout.panels.insert(panel.to_string(), next);
        next
    }

    fn focus_element(&mut self, id: &str) -> bool {
        let Some(element) = self.element(id) else {
            return false;
        };
        self.layout.focused = Some(element.id.clone());
        self.selection = vec![element.id.clone()];
        // Center the element in a nominal 1280×800 viewport.
        let zoom = self.viewport.zoom;
        self.viewport.pan_x = element.x + element.width / 2.0 - 640.0 / zoom;
        self.viewport.pan_y = element.y + element.height / 2.0 - 400.0 / zoom;
        true
    }

    fn invoke_action(&mut self, id: &str, action: &str, args: &Value) -> Result<Value, DesignerError> {
        let element = self
            .element(id)
            .ok_or_else(|| DesignerError::ElementNotFound(id.to_string()))?;
        let callable = self
            .actions
            .get(&element.element_type)
            .and_then(|table| table.get(action))
            .cloned()
            .ok_or_else(|| DesignerError::UnknownAction {
                id: id.to_string(),
                action: action.to_string(),
            })?;
        callable(&element, args).map_err(|reason| DesignerError::ActionFailed {
            action: action.to_string(),
            reason,
        })
    }

    fn set_event_sink(&mut self, sink: Option<Arc<dyn EventSink>>) -> Option<Arc<dyn EventSink>> {
        std::mem::replace(&mut self.sink, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<EditorEvent>>,
    }

    impl EventSink for RecordingSink {
        fn publish(&self, event: EditorEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn element(id: &str, kind: ElementKind) -> Element {
        let mut el = Element::new("rect", kind);
        el.id = id.to_string();
        el
    }

    #[test]
    fn test_find_by_tag_spans_documents() {
        let mut ws = Workspace::new();
        ws.create_element(element("a", ElementKind::Custom).with_prop("tag", json!("pump")))
            .unwrap();
        let mut second = Document::new("Page 2");
        second
            .insert(element("b", ElementKind::Custom).with_prop("tag", json!("pump")))
            .unwrap();
        second
            .insert(element("a", ElementKind::Custom).with_prop("tag", json!("pump")))
            .unwrap();
        ws.open_document(second);

        assert_eq!(ws.find_by_tag("pump"), vec!["a".to_string(), "b".to_string()]);
        assert!(ws.find_by_tag("valve").is_empty());
    }

    #[test]
    fn test_runtime_patch_reaches_every_document() {
        let mut ws = Workspace::new();
        ws.create_element(element("a", ElementKind::Shape)).unwrap();
        let mut second = Document::new("Page 2");
        second.insert(element("a", ElementKind::Shape)).unwrap();
        let second = ws.open_document(second);

        let mut fields = Map::new();
        fields.insert("fill".into(), json!("#f00"));
        let patch = ElementPatch { fields, props: Map::new() };
        assert_eq!(ws.apply_runtime_patch(&["a".to_string()], &patch).unwrap(), 2);
        assert_eq!(ws.documents()[second].effective("a").unwrap().fill, "#f00");
    }

    #[test]
    fn test_runtime_patch_built_per_document() {
        let mut ws = Workspace::new();
        ws.create_element(element("a", ElementKind::Shape).with_bounds(10.0, 0.0, 5.0, 5.0))
            .unwrap();
        let mut second = Document::new("Page 2");
        second
            .insert(element("a", ElementKind::Custom).with_bounds(100.0, 0.0, 5.0, 5.0))
            .unwrap();
        let second = ws.open_document(second);

        let mut kinds = Vec::new();
        let changed = ws
            .apply_runtime_with("a", &mut |el: &Element| {
                kinds.push(el.kind);
                let mut fields = Map::new();
                fields.insert("x".into(), json!(el.x + 1.0));
                Some(ElementPatch { fields, props: Map::new() })
            })
            .unwrap();

        assert_eq!(changed, 2);
        assert_eq!(kinds, vec![ElementKind::Shape, ElementKind::Custom]);
        assert_eq!(ws.documents()[0].effective("a").unwrap().x, 11.0);
        assert_eq!(ws.documents()[second].effective("a").unwrap().x, 101.0);
    }

    #[test]
    fn test_returning_to_edit_clears_runtime() {
        let mut ws = Workspace::new();
        ws.create_element(element("a", ElementKind::Shape)).unwrap();
        ws.set_view_mode(ViewMode::View);
        let mut fields = Map::new();
        fields.insert("x".into(), json!(50));
        ws.apply_runtime_patch(&["a".to_string()], &ElementPatch { fields, props: Map::new() })
            .unwrap();
        assert_eq!(ws.element("a").unwrap().x, 50.0);

        ws.set_view_mode(ViewMode::Edit);
        assert_eq!(ws.element("a").unwrap().x, 0.0);
    }

    #[test]
    fn test_group_and_ungroup() {
        let mut ws = Workspace::new();
        ws.create_element(element("a", ElementKind::Shape).with_bounds(0.0, 0.0, 10.0, 10.0))
            .unwrap();
        ws.create_element(element("b", ElementKind::Shape).with_bounds(20.0, 20.0, 10.0, 10.0))
            .unwrap();
        ws.select(vec!["a".into(), "b".into()]);

        let undo_before = ws.active_document().history().undo_len();
        let group = ws.group_selection().unwrap();
        assert_eq!(ws.active_document().history().undo_len(), undo_before + 1);
        let g = ws.element(&group).unwrap();
        assert_eq!((g.width, g.height), (30.0, 30.0));
        assert_eq!(ws.element("a").unwrap().parent_id.as_deref(), Some(group.as_str()));

        assert_eq!(ws.ungroup_selection(), 1);
        assert!(ws.element(&group).is_none());
        assert_eq!(ws.element("a").unwrap().parent_id, None);
        assert_eq!(ws.selection().len(), 2);
    }

    #[test]
    fn test_group_needs_two_elements() {
        let mut ws = Workspace::new();
        ws.create_element(element("a", ElementKind::Shape)).unwrap();
        ws.select(vec!["a".into()]);
        assert!(ws.group_selection().is_none());
    }

    #[test]
    fn test_invoke_registered_action() {
        let mut ws = Workspace::new();
        let mut valve = element("v", ElementKind::Custom);
        valve.element_type = "valve".into();
        ws.create_element(valve).unwrap();
        ws.register_action(
            "valve",
            "open",
            Arc::new(|el: &Element, args: &Value| -> Result<Value, String> {
                Ok(json!({"id": el.id, "percent": args["percent"]}))
            }),
        );

        let result = ws.invoke_action("v", "open", &json!({"percent": 40})).unwrap();
        assert_eq!(result["percent"], 40);
        assert!(matches!(
            ws.invoke_action("v", "close", &Value::Null),
            Err(DesignerError::UnknownAction { .. })
        ));
    }

    #[test]
    fn test_element_events_carry_listener_flag_and_topic() {
        let mut ws = Workspace::new();
        let sink = Arc::new(RecordingSink::default());
        assert!(ws.set_event_sink(Some(sink.clone())).is_none());

        let mut el = element("a", ElementKind::Shape);
        el.click_events = true;
        el.event_topic = Some("plant/a".into());
        ws.create_element(el).unwrap();

        assert!(ws.emit_element_event("a", "click", Map::new()));
        assert!(ws.emit_element_event("a", "hover", Map::new()));
        assert!(!ws.emit_element_event("missing", "click", Map::new()));

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "element:click");
        assert!(events[0].listening);
        assert_eq!(events[0].element_topic.as_deref(), Some("plant/a"));
        assert!(!events[1].listening);
    }

    #[test]
    fn test_toggle_panel_flips_when_unspecified() {
        let mut ws = Workspace::new();
        assert!(!ws.toggle_panel("layers", None));
        assert!(ws.toggle_panel("layers", None));
        assert!(!ws.toggle_panel("layers", Some(false)));
    }

    #[test]
    fn test_focus_selects_element() {
        let mut ws = Workspace::new();
        ws.create_element(element("a", ElementKind::Shape)).unwrap();
        assert!(ws.focus_element("a"));
        assert_eq!(ws.layout().focused.as_deref(), Some("a"));
        assert_eq!(ws.selection(), &["a".to_string()]);
        assert!(!ws.focus_element("zzz"));
    }
}
