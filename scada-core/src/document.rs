//! A single open diagram document.
//!
//! The persisted element list is only changed through methods that record
//! undo history. Runtime (transient) patches live in a separate overlay keyed
//! by element id; they are visible through [`Document::effective`] but never
//! reach the persisted list, the history, or the exported project.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::history::History;
use crate::{DesignerError, Element};

/// A patch already split into core fields and extension properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementPatch {
    pub fields: Map<String, Value>,
    pub props: Map<String, Value>,
}

impl ElementPatch {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.props.is_empty()
    }

    fn merge(&mut self, other: &ElementPatch) {
        for (k, v) in &other.fields {
            self.fields.insert(k.clone(), v.clone());
        }
        for (k, v) in &other.props {
            self.props.insert(k.clone(), v.clone());
        }
    }

    fn apply_to(&self, element: &mut Element) -> Result<(), DesignerError> {
        if !self.fields.is_empty() {
            element.apply_fields(&self.fields)?;
        }
        if !self.props.is_empty() {
            element.apply_props(&self.props);
        }
        Ok(())
    }
}

/// Serialized project form used by import/export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFile {
    pub format: String,
    pub version: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub elements: Vec<Element>,
}

pub const PROJECT_FORMAT: &str = "scada-project";
pub const PROJECT_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct Document {
    pub id: Uuid,
    pub name: String,
    elements: Vec<Element>,
    history: History,
    runtime: HashMap<String, ElementPatch>,
}

impl Document {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            elements: Vec::new(),
            history: History::new(),
            runtime: HashMap::new(),
        }
    }

    /// Persisted elements in paint order.
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn element(&self, id: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.element(id).is_some()
    }

    /// The element as currently displayed: persisted state plus any runtime
    /// overlay.
    pub fn effective(&self, id: &str) -> Option<Element> {
        let mut element = self.element(id)?.clone();
        if let Some(patch) = self.runtime.get(id) {
            // Overlays are validated when stored.
            let _ = patch.apply_to(&mut element);
        }
        Some(element)
    }

    pub fn ids(&self) -> Vec<String> {
        self.elements.iter().map(|e| e.id.clone()).collect()
    }

    pub fn ids_with_tag(&self, tag: &str) -> Vec<String> {
        self.elements
            .iter()
            .filter_map(|e| self.effective(&e.id))
            .filter(|e| e.tag() == Some(tag))
            .map(|e| e.id)
            .collect()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    // ---------------------------------------------------------------
    // Persisted mutation
    // ---------------------------------------------------------------

    pub fn begin_batch(&mut self) {
        self.history.begin_batch(&self.elements);
    }

    pub fn end_batch(&mut self) {
        self.history.end_batch();
    }

    /// Mutations until [`Document::end_untracked`] leave no undo entry.
    pub fn begin_untracked(&mut self) {
        self.history.suspend();
    }

    pub fn end_untracked(&mut self) {
        self.history.resume();
    }

    pub fn insert(&mut self, element: Element) -> Result<(), DesignerError> {
        if self.contains(&element.id) {
            return Err(DesignerError::DuplicateId(element.id));
        }
        self.history.record(&self.elements);
        self.elements.push(element);
        Ok(())
    }

    pub fn update_fields(&mut self, id: &str, fields: &Map<String, Value>) -> Result<(), DesignerError> {
        let index = self.index_of(id)?;
        let mut updated = self.elements[index].clone();
        updated.apply_fields(fields)?;
        self.history.record(&self.elements);
        self.elements[index] = updated;
        Ok(())
    }

    pub fn update_props(&mut self, id: &str, props: &Map<String, Value>) -> Result<(), DesignerError> {
        let index = self.index_of(id)?;
        self.history.record(&self.elements);
        self.elements[index].apply_props(props);
        Ok(())
    }

    /// Remove elements and their descendants. Returns how many were removed.
    pub fn remove(&mut self, ids: &[String]) -> usize {
        let mut doomed: Vec<String> = ids.iter().filter(|id| self.contains(id)).cloned().collect();
        if doomed.is_empty() {
            return 0;
        }
        let mut cursor = 0;
        while cursor < doomed.len() {
            let parent = doomed[cursor].clone();
            for child in self.elements.iter().filter(|e| e.parent_id.as_deref() == Some(&parent)) {
                if !doomed.contains(&child.id) {
                    doomed.push(child.id.clone());
                }
            }
            cursor += 1;
        }
        self.history.record(&self.elements);
        self.elements.retain(|e| !doomed.contains(&e.id));
        for id in &doomed {
            self.runtime.remove(id);
        }
        doomed.len()
    }

    pub fn clear(&mut self) -> usize {
        let removed = self.elements.len();
        if removed > 0 {
            self.history.record(&self.elements);
            self.elements.clear();
        }
        self.runtime.clear();
        removed
    }

    pub fn undo(&mut self) -> bool {
        match self.history.undo(&self.elements) {
            Some(previous) => {
                self.elements = previous;
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        match self.history.redo(&self.elements) {
            Some(next) => {
                self.elements = next;
                true
            }
            None => false,
        }
    }

    fn index_of(&self, id: &str) -> Result<usize, DesignerError> {
        self.elements
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| DesignerError::ElementNotFound(id.to_string()))
    }

    // ---------------------------------------------------------------
    // Runtime overlay
    // ---------------------------------------------------------------

    /// Layer a transient patch over an element. Not recorded in history.
    pub fn apply_runtime(&mut self, id: &str, patch: &ElementPatch) -> Result<bool, DesignerError> {
        let Some(current) = self.effective(id) else {
            return Ok(false);
        };
        let mut probe = current;
        patch.apply_to(&mut probe)?;
        self.runtime.entry(id.to_string()).or_default().merge(patch);
        Ok(true)
    }

    pub fn has_runtime_overlay(&self) -> bool {
        !self.runtime.is_empty()
    }

    pub fn clear_runtime(&mut self) {
        self.runtime.clear();
    }

    // ---------------------------------------------------------------
    // Project text
    // ---------------------------------------------------------------

    pub fn export_project(&self) -> Result<String, DesignerError> {
        let file = ProjectFile {
            format: PROJECT_FORMAT.to_string(),
            version: PROJECT_VERSION,
            name: self.name.clone(),
            elements: self.elements.clone(),
        };
        serde_json::to_string(&file).map_err(|e| DesignerError::InvalidProject(e.to_string()))
    }

    /// Replace the document contents from project text.
    ///
    /// The text is parsed and validated completely before anything changes.
    pub fn import_project(&mut self, text: &str) -> Result<(), DesignerError> {
        let file: ProjectFile =
            serde_json::from_str(text).map_err(|e| DesignerError::InvalidProject(e.to_string()))?;
        if file.format != PROJECT_FORMAT {
            return Err(DesignerError::InvalidProject(format!(
                "unsupported format '{}'",
                file.format
            )));
        }
        if file.version > PROJECT_VERSION {
            return Err(DesignerError::InvalidProject(format!(
                "unsupported version {}",
                file.version
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for element in &file.elements {
            if element.id.is_empty() {
                return Err(DesignerError::InvalidProject("element without id".into()));
            }
            if !seen.insert(element.id.as_str()) {
                return Err(DesignerError::InvalidProject(format!(
                    "duplicate element id '{}'",
                    element.id
                )));
            }
        }

        self.history.record(&self.elements);
        if !file.name.is_empty() {
            self.name = file.name;
        }
        self.elements = file.elements;
        self.runtime.clear();
        Ok(())
    }

    /// Structured view of the document for queries.
    pub fn to_value(&self) -> Value {
        let elements: Vec<Element> = self.ids().iter().filter_map(|id| self.effective(id)).collect();
        serde_json::json!({
            "id": self.id.to_string(),
            "name": self.name,
            "elements": elements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ElementKind;
    use serde_json::json;

    fn doc_with(ids: &[&str]) -> Document {
        let mut doc = Document::new("Test");
        for id in ids {
            let mut el = Element::new("rect", ElementKind::Shape);
            el.id = id.to_string();
            doc.insert(el).unwrap();
        }
        doc
    }

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_insert_rejects_duplicate() {
        let mut doc = doc_with(&["a"]);
        let mut dup = Element::new("rect", ElementKind::Shape);
        dup.id = "a".into();
        assert!(matches!(doc.insert(dup), Err(DesignerError::DuplicateId(_))));
    }

    #[test]
    fn test_batch_groups_field_and_prop_updates() {
        let mut doc = doc_with(&["a"]);
        let before = doc.history().undo_len();
        doc.begin_batch();
        doc.update_fields("a", &fields(json!({"x": 4}))).unwrap();
        doc.update_props("a", &fields(json!({"level": 9}))).unwrap();
        doc.end_batch();
        assert_eq!(doc.history().undo_len(), before + 1);

        assert!(doc.undo());
        assert_eq!(doc.element("a").unwrap().x, 0.0);
        assert!(doc.element("a").unwrap().props.is_empty());
    }

    #[test]
    fn test_runtime_overlay_is_transient() {
        let mut doc = doc_with(&["a"]);
        let before = doc.history().undo_len();
        let patch = ElementPatch {
            fields: fields(json!({"fill": "#0f0"})),
            props: fields(json!({"tag": "pump"})),
        };
        assert!(doc.apply_runtime("a", &patch).unwrap());

        assert_eq!(doc.effective("a").unwrap().fill, "#0f0");
        assert_eq!(doc.element("a").unwrap().fill, "#ffffff");
        assert_eq!(doc.history().undo_len(), before);
        assert_eq!(doc.ids_with_tag("pump"), vec!["a".to_string()]);

        let exported = doc.export_project().unwrap();
        assert!(!exported.contains("#0f0"));
    }

    #[test]
    fn test_runtime_overlay_rejects_bad_types() {
        let mut doc = doc_with(&["a"]);
        let patch = ElementPatch {
            fields: fields(json!({"x": "left"})),
            props: Map::new(),
        };
        assert!(doc.apply_runtime("a", &patch).is_err());
        assert!(!doc.has_runtime_overlay());
    }

    #[test]
    fn test_remove_cascades_to_children() {
        let mut doc = doc_with(&["g", "other"]);
        let mut child = Element::new("rect", ElementKind::Shape);
        child.id = "c".into();
        child.parent_id = Some("g".into());
        doc.insert(child).unwrap();

        assert_eq!(doc.remove(&["g".to_string()]), 2);
        assert_eq!(doc.ids(), vec!["other".to_string()]);
    }

    #[test]
    fn test_project_roundtrip_preserves_elements() {
        let source = doc_with(&["a", "b"]);
        let text = source.export_project().unwrap();

        let mut target = Document::new("Other");
        target.import_project(&text).unwrap();
        assert_eq!(target.ids(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(target.name, "Test");
    }

    #[test]
    fn test_import_malformed_leaves_document_untouched() {
        let mut doc = doc_with(&["a"]);
        assert!(doc.import_project("{not json").is_err());
        assert!(doc
            .import_project(r#"{"format":"other","version":1}"#)
            .is_err());
        assert!(doc
            .import_project(r#"{"format":"scada-project","version":1,"elements":[{"id":"x"},{"id":"x"}]}"#)
            .is_err());
        assert_eq!(doc.ids(), vec!["a".to_string()]);
    }
}
