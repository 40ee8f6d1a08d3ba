//! Document mutation bridge.
//!
//! Splits loose key/value patches into core fields and extension properties
//! and routes them down one of two paths:
//!
//! ```text
//!   edit mode ──► persisted: active document, one undo batch per command
//!   view mode ──► runtime:   every open document, no undo history
//! ```

use serde_json::{Map, Value};

use scada_core::{is_field_key, Designer, DesignerError, Element, ElementKind, ElementPatch, ViewMode};

use crate::command::Target;

/// Split a patch into core fields and extension properties.
///
/// Core keys go to `fields`. Every other key, plus the contents of an
/// object-valued `props`, goes to `props`; top-level keys win over `props`
/// entries of the same name. A non-object `props` stays in `fields`.
pub fn split_patch(patch: &Map<String, Value>) -> ElementPatch {
    let mut split = ElementPatch::default();
    if let Some(Value::Object(props)) = patch.get("props") {
        split.props.extend(props.clone());
    }
    for (key, value) in patch {
        if key == "props" && value.is_object() {
            continue;
        }
        if is_field_key(key) {
            split.fields.insert(key.clone(), value.clone());
        } else {
            split.props.insert(key.clone(), value.clone());
        }
    }
    split
}

/// Everything as fields, `props` contents lifted to the top level. Keys
/// that are not core fields are then ignored by field application.
pub fn collapse_patch(patch: &Map<String, Value>) -> ElementPatch {
    let mut fields = Map::new();
    if let Some(Value::Object(props)) = patch.get("props") {
        fields.extend(props.clone());
    }
    for (key, value) in patch {
        if key == "props" && value.is_object() {
            continue;
        }
        fields.insert(key.clone(), value.clone());
    }
    ElementPatch {
        fields,
        props: Map::new(),
    }
}

/// The patch to apply to `element`: split for custom elements, collapsed
/// for the rest.
pub fn patch_for(element: &Element, patch: &Map<String, Value>) -> ElementPatch {
    match element.kind {
        ElementKind::Custom => split_patch(patch),
        _ => collapse_patch(patch),
    }
}

/// Resolve a target to element ids. `id` wins over `tag`; tags are matched
/// across every open document.
pub fn resolve_targets(designer: &dyn Designer, target: &Target) -> Vec<String> {
    if let Some(id) = target.id.as_deref().filter(|id| !id.is_empty()) {
        return match designer.element(id) {
            Some(_) => vec![id.to_string()],
            None => Vec::new(),
        };
    }
    match target.tag.as_deref().filter(|tag| !tag.is_empty()) {
        Some(tag) => designer.find_by_tag(tag),
        None => Vec::new(),
    }
}

/// Apply a per-element patch to each id, honoring the view/edit fork.
///
/// `build` sees the element as currently displayed (once per open document
/// in view mode) and returns the patch
/// for it; `None` or an empty patch skips the element. Returns how many
/// targets changed.
pub fn mutate<F>(designer: &mut dyn Designer, ids: &[String], mut build: F) -> Result<usize, DesignerError>
where
    F: FnMut(&Element) -> Option<ElementPatch>,
{
    match designer.view_mode() {
        ViewMode::Edit => {
            designer.begin_batch();
            let result = persist(designer, ids, &mut build);
            designer.end_batch();
            result
        }
        ViewMode::View => {
            // Each open document builds from its own copy of the element.
            let mut changed = 0;
            for id in ids {
                if designer.apply_runtime_with(id, &mut build)? > 0 {
                    changed += 1;
                }
            }
            Ok(changed)
        }
    }
}

fn persist<F>(designer: &mut dyn Designer, ids: &[String], build: &mut F) -> Result<usize, DesignerError>
where
    F: FnMut(&Element) -> Option<ElementPatch>,
{
    let mut changed = 0;
    for id in ids {
        let Some(element) = designer.active_document().element(id).cloned() else {
            continue;
        };
        let Some(patch) = build(&element).filter(|p| !p.is_empty()) else {
            continue;
        };
        if !patch.fields.is_empty() {
            designer.update_fields(id, &patch.fields)?;
        }
        if !patch.props.is_empty() {
            designer.update_props(id, &patch.props)?;
        }
        changed += 1;
    }
    Ok(changed)
}

/// Apply the same loose patch to every id.
pub fn update_elements(
    designer: &mut dyn Designer,
    ids: &[String],
    patch: &Map<String, Value>,
) -> Result<usize, DesignerError> {
    mutate(designer, ids, |element| Some(patch_for(element, patch)))
}

/// Apply extension properties only.
pub fn update_props(
    designer: &mut dyn Designer,
    ids: &[String],
    props: &Map<String, Value>,
) -> Result<usize, DesignerError> {
    mutate(designer, ids, |_| {
        Some(ElementPatch {
            fields: Map::new(),
            props: props.clone(),
        })
    })
}

/// Move elements by an offset. An unset axis stays put.
pub fn translate(
    designer: &mut dyn Designer,
    ids: &[String],
    dx: Option<f64>,
    dy: Option<f64>,
) -> Result<usize, DesignerError> {
    mutate(designer, ids, |element| {
        let mut fields = Map::new();
        if let Some(dx) = dx {
            fields.insert("x".into(), Value::from(element.x + dx));
        }
        if let Some(dy) = dy {
            fields.insert("y".into(), Value::from(element.y + dy));
        }
        Some(ElementPatch {
            fields,
            props: Map::new(),
        })
    })
}

/// Stacking direction for [`restack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stack {
    Front,
    Back,
}

/// Move elements above (or below) everything else, keeping their relative
/// order.
pub fn restack(designer: &mut dyn Designer, ids: &[String], stack: Stack) -> Result<usize, DesignerError> {
    let displayed: Vec<Element> = designer
        .documents()
        .iter()
        .flat_map(|doc| doc.ids().into_iter().filter_map(|id| doc.effective(&id)))
        .collect();
    let mut targets: Vec<(String, i64)> = ids
        .iter()
        .filter_map(|id| designer.element(id).map(|e| (id.clone(), e.z_index)))
        .collect();
    targets.sort_by_key(|(_, z)| *z);

    let mut next = Vec::with_capacity(targets.len());
    match stack {
        Stack::Front => {
            let top = displayed.iter().map(|e| e.z_index).max().unwrap_or(0);
            for (offset, (id, _)) in targets.iter().enumerate() {
                next.push((id.clone(), top + 1 + offset as i64));
            }
        }
        Stack::Back => {
            let bottom = displayed.iter().map(|e| e.z_index).min().unwrap_or(0);
            let count = targets.len() as i64;
            for (offset, (id, _)) in targets.iter().enumerate() {
                next.push((id.clone(), bottom - count + offset as i64));
            }
        }
    }

    mutate(designer, ids, |element| {
        let z = next.iter().find(|(id, _)| *id == element.id).map(|(_, z)| *z)?;
        let mut fields = Map::new();
        fields.insert("zIndex".into(), Value::from(z));
        Some(ElementPatch {
            fields,
            props: Map::new(),
        })
    })
}

/// Build a new element from a loose description. The `props` bag is kept
/// for every kind; custom elements also take top-level extension keys.
pub fn element_from_patch(description: &Map<String, Value>) -> Result<Element, DesignerError> {
    let split = split_patch(description);
    let mut element = Element::default();
    element.apply_fields(&split.fields)?;
    if let Some(props) = description.get("props").and_then(Value::as_object) {
        element.apply_props(props);
    }
    if element.kind == ElementKind::Custom {
        element.apply_props(&split.props);
    }
    if let Some(id) = description.get("id").and_then(Value::as_str) {
        element.id = id.to_string();
    }
    Ok(element)
}

/// The z-index that stacks a new element above everything in the active
/// document.
pub fn next_z_index(designer: &dyn Designer) -> i64 {
    designer
        .active_document()
        .elements()
        .iter()
        .map(|e| e.z_index)
        .max()
        .map_or(0, |z| z + 1)
}

/// Run a structural edit in the active document. In view mode the edit
/// leaves no undo entry.
pub fn structural<T>(designer: &mut dyn Designer, edit: impl FnOnce(&mut dyn Designer) -> T) -> T {
    let untracked = designer.view_mode() == ViewMode::View;
    if untracked {
        designer.begin_untracked();
    }
    let result = edit(&mut *designer);
    if untracked {
        designer.end_untracked();
    }
    result
}
