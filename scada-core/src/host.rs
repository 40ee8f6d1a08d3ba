//! The designer host: where plugins register dialogs and toolbar entries.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Password,
    Number,
    Toggle,
}

/// One editable field of a settings dialog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDescriptor {
    pub key: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DialogSpec {
    pub id: String,
    pub title: String,
    pub fields: Vec<FieldDescriptor>,
}

/// A toolbar button that opens a registered dialog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolbarItem {
    pub id: String,
    pub label: String,
    pub dialog_id: String,
}

pub trait DesignerHost {
    fn register_dialog(&mut self, dialog: DialogSpec);
    fn unregister_dialog(&mut self, id: &str);
    fn add_toolbar_item(&mut self, item: ToolbarItem);
    fn remove_toolbar_item(&mut self, id: &str);
}

/// Host that just keeps what was registered.
#[derive(Debug, Default)]
pub struct HostRegistry {
    pub dialogs: Vec<DialogSpec>,
    pub toolbar: Vec<ToolbarItem>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dialog(&self, id: &str) -> Option<&DialogSpec> {
        self.dialogs.iter().find(|d| d.id == id)
    }
}

impl DesignerHost for HostRegistry {
    fn register_dialog(&mut self, dialog: DialogSpec) {
        self.dialogs.retain(|d| d.id != dialog.id);
        self.dialogs.push(dialog);
    }

    fn unregister_dialog(&mut self, id: &str) {
        self.dialogs.retain(|d| d.id != id);
    }

    fn add_toolbar_item(&mut self, item: ToolbarItem) {
        self.toolbar.retain(|t| t.id != item.id);
        self.toolbar.push(item);
    }

    fn remove_toolbar_item(&mut self, id: &str) {
        self.toolbar.retain(|t| t.id != id);
    }
}
