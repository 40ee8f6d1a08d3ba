//! The closed set of remote commands and their typed payloads.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use scada_core::ViewMode;

use crate::value::{lenient_bool, lenient_f64};

#[derive(Debug, thiserror::Error)]
#[error("Invalid payload for '{action}': {source}")]
pub struct PayloadError {
    pub action: String,
    #[source]
    pub source: serde_json::Error,
}

/// How a command behaves with respect to the document and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    /// Reads only. Always answers.
    Query,
    /// Editor state change without a response.
    Simple,
    /// Side effect that answers.
    Feedback,
    /// Mutates resolved target elements. Answers.
    Targeted,
    /// Replaces or clears the whole document. Answers.
    WholeDocument,
}

/// Element addressing: `id` wins over `tag`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Target {
    pub id: Option<String>,
    pub tag: Option<String>,
}

impl Target {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            tag: None,
        }
    }

    pub fn by_tag(tag: impl Into<String>) -> Self {
        Self {
            id: None,
            tag: Some(tag.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ListElements {
    #[serde(default, deserialize_with = "lenient_bool")]
    pub all: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ById {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ByTag {
    pub tag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Select {
    pub id: Option<String>,
    pub ids: Option<Vec<String>>,
}

impl Select {
    /// `ids` when given, else the single `id`.
    pub fn into_ids(self) -> Vec<String> {
        match (self.ids, self.id) {
            (Some(ids), _) => ids,
            (None, Some(id)) => vec![id],
            (None, None) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SetTool {
    pub tool: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SetZoom {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub zoom: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SetPan {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub x: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub y: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SetViewMode {
    pub mode: ViewMode,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TogglePanel {
    pub panel: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub visible: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SetLayout {
    pub layout: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SetSettings {
    pub settings: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreateElement {
    pub element: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UpdateElement {
    #[serde(flatten)]
    pub target: Target,
    pub patch: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UpdateProps {
    #[serde(flatten)]
    pub target: Target,
    pub props: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BulkUpdate {
    pub updates: Vec<UpdateElement>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Translate {
    #[serde(flatten)]
    pub target: Target,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub dx: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub dy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InvokeAction {
    #[serde(flatten)]
    pub target: Target,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImportProject {
    pub project: Value,
}

impl ImportProject {
    /// Project text; an object payload is re-serialized.
    pub fn text(&self) -> Option<String> {
        match &self.project {
            Value::String(text) => Some(text.clone()),
            Value::Object(_) => serde_json::to_string(&self.project).ok(),
            _ => None,
        }
    }
}

/// A parsed remote command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetDocument,
    ListElements(ListElements),
    GetElement(ById),
    FindByTag(ByTag),
    GetSelection,
    GetViewState,
    GetSettings,
    GetLayout,
    GetStatus,
    ExportProject,

    Select(Select),
    ClearSelection,
    SetTool(SetTool),
    SetZoom(SetZoom),
    SetPan(SetPan),
    SetViewMode(SetViewMode),
    TogglePanel(TogglePanel),
    SetLayout(SetLayout),
    FocusElement(ById),
    Group,
    Ungroup,

    SetSettings(SetSettings),

    CreateElement(CreateElement),
    UpdateElement(UpdateElement),
    UpdateProps(UpdateProps),
    BulkUpdate(BulkUpdate),
    Translate(Translate),
    BringToFront(Target),
    SendToBack(Target),
    DeleteElement(Target),
    InvokeAction(InvokeAction),

    ImportProject(ImportProject),
    DeleteAll,
}

fn payload<T: DeserializeOwned>(action: &str, payload: &Map<String, Value>) -> Result<T, PayloadError> {
    serde_json::from_value(Value::Object(payload.clone())).map_err(|source| PayloadError {
        action: action.to_string(),
        source,
    })
}

impl Command {
    /// Parse an action and its payload. Unknown actions yield `Ok(None)`.
    pub fn parse(action: &str, body: &Map<String, Value>) -> Result<Option<Self>, PayloadError> {
        let command = match action {
            "getDocument" => Self::GetDocument,
            "listElements" => Self::ListElements(payload(action, body)?),
            "getElement" => Self::GetElement(payload(action, body)?),
            "findByTag" => Self::FindByTag(payload(action, body)?),
            "getSelection" => Self::GetSelection,
            "getViewState" => Self::GetViewState,
            "getSettings" => Self::GetSettings,
            "getLayout" => Self::GetLayout,
            "getStatus" => Self::GetStatus,
            "exportProject" => Self::ExportProject,

            "select" => Self::Select(payload(action, body)?),
            "clearSelection" => Self::ClearSelection,
            "setTool" => Self::SetTool(payload(action, body)?),
            "setZoom" => Self::SetZoom(payload(action, body)?),
            "setPan" => Self::SetPan(payload(action, body)?),
            "setViewMode" => Self::SetViewMode(payload(action, body)?),
            "togglePanel" => Self::TogglePanel(payload(action, body)?),
            "setLayout" => Self::SetLayout(payload(action, body)?),
            "focusElement" => Self::FocusElement(payload(action, body)?),
            "group" => Self::Group,
            "ungroup" => Self::Ungroup,

            "setSettings" => Self::SetSettings(payload(action, body)?),

            "createElement" => Self::CreateElement(payload(action, body)?),
            "updateElement" => Self::UpdateElement(payload(action, body)?),
            "updateProps" => Self::UpdateProps(payload(action, body)?),
            "bulkUpdate" => Self::BulkUpdate(payload(action, body)?),
            "translate" => Self::Translate(payload(action, body)?),
            "bringToFront" => Self::BringToFront(payload(action, body)?),
            "sendToBack" => Self::SendToBack(payload(action, body)?),
            "deleteElement" => Self::DeleteElement(payload(action, body)?),
            "invokeAction" => Self::InvokeAction(payload(action, body)?),

            "importProject" => Self::ImportProject(payload(action, body)?),
            "deleteAll" => Self::DeleteAll,

            _ => return Ok(None),
        };
        Ok(Some(command))
    }

    /// Wire name of the action.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetDocument => "getDocument",
            Self::ListElements(_) => "listElements",
            Self::GetElement(_) => "getElement",
            Self::FindByTag(_) => "findByTag",
            Self::GetSelection => "getSelection",
            Self::GetViewState => "getViewState",
            Self::GetSettings => "getSettings",
            Self::GetLayout => "getLayout",
            Self::GetStatus => "getStatus",
            Self::ExportProject => "exportProject",
            Self::Select(_) => "select",
            Self::ClearSelection => "clearSelection",
            Self::SetTool(_) => "setTool",
            Self::SetZoom(_) => "setZoom",
            Self::SetPan(_) => "setPan",
            Self::SetViewMode(_) => "setViewMode",
            Self::TogglePanel(_) => "togglePanel",
            Self::SetLayout(_) => "setLayout",
            Self::FocusElement(_) => "focusElement",
            Self::Group => "group",
            Self::Ungroup => "ungroup",
            Self::SetSettings(_) => "setSettings",
            Self::CreateElement(_) => "createElement",
            Self::UpdateElement(_) => "updateElement",
            Self::UpdateProps(_) => "updateProps",
            Self::BulkUpdate(_) => "bulkUpdate",
            Self::Translate(_) => "translate",
            Self::BringToFront(_) => "bringToFront",
            Self::SendToBack(_) => "sendToBack",
            Self::DeleteElement(_) => "deleteElement",
            Self::InvokeAction(_) => "invokeAction",
            Self::ImportProject(_) => "importProject",
            Self::DeleteAll => "deleteAll",
        }
    }

    pub fn class(&self) -> CommandClass {
        match self {
            Self::GetDocument
            | Self::ListElements(_)
            | Self::GetElement(_)
            | Self::FindByTag(_)
            | Self::GetSelection
            | Self::GetViewState
            | Self::GetSettings
            | Self::GetLayout
            | Self::GetStatus
            | Self::ExportProject => CommandClass::Query,

            Self::Select(_)
            | Self::ClearSelection
            | Self::SetTool(_)
            | Self::SetZoom(_)
            | Self::SetPan(_)
            | Self::SetViewMode(_)
            | Self::TogglePanel(_)
            | Self::SetLayout(_)
            | Self::FocusElement(_)
            | Self::Group
            | Self::Ungroup => CommandClass::Simple,

            Self::SetSettings(_) => CommandClass::Feedback,

            Self::CreateElement(_)
            | Self::UpdateElement(_)
            | Self::UpdateProps(_)
            | Self::BulkUpdate(_)
            | Self::Translate(_)
            | Self::BringToFront(_)
            | Self::SendToBack(_)
            | Self::DeleteElement(_)
            | Self::InvokeAction(_) => CommandClass::Targeted,

            Self::ImportProject(_) | Self::DeleteAll => CommandClass::WholeDocument,
        }
    }

    /// Whether the command changes document content.
    pub fn is_mutating(&self) -> bool {
        matches!(self.class(), CommandClass::Targeted | CommandClass::WholeDocument)
    }

    /// Whether the command answers a request id.
    pub fn responds(&self) -> bool {
        self.class() != CommandClass::Simple
    }
}
