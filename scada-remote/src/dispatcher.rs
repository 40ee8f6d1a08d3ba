//! Command dispatch.
//!
//! ```text
//! JSON ──► Envelope::parse ──► Command::parse ──► mode gate ──► execute
//!   │            │                   │                │            │
//!   └ drop ◄─────┴───── drop ◄───────┘   rejection ◄──┘     Option<Reply>
//! ```
//!
//! Nothing here fails outward: invalid input is dropped, application
//! errors become `{ok:false, error}` replies.

use serde_json::{json, Value};

use scada_core::{Designer, DesignerError, ViewMode};

use crate::command::{Command, Target};
use crate::envelope::{edit_mode_rejection, Envelope, Reply};
use crate::patch::{self, Stack};
use crate::settings::SettingsStore;
use crate::telemetry::Telemetry;

/// Where a command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A broker message. Document mutations are refused in edit mode.
    Remote,
    /// The host itself. Never gated.
    Local,
}

#[derive(Clone)]
pub struct Dispatcher {
    settings: SettingsStore,
    telemetry: Telemetry,
}

impl Dispatcher {
    pub fn new(settings: SettingsStore, telemetry: Telemetry) -> Self {
        Self { settings, telemetry }
    }

    /// Handle one inbound message. Returns the response to publish, if any.
    pub fn dispatch(&self, designer: &mut dyn Designer, message: &Value, origin: Origin) -> Option<Value> {
        let envelope = match Envelope::parse(message) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::debug!("dropping message: {e}");
                return None;
            }
        };
        let command = match Command::parse(&envelope.action, &envelope.payload) {
            Ok(Some(command)) => command,
            Ok(None) => return None,
            Err(e) => {
                log::debug!("dropping message: {e}");
                return None;
            }
        };

        if origin == Origin::Remote && command.is_mutating() && designer.view_mode() == ViewMode::Edit {
            log::info!("rejected remote {} in edit mode", command.name());
            return envelope.request_id.as_deref().map(edit_mode_rejection);
        }

        let reply = self.execute(designer, command)?;
        envelope.request_id.map(|id| reply.into_response(&id))
    }

    /// Run a parsed command. Simple commands return `None`.
    pub fn execute(&self, designer: &mut dyn Designer, command: Command) -> Option<Reply> {
        let name = command.name();
        match command {
            Command::GetDocument => Some(Reply::ok(name).with("document", designer.active_document().to_value())),
            Command::ListElements(list) => {
                let ids = if list.all.unwrap_or(false) {
                    let mut ids: Vec<String> = Vec::new();
                    for id in designer.documents().iter().flat_map(|doc| doc.ids()) {
                        if !ids.contains(&id) {
                            ids.push(id);
                        }
                    }
                    ids
                } else {
                    designer.active_document().ids()
                };
                Some(Reply::ok(name).with("ids", ids))
            }
            Command::GetElement(get) => Some(match designer.element(&get.id) {
                Some(element) => Reply::ok(name).with("element", to_value(&element)),
                None => Reply::new(name, false).with("element", Value::Null),
            }),
            Command::FindByTag(find) => Some(Reply::ok(name).with("ids", designer.find_by_tag(&find.tag))),
            Command::GetSelection => Some(Reply::ok(name).with("ids", designer.selection().to_vec())),
            Command::GetViewState => {
                let viewport = designer.viewport();
                Some(
                    Reply::ok(name)
                        .with("mode", to_value(&designer.view_mode()))
                        .with("tool", designer.tool())
                        .with("zoom", viewport.zoom)
                        .with("panX", viewport.pan_x)
                        .with("panY", viewport.pan_y),
                )
            }
            Command::GetSettings => {
                let mut settings = self.settings.get().to_value();
                // Credentials stay with the host.
                if let Some(object) = settings.as_object_mut() {
                    object.remove("password");
                }
                Some(Reply::ok(name).with("settings", settings))
            }
            Command::GetLayout => Some(Reply::ok(name).with("layout", to_value(designer.layout()))),
            Command::GetStatus => Some(Reply::ok(name).with("status", to_value(&self.telemetry.snapshot()))),
            Command::ExportProject => Some(match designer.export_project() {
                Ok(project) => Reply::ok(name).with("project", project),
                Err(e) => Reply::failed(name, e),
            }),

            Command::Select(select) => {
                designer.select(select.into_ids());
                None
            }
            Command::ClearSelection => {
                designer.clear_selection();
                None
            }
            Command::SetTool(set) => {
                designer.set_tool(&set.tool);
                None
            }
            Command::SetZoom(set) => {
                if let Some(zoom) = set.zoom {
                    let viewport = designer.viewport().with_zoom(zoom);
                    designer.set_viewport(viewport);
                }
                None
            }
            Command::SetPan(set) => {
                let mut viewport = designer.viewport();
                if let Some(x) = set.x {
                    viewport.pan_x = x;
                }
                if let Some(y) = set.y {
                    viewport.pan_y = y;
                }
                designer.set_viewport(viewport);
                None
            }
            Command::SetViewMode(set) => {
                designer.set_view_mode(set.mode);
                None
            }
            Command::TogglePanel(toggle) => {
                designer.toggle_panel(&toggle.panel, toggle.visible);
                None
            }
            Command::SetLayout(set) => {
                if let Err(e) = designer.set_layout(&set.layout) {
                    log::debug!("setLayout ignored: {e}");
                }
                None
            }
            Command::FocusElement(focus) => {
                designer.focus_element(&focus.id);
                None
            }
            Command::Group => {
                designer.group_selection();
                None
            }
            Command::Ungroup => {
                designer.ungroup_selection();
                None
            }

            Command::SetSettings(set) => {
                self.settings.merge(&set.settings);
                Some(Reply::ok(name))
            }

            Command::CreateElement(create) => Some(
                match patch::element_from_patch(&create.element).and_then(|mut element| {
                    // An explicit zIndex, 0 included, is kept.
                    if !create.element.contains_key("zIndex") {
                        element.z_index = patch::next_z_index(&*designer);
                    }
                    patch::structural(designer, |d| d.create_element(element))
                }) {
                    Ok(id) => Reply::ok(name).with("id", id),
                    Err(e) => Reply::failed(name, e).with("id", Value::Null),
                },
            ),
            Command::UpdateElement(update) => {
                let ids = patch::resolve_targets(designer, &update.target);
                Some(counted(name, patch::update_elements(designer, &ids, &update.patch)))
            }
            Command::UpdateProps(update) => {
                let ids = patch::resolve_targets(designer, &update.target);
                Some(counted(name, patch::update_props(designer, &ids, &update.props)))
            }
            Command::BulkUpdate(bulk) => {
                // One undo step for the whole bulk in edit mode.
                let batched = designer.view_mode() == ViewMode::Edit;
                if batched {
                    designer.begin_batch();
                }
                let mut result = Ok(0);
                for update in &bulk.updates {
                    let ids = patch::resolve_targets(designer, &update.target);
                    match patch::update_elements(designer, &ids, &update.patch) {
                        Ok(count) => result = result.map(|total| total + count),
                        Err(e) => {
                            result = Err(e);
                            break;
                        }
                    }
                }
                if batched {
                    designer.end_batch();
                }
                Some(counted(name, result))
            }
            Command::Translate(translate) => {
                let ids = patch::resolve_targets(designer, &translate.target);
                Some(counted(name, patch::translate(designer, &ids, translate.dx, translate.dy)))
            }
            Command::BringToFront(target) => {
                let ids = patch::resolve_targets(designer, &target);
                Some(counted(name, patch::restack(designer, &ids, Stack::Front)))
            }
            Command::SendToBack(target) => {
                let ids = patch::resolve_targets(designer, &target);
                Some(counted(name, patch::restack(designer, &ids, Stack::Back)))
            }
            Command::DeleteElement(target) => {
                let ids: Vec<String> = patch::resolve_targets(designer, &target)
                    .into_iter()
                    .filter(|id| designer.active_document().contains(id))
                    .collect();
                let count = patch::structural(designer, |d| d.delete_elements(&ids));
                Some(counted(name, Ok(count)))
            }
            Command::InvokeAction(invoke) => {
                let ids = patch::resolve_targets(designer, &invoke.target);
                if ids.is_empty() {
                    return Some(Reply::failed(name, DesignerError::ElementNotFound(describe(&invoke.target))));
                }
                let results: Result<Vec<Value>, DesignerError> = ids
                    .iter()
                    .map(|id| designer.invoke_action(id, &invoke.name, &invoke.args))
                    .collect();
                Some(match results {
                    Ok(results) => Reply::ok(name).with("results", results),
                    Err(e) => Reply::failed(name, e),
                })
            }

            Command::ImportProject(import) => Some(match import.text() {
                Some(text) => match designer.import_project(&text) {
                    Ok(()) => Reply::ok(name),
                    Err(e) => Reply::failed(name, e),
                },
                None => Reply::failed(
                    name,
                    DesignerError::InvalidProject("project must be text or an object".into()),
                ),
            }),
            Command::DeleteAll => {
                let count = patch::structural(designer, |d| d.delete_all());
                Some(Reply::ok(name).with("count", count))
            }
        }
    }
}

fn counted(name: &str, result: Result<usize, DesignerError>) -> Reply {
    match result {
        Ok(count) => Reply::new(name, count > 0).with("count", count),
        Err(e) => Reply::failed(name, e).with("count", 0),
    }
}

fn describe(target: &Target) -> String {
    match (&target.id, &target.tag) {
        (Some(id), _) => id.clone(),
        (None, Some(tag)) => format!("tag '{tag}'"),
        (None, None) => String::new(),
    }
}

fn to_value<T: serde::Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| json!({ "error": e.to_string() }))
}
