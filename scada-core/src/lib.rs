//! # scada-core — Editor surface for the SCADA/HMI designer
//!
//! Defines the contract the remote-control runtime drives, plus an
//! in-memory implementation of it.
//!
//! ```text
//! ┌──────────────┐   Designer trait   ┌──────────────────────────┐
//! │ scada-remote │ ─────────────────► │ Workspace                │
//! │ (dispatcher) │                    │  ├── Document (active)   │
//! └──────────────┘                    │  │    ├── elements       │
//!        ▲                            │  │    ├── History        │
//!        │ EditorEvent                │  │    └── runtime overlay│
//!        └─────────── EventSink ◄──── │  └── Document ...        │
//!                                     └──────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`element`] — element record and the core attribute key set
//! - [`document`] — persisted elements, undo history, runtime overlay
//! - [`history`] — snapshot undo stack with nestable batches
//! - [`designer`] — the `Designer` trait, events, view state
//! - [`workspace`] — in-memory `Designer`
//! - [`host`] — dialog/toolbar registration for plugins

pub mod designer;
pub mod document;
pub mod element;
pub mod history;
pub mod host;
pub mod workspace;

pub use designer::{
    Designer, DesignerError, EditorEvent, ElementAction, EventSink, SharedDesigner, UiLayout,
    ViewMode, Viewport,
};
pub use document::{Document, ElementPatch, ProjectFile};
pub use element::{is_field_key, Element, ElementKind, ELEMENT_FIELD_KEYS, TAG_PROP};
pub use history::History;
pub use host::{DesignerHost, DialogSpec, FieldDescriptor, FieldKind, HostRegistry, ToolbarItem};
pub use workspace::Workspace;
