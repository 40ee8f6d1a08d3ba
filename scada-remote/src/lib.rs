//! # scada-remote — remote control and telemetry for the SCADA designer
//!
//! Keeps one publish/subscribe broker connection per plugin instance,
//! accepts command envelopes on it, and republishes editor events.
//!
//! ## Architecture
//!
//! ```text
//!  SettingsStore ──changed──► ConnectionManager ──open──► Connector (mqtt | memory)
//!                                   │    ▲                      │
//!                           telemetry    └──── TransportEvent ──┘
//!                                   │
//!                 inbound message ──► Dispatcher ──► patch bridge ──► Designer
//!                                          │
//!                   response ◄── Outbound ◄┘
//!                                   ▲
//!   Designer ── EditorEvent ──► EventPublisher
//! ```
//!
//! ## Modules
//!
//! - [`settings`] — total settings coercion and the settings store
//! - [`transport`] — `Connector`/`Link` seam, MQTT and in-memory brokers
//! - [`connection`] — connection lifecycle, outbound path, probe
//! - [`telemetry`] — `RuntimeConnectionInfo` and its single update path
//! - [`envelope`] / [`command`] — wire validation and the closed command set
//! - [`dispatcher`] — command execution and the edit-mode gate
//! - [`patch`] — field/property split and the persisted vs. runtime fork
//! - [`events`] — event gating and topic resolution
//! - [`plugin`] — activation against a designer host

pub mod command;
pub mod connection;
pub mod dispatcher;
pub mod envelope;
pub mod events;
pub mod patch;
pub mod plugin;
pub mod settings;
pub mod telemetry;
pub mod transport;
pub mod value;

pub use command::{Command, CommandClass, PayloadError, Target};
pub use connection::{ConnectionManager, ConnectionProbe, Outbound, ProbeResult, DEFAULT_PROBE_TIMEOUT};
pub use dispatcher::{Dispatcher, Origin};
pub use envelope::{Envelope, EnvelopeError, Reply, EDIT_MODE_REJECTION};
pub use events::{EventCategory, EventPublisher, DEFAULT_TOPIC_PLACEHOLDER};
pub use plugin::{activate, PluginHandle};
pub use settings::{ConnectionSettings, SettingsStore};
pub use telemetry::{ConnectionStatus, RuntimeConnectionInfo, Telemetry, Transition};
pub use transport::{
    ClientOptions, Connector, Handshake, Link, MemoryBroker, MqttConnector, Qos, TransportError, TransportEvent,
};
