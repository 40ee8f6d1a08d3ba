//! Plugin activation: wires the runtime into a designer host.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use scada_core::{
    DesignerHost, DialogSpec, EventSink, FieldDescriptor, FieldKind, SharedDesigner, ToolbarItem,
};

use crate::connection::ConnectionManager;
use crate::settings::SettingsStore;
use crate::telemetry::{RuntimeConnectionInfo, Telemetry};
use crate::transport::{Connector, TransportError};

pub const SETTINGS_DIALOG_ID: &str = "scada-remote.settings";
pub const TOOLBAR_ITEM_ID: &str = "scada-remote.open-settings";

/// The settings dialog registered with the host.
pub fn settings_dialog() -> DialogSpec {
    use FieldKind::*;
    let field = |key: &'static str, label: &'static str, kind: FieldKind| FieldDescriptor { key, label, kind };
    DialogSpec {
        id: SETTINGS_DIALOG_ID.to_string(),
        title: "SCADA Remote Control".to_string(),
        fields: vec![
            field("url", "Broker URL", Text),
            field("username", "Username", Text),
            field("password", "Password", Password),
            field("clientId", "Client ID", Text),
            field("clean", "Clean session", Toggle),
            field("keepalive", "Keepalive (s)", Number),
            field("reconnectPeriod", "Reconnect period (ms)", Number),
            field("qos", "QoS", Number),
            field("remoteControlEnabled", "Enable remote control", Toggle),
            field("remoteTopic", "Command topic", Text),
            field("responseTopic", "Response topic", Text),
            field("eventOutputEnabled", "Publish events", Toggle),
            field("publishCanvasEvents", "Canvas events", Toggle),
            field("publishElementEvents", "Element events", Toggle),
            field("forcePublishCanvasEvents", "Always publish canvas events", Toggle),
            field("forcePublishElementEvents", "Always publish element events", Toggle),
            field("defaultEventTopic", "Default event topic", Text),
        ],
    }
}

pub fn toolbar_item() -> ToolbarItem {
    ToolbarItem {
        id: TOOLBAR_ITEM_ID.to_string(),
        label: "Remote".to_string(),
        dialog_id: SETTINGS_DIALOG_ID.to_string(),
    }
}

/// A running plugin instance.
pub struct PluginHandle {
    manager: Arc<Mutex<ConnectionManager>>,
    designer: SharedDesigner,
    previous_sink: Option<Arc<dyn EventSink>>,
    watcher: JoinHandle<()>,
    telemetry: Telemetry,
}

/// Register UI, install the event sink, connect with the current settings
/// and reconnect whenever they change. Must run inside a tokio runtime.
pub fn activate(
    host: &mut dyn DesignerHost,
    designer: SharedDesigner,
    settings: SettingsStore,
    connector: Arc<dyn Connector>,
) -> Result<PluginHandle, TransportError> {
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

    let mut manager = ConnectionManager::new(connector, settings.clone(), designer.clone());
    let telemetry = manager.telemetry();
    let sink: Arc<dyn EventSink> = Arc::new(manager.event_publisher());
    let previous_sink = match designer.lock() {
        Ok(mut guard) => guard.set_event_sink(Some(sink)),
        Err(poisoned) => poisoned.into_inner().set_event_sink(Some(sink)),
    };

    host.register_dialog(settings_dialog());
    host.add_toolbar_item(toolbar_item());

    let mut changes = settings.subscribe();
    manager.ensure_connected();
    let manager = Arc::new(Mutex::new(manager));

    let watched = manager.clone();
    let watcher = runtime.spawn(async move {
        while changes.changed().await.is_ok() {
            changes.borrow_and_update();
            watched.lock().await.ensure_connected();
        }
    });

    log::info!("remote control plugin activated");
    Ok(PluginHandle {
        manager,
        designer,
        previous_sink,
        watcher,
        telemetry,
    })
}

impl PluginHandle {
    pub fn manager(&self) -> Arc<Mutex<ConnectionManager>> {
        self.manager.clone()
    }

    pub fn diagnostics(&self) -> RuntimeConnectionInfo {
        self.telemetry.snapshot()
    }

    pub fn telemetry(&self) -> Telemetry {
        self.telemetry.clone()
    }

    /// Undo everything `activate` did.
    pub async fn deactivate(self, host: &mut dyn DesignerHost) {
        self.watcher.abort();
        match self.designer.lock() {
            Ok(mut guard) => guard.set_event_sink(self.previous_sink),
            Err(poisoned) => poisoned.into_inner().set_event_sink(self.previous_sink),
        };
        host.remove_toolbar_item(TOOLBAR_ITEM_ID);
        host.unregister_dialog(SETTINGS_DIALOG_ID);
        self.manager.lock().await.teardown();
        log::info!("remote control plugin deactivated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialog_covers_every_setting() {
        let dialog = settings_dialog();
        let wire = crate::settings::ConnectionSettings::default().to_value();
        let keys: Vec<&str> = dialog.fields.iter().map(|f| f.key).collect();
        for key in wire.as_object().unwrap().keys() {
            assert!(keys.contains(&key.as_str()), "missing field {key}");
        }
        assert_eq!(toolbar_item().dialog_id, dialog.id);
    }
}
