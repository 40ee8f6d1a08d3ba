//! Shared rig: a workspace, a memory broker and an activated plugin.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{json, Value};
use tokio::time::{sleep, Duration, Instant};

use scada_core::{HostRegistry, SharedDesigner, Workspace};
use scada_remote::{activate, MemoryBroker, PluginHandle, SettingsStore};

pub const COMMAND_TOPIC: &str = "scada/rc";
pub const RESPONSE_TOPIC: &str = "scada/rc/resp";

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    check()
}

pub fn base_settings() -> Value {
    json!({
        "url": "memory://local",
        "remoteControlEnabled": true,
        "eventOutputEnabled": true
    })
}

pub struct Rig {
    pub broker: MemoryBroker,
    pub workspace: Arc<Mutex<Workspace>>,
    pub settings: SettingsStore,
    pub host: HostRegistry,
    pub handle: PluginHandle,
}

impl Rig {
    pub async fn start(workspace: Workspace) -> Self {
        Self::with_settings(workspace, base_settings()).await
    }

    pub async fn with_settings(workspace: Workspace, settings: Value) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let broker = MemoryBroker::new();
        let workspace = Arc::new(Mutex::new(workspace));
        let designer: SharedDesigner = workspace.clone();
        let settings = SettingsStore::new(settings);
        let mut host = HostRegistry::new();
        let handle = activate(&mut host, designer, settings.clone(), Arc::new(broker.clone())).unwrap();

        let rig = Self {
            broker,
            workspace,
            settings,
            host,
            handle,
        };
        // Only the memory scheme can ever come up.
        if rig.settings.get().url.starts_with("memory://") {
            let telemetry = rig.handle.telemetry();
            assert!(eventually(|| telemetry.is_connected()).await, "never connected");
        }
        rig
    }

    pub fn ws(&self) -> MutexGuard<'_, Workspace> {
        self.workspace.lock().unwrap()
    }

    pub fn send(&self, message: Value) {
        self.broker
            .deliver(COMMAND_TOPIC, serde_json::to_vec(&message).unwrap());
    }

    /// Every JSON payload published on `topic`.
    pub fn payloads(&self, topic: &str) -> Vec<Value> {
        self.broker
            .published_on(topic)
            .iter()
            .filter(|p| p.client_id.is_some())
            .filter_map(|p| p.json())
            .collect()
    }

    pub fn responses(&self) -> Vec<Value> {
        self.payloads(RESPONSE_TOPIC)
    }

    /// Send and wait for the response carrying `message.requestId`.
    pub async fn request(&self, message: Value) -> Value {
        let request_id = message["requestId"].clone();
        self.send(message);
        let mut found = None;
        eventually(|| {
            found = self
                .responses()
                .into_iter()
                .find(|r| r["requestId"] == request_id);
            found.is_some()
        })
        .await;
        found.unwrap_or_else(|| panic!("no response for {request_id}"))
    }

    /// A round trip through the dispatcher: once the probe query is
    /// answered, everything sent before it has been handled.
    pub async fn settle(&self) {
        let id = format!("settle-{}", uuid::Uuid::new_v4());
        self.request(json!({"action": "getSelection", "requestId": id})).await;
    }
}
