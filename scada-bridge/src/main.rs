//! SCADA Bridge — headless host for the remote-control runtime.
//!
//! Loads a project into a [`Workspace`], activates the remote plugin against
//! it and logs connection telemetry until interrupted.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use serde_json::{json, Map, Value};

use scada_core::{Designer, Element, ElementKind, HostRegistry, SharedDesigner, ViewMode, Workspace};
use scada_remote::{activate, Connector, MemoryBroker, MqttConnector, SettingsStore};

#[derive(Parser, Debug)]
#[command(name = "scada-bridge", about = "Run the SCADA remote-control runtime without a UI")]
struct Cli {
    /// JSON settings file (same keys as the settings dialog).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Broker URL, overriding the settings file.
    #[arg(long)]
    url: Option<String>,

    /// Project file to open.
    #[arg(long)]
    project: Option<PathBuf>,

    /// Start in view mode.
    #[arg(long, default_value_t = false)]
    view: bool,

    /// Populate the workspace with a small demo plant.
    #[arg(long, default_value_t = false)]
    demo: bool,

    /// Use the in-process broker instead of MQTT.
    #[arg(long, default_value_t = false)]
    memory: bool,
}

fn load_settings(cli: &Cli) -> Result<Value> {
    let mut settings = match &cli.settings {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => Value::Object(Map::new()),
    };
    let Some(object) = settings.as_object_mut() else {
        anyhow::bail!("settings must be a JSON object");
    };
    if let Some(url) = &cli.url {
        object.insert("url".into(), json!(url));
    } else if cli.memory && !object.contains_key("url") {
        object.insert("url".into(), json!("memory://local"));
    }
    Ok(settings)
}

fn demo_plant(ws: &mut Workspace) -> Result<()> {
    let mut tank = Element::new("tank", ElementKind::Custom)
        .with_bounds(40.0, 40.0, 120.0, 200.0)
        .with_prop("tag", json!("tank-1"))
        .with_prop("level", json!(0.0));
    tank.id = "tank-1".into();
    tank.change_events = true;

    let mut pump = Element::new("pump", ElementKind::Custom)
        .with_bounds(220.0, 180.0, 60.0, 60.0)
        .with_prop("tag", json!("pump-1"))
        .with_prop("running", json!(false));
    pump.id = "pump-1".into();
    pump.click_events = true;

    let mut label = Element::new("text", ElementKind::Text).with_bounds(40.0, 260.0, 160.0, 24.0);
    label.id = "label-1".into();

    for element in [tank, pump, label] {
        ws.create_element(element)?;
    }
    ws.register_action(
        "pump",
        "start",
        Arc::new(|_: &Element, _: &Value| -> Result<Value, String> { Ok(json!({"running": true})) }),
    );
    ws.register_action(
        "pump",
        "stop",
        Arc::new(|_: &Element, _: &Value| -> Result<Value, String> { Ok(json!({"running": false})) }),
    );
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let settings = SettingsStore::new(load_settings(&cli)?);

    let mut ws = Workspace::new();
    if let Some(path) = &cli.project {
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        ws.import_project(&text)?;
    }
    if cli.demo {
        demo_plant(&mut ws)?;
    }
    if cli.view {
        ws.set_view_mode(ViewMode::View);
    }
    let designer: SharedDesigner = Arc::new(Mutex::new(ws));

    let connector: Arc<dyn Connector> = if cli.memory {
        Arc::new(MemoryBroker::new())
    } else {
        Arc::new(MqttConnector::new())
    };

    let mut host = HostRegistry::new();
    let handle = activate(&mut host, designer, settings, connector)?;

    let mut status = handle.telemetry().subscribe();
    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = status.borrow_and_update().clone();
                match &snapshot.last_error {
                    Some(error) => warn!("{} ({}): {error}", snapshot.status, snapshot.url),
                    None => info!(
                        "{} ({}) reconnects={}",
                        snapshot.status, snapshot.url, snapshot.reconnect_count
                    ),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
        }
    }

    handle.deactivate(&mut host).await;
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("scada-bridge error: {err:#}");
        std::process::exit(1);
    }
}
