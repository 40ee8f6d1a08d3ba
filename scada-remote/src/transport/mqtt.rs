//! MQTT transport over `rumqttc`.
//!
//! Each link spawns one task that drives the `rumqttc` event loop and maps
//! its notifications to [`TransportEvent`]s. When the loop fails the task
//! waits `reconnect_period` and polls again, which makes `rumqttc` redial;
//! a zero period turns that off and the link goes offline for good.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{ClientOptions, Connector, Link, Qos, TransportError, TransportEvent, EVENT_CHANNEL_CAPACITY};

/// Capacity of the request queue between `AsyncClient` and its event loop.
const REQUEST_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, Default)]
pub struct MqttConnector;

impl MqttConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for MqttConnector {
    fn open(
        &self,
        url: &str,
        options: &ClientOptions,
    ) -> Result<(Arc<dyn Link>, mpsc::Receiver<TransportEvent>), TransportError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
        let mqtt_options = build_options(url, options)?;
        let (client, eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));

        let task = runtime.spawn(drive(
            eventloop,
            tx,
            connected.clone(),
            Duration::from_millis(options.reconnect_period_ms),
        ));

        log::debug!("mqtt link opened to {url} as {}", options.client_id);
        let link = MqttLink {
            client,
            connected,
            task: Mutex::new(Some(task)),
        };
        Ok((Arc::new(link), rx))
    }
}

/// Translate a broker URL and client options into `rumqttc` options.
///
/// Supported schemes: `mqtt`/`tcp` (1883), `mqtts`/`ssl` (8883),
/// `ws` (80) and `wss` (443).
pub fn build_options(url: &str, options: &ClientOptions) -> Result<MqttOptions, TransportError> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| TransportError::InvalidUrl(url.to_string()))?;
    let scheme = scheme.to_ascii_lowercase();
    let authority = rest.split('/').next().unwrap_or_default();
    // Drop any userinfo; credentials come from the options.
    let authority = authority.rsplit('@').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(TransportError::InvalidUrl(url.to_string()));
    }

    let default_port = match scheme.as_str() {
        "mqtt" | "tcp" => 1883,
        "mqtts" | "ssl" => 8883,
        "ws" => 80,
        "wss" => 443,
        other => return Err(TransportError::UnsupportedScheme(other.to_string())),
    };
    let (host, port) = split_host_port(authority, default_port)
        .ok_or_else(|| TransportError::InvalidUrl(url.to_string()))?;

    let mut mqtt = match scheme.as_str() {
        // Websocket transports dial the whole URL.
        "ws" | "wss" => MqttOptions::new(options.client_id.clone(), url.to_string(), port),
        _ => MqttOptions::new(options.client_id.clone(), host, port),
    };
    match scheme.as_str() {
        "mqtts" | "ssl" => {
            mqtt.set_transport(Transport::tls_with_default_config());
        }
        "ws" => {
            mqtt.set_transport(Transport::Ws);
        }
        "wss" => {
            mqtt.set_transport(Transport::wss_with_default_config());
        }
        _ => {}
    }

    mqtt.set_keep_alive(Duration::from_secs(options.keepalive_secs));
    mqtt.set_clean_session(options.clean);
    if !options.username.is_empty() {
        mqtt.set_credentials(options.username.clone(), options.password.clone());
    }
    Ok(mqtt)
}

fn split_host_port(authority: &str, default_port: u16) -> Option<(String, u16)> {
    // Bracketed IPv6: [::1]:1883
    if let Some(rest) = authority.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(p) => p.parse().ok()?,
            None => default_port,
        };
        return Some((host.to_string(), port));
    }
    match authority.rsplit_once(':') {
        Some((host, port)) => Some((host.to_string(), port.parse().ok()?)),
        None => Some((authority.to_string(), default_port)),
    }
}

async fn drive(
    mut eventloop: EventLoop,
    events: mpsc::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
    reconnect_period: Duration,
) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::SeqCst);
                Some(TransportEvent::Connected)
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => Some(TransportEvent::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            }),
            Ok(Event::Incoming(Packet::Disconnect)) => {
                connected.store(false, Ordering::SeqCst);
                Some(TransportEvent::Closed)
            }
            Ok(_) => None,
            Err(err) => {
                let was_connected = connected.swap(false, Ordering::SeqCst);
                if events.send(TransportEvent::Error(err.to_string())).await.is_err() {
                    return;
                }
                if was_connected && events.send(TransportEvent::Closed).await.is_err() {
                    return;
                }
                if reconnect_period.is_zero() {
                    let _ = events.send(TransportEvent::Offline).await;
                    return;
                }
                tokio::time::sleep(reconnect_period).await;
                Some(TransportEvent::Reconnecting)
            }
        };

        if let Some(event) = event {
            if events.send(event).await.is_err() {
                // Nobody is listening any more.
                return;
            }
        }
    }
}

struct MqttLink {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

fn qos(level: Qos) -> QoS {
    match level {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

impl Link for MqttLink {
    fn publish(&self, topic: &str, payload: Vec<u8>, level: Qos) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.client
            .try_publish(topic, qos(level), false, payload)
            .map_err(|e| TransportError::Client(e.to_string()))
    }

    fn subscribe(&self, topic: &str, level: Qos) -> Result<(), TransportError> {
        self.client
            .try_subscribe(topic, qos(level))
            .map_err(|e| TransportError::Client(e.to_string()))
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client
            .try_unsubscribe(topic)
            .map_err(|e| TransportError::Client(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            // Dropping the event loop drops the socket.
            task.abort();
        }
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.close();
    }
}
