//! One broker session shared by every cloud-connected device.
//!
//! Each device registers its serial and receives the reports addressed to it
//! over its own channel. The pool owns the session: on every (re)connect it
//! re-subscribes all registered report topics and asks each device for a
//! full state push.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use rumqttc::{mqttbytes::QoS, Event, EventLoop, Packet};
use serde_json::Value;
use tokio::{
    sync::{mpsc, Mutex, RwLock},
    task::JoinHandle,
};

use crate::{command::Command, Error, Result};

/// The cloud broker host.
pub const BROKER_HOST: &str = "us.mqtt.bambulab.com";
/// The cloud broker TLS port.
pub const BROKER_PORT: u16 = 8883;
/// How long to wait for the broker to acknowledge a connect.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_PACKET_SIZE: usize = 1024 * 1024;
const REQUEST_CAPACITY: usize = 64;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// The topic a device publishes its reports on.
pub fn report_topic(serial: &str) -> String {
    format!("device/{}/report", serial)
}

/// The topic a device listens for commands on.
pub fn request_topic(serial: &str) -> String {
    format!("device/{}/request", serial)
}

fn serial_from_report_topic(topic: &str) -> Option<&str> {
    topic.strip_prefix("device/")?.strip_suffix("/report")
}

/// Broker login derived from a cloud access token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// The broker username, `u_` followed by the account id.
    pub username: String,
    /// The cloud access token, used as the broker password.
    pub token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// The operations the pool needs from an established broker session.
#[async_trait]
pub trait BrokerLink: Send + Sync {
    /// Subscribe to a topic.
    async fn subscribe(&self, topic: &str) -> Result<()>;

    /// Publish a payload to a topic.
    async fn publish(&self, topic: &str, payload: String) -> Result<()>;

    /// Close the session.
    async fn disconnect(&self) -> Result<()>;
}

/// [BrokerLink] over a rumqttc client.
pub struct MqttLink {
    client: rumqttc::AsyncClient,
}

#[async_trait]
impl BrokerLink for MqttLink {
    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.client.subscribe(topic, QoS::AtMostOnce).await?;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<()> {
        self.client.publish(topic, QoS::AtMostOnce, false, payload).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.client.disconnect().await?;
        Ok(())
    }
}

/// The shared broker session, cheap to clone.
#[derive(Clone, Default)]
pub struct ConnectionPool {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    devices: DashMap<String, mpsc::UnboundedSender<Value>>,
    link: RwLock<Option<Arc<dyn BrokerLink>>>,
    connected: AtomicBool,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionPool {
    /// Create a pool with no session. Devices may register before
    /// [ConnectionPool::connect] is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the broker session is currently up.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Whether a device with this serial has registered.
    pub fn is_registered(&self, serial: &str) -> bool {
        self.inner.devices.contains_key(serial)
    }

    /// Register a device and return the channel its reports arrive on.
    ///
    /// When the session is already up the device is subscribed and rebased
    /// immediately; a failure there is logged, and the device is picked up
    /// again on the next reconnect.
    pub async fn register(&self, serial: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.inner.devices.insert(serial.to_string(), tx).is_some() {
            tracing::warn!(serial, "device registered twice, replacing previous receiver");
        }
        tracing::info!(serial, "registered device with connection pool");

        if self.is_connected() {
            if let Err(err) = self.subscribe_and_rebase(serial).await {
                tracing::warn!(serial, error = %err, "failed to subscribe newly registered device");
            }
        }

        rx
    }

    /// Hand an inbound publish to the device it is addressed to. Reports
    /// for unknown serials, and bodies that are not JSON, are logged and
    /// dropped.
    pub fn route(&self, topic: &str, payload: &[u8]) {
        let Some(serial) = serial_from_report_topic(topic) else {
            tracing::trace!(topic, "ignoring publish on non-report topic");
            return;
        };

        let Some(sender) = self.inner.devices.get(serial) else {
            tracing::warn!(serial, "received report for unregistered device, dropping");
            return;
        };

        match serde_json::from_slice::<Value>(payload) {
            Ok(value) => {
                tracing::trace!(serial, "routing report");
                if sender.send(value).is_err() {
                    tracing::warn!(serial, "device is no longer receiving reports");
                }
            }
            Err(err) => {
                let err = format_serde_error::SerdeError::new(String::from_utf8_lossy(payload).into_owned(), err);
                tracing::warn!(serial, error = %err, "dropping report that is not valid json");
            }
        }
    }

    /// Publish a command to a registered device.
    pub async fn request(&self, serial: &str, command: &Command) -> Result<()> {
        let link = self.link().await?;
        if !self.is_registered(serial) {
            return Err(Error::UnknownDevice(serial.to_string()));
        }

        let payload = serde_json::to_string(command)?;
        tracing::debug!(serial, sequence_id = %command.sequence_id(), "publishing command");
        link.publish(&request_topic(serial), payload).await
    }

    /// Ask one device to push its complete state.
    pub async fn rebase(&self, serial: &str) -> Result<()> {
        self.request(serial, &Command::push_all()).await
    }

    /// Ask every registered device to push its complete state. Failures are
    /// logged per device; the first one is returned after all were tried.
    pub async fn rebase_all(&self) -> Result<()> {
        let mut first_error = None;
        for serial in self.serials() {
            if let Err(err) = self.rebase(&serial).await {
                tracing::warn!(serial = %serial, error = %err, "failed to rebase device");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Connect to the cloud broker, waiting up to `timeout` for the
    /// broker to accept. The session then runs in a background task that
    /// reconnects on its own.
    pub async fn connect(&self, credentials: &Credentials, timeout: Duration) -> Result<()> {
        let options = mqtt_options(credentials)?;
        let (client, mut event_loop) = rumqttc::AsyncClient::new(options, REQUEST_CAPACITY);

        tokio::time::timeout(timeout, wait_for_connack(&mut event_loop))
            .await
            .map_err(|_| Error::Timeout(timeout, "broker connect"))??;
        tracing::info!(host = BROKER_HOST, username = %credentials.username, "connected to broker");

        let handle = tokio::spawn(run_event_loop(self.clone(), event_loop));
        if let Some(previous) = self.inner.event_loop.lock().await.replace(handle) {
            previous.abort();
        }

        self.attach(Arc::new(MqttLink { client })).await
    }

    /// Install an established session and bring every registered device
    /// up to date on it.
    pub async fn attach(&self, link: Arc<dyn BrokerLink>) -> Result<()> {
        *self.inner.link.write().await = Some(link);
        self.inner.connected.store(true, Ordering::Release);
        self.on_connected().await
    }

    /// Tear the session down.
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.connected.store(false, Ordering::Release);
        if let Some(handle) = self.inner.event_loop.lock().await.take() {
            handle.abort();
        }
        match self.inner.link.write().await.take() {
            Some(link) => link.disconnect().await,
            None => Ok(()),
        }
    }

    /// Record whether the session is up, returning what it was before.
    fn set_connected(&self, connected: bool) -> bool {
        self.inner.connected.swap(connected, Ordering::AcqRel)
    }

    async fn on_connected(&self) -> Result<()> {
        for serial in self.serials() {
            if let Err(err) = self.subscribe(&serial).await {
                tracing::warn!(serial = %serial, error = %err, "failed to subscribe device report topic");
            }
        }
        self.rebase_all().await
    }

    async fn subscribe(&self, serial: &str) -> Result<()> {
        let topic = report_topic(serial);
        tracing::debug!(topic = %topic, "subscribing");
        self.link().await?.subscribe(&topic).await
    }

    async fn subscribe_and_rebase(&self, serial: &str) -> Result<()> {
        self.subscribe(serial).await?;
        self.rebase(serial).await
    }

    async fn link(&self) -> Result<Arc<dyn BrokerLink>> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.inner.link.read().await.clone().ok_or(Error::NotConnected)
    }

    fn serials(&self) -> Vec<String> {
        self.inner.devices.iter().map(|entry| entry.key().clone()).collect()
    }
}

fn mqtt_options(credentials: &Credentials) -> Result<rumqttc::MqttOptions> {
    let client_id = format!("farm-api-{}", nanoid::nanoid!(8));

    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    // Pin the provider: reqwest and rumqttc may each pull a different one in.
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let tls = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();

    let mut opts = rumqttc::MqttOptions::new(client_id, BROKER_HOST, BROKER_PORT);
    opts.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
    opts.set_keep_alive(Duration::from_secs(30));
    opts.set_credentials(credentials.username.clone(), credentials.token.clone());
    opts.set_transport(rumqttc::Transport::Tls(rumqttc::TlsConfiguration::Rustls(Arc::new(tls))));
    Ok(opts)
}

async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<()> {
    loop {
        if let Event::Incoming(Packet::ConnAck(_)) = event_loop.poll().await? {
            return Ok(());
        }
    }
}

/// Drive the session. rumqttc reconnects on the next poll after an error,
/// so a failure only marks the pool disconnected until the next ConnAck.
async fn run_event_loop(pool: ConnectionPool, mut event_loop: EventLoop) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                pool.route(&publish.topic, &publish.payload);
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("reconnected to broker");
                pool.set_connected(true);
                // Subscribing goes through the request channel this loop
                // drains, so it must not be awaited here.
                let pool = pool.clone();
                tokio::spawn(async move {
                    if let Err(err) = pool.on_connected().await {
                        tracing::warn!(error = %err, "failed to rebase after reconnect");
                    }
                });
            }
            Ok(_) => {}
            Err(err) => {
                if pool.set_connected(false) {
                    tracing::error!(error = %err, "lost broker connection");
                } else {
                    tracing::debug!(error = %err, "broker still unreachable");
                }
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::sync::Mutex as StdMutex;

    use super::*;

    #[derive(Default)]
    struct RecordingLink {
        subscribed: StdMutex<Vec<String>>,
        published: StdMutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl BrokerLink for RecordingLink {
        async fn subscribe(&self, topic: &str) -> Result<()> {
            self.subscribed.lock().unwrap().push(topic.to_string());
            Ok(())
        }

        async fn publish(&self, topic: &str, payload: String) -> Result<()> {
            let value = serde_json::from_str(&payload)?;
            self.published.lock().unwrap().push((topic.to_string(), value));
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
    }

    fn pushall() -> Value {
        serde_json::json!({"pushing": {"command": "pushall", "sequence_id": 1}})
    }

    #[test]
    fn test_serial_from_topic() {
        assert_eq!(serial_from_report_topic("device/00M123/report"), Some("00M123"));
        assert_eq!(serial_from_report_topic("device/00M123/request"), None);
        assert_eq!(serial_from_report_topic("other/00M123/report"), None);
    }

    #[tokio::test]
    async fn test_request_fails_fast_when_disconnected() {
        let pool = ConnectionPool::new();
        let _rx = pool.register("00M1").await;

        let err = pool.request("00M1", &Command::push_all()).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_request_unknown_device() {
        let pool = ConnectionPool::new();
        pool.attach(Arc::new(RecordingLink::default())).await.unwrap();

        let err = pool.request("nope", &Command::stop()).await.unwrap_err();
        assert!(matches!(err, Error::UnknownDevice(serial) if serial == "nope"));
    }

    #[tokio::test]
    async fn test_connect_resubscribes_and_rebases_everything() {
        let pool = ConnectionPool::new();
        let _a = pool.register("00M1").await;
        let _b = pool.register("01P2").await;

        let link = Arc::new(RecordingLink::default());
        pool.attach(link.clone()).await.unwrap();

        let mut subscribed = link.subscribed.lock().unwrap().clone();
        subscribed.sort();
        assert_eq!(subscribed, vec!["device/00M1/report", "device/01P2/report"]);

        let mut published = link.published.lock().unwrap().clone();
        published.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            published,
            vec![
                ("device/00M1/request".to_string(), pushall()),
                ("device/01P2/request".to_string(), pushall()),
            ]
        );
    }

    #[tokio::test]
    async fn test_register_while_connected_rebases_only_that_device() {
        let pool = ConnectionPool::new();
        let _a = pool.register("00M1").await;
        let link = Arc::new(RecordingLink::default());
        pool.attach(link.clone()).await.unwrap();
        link.subscribed.lock().unwrap().clear();
        link.published.lock().unwrap().clear();

        let _b = pool.register("039X").await;

        assert_eq!(*link.subscribed.lock().unwrap(), vec!["device/039X/report"]);
        assert_eq!(
            *link.published.lock().unwrap(),
            vec![("device/039X/request".to_string(), pushall())]
        );
    }

    #[tokio::test]
    async fn test_route_delivers_to_registered_device() {
        let pool = ConnectionPool::new();
        let mut rx = pool.register("00M1").await;

        pool.route("device/00M1/report", br#"{"print": {"mc_percent": 3}}"#);
        pool.route("device/unknown/report", br#"{"print": {}}"#);
        pool.route("device/00M1/report", b"not json");

        let value = rx.recv().await.unwrap();
        assert_eq!(value, serde_json::json!({"print": {"mc_percent": 3}}));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reconnect_rebases_again() {
        let pool = ConnectionPool::new();
        let _a = pool.register("00M1").await;
        let link = Arc::new(RecordingLink::default());
        pool.attach(link.clone()).await.unwrap();
        link.subscribed.lock().unwrap().clear();
        link.published.lock().unwrap().clear();

        // The session drops; a device registered meanwhile waits for the
        // next connect.
        assert!(pool.set_connected(false));
        let _b = pool.register("01P2").await;
        assert!(matches!(pool.rebase("00M1").await, Err(Error::NotConnected)));
        assert!(link.published.lock().unwrap().is_empty());

        assert!(!pool.set_connected(true));
        pool.on_connected().await.unwrap();

        let mut subscribed = link.subscribed.lock().unwrap().clone();
        subscribed.sort();
        assert_eq!(subscribed, vec!["device/00M1/report", "device/01P2/report"]);

        let mut published = link.published.lock().unwrap().clone();
        published.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            published,
            vec![
                ("device/00M1/request".to_string(), pushall()),
                ("device/01P2/request".to_string(), pushall()),
            ]
        );
    }

    #[tokio::test]
    async fn test_disconnect() {
        let pool = ConnectionPool::new();
        let _rx = pool.register("00M1").await;
        pool.attach(Arc::new(RecordingLink::default())).await.unwrap();
        assert!(pool.is_connected());

        pool.disconnect().await.unwrap();
        assert!(!pool.is_connected());
        assert!(matches!(pool.rebase("00M1").await, Err(Error::NotConnected)));
    }
}
