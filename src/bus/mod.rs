pub mod schema;

use crate::config::BusConfig;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::Value;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::Notify;
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::{debug, info, warn};

/// Long-lived MQTT publisher handle. Cloning is cheap; every clone shares
/// the same underlying connection and subscription registry.
#[derive(Clone)]
pub struct BusApi {
    client: AsyncClient,
    subscribed: Arc<Mutex<HashSet<String>>>,
    topic_prefix: String,
    shutdown: Arc<Notify>,
}

impl BusApi {
    fn full_topic(&self, topic: &str) -> String {
        if schema::UNPREFIXED_TOPICS.contains(&topic) || self.topic_prefix.is_empty() {
            topic.to_owned()
        } else {
            format!("{}/{}", self.topic_prefix, topic)
        }
    }

    /// Serializes `payload` as JSON and publishes to `topic` (prefixed
    /// unless `topic` is one of the unprefixed event topics). Returns
    /// `false` instead of raising on any failure — schema violation,
    /// disconnect, or transport error — per the bus's never-throw contract.
    pub async fn publish(&self, topic: &str, payload: Value) -> bool {
        if let Err(e) = schema::validate(topic, &payload) {
            warn!(topic, error = %e, "payload failed schema validation");
            return false;
        }
        let bytes = match serde_json::to_vec(&payload) {
            Ok(b) => b,
            Err(e) => {
                warn!(topic, error = %e, "failed to serialize payload");
                return false;
            }
        };
        match self
            .client
            .publish(self.full_topic(topic), QoS::AtLeastOnce, false, bytes)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(topic, error = %e, "publish failed, reconnect will be attempted");
                false
            }
        }
    }

    /// Registers `topic` for the current session and every future
    /// reconnect.
    pub async fn subscribe(&self, topic: &str) {
        let already = {
            let mut subs = self.subscribed.lock().expect("subscribed lock poisoned");
            !subs.insert(topic.to_owned())
        };
        if already {
            return;
        }
        if let Err(e) = self.client.subscribe(topic, QoS::AtLeastOnce).await {
            warn!(topic, error = %e, "subscribe failed, will retry on reconnect");
        }
    }

    pub async fn disconnect(&self) {
        self.shutdown.notify_one();
        self.client.disconnect().await.ok();
    }
}

/// Spawns the reconnect-loop subsystem and returns an always-ready
/// `BusApi`. Connection happens in the background; `publish` simply fails
/// (returning `false`) until the first successful connect.
pub fn start(subsys: &SubsystemHandle, config: BusConfig) -> BusApi {
    let mut opts = MqttOptions::parse_url(config.url.clone())
        .unwrap_or_else(|_| MqttOptions::new("callbridge", config.url.clone(), 1883));
    if let (Some(user), Some(pass)) = (&config.username, &config.password) {
        opts.set_credentials(user.clone(), pass.expose());
    }
    opts.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(opts, 1024);
    let subscribed = Arc::new(Mutex::new(HashSet::new()));
    let shutdown = Arc::new(Notify::new());

    let api = BusApi {
        client,
        subscribed: subscribed.clone(),
        topic_prefix: config.topic_prefix,
        shutdown: shutdown.clone(),
    };
    let resub_client = api.client.clone();
    let reconnect_delay = config.reconnect_delay;

    subsys.start(tokio_graceful_shutdown::SubsystemBuilder::new(
        "message-bus",
        async move |s: &mut SubsystemHandle| {
            loop {
                tokio::select! {
                    event = eventloop.poll() => {
                        match event {
                            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                                info!("message bus connected");
                                let topics: Vec<String> =
                                    subscribed.lock().expect("subscribed lock poisoned").iter().cloned().collect();
                                for topic in topics {
                                    resub_client.subscribe(&topic, QoS::AtLeastOnce).await.ok();
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                debug!(error = %e, "message bus connection error, retrying");
                                tokio::time::sleep(reconnect_delay).await;
                            }
                        }
                    }
                    _ = shutdown.notified() => break,
                    _ = s.on_shutdown_requested() => break,
                }
            }
            Ok::<(), std::convert::Infallible>(())
        },
    ));

    api
}
