//! MQTT link over rumqttc
//!
//! Wraps the synchronous rumqttc client. Requests (subscribe, publish,
//! disconnect) are queued without blocking; they reach the broker while the
//! transport polls the connection. Polling after a connection error makes
//! rumqttc dial again.

use rumqttc::{
    Client, ConnectionError, Event, MqttOptions, Packet, QoS, RecvTimeoutError, SubscribeFilter,
};
use std::sync::Mutex;
use std::time::Duration;

use super::link::{Link, LinkEvent, Message, QualityOfService};
use super::TransportError;

/// Broker connection settings
#[derive(Debug, Clone)]
pub struct MqttLinkConfig {
    /// Broker URI, `mqtt://host:port`
    pub uri: String,
    /// Must be unique per broker; duplicates kick each other off
    pub client_id: String,
    pub keep_alive: Duration,
    /// Capacity of the outgoing request queue
    pub request_capacity: usize,
}

impl Default for MqttLinkConfig {
    fn default() -> Self {
        Self {
            uri: "mqtt://localhost:1883".to_string(),
            client_id: format!("drift_client_{}", uuid::Uuid::new_v4()),
            keep_alive: Duration::from_secs(60),
            request_capacity: 100,
        }
    }
}

/// Link to an MQTT 3.1.1 broker
pub struct MqttLink {
    client: Client,
    connection: Mutex<rumqttc::Connection>,
}

impl MqttLink {
    pub fn new(config: &MqttLinkConfig) -> Result<Self, TransportError> {
        let (host, port) = parse_uri(&config.uri)?;

        let mut options = MqttOptions::new(&config.client_id, host, port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(true);

        let (client, connection) = Client::new(options, config.request_capacity.max(1));
        tracing::debug!(uri = %config.uri, client_id = %config.client_id, "MQTT link created");

        Ok(Self {
            client,
            connection: Mutex::new(connection),
        })
    }
}

/// Split `mqtt://host:port` (or `tcp://`) into host and port, default 1883
fn parse_uri(uri: &str) -> Result<(String, u16), TransportError> {
    let url = reqwest::Url::parse(uri)
        .map_err(|e| TransportError::ConnectFailed(format!("invalid broker uri {uri}: {e}")))?;

    match url.scheme() {
        "mqtt" | "tcp" => {}
        other => {
            return Err(TransportError::ConnectFailed(format!(
                "unsupported broker scheme {other}"
            )))
        }
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| TransportError::ConnectFailed(format!("missing host in {uri}")))?;

    Ok((host.to_string(), url.port().unwrap_or(1883)))
}

fn qos(level: QualityOfService) -> QoS {
    match level {
        QualityOfService::AtMostOnce => QoS::AtMostOnce,
        QualityOfService::AtLeastOnce => QoS::AtLeastOnce,
        QualityOfService::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn network(e: impl std::fmt::Display) -> TransportError {
    TransportError::Network(e.to_string())
}

impl Link for MqttLink {
    fn subscribe(&self, filters: &[(String, QualityOfService)]) -> Result<(), TransportError> {
        let filters: Vec<SubscribeFilter> = filters
            .iter()
            .map(|(path, level)| SubscribeFilter::new(path.clone(), qos(*level)))
            .collect();
        self.client.try_subscribe_many(filters).map_err(network)
    }

    fn publish(&self, topic: &str, payload: &[u8], level: QualityOfService) -> Result<(), TransportError> {
        self.client
            .try_publish(topic, qos(level), false, payload.to_vec())
            .map_err(network)
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.client.try_disconnect().map_err(network)
    }

    fn poll(&self, timeout: Duration) -> Option<LinkEvent> {
        let mut connection = self.connection.lock().unwrap_or_else(|e| e.into_inner());

        match connection.recv_timeout(timeout) {
            Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                tracing::debug!(code = ?ack.code, "MQTT connack");
                Some(LinkEvent::Connected)
            }
            Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => Some(LinkEvent::Message(Message::new(
                publish.topic,
                publish.payload.to_vec(),
            ))),
            Ok(Ok(Event::Incoming(Packet::SubAck(ack)))) => {
                tracing::debug!(pkid = ack.pkid, "Subscribed");
                None
            }
            Ok(Ok(_)) => None,
            Ok(Err(ConnectionError::RequestsDone)) => Some(LinkEvent::Closed),
            Ok(Err(e)) => Some(LinkEvent::Disconnected(e.to_string())),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(LinkEvent::Closed),
        }
    }
}
