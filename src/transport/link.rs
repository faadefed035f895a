//! Network link abstraction
//!
//! The [`Transport`](super::Transport) owns all connection policy (state,
//! replay, backoff, routing). A [`Link`] is only the wire: it queues requests
//! and reports what happened on the connection when polled.

use std::time::Duration;

use super::TransportError;

/// Delivery guarantee of a subscription or publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QualityOfService {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QualityOfService {
    pub fn level(self) -> u8 {
        match self {
            QualityOfService::AtMostOnce => 0,
            QualityOfService::AtLeastOnce => 1,
            QualityOfService::ExactlyOnce => 2,
        }
    }

    /// Unknown levels clamp to exactly-once
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => QualityOfService::AtMostOnce,
            1 => QualityOfService::AtLeastOnce,
            _ => QualityOfService::ExactlyOnce,
        }
    }
}

/// A message received from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// What a poll of the link observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The broker accepted the connection
    Connected,
    /// The connection dropped; polling again attempts to reconnect
    Disconnected(String),
    Message(Message),
    /// The link is gone for good
    Closed,
}

/// Wire side of a publish/subscribe connection
pub trait Link: Send + Sync + 'static {
    /// Subscribe a batch of filters in one request
    fn subscribe(&self, filters: &[(String, QualityOfService)]) -> Result<(), TransportError>;

    fn publish(&self, topic: &str, payload: &[u8], qos: QualityOfService) -> Result<(), TransportError>;

    fn disconnect(&self) -> Result<(), TransportError>;

    /// Drive the connection for at most `timeout`
    ///
    /// Returns `None` if nothing of interest happened.
    fn poll(&self, timeout: Duration) -> Option<LinkEvent>;
}
