//! Live Transport
//!
//! A publish/subscribe transport that survives network flaps:
//!
//! - subscriptions are kept in a registry owned by the [`Transport`] and
//!   re-issued as one batch on every transition into
//!   [`ConnectionState::Connected`]
//! - reconnects back off exponentially between `reconnect_min_delay` and
//!   `reconnect_max_delay`
//! - handler errors and panics are logged and never stop delivery
//!
//! The transport is driven either by [`Transport::loop_forever`] on the caller
//! thread or by a background thread started on the first publish. Only one of
//! the two may run at a time.

mod link;
mod mqtt;
mod registry;

pub use link::{Link, LinkEvent, Message, QualityOfService};
pub use mqtt::{MqttLink, MqttLinkConfig};
pub use registry::{topic_matches, Handler, Subscription};

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Connection state owned by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Reconnect and polling policy
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub reconnect_min_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// How long `connect()` waits for the broker
    pub connect_timeout: Duration,
    /// Upper bound of a single link poll
    pub poll_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect_min_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Transport closed")]
    Closed,

    #[error("A receive loop is already running")]
    LoopModeConflict,

    #[error("Not connected")]
    NotConnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopMode {
    Idle,
    Blocking,
    Background,
}

/// Exponential reconnect delay
#[derive(Debug)]
struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            current: min,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.min;
    }
}

struct Inner<L: Link> {
    link: L,
    config: TransportConfig,
    registry: Mutex<Vec<Subscription>>,
    state: Mutex<ConnectionState>,
    state_changed: Condvar,
    mode: Mutex<LoopMode>,
    stopped: AtomicBool,
}

/// Reconnection-durable publish/subscribe transport
pub struct Transport<L: Link> {
    inner: Arc<Inner<L>>,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl<L: Link> Transport<L> {
    pub fn new(link: L, config: TransportConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                link,
                config,
                registry: Mutex::new(Vec::new()),
                state: Mutex::new(ConnectionState::Disconnected),
                state_changed: Condvar::new(),
                mode: Mutex::new(LoopMode::Idle),
                stopped: AtomicBool::new(false),
            }),
            background: Mutex::new(None),
        }
    }

    pub fn link(&self) -> &L {
        &self.inner.link
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.inner.state)
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.inner.registry).len()
    }

    /// Block until connected
    ///
    /// Idempotent once connected. Without a running receive loop the link is
    /// driven here; otherwise this waits for the loop to connect.
    pub fn connect(&self) -> Result<(), TransportError> {
        let inner = &self.inner;
        if inner.is_stopped() {
            return Err(TransportError::Closed);
        }
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }

        match ModeGuard::claim(inner, LoopMode::Blocking) {
            Ok(_guard) => inner.drive_until_connected(),
            Err(_) => inner.wait_connected(inner.config.connect_timeout),
        }
    }

    /// Register a handler for every topic under `prefix`
    ///
    /// The entry is kept regardless of the connection state. When connected
    /// the new filter is subscribed on its own; otherwise it goes out with the
    /// next replay.
    pub fn subscribe<F>(&self, prefix: impl Into<String>, qos: QualityOfService, handler: F)
    where
        F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let subscription = Subscription::new(prefix, qos, Arc::new(handler));
        let filter = subscription.filter();

        let connected = {
            let mut registry = lock(&self.inner.registry);
            registry.push(subscription);
            *lock(&self.inner.state) == ConnectionState::Connected
        };

        tracing::debug!(filter = %filter.0, qos = filter.1.level(), connected, "Subscription registered");

        if connected {
            if let Err(e) = self.inner.link.subscribe(std::slice::from_ref(&filter)) {
                tracing::warn!(filter = %filter.0, error = %e, "Subscribe failed, will retry on reconnect");
            }
        }
    }

    /// Publish with at-most-once delivery
    pub fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.publish_with_qos(topic, payload, QualityOfService::AtMostOnce)
    }

    /// Publish, connecting and starting the background loop first if needed
    pub fn publish_with_qos(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QualityOfService,
    ) -> Result<(), TransportError> {
        if self.inner.is_stopped() {
            return Err(TransportError::NotConnected);
        }

        // Queued requests only reach the wire while something polls the link
        self.start_background()?;
        if self.state() != ConnectionState::Connected {
            self.inner.wait_connected(self.inner.config.connect_timeout)?;
        }

        self.inner.link.publish(topic, payload, qos)?;
        tracing::trace!(topic = %topic, bytes = payload.len(), "Published");
        Ok(())
    }

    /// Run the receive loop on the calling thread
    ///
    /// Returns `Ok` after [`stop`](Self::stop) and [`TransportError::Closed`]
    /// when the link goes away.
    pub fn loop_forever(&self) -> Result<(), TransportError> {
        let _guard = ModeGuard::claim(&self.inner, LoopMode::Blocking)?;
        self.inner.run()
    }

    /// Start the background receive loop if no loop is running
    fn start_background(&self) -> Result<(), TransportError> {
        let mut background = lock(&self.background);
        if self.inner.claim_mode(LoopMode::Background).is_err() {
            return Ok(());
        }
        if let Some(finished) = background.take() {
            let _ = finished.join();
        }

        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("drift-transport".to_string())
            .spawn(move || {
                if let Err(e) = inner.run() {
                    tracing::warn!(error = %e, "Background loop ended");
                }
                inner.release_mode();
            })
            .map_err(|e| {
                self.inner.release_mode();
                TransportError::Network(format!("failed to spawn background loop: {e}"))
            })?;

        *background = Some(handle);
        tracing::debug!("Background loop started");
        Ok(())
    }

    /// Stop every loop and disconnect
    ///
    /// Terminal: a stopped transport does not reconnect.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self.inner.link.disconnect() {
            tracing::debug!(error = %e, "Disconnect request failed");
        }
        self.inner.set_state(ConnectionState::Disconnected);

        let handle = lock(&self.background).take();
        if let Some(handle) = handle {
            // A handler on the background thread may call stop itself
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!("Background loop panicked");
            }
        }
        tracing::info!("Transport stopped");
    }
}

impl<L: Link> Drop for Transport<L> {
    fn drop(&mut self) {
        let running = lock(&self.background).is_some();
        if running {
            self.stop();
        }
    }
}

impl<L: Link> Inner<L> {
    fn claim_mode(&self, mode: LoopMode) -> Result<(), TransportError> {
        let mut current = lock(&self.mode);
        if *current != LoopMode::Idle {
            return Err(TransportError::LoopModeConflict);
        }
        *current = mode;
        Ok(())
    }

    fn release_mode(&self) {
        *lock(&self.mode) = LoopMode::Idle;
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
        self.state_changed.notify_all();
    }

    fn wait_connected(&self, timeout: Duration) -> Result<(), TransportError> {
        let state = lock(&self.state);
        let (state, result) = self
            .state_changed
            .wait_timeout_while(state, timeout, |s| {
                *s != ConnectionState::Connected && !self.is_stopped()
            })
            .unwrap_or_else(|e| e.into_inner());

        if *state == ConnectionState::Connected {
            Ok(())
        } else if self.is_stopped() {
            Err(TransportError::Closed)
        } else if result.timed_out() {
            Err(TransportError::ConnectFailed(format!("not connected after {timeout:?}")))
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn drive_until_connected(&self) -> Result<(), TransportError> {
        let deadline = Instant::now() + self.config.connect_timeout;
        let mut backoff = Backoff::new(self.config.reconnect_min_delay, self.config.reconnect_max_delay);
        self.begin_connecting();

        while Instant::now() < deadline {
            if self.is_stopped() {
                return Err(TransportError::Closed);
            }
            self.step(&mut backoff, Some(deadline))?;
            if *lock(&self.state) == ConnectionState::Connected {
                return Ok(());
            }
        }

        Err(TransportError::ConnectFailed(format!(
            "not connected after {:?}",
            self.config.connect_timeout
        )))
    }

    fn run(&self) -> Result<(), TransportError> {
        let mut backoff = Backoff::new(self.config.reconnect_min_delay, self.config.reconnect_max_delay);
        self.begin_connecting();

        while !self.is_stopped() {
            self.step(&mut backoff, None)?;
        }
        Ok(())
    }

    fn begin_connecting(&self) {
        let mut state = lock(&self.state);
        if *state == ConnectionState::Disconnected {
            *state = ConnectionState::Connecting;
            self.state_changed.notify_all();
        }
    }

    /// Poll the link once and react to what it reports
    fn step(&self, backoff: &mut Backoff, deadline: Option<Instant>) -> Result<(), TransportError> {
        match self.link.poll(self.config.poll_interval) {
            None => {}
            Some(LinkEvent::Connected) => {
                backoff.reset();
                self.on_connected();
            }
            Some(LinkEvent::Disconnected(reason)) => {
                let was_connected = *lock(&self.state) == ConnectionState::Connected;
                self.set_state(ConnectionState::Disconnected);

                let delay = backoff.next_delay();
                if was_connected {
                    tracing::warn!(reason = %reason, retry_in = ?delay, "Connection lost");
                } else {
                    tracing::debug!(reason = %reason, retry_in = ?delay, "Connect attempt failed");
                }

                self.pause(delay, deadline);
                if !self.is_stopped() {
                    self.set_state(ConnectionState::Connecting);
                }
            }
            Some(LinkEvent::Message(message)) => self.dispatch(&message),
            Some(LinkEvent::Closed) => {
                self.set_state(ConnectionState::Disconnected);
                if self.is_stopped() {
                    return Ok(());
                }
                tracing::info!("Link closed");
                return Err(TransportError::Closed);
            }
        }
        Ok(())
    }

    /// Enter `Connected` and replay every registered subscription in one batch
    fn on_connected(&self) {
        // Registry before state: a concurrent subscribe either lands in this
        // snapshot or sees `Connected`, never both.
        let filters: Vec<_> = {
            let registry = lock(&self.registry);
            *lock(&self.state) = ConnectionState::Connected;
            registry.iter().map(Subscription::filter).collect()
        };
        self.state_changed.notify_all();

        tracing::info!(subscriptions = filters.len(), "Connected");
        if filters.is_empty() {
            return;
        }
        if let Err(e) = self.link.subscribe(&filters) {
            tracing::warn!(error = %e, "Subscription replay failed");
        }
    }

    /// Invoke every matching handler outside the registry lock
    fn dispatch(&self, message: &Message) {
        let handlers: Vec<(String, Handler)> = lock(&self.registry)
            .iter()
            .filter(|s| s.matches(&message.topic))
            .map(|s| (s.prefix.clone(), Arc::clone(&s.handler)))
            .collect();

        if handlers.is_empty() {
            tracing::trace!(topic = %message.topic, "No handler for message");
        }

        for (prefix, handler) in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(message))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(topic = %message.topic, prefix = %prefix, error = %e, "Message handler failed");
                }
                Err(payload) => {
                    tracing::error!(
                        topic = %message.topic,
                        prefix = %prefix,
                        panic = panic_message(&payload),
                        "Message handler panicked"
                    );
                }
            }
        }
    }

    /// Sleep in short slices so `stop()` is honored promptly
    fn pause(&self, delay: Duration, deadline: Option<Instant>) {
        let mut until = Instant::now() + delay;
        if let Some(deadline) = deadline {
            until = until.min(deadline);
        }

        while !self.is_stopped() {
            let now = Instant::now();
            if now >= until {
                break;
            }
            thread::sleep((until - now).min(self.config.poll_interval));
        }
    }
}

/// Exclusive claim on the receive loop, released on drop
struct ModeGuard<'a, L: Link> {
    inner: &'a Inner<L>,
}

impl<'a, L: Link> ModeGuard<'a, L> {
    fn claim(inner: &'a Inner<L>, mode: LoopMode) -> Result<Self, TransportError> {
        inner.claim_mode(mode)?;
        Ok(Self { inner })
    }
}

impl<L: Link> Drop for ModeGuard<'_, L> {
    fn drop(&mut self) {
        self.inner.release_mode();
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
