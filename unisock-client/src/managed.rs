//! Connection lifecycle with automatic reconnection.
//!
//! [`ManagedClient`] wraps any [`SocketClient`] and adds the reconnect state
//! machine on top of the transport's own events:
//!
//! - a `Connected` event cancels any pending retry and resets the backoff;
//! - a `Disconnected` event caused by [`disconnect`](SocketClient::disconnect)
//!   or [`shutdown`](ManagedClient::shutdown) is final;
//! - any other `Disconnected` event schedules one retry after the policy
//!   delay, if the policy is enabled;
//! - `Error` events are logged and never force a disconnect.
//!
//! Retry timers only hold a weak reference to the client, so a dropped
//! client is never brought back by a timer that fires late. Every retry is
//! tagged with the lifecycle epoch it was scheduled in; `disconnect`,
//! `shutdown` and explicit connects start a new epoch and wait for a retry
//! that is already dialing, so no stale retry outlives them.

use crate::client::{SocketClient, DISCONNECT_TIMEOUT};
use crate::config::{BufferConfig, Config, ReconnectConfig, TransportKind};
use crate::errors::ClientError;
use crate::events::{EventHub, SocketEvent, SubscriptionId};
use crate::runtime;
use crate::session::{ConnectionState, Endpoint, SessionId};
use crate::tls::TlsContext;
use crate::variants::build_client;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// When and how often to reconnect after an unexpected disconnect.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Reconnect at all.
    pub enabled: bool,
    /// Delay before the first retry.
    pub delay: Duration,
    /// Upper bound for the retry delay.
    pub max_delay: Duration,
    /// Delay multiplier per consecutive failure (1.0 = constant delay).
    pub backoff_factor: f64,
    /// Consecutive retries before giving up (0 = never give up).
    pub max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        let delay = Duration::from_secs_f64(config.delay_seconds.max(0.0));
        Self {
            enabled: config.enabled,
            delay,
            max_delay: Duration::from_secs_f64(config.max_delay_seconds.max(0.0)).max(delay),
            backoff_factor: config.backoff_factor.max(1.0),
            max_retries: config.max_retries,
        }
    }
}

impl ReconnectPolicy {
    /// Never reconnect.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Reconnect after a constant `delay`, forever.
    pub fn constant(delay: Duration) -> Self {
        Self {
            enabled: true,
            delay,
            max_delay: delay,
            backoff_factor: 1.0,
            max_retries: 0,
        }
    }

    /// Delay before retry number `attempt` (counting from zero).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let max = self.max_delay.as_secs_f64();

        if scaled.is_finite() && scaled < max {
            Duration::from_secs_f64(scaled)
        } else {
            self.max_delay
        }
    }

    /// True if retry number `attempt` is still allowed.
    pub fn allows(&self, attempt: u32) -> bool {
        self.enabled && (self.max_retries == 0 || attempt < self.max_retries)
    }
}

#[derive(Debug, Default)]
struct Lifecycle {
    state: ConnectionState,
    disconnecting: bool,
    terminated: bool,
    attempts: u32,
    retry: Option<JoinHandle<()>>,
    /// Bumped whenever pending retries become stale.
    epoch: u64,
    /// A retry is between its checks and the end of `connect_async`.
    retrying: bool,
}

impl Lifecycle {
    fn cancel_retry(&mut self) {
        if let Some(retry) = self.retry.take() {
            retry.abort();
        }
    }
}

struct Inner {
    client: Box<dyn SocketClient>,
    policy: ReconnectPolicy,
    runtime: Handle,
    lifecycle: Mutex<Lifecycle>,
    retry_done: Condvar,
}

impl Inner {
    /// Invalidate scheduled retries and wait for one that is already dialing.
    fn stop_retries(&self, lifecycle: &mut MutexGuard<'_, Lifecycle>) {
        lifecycle.epoch = lifecycle.epoch.wrapping_add(1);
        lifecycle.cancel_retry();

        let deadline = Instant::now() + DISCONNECT_TIMEOUT;
        while lifecycle.retrying {
            if self.retry_done.wait_until(lifecycle, deadline).timed_out() {
                tracing::warn!(
                    "Retry for {} still running after {:?}",
                    self.client.endpoint(),
                    DISCONNECT_TIMEOUT
                );
                break;
            }
        }
    }

    fn handle_event(self: &Arc<Self>, event: &SocketEvent) {
        match event {
            SocketEvent::Connected => {
                let mut lifecycle = self.lifecycle.lock();
                lifecycle.state = ConnectionState::Connected;
                lifecycle.attempts = 0;
                lifecycle.cancel_retry();
            }
            SocketEvent::Disconnected => self.on_disconnected(),
            SocketEvent::Error(code) => {
                tracing::warn!("Socket error on {}: {}", self.client.endpoint(), code);
            }
        }
    }

    fn on_disconnected(self: &Arc<Self>) {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.state = ConnectionState::Disconnected;

        if lifecycle.terminated || lifecycle.disconnecting || !self.policy.enabled {
            return;
        }
        if lifecycle.retry.is_some() {
            return;
        }
        if !self.policy.allows(lifecycle.attempts) {
            tracing::warn!(
                "Giving up on {} after {} reconnection attempts",
                self.client.endpoint(),
                lifecycle.attempts
            );
            return;
        }

        let delay = self.policy.delay_for(lifecycle.attempts);
        tracing::info!(
            "Reconnecting to {} in {:?} (attempt {})",
            self.client.endpoint(),
            delay,
            lifecycle.attempts + 1
        );

        let weak = Arc::downgrade(self);
        let epoch = lifecycle.epoch;
        lifecycle.retry = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                // The attempt may block (UDP connects synchronously)
                let _ = tokio::task::spawn_blocking(move || inner.retry(epoch)).await;
            }
        }));
    }

    fn retry(&self, epoch: u64) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.epoch != epoch {
                tracing::debug!("Dropping stale retry for {}", self.client.endpoint());
                return;
            }
            lifecycle.retry = None;
            if lifecycle.terminated || lifecycle.disconnecting {
                return;
            }
            if self.client.is_connected() || self.client.is_connecting() {
                tracing::debug!("Skipping retry, {} is already up", self.client.endpoint());
                return;
            }
            lifecycle.attempts += 1;
            lifecycle.state = ConnectionState::Connecting;
            lifecycle.retrying = true;
        }

        let result = self.client.connect_async();

        self.lifecycle.lock().retrying = false;
        self.retry_done.notify_all();

        if let Err(e) = result {
            tracing::warn!("Reconnection to {} failed: {}", self.client.endpoint(), e);
        }
    }
}

/// A socket client with lifecycle management and automatic reconnection.
///
/// # Examples
///
/// ```no_run
/// use unisock_client::{Config, ManagedClient, SocketClient, TransportKind};
///
/// # fn example() -> Result<(), unisock_client::ClientError> {
/// let config = Config::builder()
///     .address("127.0.0.1")
///     .port(3333)
///     .transport(TransportKind::Tcp)
///     .reconnect(true)
///     .build()?;
///
/// let client = ManagedClient::from_config(&config, None)?;
/// client.connect_async()?;
///
/// let mut scratch = vec![0u8; client.options().receive_buffer_size];
/// while let Some(len) = client.get_next_package(&mut scratch) {
///     println!("{:?}", &scratch[..len]);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ManagedClient {
    inner: Arc<Inner>,
    subscription: SubscriptionId,
}

impl std::fmt::Debug for ManagedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedClient")
            .field("endpoint", self.inner.client.endpoint())
            .field("kind", &self.inner.client.kind())
            .field("policy", &self.inner.policy)
            .field("lifecycle", &*self.inner.lifecycle.lock())
            .finish()
    }
}

impl ManagedClient {
    /// Wrap `client`, running retry timers on the default I/O runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the I/O runtime cannot start.
    pub fn new(client: Box<dyn SocketClient>, policy: ReconnectPolicy) -> Result<Self, ClientError> {
        Ok(Self::with_runtime(client, policy, runtime::io_handle()?))
    }

    /// Wrap `client`, running retry timers on `runtime`.
    pub fn with_runtime(
        client: Box<dyn SocketClient>,
        policy: ReconnectPolicy,
        runtime: Handle,
    ) -> Self {
        let inner = Arc::new(Inner {
            client,
            policy,
            runtime,
            lifecycle: Mutex::new(Lifecycle::default()),
            retry_done: Condvar::new(),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let subscription = inner.client.events().subscribe(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_event(event);
            }
        });

        Self {
            inner,
            subscription,
        }
    }

    /// Build the client selected by `config` and wrap it with the configured
    /// reconnect policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the TLS setup fails.
    pub fn from_config(config: &Config, tls: Option<&TlsContext>) -> Result<Self, ClientError> {
        let client = build_client(config, tls)?;
        Self::new(client, ReconnectPolicy::from(&config.reconnect))
    }

    /// Lifecycle state as seen by the state machine.
    pub fn state(&self) -> ConnectionState {
        self.inner.lifecycle.lock().state
    }

    /// The reconnect policy in use.
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.inner.policy
    }

    /// True if a retry timer is armed.
    pub fn retry_pending(&self) -> bool {
        self.inner.lifecycle.lock().retry.is_some()
    }

    /// True once [`shutdown`](Self::shutdown) ran.
    pub fn is_terminated(&self) -> bool {
        self.inner.lifecycle.lock().terminated
    }

    /// Disconnect for good: cancel pending retries, close the connection and
    /// stop listening to the transport. Later commands fail with
    /// [`ClientError::ConnectionClosed`].
    pub fn shutdown(&self) {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.terminated {
                return;
            }
            lifecycle.terminated = true;
            self.inner.stop_retries(&mut lifecycle);
        }

        tracing::debug!("Shutting down client for {}", self.inner.client.endpoint());
        self.inner.client.disconnect();
        self.inner.client.events().unsubscribe(self.subscription);
        self.inner.lifecycle.lock().state = ConnectionState::Disconnected;
    }

    /// Tear down a live or pending connection before a new attempt.
    fn prepare_attempt(&self) -> Result<(), ClientError> {
        if self.is_terminated() {
            return Err(ClientError::ConnectionClosed);
        }
        // Also settles a retry that is dialing right now
        self.disconnect();

        let mut lifecycle = self.inner.lifecycle.lock();
        lifecycle.attempts = 0;
        lifecycle.state = ConnectionState::Connecting;
        Ok(())
    }
}

impl SocketClient for ManagedClient {
    fn kind(&self) -> TransportKind {
        self.inner.client.kind()
    }

    fn id(&self) -> Option<SessionId> {
        self.inner.client.id()
    }

    fn endpoint(&self) -> &Endpoint {
        self.inner.client.endpoint()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.client.peer_addr()
    }

    fn options(&self) -> &BufferConfig {
        self.inner.client.options()
    }

    fn events(&self) -> &EventHub {
        self.inner.client.events()
    }

    fn is_connected(&self) -> bool {
        self.inner.client.is_connected()
    }

    fn is_connecting(&self) -> bool {
        self.inner.client.is_connecting()
    }

    fn connect(&self) -> Result<(), ClientError> {
        self.prepare_attempt()?;
        self.inner.client.connect()
    }

    fn connect_async(&self) -> Result<(), ClientError> {
        self.prepare_attempt()?;
        self.inner.client.connect_async()
    }

    fn disconnect(&self) -> bool {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            lifecycle.disconnecting = true;
            self.inner.stop_retries(&mut lifecycle);
        }

        // The lock is released while waiting: the teardown event needs it
        let was_connected = self.inner.client.disconnect();

        let mut lifecycle = self.inner.lifecycle.lock();
        lifecycle.disconnecting = false;
        lifecycle.state = ConnectionState::Disconnected;
        was_connected
    }

    fn reconnect(&self) -> Result<(), ClientError> {
        self.disconnect();
        self.connect()
    }

    fn reconnect_async(&self) -> Result<(), ClientError> {
        self.disconnect();
        self.connect_async()
    }

    fn send(&self, bytes: &[u8]) -> Result<usize, ClientError> {
        self.inner.client.send(bytes)
    }

    fn send_async(&self, bytes: &[u8]) -> Result<(), ClientError> {
        self.inner.client.send_async(bytes)
    }

    fn has_enqueued_packages(&self) -> bool {
        self.inner.client.has_enqueued_packages()
    }

    fn get_next_package(&self, buffer: &mut [u8]) -> Option<usize> {
        self.inner.client.get_next_package(buffer)
    }
}

impl Drop for ManagedClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}
