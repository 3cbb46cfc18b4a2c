//! The socket client contract and the machinery shared by every variant.
//!
//! # Threading
//!
//! Two threads of control touch a client: the I/O runtime, which runs one
//! session task per connection attempt, and the consumer, which issues
//! commands and drains packets. The session task is the only writer of the
//! packet queue and the consumer is its only reader.
//!
//! Blocking commands (`connect`, `disconnect`, `reconnect`, `send`) wait on
//! the I/O runtime. Never call them from an event handler or from inside a
//! current-thread tokio runtime.

use crate::config::{BufferConfig, Config, TransportKind};
use crate::errors::ClientError;
use crate::event_loop::{self, Command, SessionTask};
use crate::events::EventHub;
use crate::session::{ConnectionState, Endpoint, SessionId};
use crate::transport::DialPlan;
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use unisock_buffer::PacketBuffer;

/// Upper bound on how long `disconnect` waits for teardown.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Slack added to the connect timeout while waiting for the session task.
const CONNECT_GRACE: Duration = Duration::from_millis(500);

/// Capability contract shared by the TCP, UDP and TLS clients.
///
/// The drain interface (`has_enqueued_packages`, `get_next_package`) is meant
/// to be polled from a single consumer thread at its own cadence. Neither
/// call blocks on I/O and the drain path does not allocate.
pub trait SocketClient: Send + Sync {
    /// Transport kind of this client.
    fn kind(&self) -> TransportKind;

    /// Identifier of the current (or last) connection attempt.
    fn id(&self) -> Option<SessionId>;

    /// Configured remote endpoint.
    fn endpoint(&self) -> &Endpoint;

    /// Resolved address of the connected peer.
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Socket buffer sizes. Drain buffers must hold at least
    /// `receive_buffer_size` bytes.
    fn options(&self) -> &BufferConfig;

    /// Event notifications for this client.
    fn events(&self) -> &EventHub;

    /// True once the transport is connected.
    fn is_connected(&self) -> bool;

    /// True while a connection attempt is in flight.
    fn is_connecting(&self) -> bool;

    /// Connect and wait until the attempt resolves.
    fn connect(&self) -> Result<(), ClientError>;

    /// Start connecting and return immediately. The outcome is reported
    /// through [`events`](Self::events).
    ///
    /// A session that has just ended is allowed to finish dispatching its
    /// events first, so this may wait briefly. Do not call it from a handler.
    fn connect_async(&self) -> Result<(), ClientError>;

    /// Close the connection and wait (bounded) until teardown completes.
    ///
    /// Returns false if the client was already disconnected.
    fn disconnect(&self) -> bool;

    /// Disconnect, then connect and wait.
    fn reconnect(&self) -> Result<(), ClientError>;

    /// Disconnect, then start connecting.
    fn reconnect_async(&self) -> Result<(), ClientError>;

    /// Send and wait until the bytes are written. Returns the byte count.
    fn send(&self, bytes: &[u8]) -> Result<usize, ClientError>;

    /// Queue bytes for sending. Order is kept for calls from one thread.
    fn send_async(&self, bytes: &[u8]) -> Result<(), ClientError>;

    /// True if at least one received packet is waiting.
    fn has_enqueued_packages(&self) -> bool;

    /// Copy the oldest waiting packet into `buffer` and return its length.
    ///
    /// Returns `None` when nothing is waiting, leaving `buffer` untouched.
    ///
    /// # Panics
    ///
    /// Panics if `buffer` is shorter than the packet.
    fn get_next_package(&self, buffer: &mut [u8]) -> Option<usize>;
}

/// Received packets, shared between the session task and the consumer.
#[derive(Debug)]
pub(crate) struct PacketQueue {
    buffer: Mutex<PacketBuffer>,
    pending: AtomicUsize,
}

impl PacketQueue {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(PacketBuffer::with_capacity(capacity)),
            pending: AtomicUsize::new(0),
        }
    }

    pub(crate) fn push(&self, bytes: &[u8]) {
        let mut buffer = self.buffer.lock();
        buffer.append(bytes);
        self.pending.store(buffer.len(), Ordering::Release);
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire) > 0
    }

    pub(crate) fn pop_into(&self, dest: &mut [u8]) -> Option<usize> {
        if !self.has_pending() {
            return None;
        }
        let mut buffer = self.buffer.lock();
        let popped = buffer.pop_into(dest);
        self.pending.store(buffer.len(), Ordering::Release);
        popped
    }
}

#[derive(Debug, Default)]
struct Status {
    state: ConnectionState,
    session: Option<SessionId>,
    peer: Option<SocketAddr>,
    live_tasks: usize,
}

/// State shared between a client handle and its session tasks.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) packets: PacketQueue,
    pub(crate) events: EventHub,
    status: Mutex<Status>,
    changed: Condvar,
}

impl Shared {
    fn new(receive_buffer_size: usize) -> Self {
        Self {
            packets: PacketQueue::with_capacity(receive_buffer_size),
            events: EventHub::new(),
            status: Mutex::new(Status::default()),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.status.lock().state
    }

    fn begin_attempt(&self) -> Result<SessionId, ClientError> {
        let mut status = self.status.lock();

        // A session that just ended may still be dispatching its last events
        let deadline = Instant::now() + DISCONNECT_TIMEOUT;
        while status.state == ConnectionState::Disconnected && status.live_tasks > 0 {
            if self.changed.wait_until(&mut status, deadline).timed_out() {
                tracing::warn!("Previous session still running, starting a new one anyway");
                break;
            }
        }

        if status.state != ConnectionState::Disconnected {
            return Err(ClientError::AlreadyConnected);
        }
        let id = SessionId::new();
        status.state = ConnectionState::Connecting;
        status.session = Some(id);
        status.peer = None;
        status.live_tasks += 1;
        Ok(id)
    }

    /// Mark session `id` connected. Ignored if a newer attempt took over.
    pub(crate) fn mark_connected(&self, id: SessionId, peer: Option<SocketAddr>) {
        let mut status = self.status.lock();
        if status.session == Some(id) {
            status.state = ConnectionState::Connected;
            status.peer = peer;
        }
    }

    /// Mark session `id` disconnected. Returns false, and changes nothing, if
    /// a newer attempt took over; its `Disconnected` event must then not fire.
    #[must_use]
    pub(crate) fn mark_disconnected(&self, id: SessionId) -> bool {
        let mut status = self.status.lock();
        if status.session != Some(id) || status.state == ConnectionState::Disconnected {
            return false;
        }
        status.state = ConnectionState::Disconnected;
        status.peer = None;
        true
    }

    fn task_finished(&self) {
        let mut status = self.status.lock();
        status.live_tasks = status.live_tasks.saturating_sub(1);
        self.changed.notify_all();
    }

    /// Wait until no session task is alive. Returns false on timeout.
    fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut status = self.status.lock();
        while status.live_tasks > 0 {
            if self.changed.wait_until(&mut status, deadline).timed_out() {
                return status.live_tasks == 0;
            }
        }
        true
    }
}

/// Marks a session task finished when dropped, including when the task is
/// cancelled or never polled.
pub(crate) struct TaskGuard(Arc<Shared>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.task_finished();
    }
}

/// Implementation behind every transport variant.
#[derive(Debug)]
pub(crate) struct ClientCore {
    kind: TransportKind,
    endpoint: Endpoint,
    buffers: BufferConfig,
    timeout: Duration,
    plan: DialPlan,
    runtime: Handle,
    shared: Arc<Shared>,
    link: Mutex<Option<flume::Sender<Command>>>,
}

impl ClientCore {
    pub(crate) fn new(kind: TransportKind, config: &Config, plan: DialPlan, runtime: Handle) -> Self {
        Self {
            kind,
            endpoint: config.endpoint(),
            buffers: config.buffers,
            timeout: config.timeout(),
            plan,
            runtime,
            shared: Arc::new(Shared::new(config.buffers.receive_buffer_size)),
            link: Mutex::new(None),
        }
    }

    pub(crate) fn kind(&self) -> TransportKind {
        self.kind
    }

    pub(crate) fn id(&self) -> Option<SessionId> {
        self.shared.status.lock().session
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.status.lock().peer
    }

    pub(crate) fn options(&self) -> &BufferConfig {
        &self.buffers
    }

    pub(crate) fn events(&self) -> &EventHub {
        &self.shared.events
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.shared.state() == ConnectionState::Connected
    }

    pub(crate) fn is_connecting(&self) -> bool {
        self.shared.state() == ConnectionState::Connecting
    }

    /// Spawn a session task for a new attempt.
    fn start(
        &self,
        done: Option<flume::Sender<Result<(), ClientError>>>,
    ) -> Result<SessionId, ClientError> {
        let id = self.shared.begin_attempt()?;
        let guard = TaskGuard(Arc::clone(&self.shared));

        let (commands_tx, commands_rx) = flume::unbounded();
        *self.link.lock() = Some(commands_tx);

        tracing::info!("Connecting to {} via {} (session {})", self.endpoint, self.kind, id);

        let task = SessionTask {
            id,
            plan: self.plan.clone(),
            endpoint: self.endpoint.clone(),
            buffers: self.buffers,
            timeout: self.timeout,
            shared: Arc::clone(&self.shared),
            commands: commands_rx,
            done,
            guard,
        };
        self.runtime.spawn(event_loop::run(task));
        Ok(id)
    }

    pub(crate) fn connect(&self) -> Result<(), ClientError> {
        let (done_tx, done_rx) = flume::bounded(1);
        self.start(Some(done_tx))?;

        match done_rx.recv_timeout(self.timeout + CONNECT_GRACE) {
            Ok(result) => result,
            Err(flume::RecvTimeoutError::Timeout) => Err(ClientError::Timeout(self.timeout)),
            Err(flume::RecvTimeoutError::Disconnected) => Err(ClientError::ConnectionClosed),
        }
    }

    pub(crate) fn connect_async(&self) -> Result<(), ClientError> {
        if self.kind == TransportKind::Udp {
            // Datagram sockets connect without a round trip
            return self.connect();
        }
        self.start(None).map(|_| ())
    }

    pub(crate) fn disconnect(&self) -> bool {
        let was_active = self.shared.state() != ConnectionState::Disconnected;

        if let Some(link) = self.link.lock().take() {
            let _ = link.send(Command::Close);
        }

        if !self.shared.wait_idle(DISCONNECT_TIMEOUT) {
            tracing::warn!(
                "Teardown of {} did not finish within {:?}",
                self.endpoint,
                DISCONNECT_TIMEOUT
            );
        }

        if was_active {
            tracing::info!("Disconnected from {}", self.endpoint);
        }
        was_active
    }

    pub(crate) fn reconnect(&self) -> Result<(), ClientError> {
        self.disconnect();
        self.connect()
    }

    pub(crate) fn reconnect_async(&self) -> Result<(), ClientError> {
        self.disconnect();
        self.connect_async()
    }

    fn enqueue(&self, command: Command) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let link = self.link.lock();
        let sender = link.as_ref().ok_or(ClientError::NotConnected)?;
        sender
            .send(command)
            .map_err(|_| ClientError::ConnectionClosed)
    }

    pub(crate) fn send(&self, bytes: &[u8]) -> Result<usize, ClientError> {
        let (ack_tx, ack_rx) = flume::bounded(1);
        self.enqueue(Command::Send {
            payload: Bytes::copy_from_slice(bytes),
            ack: Some(ack_tx),
        })?;

        match ack_rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(flume::RecvTimeoutError::Timeout) => Err(ClientError::Timeout(self.timeout)),
            Err(flume::RecvTimeoutError::Disconnected) => Err(ClientError::ConnectionClosed),
        }
    }

    pub(crate) fn send_async(&self, bytes: &[u8]) -> Result<(), ClientError> {
        self.enqueue(Command::Send {
            payload: Bytes::copy_from_slice(bytes),
            ack: None,
        })
    }

    pub(crate) fn has_enqueued_packages(&self) -> bool {
        self.shared.packets.has_pending()
    }

    pub(crate) fn get_next_package(&self, buffer: &mut [u8]) -> Option<usize> {
        self.shared.packets.pop_into(buffer)
    }
}

impl Drop for ClientCore {
    fn drop(&mut self) {
        // Ask the session to close, without waiting for it
        if let Some(link) = self.link.get_mut().take() {
            let _ = link.send(Command::Close);
        }
    }
}
