//! Connection event notifications.
//!
//! Every client owns an [`EventHub`]. Handlers are registered with
//! [`EventHub::subscribe`] (or one of the typed helpers) and removed with
//! [`EventHub::unsubscribe`].
//!
//! # Threading
//!
//! Events are dispatched from the I/O thread. Handlers must be quick and must
//! not touch state that is only safe on the consumer thread; use
//! [`EventHub::subscribe_channel`] to move events over to a polling loop.
//! Handlers must also not call blocking client commands (`connect`,
//! `disconnect`, `send`), since those wait on the I/O thread.
//!
//! A panicking handler is caught and logged. It never unwinds into the
//! receive loop, and the remaining handlers still run.

use crate::errors::SocketErrorCode;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A connection lifecycle notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketEvent {
    /// The transport finished connecting.
    Connected,
    /// The transport is gone, either after a drop, a failed attempt, or a
    /// deliberate disconnect.
    Disconnected,
    /// A socket error was reported. This does not imply a disconnect.
    Error(SocketErrorCode),
}

/// Handle returned by [`EventHub::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&SocketEvent) + Send + Sync>;

/// Registry of event handlers with panic-isolating dispatch.
pub struct EventHub {
    handlers: RwLock<Vec<(SubscriptionId, Handler)>>,
    next_id: AtomicU64,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

impl EventHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for every event.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SocketEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Register a handler for [`SocketEvent::Connected`] only.
    pub fn on_connected<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if matches!(event, SocketEvent::Connected) {
                handler();
            }
        })
    }

    /// Register a handler for [`SocketEvent::Disconnected`] only.
    pub fn on_disconnected<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if matches!(event, SocketEvent::Disconnected) {
                handler();
            }
        })
    }

    /// Register a handler for [`SocketEvent::Error`] only.
    pub fn on_error<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(SocketErrorCode) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let SocketEvent::Error(code) = event {
                handler(*code);
            }
        })
    }

    /// Forward events into a bounded channel.
    ///
    /// This is the way for a polling consumer to observe events on its own
    /// thread. When the channel is full, further events are dropped with a
    /// warning rather than stalling the I/O thread.
    pub fn subscribe_channel(
        &self,
        capacity: usize,
    ) -> (SubscriptionId, flume::Receiver<SocketEvent>) {
        let (tx, rx) = flume::bounded(capacity);
        let id = self.subscribe(move |event| {
            if let Err(flume::TrySendError::Full(event)) = tx.try_send(*event) {
                tracing::warn!("Event channel full, dropping {:?}", event);
            }
        });
        (id, rx)
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Invoke every registered handler with `event`.
    ///
    /// Handlers run in registration order against a snapshot of the
    /// registry, so a handler may subscribe or unsubscribe without
    /// deadlocking. Panics are caught per handler and logged.
    pub fn dispatch(&self, event: &SocketEvent) {
        let snapshot: Vec<(SubscriptionId, Handler)> = self.handlers.read().clone();

        for (id, handler) in snapshot {
            let result = catch_unwind(AssertUnwindSafe(|| handler(event)));

            if let Err(panic_info) = result {
                let msg = panic_info
                    .downcast_ref::<String>()
                    .map(String::as_str)
                    .or_else(|| panic_info.downcast_ref::<&str>().copied())
                    .unwrap_or("unknown panic");
                tracing::error!("Event handler {:?} panicked on {:?}: {}", id, event, msg);
            }
        }
    }
}
