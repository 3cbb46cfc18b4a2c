//! Socket clients for polling consumers.
//!
//! This crate lets a single-threaded consumer, such as a render or UI loop,
//! exchange bytes with a remote endpoint over TCP, UDP or TLS without ever
//! blocking on I/O it did not ask to wait for. Network I/O runs on a tokio
//! runtime; received data is queued in a packet buffer that the consumer
//! drains at its own cadence into a reusable slice.
//!
//! # Features
//!
//! - **One contract, three transports**: [`TcpClient`], [`UdpClient`] and
//!   [`TlsClient`] implement [`SocketClient`]
//! - **Allocation-free drain path**: packets are copied out of a shared arena
//!   that is recycled whenever the queue empties
//! - **Events**: `Connected`, `Disconnected` and `Error` through an
//!   [`EventHub`] with panic isolation, or bridged onto a channel
//! - **Automatic reconnection**: [`ManagedClient`] with constant or
//!   exponential backoff
//! - **Explicit certificate policy**: strict by default, with an opt-in
//!   validation callback
//! - **Configuration management**: TOML files, a builder, and CLI arguments
//!   behind the `cli` feature
//!
//! # Quick Start
//!
//! ```no_run
//! use unisock_client::{Config, ManagedClient, SocketClient, SocketEvent, TransportKind};
//!
//! fn main() -> Result<(), unisock_client::ClientError> {
//!     let config = Config::builder()
//!         .address("127.0.0.1")
//!         .port(3333)
//!         .transport(TransportKind::Udp)
//!         .build()?;
//!
//!     let client = ManagedClient::from_config(&config, None)?;
//!     let (_, events) = client.events().subscribe_channel(64);
//!     client.connect()?;
//!     client.send(b"hello")?;
//!
//!     // Once per frame:
//!     let mut scratch = vec![0u8; client.options().receive_buffer_size];
//!     for event in events.try_iter() {
//!         if event == SocketEvent::Disconnected {
//!             println!("lost connection");
//!         }
//!     }
//!     while let Some(len) = client.get_next_package(&mut scratch) {
//!         println!("received {:?}", &scratch[..len]);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Session task**: one per connection attempt, on the I/O runtime. It
//!   dials, reads into a reusable chunk, appends packets, executes queued
//!   sends and dispatches events.
//! - **Consumer**: issues commands and drains packets. It is the only reader
//!   of the packet queue.
//!
//! # Error Handling
//!
//! Commands return [`ClientError`]. Transport failures after a command has
//! returned surface as [`SocketEvent::Error`] carrying a [`SocketErrorCode`].
//! Errors are categorized as either:
//! - **Fatal**: configuration errors and misuse
//! - **Retryable**: network errors, timeouts, handshake failures
//!
//! # Safety
//!
//! This crate is `#![forbid(unsafe_code)]` and uses only safe Rust.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod config;
pub mod errors;
pub mod events;
pub mod managed;
pub mod runtime;
pub mod session;
pub mod tls;

// Private implementation modules
mod client;
mod event_loop;
mod transport;
mod variants;

// Optional CLI support
#[cfg(feature = "cli")]
pub mod args;

// Re-exports
pub use client::{SocketClient, DISCONNECT_TIMEOUT};
pub use config::{BufferConfig, Config, TransportKind};
pub use errors::{ClientError, SocketErrorCode};
pub use events::{EventHub, SocketEvent, SubscriptionId};
pub use managed::{ManagedClient, ReconnectPolicy};
pub use session::{ConnectionState, Endpoint, SessionId};
pub use tls::{CertificatePolicy, TlsContext};
pub use unisock_buffer::{PacketBuffer, PacketPointer};
pub use variants::{build_client, TcpClient, TlsClient, UdpClient};
