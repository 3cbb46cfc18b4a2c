//! TCP, UDP and TLS socket clients.
//!
//! The three variants share one implementation and differ in how they dial
//! and how received bytes map onto packets:
//!
//! - [`TcpClient`] and [`TlsClient`]: each successful read (at most
//!   `receive_buffer_size` bytes) becomes one packet. Stream boundaries are
//!   not message boundaries, so a message sent by the peer may arrive split
//!   across packets or coalesced with its neighbours. Applications that need
//!   message framing must add it on top.
//! - [`UdpClient`]: each datagram becomes one packet, including empty ones.

use crate::client::{ClientCore, SocketClient};
use crate::config::{BufferConfig, Config, TransportKind};
use crate::errors::ClientError;
use crate::events::EventHub;
use crate::runtime;
use crate::session::{Endpoint, SessionId};
use crate::tls::TlsContext;
use crate::transport::DialPlan;
use std::net::SocketAddr;
use tokio::runtime::Handle;

macro_rules! impl_socket_client {
    ($client:ty) => {
        impl SocketClient for $client {
            fn kind(&self) -> TransportKind {
                self.0.kind()
            }

            fn id(&self) -> Option<SessionId> {
                self.0.id()
            }

            fn endpoint(&self) -> &Endpoint {
                self.0.endpoint()
            }

            fn peer_addr(&self) -> Option<SocketAddr> {
                self.0.peer_addr()
            }

            fn options(&self) -> &BufferConfig {
                self.0.options()
            }

            fn events(&self) -> &EventHub {
                self.0.events()
            }

            fn is_connected(&self) -> bool {
                self.0.is_connected()
            }

            fn is_connecting(&self) -> bool {
                self.0.is_connecting()
            }

            fn connect(&self) -> Result<(), ClientError> {
                self.0.connect()
            }

            fn connect_async(&self) -> Result<(), ClientError> {
                self.0.connect_async()
            }

            fn disconnect(&self) -> bool {
                self.0.disconnect()
            }

            fn reconnect(&self) -> Result<(), ClientError> {
                self.0.reconnect()
            }

            fn reconnect_async(&self) -> Result<(), ClientError> {
                self.0.reconnect_async()
            }

            fn send(&self, bytes: &[u8]) -> Result<usize, ClientError> {
                self.0.send(bytes)
            }

            fn send_async(&self, bytes: &[u8]) -> Result<(), ClientError> {
                self.0.send_async(bytes)
            }

            fn has_enqueued_packages(&self) -> bool {
                self.0.has_enqueued_packages()
            }

            fn get_next_package(&self, buffer: &mut [u8]) -> Option<usize> {
                self.0.get_next_package(buffer)
            }
        }
    };
}

/// Plain TCP client.
///
/// Packets are read chunks, not messages: see the [module docs](self).
#[derive(Debug)]
pub struct TcpClient(ClientCore);

impl TcpClient {
    /// Create a client driven by the default I/O runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        Self::with_runtime(config, runtime::io_handle()?)
    }

    /// Create a client driven by `runtime`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_runtime(config: &Config, runtime: Handle) -> Result<Self, ClientError> {
        config.validate()?;
        Ok(Self(ClientCore::new(
            TransportKind::Tcp,
            config,
            DialPlan::Tcp,
            runtime,
        )))
    }
}

impl_socket_client!(TcpClient);

/// Connected UDP client.
///
/// `connect_async` and `reconnect_async` behave like their blocking forms,
/// and both send forms map to a single datagram.
#[derive(Debug)]
pub struct UdpClient(ClientCore);

impl UdpClient {
    /// Create a client driven by the default I/O runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        Self::with_runtime(config, runtime::io_handle()?)
    }

    /// Create a client driven by `runtime`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_runtime(config: &Config, runtime: Handle) -> Result<Self, ClientError> {
        config.validate()?;
        Ok(Self(ClientCore::new(
            TransportKind::Udp,
            config,
            DialPlan::Udp,
            runtime,
        )))
    }
}

impl_socket_client!(UdpClient);

/// TLS over TCP client.
///
/// Framing is the same as [`TcpClient`]. Server certificates are checked
/// against the [`CertificatePolicy`](crate::tls::CertificatePolicy) of the
/// context.
#[derive(Debug)]
pub struct TlsClient(ClientCore);

impl TlsClient {
    /// Create a client driven by the default I/O runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the TLS context
    /// cannot be turned into a client configuration.
    pub fn new(config: &Config, context: &TlsContext) -> Result<Self, ClientError> {
        Self::with_runtime(config, context, runtime::io_handle()?)
    }

    /// Create a client driven by `runtime`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the TLS context
    /// cannot be turned into a client configuration.
    pub fn with_runtime(
        config: &Config,
        context: &TlsContext,
        runtime: Handle,
    ) -> Result<Self, ClientError> {
        config.validate()?;

        let server_name = context
            .server_name()
            .or(config.tls.server_name.as_deref())
            .unwrap_or(&config.connection.address)
            .to_string();

        let plan = DialPlan::Tls {
            config: context.build_client_config()?,
            server_name,
        };
        Ok(Self(ClientCore::new(TransportKind::Tls, config, plan, runtime)))
    }
}

impl_socket_client!(TlsClient);

/// Build the client selected by `config.connection.transport`.
///
/// `tls` is only consulted for [`TransportKind::Tls`]; without it the context
/// is derived from the `[tls]` configuration section.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the TLS setup fails.
pub fn build_client(
    config: &Config,
    tls: Option<&TlsContext>,
) -> Result<Box<dyn SocketClient>, ClientError> {
    let client: Box<dyn SocketClient> = match config.connection.transport {
        TransportKind::Tcp => Box::new(TcpClient::new(config)?),
        TransportKind::Udp => Box::new(UdpClient::new(config)?),
        TransportKind::Tls => match tls {
            Some(context) => Box::new(TlsClient::new(config, context)?),
            None => Box::new(TlsClient::new(config, &TlsContext::from_config(&config.tls))?),
        },
    };
    Ok(client)
}
