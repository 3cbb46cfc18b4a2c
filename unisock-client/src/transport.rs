//! Transport dialing for the three socket kinds.
//!
//! [`Transport::dial`] resolves the endpoint, applies the configured socket
//! buffer sizes and returns a connected TCP stream, TLS stream or connected
//! UDP socket. Everything after the dial (reading, writing, teardown) is the
//! session task's business.

use crate::config::BufferConfig;
use crate::errors::ClientError;
use crate::session::Endpoint;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpSocket, TcpStream, UdpSocket};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// How a client reaches its endpoint. Fixed when the client is built.
#[derive(Clone)]
pub(crate) enum DialPlan {
    Tcp,
    Udp,
    Tls {
        config: Arc<ClientConfig>,
        server_name: String,
    },
}

impl std::fmt::Debug for DialPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "Tcp"),
            Self::Udp => write!(f, "Udp"),
            Self::Tls { server_name, .. } => write!(f, "Tls({server_name})"),
        }
    }
}

/// A connected transport.
pub(crate) enum Transport {
    /// Plain TCP stream
    Tcp(TcpStream),
    /// TLS over TCP
    Tls(Box<TlsStream<TcpStream>>),
    /// Connected datagram socket
    Udp(UdpSocket),
}

impl Transport {
    /// Dial `endpoint` according to `plan`.
    pub(crate) async fn dial(
        plan: &DialPlan,
        endpoint: &Endpoint,
        buffers: &BufferConfig,
    ) -> Result<Self, ClientError> {
        match plan {
            DialPlan::Tcp => Ok(Self::Tcp(connect_tcp(endpoint, buffers).await?)),
            DialPlan::Udp => Ok(Self::Udp(connect_udp(endpoint, buffers).await?)),
            DialPlan::Tls {
                config,
                server_name,
            } => {
                let stream = connect_tls(endpoint, buffers, config, server_name).await?;
                Ok(Self::Tls(Box::new(stream)))
            }
        }
    }

    /// Address of the remote peer.
    pub(crate) fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Self::Tcp(stream) => stream.peer_addr(),
            Self::Tls(stream) => stream.get_ref().0.peer_addr(),
            Self::Udp(socket) => socket.peer_addr(),
        }
    }
}

fn failed(endpoint: &Endpoint, source: io::Error) -> ClientError {
    ClientError::ConnectionFailed {
        endpoint: endpoint.to_string(),
        source,
    }
}

async fn resolve(endpoint: &Endpoint) -> Result<Vec<SocketAddr>, ClientError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(endpoint.to_string())
        .await
        .map_err(|e| failed(endpoint, e))?
        .collect();

    if addrs.is_empty() {
        return Err(failed(
            endpoint,
            io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses resolved"),
        ));
    }
    Ok(addrs)
}

fn clamp_u32(size: usize) -> u32 {
    u32::try_from(size).unwrap_or(u32::MAX)
}

async fn connect_tcp(endpoint: &Endpoint, buffers: &BufferConfig) -> Result<TcpStream, ClientError> {
    let mut last_error = None;

    for addr in resolve(endpoint).await? {
        let attempt = async {
            let socket = if addr.is_ipv4() {
                TcpSocket::new_v4()?
            } else {
                TcpSocket::new_v6()?
            };
            socket.set_recv_buffer_size(clamp_u32(buffers.receive_buffer_size))?;
            socket.set_send_buffer_size(clamp_u32(buffers.send_buffer_size))?;
            socket.connect(addr).await
        };

        match attempt.await {
            Ok(stream) => {
                stream.set_nodelay(true).map_err(|e| failed(endpoint, e))?;

                // Log local and remote addresses for correlation with server logs
                if let (Ok(local), Ok(peer)) = (stream.local_addr(), stream.peer_addr()) {
                    tracing::info!("Connected via TCP: local={} -> remote={}", local, peer);
                }
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!("TCP connect to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    Err(failed(
        endpoint,
        last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable)),
    ))
}

async fn connect_udp(endpoint: &Endpoint, buffers: &BufferConfig) -> Result<UdpSocket, ClientError> {
    let addr = resolve(endpoint).await?[0];

    let socket = (|| -> io::Result<std::net::UdpSocket> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_recv_buffer_size(buffers.receive_buffer_size)?;
        socket.set_send_buffer_size(buffers.send_buffer_size)?;

        let local: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        socket.bind(&SockAddr::from(local))?;
        socket.set_nonblocking(true)?;
        Ok(socket.into())
    })()
    .map_err(|e| failed(endpoint, e))?;

    let socket = UdpSocket::from_std(socket).map_err(|e| failed(endpoint, e))?;
    socket.connect(addr).await.map_err(|e| failed(endpoint, e))?;

    if let Ok(local) = socket.local_addr() {
        tracing::info!("Connected via UDP: local={} -> remote={}", local, addr);
    }
    Ok(socket)
}

async fn connect_tls(
    endpoint: &Endpoint,
    buffers: &BufferConfig,
    config: &Arc<ClientConfig>,
    server_name: &str,
) -> Result<TlsStream<TcpStream>, ClientError> {
    let stream = connect_tcp(endpoint, buffers).await?;

    let name = ServerName::try_from(server_name.to_string()).map_err(|e| {
        ClientError::TlsError(format!("Invalid server name '{server_name}': {e}"))
    })?;

    // Handshake failures stay io::Errors so the rustls cause can be classified
    let tls_stream = TlsConnector::from(Arc::clone(config))
        .connect(name, stream)
        .await
        .map_err(|e| failed(endpoint, e))?;

    let (_, session) = tls_stream.get_ref();
    tracing::info!(
        "TLS established with {} ({:?})",
        server_name,
        session.protocol_version()
    );
    Ok(tls_stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SocketErrorCode;

    fn run<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[test]
    fn test_tcp_dial_loopback() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let transport = run(Transport::dial(
            &DialPlan::Tcp,
            &Endpoint::new("127.0.0.1", port),
            &BufferConfig::default(),
        ))
        .unwrap();

        assert!(matches!(transport, Transport::Tcp(_)));
        assert_eq!(transport.peer_addr().unwrap().port(), port);
    }

    #[test]
    fn test_tcp_dial_refused() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let result = run(Transport::dial(
            &DialPlan::Tcp,
            &Endpoint::new("127.0.0.1", port),
            &BufferConfig::default(),
        ));

        let err = result.err().unwrap();
        assert!(matches!(err, ClientError::ConnectionFailed { .. }));
        assert_eq!(SocketErrorCode::from(&err), SocketErrorCode::ConnectionRefused);
    }

    #[test]
    fn test_udp_dial_connects_socket() {
        let server = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = server.local_addr().unwrap().port();

        let transport = run(Transport::dial(
            &DialPlan::Udp,
            &Endpoint::new("127.0.0.1", port),
            &BufferConfig::default(),
        ))
        .unwrap();

        assert!(matches!(transport, Transport::Udp(_)));
        assert_eq!(transport.peer_addr().unwrap(), server.local_addr().unwrap());
    }
}
