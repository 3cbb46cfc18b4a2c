//! Integration tests for the TCP, UDP and TLS clients against loopback
//! servers running on background threads.

mod common;

use common::{config, drain_bytes, drain_packets, init_tracing, next_event, unused_port, wait_until, WAIT};
use pretty_assertions::assert_eq;
use std::io::{Read, Write};
use std::net::{TcpListener, UdpSocket};
use std::thread;
use std::time::Duration;
use unisock_client::{
    ClientError, SocketClient, SocketErrorCode, SocketEvent, TcpClient, TlsClient, TlsContext,
    TransportKind, UdpClient,
};

#[test]
fn udp_packets_drain_in_arrival_order() -> anyhow::Result<()> {
    init_tracing();
    let server = UdpSocket::bind("127.0.0.1:0")?;
    let port = server.local_addr()?.port();

    let client = UdpClient::new(&config(TransportKind::Udp, port))?;
    client.connect()?;
    assert!(client.is_connected());

    // The server learns our address from the first datagram
    assert_eq!(client.send(b"hello")?, 5);
    let mut buf = [0u8; 64];
    let (len, peer) = server.recv_from(&mut buf)?;
    assert_eq!(&buf[..len], b"hello");

    server.send_to(&[0x41, 0x42], peer)?;
    server.send_to(&[0x43], peer)?;

    let packets = drain_packets(&client, 2);
    assert_eq!(packets, vec![vec![0x41, 0x42], vec![0x43]]);

    let mut scratch = [0u8; 8];
    assert_eq!(client.get_next_package(&mut scratch), None);
    assert!(!client.has_enqueued_packages());
    Ok(())
}

#[test]
fn udp_empty_datagram_is_a_packet() -> anyhow::Result<()> {
    let server = UdpSocket::bind("127.0.0.1:0")?;
    let port = server.local_addr()?.port();

    let client = UdpClient::new(&config(TransportKind::Udp, port))?;
    client.connect()?;
    client.send_async(b"x")?;

    let mut buf = [0u8; 8];
    let (_, peer) = server.recv_from(&mut buf)?;
    server.send_to(&[], peer)?;
    server.send_to(b"after", peer)?;

    let packets = drain_packets(&client, 2);
    assert_eq!(packets, vec![Vec::new(), b"after".to_vec()]);
    Ok(())
}

#[test]
fn udp_connect_async_is_synchronous() -> anyhow::Result<()> {
    let server = UdpSocket::bind("127.0.0.1:0")?;
    let port = server.local_addr()?.port();

    let client = UdpClient::new(&config(TransportKind::Udp, port))?;
    client.connect_async()?;
    assert!(client.is_connected());
    assert_eq!(client.peer_addr(), Some(server.local_addr()?));
    Ok(())
}

#[test]
fn udp_refused_datagram_keeps_session_alive() -> anyhow::Result<()> {
    init_tracing();
    let port = {
        let socket = UdpSocket::bind("127.0.0.1:0")?;
        socket.local_addr()?.port()
    };

    let client = UdpClient::new(&config(TransportKind::Udp, port))?;
    let (_, events) = client.events().subscribe_channel(16);
    client.connect()?;
    assert_eq!(next_event(&events), SocketEvent::Connected);

    // ICMP port unreachable comes back as an error on the next receive
    client.send(b"anyone there?")?;
    thread::sleep(Duration::from_millis(200));
    assert!(client.is_connected());

    let unexpected = events
        .try_iter()
        .find(|event| *event == SocketEvent::Disconnected);
    assert_eq!(unexpected, None);
    Ok(())
}

#[test]
fn unreachable_connect_async_reports_error_then_disconnected() -> anyhow::Result<()> {
    init_tracing();
    let client = TcpClient::new(&config(TransportKind::Tcp, unused_port()))?;
    let (_, events) = client.events().subscribe_channel(16);

    client.connect_async()?;

    assert_eq!(
        next_event(&events),
        SocketEvent::Error(SocketErrorCode::ConnectionRefused)
    );
    assert_eq!(next_event(&events), SocketEvent::Disconnected);
    assert!(wait_until(WAIT, || !client.is_connecting()));
    assert!(!client.is_connected());

    // Never connected
    thread::sleep(Duration::from_millis(50));
    assert!(events.try_iter().all(|event| event != SocketEvent::Connected));
    Ok(())
}

#[test]
fn unreachable_connect_returns_error() -> anyhow::Result<()> {
    let client = TcpClient::new(&config(TransportKind::Tcp, unused_port()))?;

    let err = client.connect().unwrap_err();
    assert!(matches!(err, ClientError::ConnectionFailed { .. }));
    assert!(err.is_retryable());
    assert!(!client.is_connected());
    assert!(!client.disconnect());
    Ok(())
}

#[test]
fn double_disconnect_is_a_noop() -> anyhow::Result<()> {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();

    let client = TcpClient::new(&config(TransportKind::Tcp, port))?;
    let (_, events) = client.events().subscribe_channel(16);

    client.connect()?;
    let (_server_side, _) = listener.accept()?;
    assert!(client.is_connected());
    assert_eq!(next_event(&events), SocketEvent::Connected);

    assert!(client.disconnect());
    assert!(!client.is_connected());
    assert!(!client.disconnect());

    let seen: Vec<SocketEvent> = events.try_iter().collect();
    assert_eq!(seen, vec![SocketEvent::Disconnected]);
    Ok(())
}

#[test]
fn connect_while_connected_is_rejected() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();

    let client = TcpClient::new(&config(TransportKind::Tcp, port))?;
    client.connect()?;
    assert!(matches!(client.connect(), Err(ClientError::AlreadyConnected)));
    assert!(matches!(
        client.connect_async(),
        Err(ClientError::AlreadyConnected)
    ));
    Ok(())
}

#[test]
fn tcp_echo_round_trip() -> anyhow::Result<()> {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();

    let server = thread::spawn(move || -> std::io::Result<()> {
        let (mut stream, _) = listener.accept()?;
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            stream.write_all(&buf[..n])?;
        }
    });

    let client = TcpClient::new(&config(TransportKind::Tcp, port))?;
    client.connect()?;
    assert!(client.id().is_some());
    assert_eq!(client.peer_addr().map(|addr| addr.port()), Some(port));

    assert_eq!(client.send(b"ping")?, 4);
    assert_eq!(drain_bytes(&client, 4), b"ping".to_vec());

    assert!(client.disconnect());
    server.join().unwrap()?;
    Ok(())
}

#[test]
fn send_async_keeps_order() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();

    let server = thread::spawn(move || -> std::io::Result<Vec<u8>> {
        let (mut stream, _) = listener.accept()?;
        let mut received = Vec::new();
        stream.read_to_end(&mut received)?;
        Ok(received)
    });

    let client = TcpClient::new(&config(TransportKind::Tcp, port))?;
    client.connect()?;

    let mut expected = Vec::new();
    for i in 0..200u32 {
        let message = format!("message {i};");
        expected.extend_from_slice(message.as_bytes());
        client.send_async(message.as_bytes())?;
    }

    // Queued sends are written before the close
    assert!(client.disconnect());
    assert_eq!(server.join().unwrap()?, expected);
    Ok(())
}

#[test]
fn peer_close_ends_session_and_keeps_packets() -> anyhow::Result<()> {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();

    let server = thread::spawn(move || -> std::io::Result<()> {
        let (mut stream, _) = listener.accept()?;
        stream.write_all(b"last words")?;
        Ok(())
    });

    let client = TcpClient::new(&config(TransportKind::Tcp, port))?;
    let (_, events) = client.events().subscribe_channel(16);
    client.connect()?;
    server.join().unwrap()?;

    assert_eq!(next_event(&events), SocketEvent::Connected);
    assert_eq!(next_event(&events), SocketEvent::Disconnected);
    assert!(!client.is_connected());

    // Data the peer sent before closing is still there
    assert_eq!(drain_bytes(&client, 10), b"last words".to_vec());
    assert!(matches!(client.send(b"x"), Err(ClientError::NotConnected)));
    Ok(())
}

#[test]
fn each_attempt_gets_a_new_session_id() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();

    let client = TcpClient::new(&config(TransportKind::Tcp, port))?;
    client.connect()?;
    let first = client.id();

    client.reconnect()?;
    assert!(client.is_connected());
    assert_ne!(client.id(), first);
    Ok(())
}

#[test]
fn panicking_handler_does_not_stop_receiving() -> anyhow::Result<()> {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();

    let client = TcpClient::new(&config(TransportKind::Tcp, port))?;
    client.events().subscribe(|_| panic!("handler bug"));
    client.connect()?;

    let (mut stream, _) = listener.accept()?;
    stream.write_all(b"still flowing")?;

    assert_eq!(drain_bytes(&client, 13), b"still flowing".to_vec());
    assert!(client.is_connected());
    Ok(())
}

#[test]
fn tls_handshake_failure_reports_error() -> anyhow::Result<()> {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();

    // Read the ClientHello, answer with a fatal handshake_failure alert
    let server = thread::spawn(move || -> std::io::Result<()> {
        let (mut stream, _) = listener.accept()?;
        let mut hello = [0u8; 512];
        let _ = stream.read(&mut hello)?;
        stream.write_all(&[0x15, 0x03, 0x03, 0x00, 0x02, 0x02, 0x28])?;
        thread::sleep(Duration::from_millis(500));
        Ok(())
    });

    let context = TlsContext::new().without_system_roots();
    let client = TlsClient::new(&config(TransportKind::Tls, port), &context)?;
    let (_, events) = client.events().subscribe_channel(16);

    let err = client.connect().unwrap_err();
    assert_eq!(SocketErrorCode::from(&err), SocketErrorCode::HandshakeFailed);
    assert!(!client.is_connected());

    assert_eq!(
        next_event(&events),
        SocketEvent::Error(SocketErrorCode::HandshakeFailed)
    );
    assert_eq!(next_event(&events), SocketEvent::Disconnected);
    server.join().unwrap()?;
    Ok(())
}
