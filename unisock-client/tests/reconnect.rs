//! Integration tests for the reconnect state machine.

mod common;

use common::{config, drain_bytes, init_tracing, next_event, unused_port, wait_until, WAIT};
use pretty_assertions::assert_eq;
use std::io::{ErrorKind, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use unisock_client::{
    ClientError, ConnectionState, ManagedClient, ReconnectPolicy, SocketClient, SocketEvent,
    TcpClient, TransportKind,
};

fn managed(port: u16, policy: ReconnectPolicy) -> anyhow::Result<ManagedClient> {
    let client = TcpClient::new(&config(TransportKind::Tcp, port))?;
    Ok(ManagedClient::new(Box::new(client), policy)?)
}

/// True if nobody is waiting in the listener's accept queue.
fn no_pending_connection(listener: &TcpListener) -> anyhow::Result<bool> {
    listener.set_nonblocking(true)?;
    let idle = match listener.accept() {
        Ok(_) => false,
        Err(e) if e.kind() == ErrorKind::WouldBlock => true,
        Err(e) => return Err(e.into()),
    };
    listener.set_nonblocking(false)?;
    Ok(idle)
}

#[test]
fn reconnects_after_server_drop() -> anyhow::Result<()> {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    let delay = Duration::from_millis(300);

    let server = thread::spawn(move || -> std::io::Result<()> {
        // First connection is dropped straight away
        let (first, _) = listener.accept()?;
        drop(first);

        let (mut second, _) = listener.accept()?;
        second.write_all(b"again")?;
        thread::sleep(Duration::from_millis(500));
        Ok(())
    });

    let client = managed(port, ReconnectPolicy::constant(delay))?;
    let (_, events) = client.events().subscribe_channel(16);
    client.connect()?;
    let first_session = client.id();

    assert_eq!(next_event(&events), SocketEvent::Connected);
    assert_eq!(next_event(&events), SocketEvent::Disconnected);
    let dropped_at = Instant::now();

    assert_eq!(next_event(&events), SocketEvent::Connected);
    assert!(dropped_at.elapsed() >= delay - Duration::from_millis(50));
    assert_ne!(client.id(), first_session);

    assert_eq!(drain_bytes(&client, 5), b"again".to_vec());
    assert!(wait_until(WAIT, || client.state() == ConnectionState::Connected));

    client.shutdown();
    server.join().unwrap()?;
    Ok(())
}

#[test]
fn failed_attempts_keep_retrying() -> anyhow::Result<()> {
    init_tracing();
    let port = unused_port();

    let client = managed(port, ReconnectPolicy::constant(Duration::from_millis(50)))?;
    let (_, events) = client.events().subscribe_channel(64);
    client.connect_async()?;

    // Every attempt fails with an error followed by a disconnect
    let mut disconnects = 0;
    while disconnects < 3 {
        if next_event(&events) == SocketEvent::Disconnected {
            disconnects += 1;
        }
    }
    assert!(!client.is_connected());

    // A server appears; the next retry gets through
    let listener = TcpListener::bind(("127.0.0.1", port))?;
    assert!(wait_until(WAIT, || client.is_connected()));
    drop(listener);
    client.shutdown();
    Ok(())
}

#[test]
fn gives_up_after_max_retries() -> anyhow::Result<()> {
    let policy = ReconnectPolicy {
        max_retries: 2,
        ..ReconnectPolicy::constant(Duration::from_millis(20))
    };
    let client = managed(unused_port(), policy)?;
    let (_, events) = client.events().subscribe_channel(64);
    client.connect_async()?;

    // Initial attempt plus two retries
    let mut disconnects = 0;
    while disconnects < 3 {
        if next_event(&events) == SocketEvent::Disconnected {
            disconnects += 1;
        }
    }

    thread::sleep(Duration::from_millis(200));
    assert!(events
        .try_iter()
        .all(|event| event != SocketEvent::Disconnected));
    assert!(!client.retry_pending());
    Ok(())
}

#[test]
fn disconnect_suppresses_reconnect() -> anyhow::Result<()> {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();

    let client = managed(port, ReconnectPolicy::constant(Duration::from_millis(100)))?;
    client.connect()?;
    let (_server_side, _) = listener.accept()?;

    assert!(client.disconnect());
    assert_eq!(client.state(), ConnectionState::Disconnected);

    thread::sleep(Duration::from_millis(400));
    assert!(!client.is_connected());
    assert!(!client.retry_pending());
    assert!(no_pending_connection(&listener)?);
    Ok(())
}

#[test]
fn shutdown_cancels_pending_retry() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();

    let client = managed(port, ReconnectPolicy::constant(Duration::from_millis(300)))?;
    let (_, events) = client.events().subscribe_channel(16);
    client.connect()?;

    let (server_side, _) = listener.accept()?;
    drop(server_side);
    assert_eq!(next_event(&events), SocketEvent::Connected);
    assert_eq!(next_event(&events), SocketEvent::Disconnected);
    assert!(client.retry_pending());

    client.shutdown();
    assert!(client.is_terminated());
    assert!(!client.retry_pending());

    thread::sleep(Duration::from_millis(600));
    assert!(no_pending_connection(&listener)?);
    assert!(matches!(client.connect(), Err(ClientError::ConnectionClosed)));
    Ok(())
}

#[test]
fn dropped_client_is_not_resurrected() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();

    let client = managed(port, ReconnectPolicy::constant(Duration::from_millis(200)))?;
    let (_, events) = client.events().subscribe_channel(16);
    client.connect()?;

    let (server_side, _) = listener.accept()?;
    drop(server_side);
    assert_eq!(next_event(&events), SocketEvent::Connected);
    assert_eq!(next_event(&events), SocketEvent::Disconnected);

    drop(client);
    thread::sleep(Duration::from_millis(500));
    assert!(no_pending_connection(&listener)?);
    Ok(())
}

#[test]
fn connect_while_connected_restarts_the_session() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();

    let client = managed(port, ReconnectPolicy::constant(Duration::from_millis(100)))?;
    let (_, events) = client.events().subscribe_channel(16);
    client.connect()?;
    let first_session = client.id();

    client.connect()?;
    assert!(client.is_connected());
    assert_ne!(client.id(), first_session);

    let seen: Vec<SocketEvent> = (0..3).map(|_| next_event(&events)).collect();
    assert_eq!(
        seen,
        vec![
            SocketEvent::Connected,
            SocketEvent::Disconnected,
            SocketEvent::Connected
        ]
    );

    // The deliberate disconnect in between did not schedule a retry
    assert!(!client.retry_pending());
    client.shutdown();
    Ok(())
}

#[test]
fn errors_do_not_force_disconnect() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();

    let client = managed(port, ReconnectPolicy::disabled())?;
    client.connect()?;
    let (_server_side, _) = listener.accept()?;

    // A synthetic error event goes through the state machine unharmed
    client
        .events()
        .dispatch(&SocketEvent::Error(unisock_client::SocketErrorCode::Other));
    assert!(client.is_connected());
    assert_eq!(client.state(), ConnectionState::Connected);
    Ok(())
}

/// Accept and immediately drop connections until `stop` is set, counting them.
fn dropping_server(
    listener: TcpListener,
    accepted: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
) -> std::io::Result<thread::JoinHandle<()>> {
    listener.set_nonblocking(true)?;
    Ok(thread::spawn(move || {
        while !stop.load(Ordering::Acquire) {
            match listener.accept() {
                Ok((stream, _)) => {
                    accepted.fetch_add(1, Ordering::AcqRel);
                    drop(stream);
                }
                Err(_) => thread::sleep(Duration::from_millis(1)),
            }
        }
    }))
}

#[test]
fn disconnect_during_retry_is_final() -> anyhow::Result<()> {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    let accepted = Arc::new(AtomicUsize::new(0));
    let stop = Arc::new(AtomicBool::new(false));
    let server = dropping_server(listener, Arc::clone(&accepted), Arc::clone(&stop))?;

    // Zero delay keeps a retry dialing most of the time
    let client = managed(port, ReconnectPolicy::constant(Duration::ZERO))?;
    let mut revived = 0;

    for i in 0..40u64 {
        client.connect_async()?;
        thread::sleep(Duration::from_millis(2 + i % 7));
        client.disconnect();

        // Let the server pick up connections that completed before the close
        thread::sleep(Duration::from_millis(20));
        let settled = accepted.load(Ordering::Acquire);
        thread::sleep(Duration::from_millis(100));
        if accepted.load(Ordering::Acquire) != settled
            || client.is_connected()
            || client.is_connecting()
            || client.retry_pending()
        {
            revived += 1;
        }
    }

    stop.store(true, Ordering::Release);
    client.shutdown();
    server.join().unwrap();
    assert_eq!(revived, 0);
    Ok(())
}
