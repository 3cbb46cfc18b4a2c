//! Loopback helpers shared by the integration tests.

#![allow(dead_code)]

use std::net::TcpListener;
use std::time::{Duration, Instant};
use unisock_client::{Config, SocketClient, SocketEvent, TransportKind};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config(transport: TransportKind, port: u16) -> Config {
    Config::builder()
        .address("127.0.0.1")
        .port(port)
        .transport(transport)
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap()
}

/// A loopback port nobody is listening on.
pub fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Wait for the next event on a channel subscription.
pub fn next_event(events: &flume::Receiver<SocketEvent>) -> SocketEvent {
    events
        .recv_timeout(WAIT)
        .expect("timed out waiting for an event")
}

/// Drain packets until `count` have arrived.
pub fn drain_packets(client: &dyn SocketClient, count: usize) -> Vec<Vec<u8>> {
    let mut scratch = vec![0u8; client.options().receive_buffer_size];
    let mut packets = Vec::new();
    wait_until(WAIT, || {
        while let Some(len) = client.get_next_package(&mut scratch) {
            packets.push(scratch[..len].to_vec());
        }
        packets.len() >= count
    });
    packets
}

/// Drain packets until `expected.len()` bytes have arrived and return them
/// concatenated. Stream transports do not keep message boundaries.
pub fn drain_bytes(client: &dyn SocketClient, expected: usize) -> Vec<u8> {
    let mut scratch = vec![0u8; client.options().receive_buffer_size];
    let mut bytes = Vec::new();
    wait_until(WAIT, || {
        while let Some(len) = client.get_next_package(&mut scratch) {
            bytes.extend_from_slice(&scratch[..len]);
        }
        bytes.len() >= expected
    });
    bytes
}
