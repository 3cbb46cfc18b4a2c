//! Session task: dial, receive loop, send execution and teardown.
//!
//! One task runs per connection attempt. It owns the transport, appends every
//! received chunk or datagram to the packet queue, executes queued sends in
//! order and dispatches lifecycle events. Events are always dispatched after
//! the shared state has been updated, so handlers observe a consistent
//! `is_connected`.

use crate::client::{Shared, TaskGuard};
use crate::config::BufferConfig;
use crate::errors::{ClientError, SocketErrorCode};
use crate::events::SocketEvent;
use crate::session::{Endpoint, SessionId};
use crate::transport::{DialPlan, Transport};
use bytes::Bytes;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::select;

/// Commands from a client handle to its session task.
pub(crate) enum Command {
    /// Write `payload`; report the outcome on `ack` if present.
    Send {
        payload: Bytes,
        ack: Option<flume::Sender<Result<usize, ClientError>>>,
    },
    /// Close the transport and end the session.
    Close,
}

/// Everything a session task needs, moved into the task on spawn.
pub(crate) struct SessionTask {
    pub(crate) id: SessionId,
    pub(crate) plan: DialPlan,
    pub(crate) endpoint: Endpoint,
    pub(crate) buffers: BufferConfig,
    pub(crate) timeout: Duration,
    pub(crate) shared: Arc<Shared>,
    pub(crate) commands: flume::Receiver<Command>,
    pub(crate) done: Option<flume::Sender<Result<(), ClientError>>>,
    pub(crate) guard: TaskGuard,
}

/// Why a connected session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    /// The client asked to close.
    Closed,
    /// The peer closed the stream.
    PeerClosed,
    /// A transport error ended the stream.
    Failed,
}

/// Run one session to completion.
pub(crate) async fn run(task: SessionTask) {
    let SessionTask {
        id,
        plan,
        endpoint,
        buffers,
        timeout,
        shared,
        commands,
        done,
        guard,
    } = task;

    let dial = tokio::time::timeout(timeout, Transport::dial(&plan, &endpoint, &buffers));

    let outcome = select! {
        res = dial => match res {
            Ok(res) => Some(res),
            Err(_) => Some(Err(ClientError::Timeout(timeout))),
        },
        () = wait_for_close(&commands) => None,
    };

    let transport = match outcome {
        Some(Ok(transport)) => transport,
        Some(Err(e)) => {
            tracing::warn!("Connection attempt {} to {} failed: {}", id, endpoint, e);
            let code = SocketErrorCode::from(&e);
            let current = shared.mark_disconnected(id);
            shared.events.dispatch(&SocketEvent::Error(code));
            if current {
                shared.events.dispatch(&SocketEvent::Disconnected);
            }
            if let Some(done) = done {
                let _ = done.send(Err(e));
            }
            drop(guard);
            return;
        }
        None => {
            tracing::debug!("Connection attempt {} cancelled", id);
            if shared.mark_disconnected(id) {
                shared.events.dispatch(&SocketEvent::Disconnected);
            }
            if let Some(done) = done {
                let _ = done.send(Err(ClientError::ConnectionClosed));
            }
            drop(guard);
            return;
        }
    };

    let peer = transport.peer_addr().ok();
    shared.mark_connected(id, peer);
    tracing::info!("Session {} connected to {}", id, endpoint);
    shared.events.dispatch(&SocketEvent::Connected);
    if let Some(done) = done {
        let _ = done.send(Ok(()));
    }

    let session = Session {
        id,
        shared: &shared,
        commands: &commands,
        receive_buffer_size: buffers.receive_buffer_size,
    };

    let ending = match transport {
        Transport::Tcp(stream) => session.stream_loop(stream).await,
        Transport::Tls(stream) => session.stream_loop(stream).await,
        Transport::Udp(socket) => session.datagram_loop(socket).await,
    };

    tracing::info!("Session {} with {} ended ({:?})", id, endpoint, ending);
    // A newer session may already own the state; its events are its own
    if shared.mark_disconnected(id) {
        shared.events.dispatch(&SocketEvent::Disconnected);
    }

    // Sends still queued can no longer be written
    for command in commands.drain() {
        if let Command::Send { ack: Some(ack), .. } = command {
            let _ = ack.send(Err(ClientError::ConnectionClosed));
        }
    }
    drop(guard);
}

/// Answer sends with `NotConnected` until a close arrives.
async fn wait_for_close(commands: &flume::Receiver<Command>) {
    loop {
        match commands.recv_async().await {
            Ok(Command::Send { ack, .. }) => {
                if let Some(ack) = ack {
                    let _ = ack.send(Err(ClientError::NotConnected));
                }
            }
            Ok(Command::Close) | Err(_) => return,
        }
    }
}

struct Session<'a> {
    id: SessionId,
    shared: &'a Shared,
    commands: &'a flume::Receiver<Command>,
    receive_buffer_size: usize,
}

impl Session<'_> {
    fn report(&self, error: &io::Error) {
        tracing::warn!("Session {} socket error: {}", self.id, error);
        self.shared
            .events
            .dispatch(&SocketEvent::Error(SocketErrorCode::from(error)));
    }

    /// Receive loop for TCP and TLS. Each read is one packet.
    async fn stream_loop<S>(&self, stream: S) -> Ending
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut chunk = vec![0u8; self.receive_buffer_size];

        loop {
            select! {
                read = reader.read(&mut chunk) => match read {
                    Ok(0) => return Ending::PeerClosed,
                    Ok(n) => self.shared.packets.push(&chunk[..n]),
                    Err(e) => {
                        self.report(&e);
                        return Ending::Failed;
                    }
                },

                cmd = self.commands.recv_async() => match cmd {
                    Ok(Command::Send { payload, ack }) => {
                        let written = async {
                            writer.write_all(&payload).await?;
                            writer.flush().await
                        }
                        .await;

                        match written {
                            Ok(()) => {
                                if let Some(ack) = ack {
                                    let _ = ack.send(Ok(payload.len()));
                                }
                            }
                            Err(e) => {
                                self.report(&e);
                                if let Some(ack) = ack {
                                    let _ = ack.send(Err(ClientError::Transport(e)));
                                }
                                return Ending::Failed;
                            }
                        }
                    }
                    Ok(Command::Close) | Err(_) => {
                        if let Err(e) = writer.shutdown().await {
                            tracing::debug!("Session {} shutdown: {}", self.id, e);
                        }
                        return Ending::Closed;
                    }
                },
            }
        }
    }

    /// Receive loop for UDP. Each datagram is one packet, and receive errors
    /// do not end the session.
    async fn datagram_loop(&self, socket: UdpSocket) -> Ending {
        let mut chunk = vec![0u8; self.receive_buffer_size];

        loop {
            select! {
                recv = socket.recv(&mut chunk) => match recv {
                    Ok(n) => self.shared.packets.push(&chunk[..n]),
                    // e.g. ICMP port unreachable surfacing as ConnectionRefused
                    Err(e) => self.report(&e),
                },

                cmd = self.commands.recv_async() => match cmd {
                    Ok(Command::Send { payload, ack }) => {
                        let sent = socket.send(&payload).await;
                        if let Err(e) = &sent {
                            self.report(e);
                        }
                        if let Some(ack) = ack {
                            let _ = ack.send(sent.map_err(ClientError::Transport));
                        }
                    }
                    Ok(Command::Close) | Err(_) => return Ending::Closed,
                },
            }
        }
    }
}
