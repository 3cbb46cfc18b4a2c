//! Frame loop of the echo client.
//!
//! The loop stands in for a render loop: once per frame it handles events and
//! console input, then drains every packet that arrived since the last frame.
//! Nothing in here blocks on the network except the explicit blocking
//! commands (`--sync-send`, `/disconnect`).

use std::time::{Duration, Instant};
use tracing::{info, warn};
use unisock_client::{ManagedClient, SocketClient, SocketEvent};

/// A line typed on the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Connect,
    Disconnect,
    Reconnect,
    Status,
    Quit,
    Message(String),
}

impl Input {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        match line.trim() {
            "" => None,
            "/connect" => Some(Self::Connect),
            "/disconnect" => Some(Self::Disconnect),
            "/reconnect" => Some(Self::Reconnect),
            "/status" => Some(Self::Status),
            "/quit" | "/exit" => Some(Self::Quit),
            _ => Some(Self::Message(line.to_string())),
        }
    }
}

pub struct EchoApp {
    client: ManagedClient,
    events: flume::Receiver<SocketEvent>,
    input: flume::Receiver<String>,
    repeat: u32,
    async_send: bool,
    scratch: Vec<u8>,
    frame: u64,
}

impl EchoApp {
    pub fn new(
        client: ManagedClient,
        input: flume::Receiver<String>,
        repeat: u32,
        async_send: bool,
    ) -> Self {
        let (_, events) = client.events().subscribe_channel(256);
        let scratch = vec![0u8; client.options().receive_buffer_size];
        Self {
            client,
            events,
            input,
            repeat,
            async_send,
            scratch,
            frame: 0,
        }
    }

    /// Run until `/quit` or the end of input.
    pub fn run(&mut self, frame_time: Duration) -> anyhow::Result<()> {
        self.client.connect_async()?;

        loop {
            let started = Instant::now();
            self.frame += 1;

            self.handle_events();
            if !self.handle_input() {
                break;
            }
            if let Some(messages) = self.drain() {
                print!("{messages}");
            }

            if let Some(rest) = frame_time.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }

        // Print whatever was still on its way
        if let Some(messages) = self.drain() {
            print!("{messages}");
        }
        self.client.shutdown();
        Ok(())
    }

    fn handle_events(&self) {
        for event in self.events.try_iter() {
            let session = self
                .client
                .id()
                .map_or_else(|| "-".to_string(), |id| id.to_string());
            match event {
                SocketEvent::Connected => {
                    info!("{} connected a new session with Id {}", self.client.kind(), session);
                }
                SocketEvent::Disconnected => {
                    info!("{} disconnected a session with Id {}", self.client.kind(), session);
                }
                SocketEvent::Error(code) => {
                    warn!("{} caught an error with code {}", self.client.kind(), code);
                }
            }
        }
    }

    /// Returns false when the loop should stop.
    fn handle_input(&self) -> bool {
        loop {
            let line = match self.input.try_recv() {
                Ok(line) => line,
                Err(flume::TryRecvError::Empty) => return true,
                Err(flume::TryRecvError::Disconnected) => return false,
            };

            match Input::parse(&line) {
                None => {}
                Some(Input::Quit) => return false,
                Some(Input::Connect) => {
                    if let Err(e) = self.client.connect_async() {
                        warn!("Connect failed: {}", e);
                    }
                }
                Some(Input::Disconnect) => {
                    if !self.client.disconnect() {
                        info!("Not connected");
                    }
                }
                Some(Input::Reconnect) => {
                    if let Err(e) = self.client.reconnect_async() {
                        warn!("Reconnect failed: {}", e);
                    }
                }
                Some(Input::Status) => {
                    info!(
                        "{} {} via {} (peer {:?})",
                        self.client.state(),
                        self.client.endpoint(),
                        self.client.kind(),
                        self.client.peer_addr()
                    );
                }
                Some(Input::Message(text)) => self.send_echo(text.as_bytes()),
            }
        }
    }

    fn send_echo(&self, message: &[u8]) {
        for _ in 0..=self.repeat {
            let result = if self.async_send {
                self.client.send_async(message)
            } else {
                self.client.send(message).map(|_| ())
            };

            if let Err(e) = result {
                warn!("Send failed: {}", e);
                return;
            }
        }
    }

    /// Drain every waiting packet into one report for this frame.
    fn drain(&mut self) -> Option<String> {
        if !self.client.has_enqueued_packages() {
            return None;
        }

        let mut report = format!("Messages received at frame {}:\n", self.frame);
        while let Some(len) = self.client.get_next_package(&mut self.scratch) {
            report.push_str(&String::from_utf8_lossy(&self.scratch[..len]));
            report.push('\n');
        }
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Input::parse("/connect\n"), Some(Input::Connect));
        assert_eq!(Input::parse("/disconnect"), Some(Input::Disconnect));
        assert_eq!(Input::parse("/reconnect\r\n"), Some(Input::Reconnect));
        assert_eq!(Input::parse("/exit"), Some(Input::Quit));
        assert_eq!(Input::parse("  \n"), None);
    }

    #[test]
    fn test_parse_message_keeps_spacing() {
        assert_eq!(
            Input::parse("  hello world \n"),
            Some(Input::Message("  hello world ".to_string()))
        );
    }
}
