//! Configuration types for the socket clients.

use crate::errors::ClientError;
use crate::session::Endpoint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Complete socket client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Socket buffer settings.
    #[serde(default)]
    pub buffers: BufferConfig,
    /// Reconnection settings.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// TLS settings (only used with [`TransportKind::Tls`]).
    #[serde(default)]
    pub tls: TlsConfig,
}

/// Transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Plain TCP stream.
    #[default]
    Tcp,
    /// Connected UDP datagram socket.
    Udp,
    /// TLS over TCP.
    Tls,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
            Self::Tls => write!(f, "tls"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "tls" | "ssl" => Ok(Self::Tls),
            other => Err(ClientError::Config(format!(
                "Unsupported transport: {other} (expected tcp, udp or tls)"
            ))),
        }
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Server hostname or IP address.
    #[serde(default)]
    pub address: String,
    /// Server port.
    #[serde(default)]
    pub port: u16,
    /// Transport to use.
    #[serde(default)]
    pub transport: TransportKind,
    /// Connection timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: 0,
            transport: TransportKind::default(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Socket buffer configuration.
///
/// `receive_buffer_size` is both the `SO_RCVBUF` hint and the largest packet
/// a single receive can produce. Consumers size their reusable drain buffer to
/// at least this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Receive buffer size in bytes.
    #[serde(default = "default_buffer_size")]
    pub receive_buffer_size: usize,
    /// Send buffer size in bytes.
    #[serde(default = "default_buffer_size")]
    pub send_buffer_size: usize,
}

fn default_buffer_size() -> usize {
    8192
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            receive_buffer_size: default_buffer_size(),
            send_buffer_size: default_buffer_size(),
        }
    }
}

/// Reconnection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Enable automatic reconnection after an unexpected disconnect.
    #[serde(default)]
    pub enabled: bool,
    /// Delay before the first retry, in seconds.
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: f64,
    /// Upper bound for the retry delay, in seconds.
    #[serde(default = "default_max_delay_seconds")]
    pub max_delay_seconds: f64,
    /// Multiplier applied to the delay after each consecutive failure
    /// (1.0 keeps the delay constant).
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Maximum number of consecutive retries (0 = infinite).
    #[serde(default)]
    pub max_retries: u32,
}

fn default_delay_seconds() -> f64 {
    1.0
}

fn default_max_delay_seconds() -> f64 {
    30.0
}

fn default_backoff_factor() -> f64 {
    1.0
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_seconds: default_delay_seconds(),
            max_delay_seconds: default_max_delay_seconds(),
            backoff_factor: default_backoff_factor(),
            max_retries: 0,
        }
    }
}

/// TLS protocol version selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsProtocol {
    /// TLS 1.2 only.
    #[default]
    Tls12,
    /// TLS 1.3 only.
    Tls13,
    /// Any version supported by the TLS stack.
    Any,
}

impl FromStr for TlsProtocol {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['.', '_', '-'], "").as_str() {
            "tls12" | "12" => Ok(Self::Tls12),
            "tls13" | "13" => Ok(Self::Tls13),
            "any" => Ok(Self::Any),
            _ => Err(ClientError::Config(format!("Unsupported TLS protocol: {s}"))),
        }
    }
}

/// TLS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Protocol versions to offer.
    #[serde(default)]
    pub protocol: TlsProtocol,
    /// Server name for SNI and certificate validation (defaults to the
    /// connection address).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    /// Accept certificates that fail validation (DANGEROUS - use only for
    /// testing). Failures are still logged.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Config {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Parse a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for this schema or the
    /// resulting configuration fails validation.
    pub fn from_toml_str(text: &str) -> Result<Self, ClientError> {
        let config: Config = toml::from_str(text)
            .map_err(|e| ClientError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&text)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.connection.address.is_empty() {
            return Err(ClientError::Config("Address cannot be empty".to_string()));
        }

        if self.connection.port == 0 {
            return Err(ClientError::Config("Port cannot be 0".to_string()));
        }

        if self.connection.timeout_ms == 0 {
            return Err(ClientError::Config("Timeout cannot be 0".to_string()));
        }

        if self.buffers.receive_buffer_size == 0 || self.buffers.send_buffer_size == 0 {
            return Err(ClientError::Config(
                "Buffer sizes must be greater than 0".to_string(),
            ));
        }

        let reconnect = &self.reconnect;
        if !reconnect.delay_seconds.is_finite() || reconnect.delay_seconds < 0.0 {
            return Err(ClientError::Config(
                "Reconnect delay must be a non-negative number of seconds".to_string(),
            ));
        }

        if !reconnect.max_delay_seconds.is_finite()
            || reconnect.max_delay_seconds < reconnect.delay_seconds
        {
            return Err(ClientError::Config(
                "Maximum reconnect delay must be at least the reconnect delay".to_string(),
            ));
        }

        if !reconnect.backoff_factor.is_finite() || reconnect.backoff_factor < 1.0 {
            return Err(ClientError::Config(
                "Backoff factor must be at least 1.0".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns the connection timeout duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.connection.timeout_ms)
    }

    /// Returns the configured remote endpoint.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.connection.address.clone(), self.connection.port)
    }
}

/// Builder for creating a `Config`.
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Sets the server hostname or IP address.
    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.connection.address = address.into();
        self
    }

    /// Sets the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.connection.port = port;
        self
    }

    /// Sets the transport.
    #[must_use]
    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.config.connection.transport = transport;
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.connection.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the receive buffer size in bytes.
    #[must_use]
    pub fn receive_buffer_size(mut self, size: usize) -> Self {
        self.config.buffers.receive_buffer_size = size;
        self
    }

    /// Sets the send buffer size in bytes.
    #[must_use]
    pub fn send_buffer_size(mut self, size: usize) -> Self {
        self.config.buffers.send_buffer_size = size;
        self
    }

    /// Enables or disables automatic reconnection.
    #[must_use]
    pub fn reconnect(mut self, enabled: bool) -> Self {
        self.config.reconnect.enabled = enabled;
        self
    }

    /// Sets the delay before reconnecting, in seconds.
    #[must_use]
    pub fn reconnect_delay_seconds(mut self, seconds: f64) -> Self {
        self.config.reconnect.delay_seconds = seconds;
        if self.config.reconnect.max_delay_seconds < seconds {
            self.config.reconnect.max_delay_seconds = seconds;
        }
        self
    }

    /// Sets the TLS protocol version.
    #[must_use]
    pub fn tls_protocol(mut self, protocol: TlsProtocol) -> Self {
        self.config.tls.protocol = protocol;
        self
    }

    /// Accept invalid TLS certificates (insecure, for testing only).
    #[must_use]
    pub fn tls_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.config.tls.accept_invalid_certs = accept;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> Result<Config, ClientError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
