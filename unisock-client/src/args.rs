//! Command-line argument parsing for socket client applications.
//!
//! This module is only available when the `cli` feature is enabled.
//! It provides a structured way to parse command-line arguments and
//! convert them into a `Config` object.
//!
//! # Examples
//!
//! ```no_run
//! use unisock_client::args::Args;
//! use unisock_client::Config;
//!
//! let args = Args::parse();
//! let config = Config::from_args(&args)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::config::{Config, TlsProtocol, TransportKind};
use crate::errors::ClientError;
use clap::Parser;

/// Socket client command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Server address (host:port)
    ///
    /// Examples:
    ///   - 127.0.0.1:3333
    ///   - [::1]:3333
    ///   - echo.example.com:7
    #[arg(value_name = "SERVER")]
    pub server: String,

    /// Transport: tcp, udp or tls
    #[arg(short = 't', long, value_name = "KIND", default_value = "tcp")]
    pub transport: String,

    /// Connection timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Receive buffer size in bytes (also the largest packet)
    #[arg(long, value_name = "BYTES")]
    pub receive_buffer_size: Option<usize>,

    /// Send buffer size in bytes
    #[arg(long, value_name = "BYTES")]
    pub send_buffer_size: Option<usize>,

    /// Reconnect automatically after the connection drops
    #[arg(short = 'r', long)]
    pub reconnect: bool,

    /// Delay before reconnecting, in seconds
    #[arg(long, value_name = "SECONDS")]
    pub reconnect_delay: Option<f64>,

    /// TLS protocol version: tls12, tls13 or any
    #[arg(long, value_name = "VERSION")]
    pub tls_protocol: Option<String>,

    /// Server name for TLS validation (defaults to the host)
    #[arg(long, value_name = "NAME")]
    pub tls_server_name: Option<String>,

    /// Disable TLS certificate verification (insecure)
    #[arg(long)]
    pub tls_insecure: bool,

    /// Configuration file path (TOML format)
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Parse command-line arguments.
    #[must_use]
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Parse arguments from an iterator.
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments are invalid.
    pub fn try_parse_from<I, T>(iter: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(iter)
    }
}

impl Config {
    /// Create a configuration from command-line arguments.
    ///
    /// If a config file is specified in the arguments, it will be loaded
    /// first, then overridden by explicit command-line arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The config file cannot be read or parsed
    /// - The server address or transport is invalid
    /// - The configuration validation fails
    pub fn from_args(args: &Args) -> Result<Self, ClientError> {
        // Start with config file if provided
        let mut config = if let Some(config_path) = &args.config {
            let config_str = std::fs::read_to_string(config_path).map_err(|e| {
                ClientError::Config(format!(
                    "Failed to read config file '{}': {}",
                    config_path, e
                ))
            })?;
            toml::from_str::<Config>(&config_str).map_err(|e| {
                ClientError::Config(format!(
                    "Failed to parse config file '{}': {}",
                    config_path, e
                ))
            })?
        } else {
            Config::default()
        };

        let (host, port) = parse_server_address(&args.server)?;
        config.connection.address = host;
        config.connection.port = port;
        config.connection.transport = args.transport.parse::<TransportKind>()?;

        if let Some(timeout_ms) = args.timeout_ms {
            config.connection.timeout_ms = timeout_ms;
        }
        if let Some(size) = args.receive_buffer_size {
            config.buffers.receive_buffer_size = size;
        }
        if let Some(size) = args.send_buffer_size {
            config.buffers.send_buffer_size = size;
        }

        if args.reconnect {
            config.reconnect.enabled = true;
        }
        if let Some(delay) = args.reconnect_delay {
            config.reconnect.delay_seconds = delay;
            if config.reconnect.max_delay_seconds < delay {
                config.reconnect.max_delay_seconds = delay;
            }
        }

        if let Some(protocol) = &args.tls_protocol {
            config.tls.protocol = protocol.parse::<TlsProtocol>()?;
        }
        if let Some(name) = &args.tls_server_name {
            config.tls.server_name = Some(name.clone());
        }
        if args.tls_insecure {
            config.tls.accept_invalid_certs = true;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Parse a server address in the format "host:port" or "[v6]:port".
fn parse_server_address(server: &str) -> Result<(String, u16), ClientError> {
    let (host, port) = server.rsplit_once(':').ok_or_else(|| {
        ClientError::Config(format!("Missing port in server address: {}", server))
    })?;

    let port = port
        .parse::<u16>()
        .map_err(|_| ClientError::Config(format!("Invalid port number: {}", port)))?;

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(ClientError::Config(format!(
            "Missing host in server address: {}",
            server
        )));
    }

    Ok((host.to_string(), port))
}
