mod app;
mod args;

use anyhow::{Context, Result};
use app::EchoApp;
use args::Args;
use clap::Parser;
use std::io::BufRead;
use std::time::Duration;
use tracing::{info, warn};
use unisock_client::{Config, ManagedClient, SocketClient, TlsContext, TransportKind};

fn init_logging(verbose: u8) {
    let log_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("unisock_echo={log_level},unisock_client={log_level}").into()
            }),
        )
        .with_target(false)
        .init();
}

fn tls_context(config: &Config, args: &Args) -> Result<Option<TlsContext>> {
    if config.connection.transport != TransportKind::Tls {
        return Ok(None);
    }

    let mut context = TlsContext::from_config(&config.tls);
    if let Some(path) = &args.ca_file {
        let pem = std::fs::read(path)
            .with_context(|| format!("Failed to read CA file '{}'", path.display()))?;
        context = context.add_root_certificates_pem(&pem)?;
    }
    if let Some(path) = &args.client_identity {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read client identity '{}'", path.display()))?;
        context = match (&args.client_identity_password, args.identity_is_pkcs12()) {
            (Some(password), _) => context.with_client_identity_pkcs12(&bytes, password)?,
            (None, true) => context.with_client_identity_pkcs12(&bytes, "")?,
            (None, false) => context.with_client_identity_pem(&bytes)?,
        };
    }
    Ok(Some(context))
}

/// Feed console lines into a channel so the frame loop never blocks on stdin.
fn spawn_stdin_reader() -> flume::Receiver<String> {
    let (tx, rx) = flume::unbounded();
    std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .map(|_| ())
        .unwrap_or_else(|e| warn!("Failed to start stdin reader: {}", e));
    rx
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.connection.verbose);

    info!("Starting unisock-echo {}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_args(&args.connection)?;
    let async_send = !args.sync_send;
    if config.connection.transport == TransportKind::Udp && async_send {
        warn!("UDP sends are always synchronous; queued sends only keep their order");
    }

    let tls = tls_context(&config, &args)?;
    let client = ManagedClient::from_config(&config, tls.as_ref())?;
    info!(
        "Connecting to {} via {} (reconnect {})",
        client.endpoint(),
        config.connection.transport,
        if client.policy().enabled { "on" } else { "off" }
    );
    println!("Type a message to echo it, or /connect /disconnect /reconnect /status /quit");

    let input = spawn_stdin_reader();
    let mut app = EchoApp::new(client, input, args.repeat, async_send);
    app.run(Duration::from_secs(1) / args.fps)?;

    info!("Bye");
    Ok(())
}
