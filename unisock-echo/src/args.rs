use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "unisock-echo")]
#[command(about = "Interactive echo client over TCP, UDP or TLS")]
#[command(version)]
#[group(id = "EchoArgs")]
pub struct Args {
    #[command(flatten)]
    pub connection: unisock_client::args::Args,

    /// Number of extra copies sent for every message
    #[arg(long, default_value_t = 0)]
    pub repeat: u32,

    /// Block until each message is written instead of queueing it
    #[arg(long)]
    pub sync_send: bool,

    /// Frames per second of the drain loop
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..=1000))]
    pub fps: u32,

    /// Trusted CA certificates for TLS (PEM)
    #[arg(long, value_name = "FILE")]
    pub ca_file: Option<PathBuf>,

    /// Client certificate and private key for TLS (PEM, or PKCS#12 for
    /// .p12/.pfx files)
    #[arg(long, value_name = "FILE")]
    pub client_identity: Option<PathBuf>,

    /// Passphrase of a PKCS#12 client identity
    #[arg(long, value_name = "PASSWORD", env = "UNISOCK_IDENTITY_PASSWORD", hide_env_values = true)]
    pub client_identity_password: Option<String>,
}

impl Args {
    /// True if the client identity file looks like a PKCS#12 bundle.
    pub fn identity_is_pkcs12(&self) -> bool {
        self.client_identity
            .as_deref()
            .and_then(|path| path.extension())
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("p12") || ext.eq_ignore_ascii_case("pfx"))
    }
}
