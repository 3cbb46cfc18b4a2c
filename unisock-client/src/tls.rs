//! TLS context and certificate validation policy.
//!
//! A [`TlsContext`] collects everything the TLS variant needs before it can
//! dial: protocol versions, trust roots, an optional client identity, and the
//! [`CertificatePolicy`] that decides whether a server certificate is
//! accepted. Certificate material is always supplied as bytes.
//!
//! # Examples
//!
//! ```no_run
//! use unisock_client::tls::{CertificatePolicy, TlsContext};
//! use unisock_client::config::TlsProtocol;
//!
//! # fn example(ca_pem: &[u8]) -> Result<(), unisock_client::ClientError> {
//! let context = TlsContext::new()
//!     .with_protocol(TlsProtocol::Tls12)
//!     .without_system_roots()
//!     .add_root_certificates_pem(ca_pem)?
//!     .with_validation_callback(|check| {
//!         // Only chains signed by our private CA
//!         check.error.is_none()
//!     });
//! # let _ = context;
//! # Ok(())
//! # }
//! ```

use crate::config::{TlsConfig, TlsProtocol};
use crate::errors::ClientError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{ring, CryptoProvider};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::pem::PemObject;
use p12_keystore::{KeyStore, KeyStoreEntry};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// What a validation callback gets to look at.
#[derive(Debug)]
pub struct CertificateCheck<'a> {
    /// Name the client is validating against.
    pub server_name: &'a str,
    /// The server's end-entity certificate (DER).
    pub end_entity: &'a CertificateDer<'a>,
    /// Intermediate certificates sent by the server.
    pub intermediates: &'a [CertificateDer<'a>],
    /// Why standard validation rejected the chain, if it did.
    pub error: Option<&'a rustls::Error>,
}

type ValidationCallback = Arc<dyn Fn(&CertificateCheck<'_>) -> bool + Send + Sync>;

/// Decides whether a server certificate is accepted.
#[derive(Clone, Default)]
pub enum CertificatePolicy {
    /// Accept only chains that pass standard validation.
    #[default]
    Strict,
    /// Accept every certificate (DANGEROUS - use only for testing).
    /// Validation failures are still logged.
    AcceptInvalid,
    /// Let a callback decide. It is invoked for every handshake, with the
    /// standard validation result attached.
    Custom(ValidationCallback),
}

impl fmt::Debug for CertificatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => write!(f, "Strict"),
            Self::AcceptInvalid => write!(f, "AcceptInvalid"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl CertificatePolicy {
    /// Apply the policy to the outcome of standard validation.
    fn decide(&self, check: &CertificateCheck<'_>) -> bool {
        match self {
            Self::Strict => check.error.is_none(),
            Self::AcceptInvalid => true,
            Self::Custom(callback) => {
                match catch_unwind(AssertUnwindSafe(|| callback(check))) {
                    Ok(verdict) => verdict,
                    Err(_) => {
                        tracing::error!(
                            "Certificate validation callback panicked for {}, rejecting",
                            check.server_name
                        );
                        false
                    }
                }
            }
        }
    }
}

/// TLS settings consumed by [`TlsClient`](crate::TlsClient).
pub struct TlsContext {
    protocol: TlsProtocol,
    policy: CertificatePolicy,
    use_system_roots: bool,
    extra_roots: Vec<CertificateDer<'static>>,
    identity: Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>,
    server_name: Option<String>,
}

impl Default for TlsContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("protocol", &self.protocol)
            .field("policy", &self.policy)
            .field("use_system_roots", &self.use_system_roots)
            .field("extra_roots", &self.extra_roots.len())
            .field("client_identity", &self.identity.is_some())
            .field("server_name", &self.server_name)
            .finish()
    }
}

impl TlsContext {
    /// Secure defaults: TLS 1.2, system trust roots, strict validation.
    pub fn new() -> Self {
        Self {
            protocol: TlsProtocol::Tls12,
            policy: CertificatePolicy::Strict,
            use_system_roots: true,
            extra_roots: Vec::new(),
            identity: None,
            server_name: None,
        }
    }

    /// Build a context from the `[tls]` configuration section.
    pub fn from_config(config: &TlsConfig) -> Self {
        let mut context = Self::new().with_protocol(config.protocol);
        if config.accept_invalid_certs {
            context = context.with_policy(CertificatePolicy::AcceptInvalid);
        }
        if let Some(name) = &config.server_name {
            context = context.with_server_name(name.clone());
        }
        context
    }

    /// Select the protocol versions to offer.
    #[must_use]
    pub fn with_protocol(mut self, protocol: TlsProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Replace the certificate policy.
    #[must_use]
    pub fn with_policy(mut self, policy: CertificatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Shorthand for [`CertificatePolicy::Custom`].
    #[must_use]
    pub fn with_validation_callback<F>(self, callback: F) -> Self
    where
        F: Fn(&CertificateCheck<'_>) -> bool + Send + Sync + 'static,
    {
        self.with_policy(CertificatePolicy::Custom(Arc::new(callback)))
    }

    /// Override the name used for SNI and validation.
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Do not load the operating system's trust roots.
    #[must_use]
    pub fn without_system_roots(mut self) -> Self {
        self.use_system_roots = false;
        self
    }

    /// Trust an additional DER-encoded root certificate.
    #[must_use]
    pub fn add_root_certificate(mut self, der: Vec<u8>) -> Self {
        self.extra_roots.push(CertificateDer::from(der));
        self
    }

    /// Trust every certificate in a PEM blob.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::TlsError`] if the PEM is malformed or holds no
    /// certificate.
    pub fn add_root_certificates_pem(mut self, pem: &[u8]) -> Result<Self, ClientError> {
        let certs = parse_certificates(pem)?;
        self.extra_roots.extend(certs);
        Ok(self)
    }

    /// Present a client certificate. The PEM blob must hold the certificate
    /// chain followed (or preceded) by its private key.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::TlsError`] if either part is missing or
    /// malformed.
    pub fn with_client_identity_pem(mut self, pem: &[u8]) -> Result<Self, ClientError> {
        let chain = parse_certificates(pem)?;
        let key = PrivateKeyDer::from_pem_slice(pem)
            .map_err(|e| ClientError::TlsError(format!("Invalid client private key: {e}")))?;
        self.identity = Some((chain, key));
        Ok(self)
    }

    /// Present a client certificate from a password-protected PKCS#12
    /// bundle (`.p12` / `.pfx`). The first private key entry is used along
    /// with its certificate chain.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::TlsError`] if the bundle cannot be decrypted
    /// with `passphrase` or holds no private key with a certificate.
    pub fn with_client_identity_pkcs12(
        mut self,
        der: &[u8],
        passphrase: &str,
    ) -> Result<Self, ClientError> {
        let keystore = KeyStore::from_pkcs12(der, passphrase)
            .map_err(|e| ClientError::TlsError(format!("Failed to open PKCS#12 bundle: {e}")))?;

        let entry = keystore
            .entries()
            .find_map(|(_, entry)| match entry {
                KeyStoreEntry::PrivateKeyChain(chain) => Some(chain),
                _ => None,
            })
            .ok_or_else(|| ClientError::TlsError("No private key in PKCS#12 bundle".to_string()))?;

        let chain: Vec<CertificateDer<'static>> = entry
            .chain()
            .iter()
            .map(|cert| CertificateDer::from(cert.as_der().to_vec()))
            .collect();
        if chain.is_empty() {
            return Err(ClientError::TlsError(
                "No certificate for the private key in PKCS#12 bundle".to_string(),
            ));
        }

        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(entry.key().to_vec()));
        self.identity = Some((chain, key));
        Ok(self)
    }

    /// The protocol versions that will be offered.
    pub fn protocol(&self) -> TlsProtocol {
        self.protocol
    }

    /// The server name override, if any.
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Build the rustls client configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::TlsError`] if the protocol selection or the
    /// client identity is rejected by rustls.
    pub fn build_client_config(&self) -> Result<Arc<ClientConfig>, ClientError> {
        let provider = Arc::new(ring::default_provider());

        let mut roots = RootCertStore::empty();
        if self.use_system_roots {
            match rustls_native_certs::load_native_certs() {
                Ok(certs) => {
                    let (added, ignored) = roots.add_parsable_certificates(certs);
                    tracing::debug!("Loaded {} system root certificates ({} ignored)", added, ignored);
                }
                Err(e) => tracing::warn!("Failed to load system certificates: {}", e),
            }
        }
        let (added, ignored) = roots.add_parsable_certificates(self.extra_roots.iter().cloned());
        if ignored > 0 {
            tracing::warn!("Ignored {} invalid custom root certificates", ignored);
        }
        tracing::debug!("Added {} custom root certificates", added);

        let verifier = PolicyVerifier::new(roots, Arc::clone(&provider), self.policy.clone())?;

        let versions: Vec<&'static rustls::SupportedProtocolVersion> = match self.protocol {
            TlsProtocol::Tls12 => vec![&rustls::version::TLS12],
            TlsProtocol::Tls13 => vec![&rustls::version::TLS13],
            TlsProtocol::Any => rustls::ALL_VERSIONS.to_vec(),
        };

        let builder = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&versions)
            .map_err(|e| ClientError::TlsError(format!("Unsupported protocol selection: {e}")))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier));

        let config = match &self.identity {
            Some((chain, key)) => builder
                .with_client_auth_cert(chain.clone(), key.clone_key())
                .map_err(|e| ClientError::TlsError(format!("Invalid client identity: {e}")))?,
            None => builder.with_no_client_auth(),
        };

        Ok(Arc::new(config))
    }
}

fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, ClientError> {
    let certs = CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ClientError::TlsError(format!("Invalid PEM certificate: {e}")))?;
    if certs.is_empty() {
        return Err(ClientError::TlsError(
            "No certificate found in PEM data".to_string(),
        ));
    }
    Ok(certs)
}

/// Runs standard WebPKI validation and hands the result to the policy.
struct PolicyVerifier {
    webpki: Option<Arc<WebPkiServerVerifier>>,
    provider: Arc<CryptoProvider>,
    policy: CertificatePolicy,
}

impl fmt::Debug for PolicyVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyVerifier")
            .field("has_roots", &self.webpki.is_some())
            .field("policy", &self.policy)
            .finish()
    }
}

impl PolicyVerifier {
    fn new(
        roots: RootCertStore,
        provider: Arc<CryptoProvider>,
        policy: CertificatePolicy,
    ) -> Result<Self, ClientError> {
        // An empty store cannot build a verifier; every chain is then untrusted
        let webpki = if roots.is_empty() {
            None
        } else {
            Some(
                WebPkiServerVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
                    .build()
                    .map_err(|e| ClientError::TlsError(format!("Failed to build verifier: {e}")))?,
            )
        };

        if matches!(policy, CertificatePolicy::AcceptInvalid) {
            tracing::warn!("TLS certificate verification is DISABLED - insecure!");
        }

        Ok(Self {
            webpki,
            provider,
            policy,
        })
    }
}

impl ServerCertVerifier for PolicyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let outcome = match &self.webpki {
            Some(webpki) => webpki
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
                .map(|_| ()),
            None => Err(rustls::Error::InvalidCertificate(
                CertificateError::UnknownIssuer,
            )),
        };

        let name = server_name.to_str();
        if let Err(e) = &outcome {
            tracing::warn!("Certificate validation for {} failed: {}", name, e);
        }

        let check = CertificateCheck {
            server_name: &name,
            end_entity,
            intermediates,
            error: outcome.as_ref().err(),
        };

        if self.policy.decide(&check) {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(outcome.err().unwrap_or_else(|| {
                rustls::Error::General("certificate rejected by validation callback".to_string())
            }))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check<'a>(
        cert: &'a CertificateDer<'a>,
        error: Option<&'a rustls::Error>,
    ) -> CertificateCheck<'a> {
        CertificateCheck {
            server_name: "localhost",
            end_entity: cert,
            intermediates: &[],
            error,
        }
    }

    #[test]
    fn test_context_defaults() {
        let context = TlsContext::new();
        assert_eq!(context.protocol(), TlsProtocol::Tls12);
        assert!(matches!(context.policy, CertificatePolicy::Strict));
        assert!(context.use_system_roots);
        assert!(context.server_name().is_none());
    }

    #[test]
    fn test_context_from_config() {
        let config = TlsConfig {
            protocol: TlsProtocol::Tls13,
            server_name: Some("example.com".to_string()),
            accept_invalid_certs: true,
        };
        let context = TlsContext::from_config(&config);
        assert_eq!(context.protocol(), TlsProtocol::Tls13);
        assert_eq!(context.server_name(), Some("example.com"));
        assert!(matches!(context.policy, CertificatePolicy::AcceptInvalid));
    }

    #[test]
    fn test_policy_decisions() {
        let cert = CertificateDer::from(vec![0x30, 0x82]);
        let error = rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer);

        assert!(CertificatePolicy::Strict.decide(&check(&cert, None)));
        assert!(!CertificatePolicy::Strict.decide(&check(&cert, Some(&error))));
        assert!(CertificatePolicy::AcceptInvalid.decide(&check(&cert, Some(&error))));

        let pinned = CertificatePolicy::Custom(Arc::new(|check: &CertificateCheck<'_>| {
            check.server_name == "localhost"
        }));
        assert!(pinned.decide(&check(&cert, Some(&error))));
    }

    #[test]
    fn test_panicking_callback_rejects() {
        let cert = CertificateDer::from(vec![0x30, 0x82]);
        let policy = CertificatePolicy::Custom(Arc::new(|_: &CertificateCheck<'_>| -> bool {
            panic!("callback bug")
        }));
        assert!(!policy.decide(&check(&cert, None)));
    }

    #[test]
    fn test_pem_without_certificates_is_rejected() {
        let result = TlsContext::new().add_root_certificates_pem(b"not a certificate");
        assert!(matches!(result, Err(ClientError::TlsError(_))));
    }

    #[test]
    fn test_malformed_pkcs12_is_rejected() {
        let result = TlsContext::new().with_client_identity_pkcs12(&[0x30, 0x03, 0x02, 0x01], "secret");
        assert!(matches!(result, Err(ClientError::TlsError(_))));
    }

    #[test]
    fn test_client_config_builds_for_each_protocol() {
        for protocol in [TlsProtocol::Tls12, TlsProtocol::Tls13, TlsProtocol::Any] {
            let context = TlsContext::new()
                .without_system_roots()
                .with_protocol(protocol);
            assert!(context.build_client_config().is_ok());
        }
    }
}
