//! # TLS Layer
//!
//! TLS 1.3 only, on the `ring` provider. A [`TlsOptions`] value carries everything an actor
//! needs for either side of the handshake:
//! - an identity (certificate chain + key), always required by an acceptor and by a connector
//!   taking part in mutual TLS
//! - trusted roots (explicit PEM bundle and/or the platform store)
//! - whether the acceptor demands a client certificate
//! - CRL-backed revocation checking
//! - an optional validator deciding over the presented certificate, the chain and the outcome of
//!   default validation
//!
//! Without a validator a certificate is accepted iff default chain validation reported no error.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{ResolvesClientCert, WebPkiServerVerifier};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{
    CertificateDer, CertificateRevocationListDer, PrivateKeyDer, ServerName, UnixTime,
};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::sign::CertifiedKey;
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, DistinguishedName, RootCertStore,
    ServerConfig, SignatureScheme,
};
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tokio_rustls::{client, server, TlsAcceptor, TlsConnector};
use tracing::{debug, warn};

use crate::error::{ProtocolError, Result};

/// What a [`CertificateValidator`] gets to look at.
#[derive(Debug)]
pub struct CertificateContext<'a> {
    /// End-entity certificate presented by the remote side.
    pub peer_certificate: &'a CertificateDer<'a>,
    /// Intermediates sent along with it.
    pub chain: &'a [CertificateDer<'a>],
    /// Why default validation rejected the certificate, `None` when it passed.
    pub validation_error: Option<&'a rustls::Error>,
}

/// Custom accept/reject decision replacing the default "no validation error" rule.
pub type CertificateValidator = Arc<dyn Fn(&CertificateContext<'_>) -> bool + Send + Sync>;

/// SHA-256 over the DER encoding of a certificate.
pub fn certificate_fingerprint(cert: &CertificateDer<'_>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(cert.as_ref());
    hasher.finalize().into()
}

/// Read every certificate from a PEM file.
pub fn load_certificates<P: AsRef<Path>>(path: P) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path.as_ref()).map_err(|e| {
        ProtocolError::TlsError(format!(
            "Failed to open certificate file {}: {e}",
            path.as_ref().display()
        ))
    })?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ProtocolError::TlsError(format!("Failed to parse certificate: {e}")))?;

    if certs.is_empty() {
        return Err(ProtocolError::TlsError(format!(
            "No certificates found in {}",
            path.as_ref().display()
        )));
    }
    Ok(certs)
}

/// Read every CRL from a PEM file.
pub fn load_crls<P: AsRef<Path>>(path: P) -> Result<Vec<CertificateRevocationListDer<'static>>> {
    let file = File::open(path.as_ref()).map_err(|e| {
        ProtocolError::TlsError(format!(
            "Failed to open CRL file {}: {e}",
            path.as_ref().display()
        ))
    })?;
    rustls_pemfile::crls(&mut BufReader::new(file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ProtocolError::TlsError(format!("Failed to parse CRL: {e}")))
}

/// A certificate chain and the private key it certifies.
#[derive(Clone)]
pub struct TlsIdentity {
    chain: Vec<CertificateDer<'static>>,
    key: Arc<PrivateKeyDer<'static>>,
}

impl TlsIdentity {
    pub fn new(chain: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Result<Self> {
        if chain.is_empty() {
            return Err(ProtocolError::TlsError(
                "Identity needs at least one certificate".into(),
            ));
        }
        Ok(Self {
            chain,
            key: Arc::new(key),
        })
    }

    /// Parse a PEM certificate chain and a PEM private key (PKCS#8, PKCS#1 or SEC1).
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let chain = rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ProtocolError::TlsError(format!("Failed to parse certificate: {e}")))?;
        let key = rustls_pemfile::private_key(&mut &key_pem[..])
            .map_err(|e| ProtocolError::TlsError(format!("Failed to parse private key: {e}")))?
            .ok_or_else(|| ProtocolError::TlsError("No private key found".into()))?;
        Self::new(chain, key)
    }

    pub fn from_pem_files<P: AsRef<Path>>(cert_path: P, key_path: P) -> Result<Self> {
        let cert_pem = std::fs::read(cert_path.as_ref())
            .map_err(|e| ProtocolError::TlsError(format!("Failed to open cert file: {e}")))?;
        let key_pem = std::fs::read(key_path.as_ref())
            .map_err(|e| ProtocolError::TlsError(format!("Failed to open key file: {e}")))?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    /// The end-entity certificate.
    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.chain[0]
    }

    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    fn certified_key(&self, provider: &CryptoProvider) -> Result<Arc<CertifiedKey>> {
        let signer = provider.key_provider.load_private_key(self.key.clone_key())?;
        Ok(Arc::new(CertifiedKey::new(self.chain.clone(), signer)))
    }
}

impl fmt::Debug for TlsIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsIdentity")
            .field("chain_len", &self.chain.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

/// TLS settings for one side of a connection.
#[derive(Clone, Default)]
pub struct TlsOptions {
    identity: Option<TlsIdentity>,
    trusted_roots: Vec<CertificateDer<'static>>,
    use_native_roots: bool,
    require_client_certificate: bool,
    check_revocation: bool,
    revocation_lists: Vec<CertificateRevocationListDer<'static>>,
    validator: Option<CertificateValidator>,
    server_name: Option<String>,
}

impl TlsOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(mut self, identity: TlsIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_trusted_roots(mut self, roots: Vec<CertificateDer<'static>>) -> Self {
        self.trusted_roots.extend(roots);
        self
    }

    /// Also trust the platform certificate store.
    pub fn with_native_roots(mut self, enabled: bool) -> Self {
        self.use_native_roots = enabled;
        self
    }

    /// Acceptor side: refuse clients that do not present a valid certificate.
    pub fn require_client_certificate(mut self, required: bool) -> Self {
        self.require_client_certificate = required;
        self
    }

    /// Consult the configured CRLs during default validation.
    pub fn check_revocation(mut self, enabled: bool) -> Self {
        self.check_revocation = enabled;
        self
    }

    pub fn with_revocation_lists(mut self, crls: Vec<CertificateRevocationListDer<'static>>) -> Self {
        self.revocation_lists.extend(crls);
        self
    }

    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&CertificateContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Accept exactly the certificate whose SHA-256 fingerprint matches, whatever its chain.
    pub fn with_pinned_certificate(self, fingerprint: [u8; 32]) -> Self {
        self.with_validator(move |ctx| certificate_fingerprint(ctx.peer_certificate) == fingerprint)
    }

    /// Validate the server against this name instead of the endpoint host.
    pub fn with_server_name<S: Into<String>>(mut self, name: S) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn identity(&self) -> Option<&TlsIdentity> {
        self.identity.as_ref()
    }

    pub fn requires_client_certificate(&self) -> bool {
        self.require_client_certificate
    }

    pub fn checks_revocation(&self) -> bool {
        self.check_revocation
    }

    fn provider() -> Arc<CryptoProvider> {
        Arc::new(ring::default_provider())
    }

    fn root_store(&self) -> Result<Arc<RootCertStore>> {
        let mut roots = RootCertStore::empty();
        for cert in &self.trusted_roots {
            roots.add(cert.clone())?;
        }

        if self.use_native_roots {
            let loaded = rustls_native_certs::load_native_certs();
            for error in &loaded.errors {
                warn!(error = %error, "Failed to load native root certificate");
            }
            let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
            debug!(added, ignored, "Loaded native root certificates");
        }

        Ok(Arc::new(roots))
    }

    fn crls(&self) -> Vec<CertificateRevocationListDer<'static>> {
        if self.check_revocation {
            if self.revocation_lists.is_empty() {
                warn!("Revocation checking requested without any CRL; certificates are not checked");
            }
            self.revocation_lists.clone()
        } else {
            Vec::new()
        }
    }

    /// Build the client half. Validation of the server certificate always runs.
    pub(crate) fn client(&self) -> Result<ClientTls> {
        let provider = Self::provider();
        let roots = self.root_store()?;

        let webpki = if roots.is_empty() {
            None
        } else {
            Some(
                WebPkiServerVerifier::builder_with_provider(roots, provider.clone())
                    .with_crls(self.crls())
                    .build()
                    .map_err(|e| ProtocolError::TlsError(format!("Invalid server verifier: {e}")))?,
            )
        };

        let verifier = Arc::new(ServerVerifier {
            webpki,
            validator: self.validator.clone(),
            provider: provider.clone(),
        });

        let identity = match &self.identity {
            Some(identity) => Some(identity.certified_key(&provider)?),
            None => None,
        };
        let missing_identity = Arc::new(AtomicBool::new(false));
        let resolver = Arc::new(ClientIdentity {
            key: identity,
            requested_without_identity: missing_identity.clone(),
        });

        let config = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_client_cert_resolver(resolver);

        let server_name = match &self.server_name {
            Some(name) => Some(parse_server_name(name)?),
            None => None,
        };

        Ok(ClientTls {
            connector: TlsConnector::from(Arc::new(config)),
            server_name,
            missing_identity,
        })
    }

    /// Build the server half. Fails when no identity is configured.
    pub(crate) fn server(&self) -> Result<ServerTls> {
        let identity = self.identity.as_ref().ok_or_else(|| {
            ProtocolError::TlsError("An acceptor using TLS needs a certificate".into())
        })?;
        let provider = Self::provider();

        let builder = ServerConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&[&rustls::version::TLS13])?;

        let builder = if self.require_client_certificate {
            let roots = self.root_store()?;
            let webpki = if roots.is_empty() {
                None
            } else {
                Some(
                    WebPkiClientVerifier::builder_with_provider(roots, provider.clone())
                        .with_crls(self.crls())
                        .build()
                        .map_err(|e| {
                            ProtocolError::TlsError(format!("Invalid client verifier: {e}"))
                        })?,
                )
            };
            builder.with_client_cert_verifier(Arc::new(ClientVerifier {
                webpki,
                validator: self.validator.clone(),
                provider,
            }))
        } else {
            builder.with_no_client_auth()
        };

        let mut config =
            builder.with_single_cert(identity.chain.clone(), identity.key.clone_key())?;
        // Unread tickets on the client side would turn a graceful close into a reset.
        config.send_tls13_tickets = 0;

        Ok(ServerTls {
            acceptor: TlsAcceptor::from(Arc::new(config)),
        })
    }
}

impl fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsOptions")
            .field("identity", &self.identity)
            .field("trusted_roots", &self.trusted_roots.len())
            .field("use_native_roots", &self.use_native_roots)
            .field("require_client_certificate", &self.require_client_certificate)
            .field("check_revocation", &self.check_revocation)
            .field("revocation_lists", &self.revocation_lists.len())
            .field("validator", &self.validator.is_some())
            .field("server_name", &self.server_name)
            .finish()
    }
}

fn parse_server_name(name: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(name.to_string())
        .map_err(|_| ProtocolError::TlsError(format!("Invalid server name: {name}")))
}

fn decide(
    validator: Option<&CertificateValidator>,
    peer_certificate: &CertificateDer<'_>,
    chain: &[CertificateDer<'_>],
    validation_error: Option<&rustls::Error>,
) -> bool {
    match validator {
        Some(validator) => validator(&CertificateContext {
            peer_certificate,
            chain,
            validation_error,
        }),
        None => validation_error.is_none(),
    }
}

fn rejection(default_outcome: std::result::Result<(), rustls::Error>) -> rustls::Error {
    match default_outcome {
        Err(error) => error,
        Ok(()) => rustls::Error::InvalidCertificate(CertificateError::ApplicationVerificationFailure),
    }
}

/// Client-side check of the server certificate.
struct ServerVerifier {
    webpki: Option<Arc<WebPkiServerVerifier>>,
    validator: Option<CertificateValidator>,
    provider: Arc<CryptoProvider>,
}

impl fmt::Debug for ServerVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerVerifier")
            .field("webpki", &self.webpki.is_some())
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

impl ServerCertVerifier for ServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let outcome = match &self.webpki {
            Some(webpki) => webpki
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
                .map(|_| ()),
            None => Err(rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer)),
        };

        if decide(
            self.validator.as_ref(),
            end_entity,
            intermediates,
            outcome.as_ref().err(),
        ) {
            Ok(ServerCertVerified::assertion())
        } else {
            debug!(server = ?server_name, "Server certificate rejected");
            Err(rejection(outcome))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
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
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
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

/// Server-side check of a mandatory client certificate.
struct ClientVerifier {
    webpki: Option<Arc<dyn ClientCertVerifier>>,
    validator: Option<CertificateValidator>,
    provider: Arc<CryptoProvider>,
}

impl fmt::Debug for ClientVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientVerifier")
            .field("webpki", &self.webpki.is_some())
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

impl ClientCertVerifier for ClientVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        match &self.webpki {
            Some(webpki) => webpki.root_hint_subjects(),
            None => &[],
        }
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        let outcome = match &self.webpki {
            Some(webpki) => webpki
                .verify_client_cert(end_entity, intermediates, now)
                .map(|_| ()),
            None => Err(rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer)),
        };

        if decide(
            self.validator.as_ref(),
            end_entity,
            intermediates,
            outcome.as_ref().err(),
        ) {
            Ok(ClientCertVerified::assertion())
        } else {
            debug!("Client certificate rejected");
            Err(rejection(outcome))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
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
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
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

/// Offers the connector identity and records a certificate request it could not satisfy.
#[derive(Debug)]
struct ClientIdentity {
    key: Option<Arc<CertifiedKey>>,
    requested_without_identity: Arc<AtomicBool>,
}

impl ResolvesClientCert for ClientIdentity {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        if self.key.is_none() {
            self.requested_without_identity.store(true, Ordering::Release);
        }
        self.key.clone()
    }

    fn has_certs(&self) -> bool {
        self.key.is_some()
    }
}

/// Connector half of the handshake.
pub(crate) struct ClientTls {
    connector: TlsConnector,
    server_name: Option<ServerName<'static>>,
    missing_identity: Arc<AtomicBool>,
}

impl ClientTls {
    pub(crate) async fn handshake(
        &self,
        stream: TcpStream,
        host: &str,
    ) -> Result<client::TlsStream<TcpStream>> {
        self.missing_identity.store(false, Ordering::Release);

        let name = match &self.server_name {
            Some(name) => name.clone(),
            None => parse_server_name(host)?,
        };

        let tls = self
            .connector
            .connect(name, stream)
            .await
            .map_err(|e| ProtocolError::HandshakeError(e.to_string()))?;

        // Under TLS 1.3 the client finishes before the server judges the empty certificate.
        if self.missing_identity.load(Ordering::Acquire) {
            return Err(ProtocolError::HandshakeError(
                "server requires a client certificate and none is configured".into(),
            ));
        }

        Ok(tls)
    }
}

/// Acceptor half of the handshake.
pub(crate) struct ServerTls {
    acceptor: TlsAcceptor,
}

impl ServerTls {
    pub(crate) async fn handshake(&self, stream: TcpStream) -> Result<server::TlsStream<TcpStream>> {
        self.acceptor
            .accept(stream)
            .await
            .map_err(|e| ProtocolError::HandshakeError(e.to_string()))
    }
}
