//! TLS 1.3 handshakes between a connector and an acceptor over loopback

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use peer_transport::transport::tls::certificate_fingerprint;
use peer_transport::{
    Acceptor, CancellationToken, Connector, Endpoint, RetryPolicy, TlsIdentity, TlsOptions,
    TransportActor, TransportConfig,
};
use rcgen::{generate_simple_self_signed, CertifiedKey};
use rustls::pki_types::CertificateDer;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Secret {
    id: u32,
    body: String,
}

fn identity() -> TlsIdentity {
    let CertifiedKey { cert, key_pair } =
        generate_simple_self_signed(vec!["localhost".to_string()]).expect("certificate");
    TlsIdentity::from_pem(cert.pem().as_bytes(), key_pair.serialize_pem().as_bytes())
        .expect("identity")
}

fn root_of(identity: &TlsIdentity) -> Vec<CertificateDer<'static>> {
    vec![identity.certificate().clone()]
}

fn policy() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(20), Duration::from_secs(5))
}

fn config(tls: TlsOptions) -> Arc<TransportConfig> {
    Arc::new(TransportConfig::builder().tls(tls).build().unwrap())
}

/// Bind an acceptor with `server` options and point a connector with `client` options at it.
async fn pair(server: TlsOptions, client: TlsOptions) -> (Connector, Acceptor) {
    let mut acceptor = Acceptor::new(Endpoint::new("127.0.0.1", 0).unwrap(), config(server)).unwrap();
    let addr = acceptor.bind().await.unwrap();
    let connector = Connector::new(Endpoint::from(addr), config(client));
    (connector, acceptor)
}

async fn handshake(connector: &mut Connector, acceptor: &mut Acceptor) -> (bool, bool) {
    let (policy, cancel) = (policy(), CancellationToken::new());
    let (connected, accepted) =
        tokio::join!(connector.connect(&policy, &cancel), acceptor.listen(&policy, &cancel));
    (connected.unwrap(), accepted.unwrap())
}

#[tokio::test]
async fn test_server_authenticated_round_trip() {
    let server_id = identity();
    let client = TlsOptions::new()
        .with_trusted_roots(root_of(&server_id))
        .with_server_name("localhost");
    let (mut connector, mut acceptor) = pair(TlsOptions::new().with_identity(server_id), client).await;

    assert_eq!(handshake(&mut connector, &mut acceptor).await, (true, true));
    assert!(connector.is_tls());
    assert!(acceptor.is_tls());

    let secret = Secret {
        id: 7,
        body: "over tls".into(),
    };
    connector.send(&secret).await.unwrap();
    connector.stop().await;

    let messages: Vec<Secret> = acceptor
        .receive(CancellationToken::new())
        .unwrap()
        .collect()
        .await;
    assert_eq!(messages, vec![secret]);
}

#[tokio::test]
async fn test_untrusted_server_is_rejected() {
    let client = TlsOptions::new()
        .with_trusted_roots(root_of(&identity()))
        .with_server_name("localhost");
    let (mut connector, mut acceptor) =
        pair(TlsOptions::new().with_identity(identity()), client).await;

    let (connected, _) = handshake(&mut connector, &mut acceptor).await;
    assert!(!connected);
    assert!(!connector.is_connected());
}

#[tokio::test]
async fn test_mutual_tls_without_client_certificate_fails() {
    let server_id = identity();
    let server = TlsOptions::new()
        .with_identity(server_id.clone())
        .require_client_certificate(true)
        .with_trusted_roots(root_of(&identity()));
    let client = TlsOptions::new()
        .with_trusted_roots(root_of(&server_id))
        .with_server_name("localhost");
    let (mut connector, mut acceptor) = pair(server, client).await;

    assert_eq!(handshake(&mut connector, &mut acceptor).await, (false, false));
}

#[tokio::test]
async fn test_mutual_tls_with_client_certificate() {
    let server_id = identity();
    let client_id = identity();
    let server = TlsOptions::new()
        .with_identity(server_id.clone())
        .require_client_certificate(true)
        .with_trusted_roots(root_of(&client_id));
    let client = TlsOptions::new()
        .with_identity(client_id)
        .with_trusted_roots(root_of(&server_id))
        .with_server_name("localhost");
    let (mut connector, mut acceptor) = pair(server, client).await;

    assert_eq!(handshake(&mut connector, &mut acceptor).await, (true, true));

    connector.send(&Secret { id: 1, body: "mutual".into() }).await.unwrap();
    let mut inbound = acceptor.receive::<Secret>(CancellationToken::new()).unwrap();
    assert_eq!(inbound.next().await.map(|s| s.id), Some(1));
}

#[tokio::test]
async fn test_validator_can_veto_a_valid_chain() {
    let server_id = identity();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let client = TlsOptions::new()
        .with_trusted_roots(root_of(&server_id))
        .with_server_name("localhost")
        .with_validator(move |ctx| {
            if ctx.validation_error.is_none() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            false
        });
    let (mut connector, mut acceptor) = pair(TlsOptions::new().with_identity(server_id), client).await;

    let (connected, _) = handshake(&mut connector, &mut acceptor).await;
    assert!(!connected);
    assert!(seen.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_pinned_certificate_without_roots() {
    let server_id = identity();
    let client = TlsOptions::new()
        .with_pinned_certificate(certificate_fingerprint(server_id.certificate()))
        .with_server_name("localhost");
    let (mut connector, mut acceptor) = pair(TlsOptions::new().with_identity(server_id), client).await;

    assert_eq!(handshake(&mut connector, &mut acceptor).await, (true, true));
}

#[test]
fn test_tls_acceptor_requires_identity() {
    let result = Acceptor::new(
        Endpoint::new("127.0.0.1", 0).unwrap(),
        config(TlsOptions::new().with_trusted_roots(root_of(&identity()))),
    );
    assert!(result.is_err());
}
