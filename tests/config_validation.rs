//! Integration tests for configuration loading and validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::io::Write;
use std::time::Duration;

use peer_transport::config::{NetworkConfig, RetryPolicy, TlsSettings};
use peer_transport::{CompressionKind, ProtocolError, TransportService};
use rcgen::{generate_simple_self_signed, CertifiedKey};
use serial_test::serial;
use tempfile::NamedTempFile;
use tracing::Level;

const ENV_VARS: [&str; 5] = [
    "PEER_TRANSPORT_COMPRESSION",
    "PEER_TRANSPORT_MAX_FRAME_SIZE",
    "PEER_TRANSPORT_MAX_ATTEMPTS",
    "PEER_TRANSPORT_RETRY_DELAY_MS",
    "PEER_TRANSPORT_HANDSHAKE_TIMEOUT_MS",
];

fn clear_env() {
    for name in ENV_VARS {
        std::env::remove_var(name);
    }
}

fn pem_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write pem");
    file
}

#[test]
fn test_default_config_validates() {
    let config = NetworkConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_zero_frame_size() {
    let mut config = NetworkConfig::default();
    config.transport.max_frame_size = 0;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Max frame size cannot be 0")));
}

#[test]
fn test_frame_size_beyond_u32() {
    let mut config = NetworkConfig::default();
    config.transport.max_frame_size = u32::MAX as usize + 1;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Max frame size too large")));
}

#[test]
fn test_zstd_level_out_of_range() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.transport.compression_enabled = true;
        c.transport.compression_kind = CompressionKind::Zstd;
        c.transport.compression_level = 40;
    });

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid compression level")));
}

#[test]
fn test_lz4_ignores_level() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.transport.compression_enabled = true;
        c.transport.compression_level = 40;
    });
    assert!(config.validate().is_empty());
}

#[test]
fn test_retry_policy_limits() {
    let mut config = NetworkConfig::default();
    config.retry = RetryPolicy::new(0, Duration::from_secs(7200), Duration::ZERO);

    let errors = config.validate();
    assert_eq!(errors.len(), 3, "errors: {errors:?}");
    assert!(errors.iter().any(|e| e.contains("Max attempts")));
    assert!(errors.iter().any(|e| e.contains("Handshake timeout must be greater than 0")));
    assert!(errors.iter().any(|e| e.contains("Retry delay too long")));
}

#[test]
fn test_empty_app_name() {
    let mut config = NetworkConfig::default();
    config.logging.app_name = String::new();
    assert!(config.validate().iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_tls_settings_need_roots_and_key_pairs() {
    let settings = TlsSettings {
        key_path: Some("client.key".into()),
        check_revocation: true,
        ..TlsSettings::default()
    };

    let errors = settings.validate();
    assert!(errors.iter().any(|e| e.contains("cert_path is required")));
    assert!(errors.iter().any(|e| e.contains("trusted roots")));
    assert!(errors.iter().any(|e| e.contains("check_revocation")));
}

#[test]
fn test_validate_strict_collects_everything() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.transport.max_frame_size = 0;
        c.retry.max_attempts = 0;
    });

    match config.validate_strict() {
        Err(ProtocolError::ConfigError(message)) => {
            assert!(message.contains("Max frame size"));
            assert!(message.contains("Max attempts"));
        }
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn test_toml_file_roundtrip() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.transport.compression_enabled = true;
        c.transport.compression_kind = CompressionKind::Zstd;
        c.retry.retry_delay = Duration::from_millis(250);
        c.logging.log_level = Level::DEBUG;
    });

    let file = NamedTempFile::new().expect("temp file");
    config.save_to_file(file.path()).expect("save");
    let loaded = NetworkConfig::from_file(file.path()).expect("load");

    assert!(loaded.transport.compression_enabled);
    assert_eq!(loaded.transport.compression_kind, CompressionKind::Zstd);
    assert_eq!(loaded.retry, config.retry);
    assert_eq!(loaded.logging.log_level, Level::DEBUG);
    assert!(loaded.tls.is_none());
}

#[test]
fn test_partial_toml_uses_defaults() {
    let config = NetworkConfig::from_toml(
        r#"
        [retry]
        max_attempts = 2
        retry_delay = 100
        handshake_timeout = 1500
        "#,
    )
    .expect("parse");

    assert_eq!(config.retry.max_attempts, 2);
    assert_eq!(config.retry.handshake_timeout, Duration::from_millis(1500));
    assert_eq!(config.transport.max_frame_size, 16 * 1024 * 1024);
    assert!(!config.transport.compression_enabled);
}

#[test]
fn test_example_config_parses() {
    let example = NetworkConfig::example_config();
    assert!(NetworkConfig::from_toml(&example).is_ok());
}

#[test]
fn test_malformed_toml() {
    assert!(matches!(
        NetworkConfig::from_toml("[retry\nmax_attempts = "),
        Err(ProtocolError::ConfigError(_))
    ));
}

#[test]
fn test_missing_file() {
    assert!(matches!(
        NetworkConfig::from_file("/nonexistent/peer-transport.toml"),
        Err(ProtocolError::ConfigError(_))
    ));
}

#[test]
#[serial]
fn test_env_overrides() {
    clear_env();
    std::env::set_var("PEER_TRANSPORT_COMPRESSION", "yes");
    std::env::set_var("PEER_TRANSPORT_MAX_ATTEMPTS", "9");
    std::env::set_var("PEER_TRANSPORT_RETRY_DELAY_MS", "125");

    let config = NetworkConfig::from_env().expect("env config");
    clear_env();

    assert!(config.transport.compression_enabled);
    assert_eq!(config.retry.max_attempts, 9);
    assert_eq!(config.retry.retry_delay, Duration::from_millis(125));
    assert_eq!(config.retry.handshake_timeout, RetryPolicy::default().handshake_timeout);
}

#[test]
#[serial]
fn test_env_rejects_garbage() {
    clear_env();
    std::env::set_var("PEER_TRANSPORT_MAX_FRAME_SIZE", "lots");

    let result = NetworkConfig::from_env();
    clear_env();

    assert!(matches!(result, Err(ProtocolError::ConfigError(m)) if m.contains("PEER_TRANSPORT_MAX_FRAME_SIZE")));
}

#[test]
fn test_transport_config_from_settings() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.transport.compression_enabled = true;
        c.transport.max_frame_size = 4096;
    });

    let runtime = config.transport_config().expect("runtime config");
    assert_eq!(runtime.compression(), Some(CompressionKind::Lz4));
    assert_eq!(runtime.max_frame_size(), 4096);
    assert!(runtime.tls().is_none());
}

#[test]
fn test_transport_config_loads_tls_files() {
    let CertifiedKey { cert, key_pair } =
        generate_simple_self_signed(vec!["localhost".to_string()]).expect("certificate");
    let cert_file = pem_file(&cert.pem());
    let key_file = pem_file(&key_pair.serialize_pem());

    let path = |f: &NamedTempFile| Some(f.path().to_string_lossy().into_owned());
    let config = NetworkConfig::default_with_overrides(|c| {
        c.tls = Some(TlsSettings {
            cert_path: path(&cert_file),
            key_path: path(&key_file),
            ca_path: path(&cert_file),
            require_client_certificate: true,
            server_name: Some("localhost".into()),
            ..TlsSettings::default()
        });
    });

    let service = TransportService::from_network_config(&config).expect("service");
    let tls = service.config().tls().expect("tls options");
    assert!(tls.requires_client_certificate());
    assert_eq!(tls.identity().map(|id| id.chain().len()), Some(1));
}

#[test]
fn test_transport_config_reports_unreadable_tls_files() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.tls = Some(TlsSettings {
            ca_path: Some("/nonexistent/ca.pem".into()),
            ..TlsSettings::default()
        });
    });

    assert!(config.transport_config().is_err());
}

#[test]
fn test_acceptor_only_tls_needs_no_roots() {
    let CertifiedKey { cert, key_pair } =
        generate_simple_self_signed(vec!["localhost".to_string()]).expect("certificate");
    let cert_file = pem_file(&cert.pem());
    let key_file = pem_file(&key_pair.serialize_pem());

    let path = |f: &NamedTempFile| Some(f.path().to_string_lossy().into_owned());
    let config = NetworkConfig::default_with_overrides(|c| {
        c.tls = Some(TlsSettings {
            cert_path: path(&cert_file),
            key_path: path(&key_file),
            ..TlsSettings::default()
        });
    });
    assert!(config.validate().is_empty(), "errors: {:?}", config.validate());

    let service = TransportService::from_network_config(&config).expect("service");
    let acceptor = service
        .acceptor(peer_transport::Endpoint::new("127.0.0.1", 0).unwrap())
        .expect("acceptor");
    assert!(acceptor.config().tls().is_some());
}

#[test]
fn test_client_certificate_check_needs_roots() {
    let settings = TlsSettings {
        cert_path: Some("server.pem".into()),
        key_path: Some("server.key".into()),
        require_client_certificate: true,
        ..TlsSettings::default()
    };
    assert!(settings.validate().iter().any(|e| e.contains("trusted roots")));
}
