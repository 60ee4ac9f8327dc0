//! # Configuration Management
//!
//! Two layers live here:
//! - [`NetworkConfig`] and its sections are plain serde data, loadable from TOML or the
//!   environment and checked with `validate()`.
//! - [`TransportConfig`] is the immutable runtime configuration handed to actors. It is built
//!   once (through [`TransportConfig::builder`] or [`NetworkConfig::transport_config`]) and
//!   shared behind an `Arc`; it cannot be changed afterwards.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Environment variables prefixed with `PEER_TRANSPORT_` via `from_env()`
//! - Direct instantiation with defaults
//!
//! ## Operational Precondition
//! Compression and TLS are configured independently on each side and nothing is negotiated on
//! the wire. Both ends of a connection must agree on them; a mismatch shows up as a failed
//! handshake or as undecodable frames, not as a protocol error.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::core::frame::DEFAULT_MAX_FRAME_SIZE;
use crate::error::{ProtocolError, Result};
use crate::transport::tls::{self, TlsIdentity, TlsOptions};
use crate::utils::compression::CompressionKind;
use crate::utils::metrics::TransportMetrics;
use crate::utils::timeout;

/// Whether to enable compression by default
pub const ENABLE_COMPRESSION: bool = false;

/// Default Zstd level (ignored by LZ4)
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    #[serde(default)]
    pub transport: TransportSettings,

    /// Connect/listen retry behaviour
    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// TLS material; absent means plain TCP
    #[serde(default)]
    pub tls: Option<TlsSettings>,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("PEER_TRANSPORT_COMPRESSION") {
            config.transport.compression_enabled = parse_env_bool("PEER_TRANSPORT_COMPRESSION", &value)?;
        }

        if let Ok(value) = std::env::var("PEER_TRANSPORT_MAX_FRAME_SIZE") {
            config.transport.max_frame_size = parse_env("PEER_TRANSPORT_MAX_FRAME_SIZE", &value)?;
        }

        if let Ok(value) = std::env::var("PEER_TRANSPORT_MAX_ATTEMPTS") {
            config.retry.max_attempts = parse_env("PEER_TRANSPORT_MAX_ATTEMPTS", &value)?;
        }

        if let Ok(value) = std::env::var("PEER_TRANSPORT_RETRY_DELAY_MS") {
            config.retry.retry_delay =
                Duration::from_millis(parse_env("PEER_TRANSPORT_RETRY_DELAY_MS", &value)?);
        }

        if let Ok(value) = std::env::var("PEER_TRANSPORT_HANDSHAKE_TIMEOUT_MS") {
            config.retry.handshake_timeout =
                Duration::from_millis(parse_env("PEER_TRANSPORT_HANDSHAKE_TIMEOUT_MS", &value)?);
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.transport.validate());
        errors.extend(self.retry.validate());
        errors.extend(self.logging.validate());
        if let Some(tls) = &self.tls {
            errors.extend(tls.validate());
        }
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }

    /// Build the runtime configuration, reading any TLS material from disk.
    pub fn transport_config(&self) -> Result<TransportConfig> {
        self.validate_strict()?;

        let mut builder = TransportConfig::builder()
            .compression(self.transport.compression_enabled)
            .compression_kind(self.transport.compression_kind)
            .compression_level(self.transport.compression_level)
            .max_frame_size(self.transport.max_frame_size);

        if let Some(tls) = &self.tls {
            builder = builder.tls(tls.load()?);
        }

        builder.build()
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ProtocolError::ConfigError(format!("Invalid value for {name}: '{value}'")))
}

fn parse_env_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ProtocolError::ConfigError(format!(
            "Invalid value for {name}: '{value}'"
        ))),
    }
}

/// Payload pipeline settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportSettings {
    pub compression_enabled: bool,

    #[serde(default)]
    pub compression_kind: CompressionKind,

    /// Zstd level, 1-22
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    /// Largest accepted payload in bytes
    pub max_frame_size: usize,
}

fn default_compression_level() -> i32 {
    DEFAULT_COMPRESSION_LEVEL
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            compression_enabled: ENABLE_COMPRESSION,
            compression_kind: CompressionKind::Lz4,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl TransportSettings {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_frame_size == 0 {
            errors.push("Max frame size cannot be 0".to_string());
        } else if self.max_frame_size > u32::MAX as usize {
            errors.push(format!(
                "Max frame size too large: {} bytes (a frame length is a u32)",
                self.max_frame_size
            ));
        }

        if self.compression_enabled
            && self.compression_kind == CompressionKind::Zstd
            && !(1..=22).contains(&self.compression_level)
        {
            errors.push(format!(
                "Invalid compression level: {} (valid range: 1-22)",
                self.compression_level
            ));
        }

        errors
    }
}

/// Attempt budget and timing for one connect/listen call
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,

    /// Pause between failed attempts
    #[serde(with = "duration_serde")]
    pub retry_delay: Duration,

    /// Bound on TCP connect plus TLS handshake; the connector also uses it as send timeout
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: timeout::DEFAULT_MAX_ATTEMPTS,
            retry_delay: timeout::DEFAULT_RETRY_DELAY,
            handshake_timeout: timeout::DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, retry_delay: Duration, handshake_timeout: Duration) -> Self {
        Self {
            max_attempts,
            retry_delay,
            handshake_timeout,
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_attempts == 0 {
            errors.push("Max attempts must be greater than 0".to_string());
        }

        if self.handshake_timeout.is_zero() {
            errors.push("Handshake timeout must be greater than 0".to_string());
        } else if self.handshake_timeout.as_secs() > 600 {
            errors.push("Handshake timeout too long (maximum: 600s)".to_string());
        }

        if self.retry_delay.as_secs() > 3600 {
            errors.push("Retry delay too long (maximum: 1 hour)".to_string());
        }

        errors
    }

    /// Reject a policy that cannot make a single attempt.
    pub(crate) fn check(&self) -> Result<()> {
        match self.validate().first() {
            None => Ok(()),
            Some(problem) => Err(ProtocolError::InvalidArgument(problem.clone())),
        }
    }
}

/// TLS material on disk
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TlsSettings {
    /// PEM certificate chain presenting our identity (always needed by an acceptor)
    pub cert_path: Option<String>,

    /// PEM PKCS#8/PKCS#1/SEC1 private key matching `cert_path`
    pub key_path: Option<String>,

    /// PEM bundle of trusted roots used to validate the remote side
    pub ca_path: Option<String>,

    /// Add the platform trust store to the trusted roots
    #[serde(default)]
    pub use_native_roots: bool,

    #[serde(default)]
    pub require_client_certificate: bool,

    #[serde(default)]
    pub check_revocation: bool,

    /// PEM CRL files consulted when `check_revocation` is set
    #[serde(default)]
    pub crl_paths: Vec<String>,

    /// Name to validate the server certificate against instead of the endpoint host
    pub server_name: Option<String>,
}

impl TlsSettings {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        match (&self.cert_path, &self.key_path) {
            (Some(_), None) => errors.push("TLS key_path is required with cert_path".to_string()),
            (None, Some(_)) => errors.push("TLS cert_path is required with key_path".to_string()),
            _ => {}
        }

        if self.needs_roots() && self.ca_path.is_none() && !self.use_native_roots {
            errors.push(
                "TLS needs trusted roots: set ca_path or enable use_native_roots".to_string(),
            );
        }

        if self.check_revocation && self.crl_paths.is_empty() {
            errors.push("check_revocation requires at least one CRL in crl_paths".to_string());
        }

        errors
    }

    /// Whether these settings validate a remote certificate.
    ///
    /// Without a certificate of their own they can only serve connectors. With one and no
    /// client-certificate check they are taken as acceptor-only; a connector built from them
    /// trusts nothing and fails its handshakes.
    fn needs_roots(&self) -> bool {
        self.cert_path.is_none() || self.require_client_certificate
    }

    /// Read certificates, keys and CRLs into runtime [`TlsOptions`].
    pub fn load(&self) -> Result<TlsOptions> {
        let mut options = TlsOptions::new()
            .with_native_roots(self.use_native_roots)
            .require_client_certificate(self.require_client_certificate)
            .check_revocation(self.check_revocation);

        if let (Some(cert), Some(key)) = (&self.cert_path, &self.key_path) {
            options = options.with_identity(TlsIdentity::from_pem_files(cert, key)?);
        }

        if let Some(ca) = &self.ca_path {
            options = options.with_trusted_roots(tls::load_certificates(ca)?);
        }

        let mut crls = Vec::new();
        for path in &self.crl_paths {
            crls.extend(tls::load_crls(path)?);
        }
        if !crls.is_empty() {
            options = options.with_revocation_lists(crls);
        }

        if let Some(name) = &self.server_name {
            options = options.with_server_name(name.clone());
        }

        Ok(options)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub app_name: String,

    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Emit JSON lines instead of human-readable output
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("peer-transport"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Immutable per-service runtime configuration shared by every actor it creates.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    compression_enabled: bool,
    compression_kind: CompressionKind,
    compression_level: i32,
    max_frame_size: usize,
    tls: Option<TlsOptions>,
    metrics: Arc<TransportMetrics>,
}

impl TransportConfig {
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::default()
    }

    pub fn compression_enabled(&self) -> bool {
        self.compression_enabled
    }

    /// The compressor in effect, `None` when compression is off.
    pub fn compression(&self) -> Option<CompressionKind> {
        self.compression_enabled.then_some(self.compression_kind)
    }

    pub fn compression_level(&self) -> i32 {
        self.compression_level
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn tls(&self) -> Option<&TlsOptions> {
        self.tls.as_ref()
    }

    pub fn metrics(&self) -> &Arc<TransportMetrics> {
        &self.metrics
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            compression_enabled: ENABLE_COMPRESSION,
            compression_kind: CompressionKind::Lz4,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            tls: None,
            metrics: Arc::new(TransportMetrics::new()),
        }
    }
}

/// Builder for [`TransportConfig`]
#[derive(Debug, Default)]
pub struct TransportConfigBuilder {
    inner: TransportConfig,
}

impl TransportConfigBuilder {
    pub fn compression(mut self, enabled: bool) -> Self {
        self.inner.compression_enabled = enabled;
        self
    }

    pub fn compression_kind(mut self, kind: CompressionKind) -> Self {
        self.inner.compression_kind = kind;
        self
    }

    pub fn compression_level(mut self, level: i32) -> Self {
        self.inner.compression_level = level;
        self
    }

    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.inner.max_frame_size = bytes;
        self
    }

    pub fn tls(mut self, options: TlsOptions) -> Self {
        self.inner.tls = Some(options);
        self
    }

    /// Share counters with another configuration instead of starting fresh ones.
    pub fn metrics(mut self, metrics: Arc<TransportMetrics>) -> Self {
        self.inner.metrics = metrics;
        self
    }

    pub fn build(self) -> Result<TransportConfig> {
        let settings = TransportSettings {
            compression_enabled: self.inner.compression_enabled,
            compression_kind: self.inner.compression_kind,
            compression_level: self.inner.compression_level,
            max_frame_size: self.inner.max_frame_size,
        };
        let errors = settings.validate();
        if !errors.is_empty() {
            return Err(ProtocolError::ConfigError(errors.join("; ")));
        }
        Ok(self.inner)
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        level.as_str().to_lowercase().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
