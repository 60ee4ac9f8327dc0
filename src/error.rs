//! # Error Types
//!
//! Error handling for the transport core.
//!
//! This module defines every failure kind an actor, the framer or the codec pipeline can
//! report, from low-level I/O failures up to lifecycle violations.
//!
//! ## Error Categories
//! - **Lifecycle**: `AlreadyConnected`, `NotConnected`, `Disposed`, `InvalidArgument`
//! - **Connection establishment**: `ConnectionAttemptFailed`, `HandshakeError`, `Timeout`, `Cancelled`
//! - **Framing**: `TruncatedFrame`, `ConnectionClosed`, `OversizedFrame`
//! - **Payload**: `CodecError`, `CompressionFailure`, `DecompressionFailure`
//! - **Setup**: `TlsError`, `ConfigError`
//!
//! Connection-establishment errors never reach the caller of `connect`/`listen`; they are
//! logged and retried, and only a boolean outcome surfaces once the attempt budget is spent.
//!
//! ## Example Usage
//! ```rust
//! use peer_transport::error::{ProtocolError, Result};
//!
//! fn require_host(host: &str) -> Result<&str> {
//!     if host.is_empty() {
//!         return Err(ProtocolError::InvalidArgument("host cannot be empty".into()));
//!     }
//!     Ok(host)
//! }
//!
//! assert!(require_host("").is_err());
//! ```

use std::io;
use thiserror::Error;

// ProtocolError is the primary error type for all transport operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Actor is already connected")]
    AlreadyConnected,

    #[error("Actor is not connected")]
    NotConnected,

    #[error("Actor has been disposed")]
    Disposed,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Connection attempt failed: {0}")]
    ConnectionAttemptFailed(String),

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Truncated frame: expected {expected} bytes, received {received}")]
    TruncatedFrame { expected: usize, received: usize },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Frame too large: {size} bytes (limit {limit})")]
    OversizedFrame { size: usize, limit: usize },

    #[error("Codec error: {0}")]
    CodecError(String),

    #[error("Compression failed")]
    CompressionFailure,

    #[error("Decompression failed")]
    DecompressionFailure,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl From<rustls::Error> for ProtocolError {
    fn from(error: rustls::Error) -> Self {
        ProtocolError::TlsError(error.to_string())
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
