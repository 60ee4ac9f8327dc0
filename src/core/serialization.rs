//! # Serialization Formats
//!
//! The transport does not know message types; it only needs something that turns a value into
//! bytes and back. That capability is the [`MessageCodec`] trait. [`SerializationFormat`]
//! provides the stock implementations.
//!
//! ## Formats
//! - **Bincode**: binary compact format (default, fastest)
//! - **JSON**: human-readable, handy while debugging
//! - **MessagePack**: compact binary with a self-describing layout
//!
//! Both ends of a connection must use the same format; nothing on the wire identifies it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Pluggable serialize/deserialize capability used by the payload pipeline.
///
/// Failures are reported as [`ProtocolError::CodecError`].
pub trait MessageCodec: Clone + Send + Sync + 'static {
    fn serialize<T: Serialize + ?Sized>(&self, message: &T) -> Result<Vec<u8>>;

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;

    /// Short name used in log events.
    fn name(&self) -> &'static str;
}

/// Supported serialization formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationFormat {
    #[default]
    Bincode,
    Json,
    MessagePack,
}

impl MessageCodec for SerializationFormat {
    fn serialize<T: Serialize + ?Sized>(&self, message: &T) -> Result<Vec<u8>> {
        match self {
            SerializationFormat::Bincode => {
                bincode::serialize(message).map_err(|e| ProtocolError::CodecError(e.to_string()))
            }
            SerializationFormat::Json => {
                serde_json::to_vec(message).map_err(|e| ProtocolError::CodecError(e.to_string()))
            }
            SerializationFormat::MessagePack => rmp_serde::to_vec_named(message)
                .map_err(|e| ProtocolError::CodecError(e.to_string())),
        }
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            SerializationFormat::Bincode => {
                bincode::deserialize(bytes).map_err(|e| ProtocolError::CodecError(e.to_string()))
            }
            SerializationFormat::Json => serde_json::from_slice(bytes)
                .map_err(|e| ProtocolError::CodecError(e.to_string())),
            SerializationFormat::MessagePack => {
                rmp_serde::from_slice(bytes).map_err(|e| ProtocolError::CodecError(e.to_string()))
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            SerializationFormat::Bincode => "bincode",
            SerializationFormat::Json => "json",
            SerializationFormat::MessagePack => "msgpack",
        }
    }
}
