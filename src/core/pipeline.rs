//! Message <-> payload <-> frame conversion.
//!
//! Send direction: serialize with the configured [`MessageCodec`], compress when enabled, then
//! prefix with the little-endian length. Receive direction runs the same steps backwards.
//! The pipeline holds no connection state and never performs I/O.

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

use crate::config::TransportConfig;
use crate::core::frame::{FrameCodec, DEFAULT_MAX_FRAME_SIZE};
use crate::core::serialization::{MessageCodec, SerializationFormat};
use crate::error::{ProtocolError, Result};
use crate::utils::compression::{self, CompressionKind};

#[derive(Debug, Clone)]
pub struct MessagePipeline<C = SerializationFormat> {
    codec: C,
    compression: Option<CompressionKind>,
    compression_level: i32,
    max_frame_size: usize,
}

impl<C: MessageCodec> MessagePipeline<C> {
    /// Build a pipeline. `compression` of `None` leaves serialized bytes untouched.
    pub fn new(codec: C, compression: Option<CompressionKind>, max_frame_size: usize) -> Self {
        Self {
            codec,
            compression,
            compression_level: 3,
            max_frame_size,
        }
    }

    pub fn from_config(config: &TransportConfig, codec: C) -> Self {
        Self {
            codec,
            compression: config.compression(),
            compression_level: config.compression_level(),
            max_frame_size: config.max_frame_size(),
        }
    }

    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn compression(&self) -> Option<CompressionKind> {
        self.compression
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Serialize and optionally compress `message` into the bytes that follow the header.
    ///
    /// Fails with `OversizedFrame` when the result would not fit in one frame.
    pub fn encode_payload<T: Serialize + ?Sized>(&self, message: &T) -> Result<Vec<u8>> {
        let serialized = self.codec.serialize(message)?;
        let payload = match self.compression {
            Some(kind) => compression::compress(&serialized, kind, self.compression_level)?,
            None => serialized,
        };

        if payload.len() > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame {
                size: payload.len(),
                limit: self.max_frame_size,
            });
        }
        Ok(payload)
    }

    /// Produce a complete frame: header followed by payload.
    pub fn encode<T: Serialize + ?Sized>(&self, message: &T) -> Result<Bytes> {
        let payload = self.encode_payload(message)?;
        let mut buf = BytesMut::new();
        FrameCodec::new(self.max_frame_size).encode(Bytes::from(payload), &mut buf)?;
        Ok(buf.freeze())
    }

    /// Undo [`encode_payload`](Self::encode_payload).
    pub fn decode_payload<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T> {
        match self.compression {
            Some(kind) => {
                let raw = compression::decompress(payload, kind, self.max_frame_size)?;
                self.codec.deserialize(&raw)
            }
            None => self.codec.deserialize(payload),
        }
    }

    /// Decode one complete frame held in memory.
    ///
    /// Bytes after the first frame are ignored; a short buffer is a `TruncatedFrame`.
    pub fn decode<T: DeserializeOwned>(&self, frame: &[u8]) -> Result<T> {
        let mut buf = BytesMut::from(frame);
        let payload = FrameCodec::new(self.max_frame_size)
            .decode_eof(&mut buf)?
            .ok_or(ProtocolError::ConnectionClosed)?;
        self.decode_payload(&payload)
    }
}

impl Default for MessagePipeline<SerializationFormat> {
    fn default() -> Self {
        Self::new(SerializationFormat::default(), None, DEFAULT_MAX_FRAME_SIZE)
    }
}
