//! # Framing
//!
//! One frame carries one encoded message:
//!
//! ```text
//! [Length(4, little-endian u32)] [Payload(Length)]
//! ```
//!
//! There is no magic, version or type tag. `Length` is the exact number of payload bytes as
//! they appear on the wire (after compression when it is enabled).
//!
//! Three views of the same format live here:
//! - [`FrameCodec`]: a `tokio_util` codec for buffered streams
//! - [`write_frame`]: header then payload as two sequential writes on one stream
//! - [`FrameReader`]: exact reads with a reusable 4-byte header buffer and cancellation

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;

use crate::error::{ProtocolError, Result};

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Default upper bound on a single payload (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Encode the length prefix for a payload of `len` bytes.
pub fn encode_header(len: usize) -> Result<[u8; HEADER_LEN]> {
    let len = u32::try_from(len).map_err(|_| ProtocolError::OversizedFrame {
        size: len,
        limit: u32::MAX as usize,
    })?;
    Ok(len.to_le_bytes())
}

/// Interpret a length prefix.
#[inline]
pub fn decode_header(header: [u8; HEADER_LEN]) -> usize {
    u32::from_le_bytes(header) as usize
}

/// Tokio codec for length-prefixed frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = decode_header([src[0], src[1], src[2], src[3]]);
        if len > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame {
                size: len,
                limit: self.max_frame_size,
            });
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        Ok(Some(src.split_to(len)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None if src.len() < HEADER_LEN => Err(ProtocolError::TruncatedFrame {
                expected: HEADER_LEN,
                received: src.len(),
            }),
            None => Err(ProtocolError::TruncatedFrame {
                expected: decode_header([src[0], src[1], src[2], src[3]]),
                received: src.len() - HEADER_LEN,
            }),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<()> {
        if payload.len() > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame {
                size: payload.len(),
                limit: self.max_frame_size,
            });
        }
        let header = encode_header(payload.len())?;
        dst.reserve(HEADER_LEN + payload.len());
        dst.put_slice(&header);
        dst.put_slice(&payload);
        Ok(())
    }
}

/// Write one frame: the length prefix, then the payload, then flush.
///
/// Not cancel-safe; dropping the future midway leaves a partial frame on the stream.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let header = encode_header(payload.len())?;
    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Result of one [`FrameReader::read_frame`] call that did not fail.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameRead {
    Frame(Vec<u8>),
    /// End of stream exactly on a frame boundary.
    Closed,
    /// Cancellation won. `mid_frame` means bytes of the frame were already consumed and the
    /// stream can no longer be parsed.
    Cancelled { mid_frame: bool },
}

/// Reads frames one at a time with no read-ahead beyond the current frame.
#[derive(Debug)]
pub struct FrameReader {
    header: [u8; HEADER_LEN],
    max_frame_size: usize,
}

impl FrameReader {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            header: [0; HEADER_LEN],
            max_frame_size,
        }
    }

    /// Read exactly one frame, observing `cancel` between socket reads.
    ///
    /// The header buffer is zeroed before and after every call whatever the outcome.
    pub async fn read_frame<R>(
        &mut self,
        reader: &mut R,
        cancel: &CancellationToken,
    ) -> Result<FrameRead>
    where
        R: AsyncRead + Unpin,
    {
        self.header = [0; HEADER_LEN];
        let outcome = self.read_inner(reader, cancel).await;
        self.header = [0; HEADER_LEN];
        outcome
    }

    async fn read_inner<R>(&mut self, reader: &mut R, cancel: &CancellationToken) -> Result<FrameRead>
    where
        R: AsyncRead + Unpin,
    {
        let mut filled = 0;
        while filled < HEADER_LEN {
            let n = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Ok(FrameRead::Cancelled { mid_frame: filled > 0 });
                }
                read = reader.read(&mut self.header[filled..]) => read?,
            };
            if n == 0 {
                if filled == 0 {
                    return Ok(FrameRead::Closed);
                }
                return Err(ProtocolError::TruncatedFrame {
                    expected: HEADER_LEN,
                    received: filled,
                });
            }
            filled += n;
        }

        let len = decode_header(self.header);
        if len > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame {
                size: len,
                limit: self.max_frame_size,
            });
        }

        let mut payload = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(FrameRead::Cancelled { mid_frame: true }),
                read = reader.read(&mut payload[filled..]) => read?,
            };
            if n == 0 {
                return Err(ProtocolError::TruncatedFrame {
                    expected: len,
                    received: filled,
                });
            }
            filled += n;
        }

        Ok(FrameRead::Frame(payload))
    }

    #[cfg(test)]
    fn header_is_clear(&self) -> bool {
        self.header == [0; HEADER_LEN]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_header_is_little_endian() {
        assert_eq!(encode_header(1).unwrap(), [1, 0, 0, 0]);
        assert_eq!(encode_header(0x0102_0304).unwrap(), [4, 3, 2, 1]);
        assert_eq!(decode_header([4, 3, 2, 1]), 0x0102_0304);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_codec_handles_partial_input() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(Bytes::from_static(b"hello"), &mut buf).unwrap();
        assert_eq!(&buf[..HEADER_LEN], &[5, 0, 0, 0]);

        let mut partial = buf.split_to(6);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.unsplit(buf);
        let frame = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(&frame[..], b"hello");
        assert!(partial.is_empty());
    }

    #[test]
    fn test_codec_rejects_oversized_prefix() {
        let mut codec = FrameCodec::new(8);
        let mut buf = BytesMut::from(&[9u8, 0, 0, 0][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::OversizedFrame { size: 9, limit: 8 })
        ));
    }

    #[test]
    fn test_codec_eof_mid_frame() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[5u8, 0, 0, 0, b'h', b'e'][..]);
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(ProtocolError::TruncatedFrame {
                expected: 5,
                received: 2
            })
        ));
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_reader_reads_back_to_back_frames() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_frame(&mut client, b"one").await.unwrap();
        write_frame(&mut client, b"").await.unwrap();
        write_frame(&mut client, b"three").await.unwrap();
        drop(client);

        let cancel = CancellationToken::new();
        let mut reader = FrameReader::new(DEFAULT_MAX_FRAME_SIZE);
        let mut frames = Vec::new();
        loop {
            match reader.read_frame(&mut server, &cancel).await.unwrap() {
                FrameRead::Frame(payload) => frames.push(payload),
                FrameRead::Closed => break,
                other => panic!("unexpected {other:?}"),
            }
            assert!(reader.header_is_clear());
        }
        assert_eq!(frames, vec![b"one".to_vec(), Vec::new(), b"three".to_vec()]);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_reader_truncated_header_and_payload() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[3, 0]).await.unwrap();
        drop(client);
        let mut reader = FrameReader::new(DEFAULT_MAX_FRAME_SIZE);
        let cancel = CancellationToken::new();
        let result = reader.read_frame(&mut server, &cancel).await;
        assert!(matches!(
            result,
            Err(ProtocolError::TruncatedFrame {
                expected: HEADER_LEN,
                received: 2
            })
        ));
        assert!(reader.header_is_clear());

        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[3, 0, 0, 0, b'a']).await.unwrap();
        drop(client);
        let result = reader.read_frame(&mut server, &cancel).await;
        assert!(matches!(
            result,
            Err(ProtocolError::TruncatedFrame {
                expected: 3,
                received: 1
            })
        ));
    }

    #[tokio::test]
    async fn test_reader_cancellation_before_any_byte() {
        let (_client, mut server) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut reader = FrameReader::new(DEFAULT_MAX_FRAME_SIZE);
        let result = reader.read_frame(&mut server, &cancel).await;
        assert!(matches!(
            result,
            Ok(FrameRead::Cancelled { mid_frame: false })
        ));
        assert!(reader.header_is_clear());
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_reader_cancellation_mid_frame() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[10, 0, 0, 0, 1, 2]).await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let mut reader = FrameReader::new(DEFAULT_MAX_FRAME_SIZE);
        let result = reader.read_frame(&mut server, &cancel).await.unwrap();
        assert_eq!(result, FrameRead::Cancelled { mid_frame: true });
        drop(client);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_reader_rejects_oversized_before_allocating() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&u32::MAX.to_le_bytes()).await.unwrap();
        let mut reader = FrameReader::new(1024);
        let cancel = CancellationToken::new();
        let result = reader.read_frame(&mut server, &cancel).await;
        assert!(matches!(
            result,
            Err(ProtocolError::OversizedFrame { limit: 1024, .. })
        ));
    }
}
