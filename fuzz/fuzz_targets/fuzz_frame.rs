#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use peer_transport::core::frame::FrameCodec;
use peer_transport::core::pipeline::MessagePipeline;
use peer_transport::core::serialization::SerializationFormat;
use peer_transport::utils::compression::CompressionKind;
use serde::Deserialize;
use tokio_util::codec::Decoder;

const LIMIT: usize = 64 * 1024;

#[derive(Deserialize)]
#[allow(dead_code)]
enum Message {
    Ping,
    Echo(String),
    Batch(Vec<u64>),
}

fuzz_target!(|data: &[u8]| {
    // Frame splitting over arbitrary byte streams
    let mut codec = FrameCodec::new(LIMIT);
    let mut buf = BytesMut::from(data);
    while let Ok(Some(payload)) = codec.decode(&mut buf) {
        assert!(payload.len() <= LIMIT);
    }

    // Full receive path, compressed and not
    for compression in [None, Some(CompressionKind::Lz4), Some(CompressionKind::Zstd)] {
        let pipeline = MessagePipeline::new(SerializationFormat::Bincode, compression, LIMIT);
        let _ = pipeline.decode::<Message>(data);
    }
});
