//! # peer-transport
//!
//! Point-to-point, length-framed message transport over TCP with optional block compression
//! and optional (mutual) TLS 1.3.
//!
//! ## Layers
//! - [`core`]: endpoints, serialization codecs, framing and the encode/decode pipeline
//! - [`transport`]: the [`Connector`], [`Acceptor`] and [`Peer`] actors
//! - [`service`]: factory sharing one configuration across actors
//! - [`config`]: file/env configuration and the runtime [`TransportConfig`]
//! - [`utils`]: compression, logging, metrics, timeouts
//!
//! ## Wire Format
//! ```text
//! [Length(4, LE u32)] [Payload(Length)]   payload = compress?(serialize(message))
//! ```
//! Nothing on the wire identifies the codec, the compressor or whether compression is on; both
//! ends must be configured alike.
//!
//! ## Example
//! ```no_run
//! use peer_transport::{
//!     CancellationToken, Endpoint, RetryPolicy, TransportActor, TransportConfig,
//!     TransportService,
//! };
//!
//! # async fn run() -> peer_transport::Result<()> {
//! let service = TransportService::new(TransportConfig::builder().compression(true).build()?);
//! let mut connector = service.connector(Endpoint::new("127.0.0.1", 9000)?)?;
//!
//! if connector.connect(&RetryPolicy::default(), &CancellationToken::new()).await? {
//!     connector.send(&"hello").await?;
//! }
//! connector.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::config::{NetworkConfig, RetryPolicy, TransportConfig};
pub use crate::core::endpoint::Endpoint;
pub use crate::core::serialization::{MessageCodec, SerializationFormat};
pub use crate::error::{ProtocolError, Result};
pub use crate::service::TransportService;
pub use crate::transport::{
    Acceptor, ActorState, Connector, MessageStream, Peer, StreamEnd, TlsIdentity, TlsOptions,
    TransportActor,
};
pub use crate::utils::compression::CompressionKind;

pub use tokio_util::sync::CancellationToken;
