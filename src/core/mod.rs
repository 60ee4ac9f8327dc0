//! # Core Protocol Components
//!
//! Endpoint identity, payload serialization, framing and the encode/decode pipeline.
//! Nothing in this module opens a socket.
//!
//! ## Wire Format
//! ```text
//! [Length(4, LE u32)] [Payload(Length)]
//! payload = compress?(serialize(message))
//! ```
//!
//! ## Security
//! - Length prefixes above the configured maximum are rejected before allocation
//! - Decompressed output is capped at the same maximum

pub mod endpoint;
pub mod frame;
pub mod pipeline;
pub mod serialization;
