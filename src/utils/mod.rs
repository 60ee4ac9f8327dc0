//! # Utility Modules
//!
//! Supporting utilities for compression, logging, metrics and timing.
//!
//! ## Components
//! - **Compression**: LZ4 and Zstd with a decompression size limit
//! - **Logging**: tracing-subscriber configuration
//! - **Metrics**: Thread-safe transport counters
//! - **Timeout**: Async timeout wrapper and protocol timing defaults

pub mod compression;
pub mod logging;
pub mod metrics;
pub mod timeout;

pub use metrics::{MetricsSnapshot, TransportMetrics};
