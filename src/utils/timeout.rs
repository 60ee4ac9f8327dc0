//! Timeout helpers and protocol timing defaults.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default number of connect/listen attempts per call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default pause between two connection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(10_000);

/// Default bound on TCP connect + TLS handshake, also used as the send timeout.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Run `fut` to completion or fail with [`ProtocolError::Timeout`] after `duration`.
pub async fn with_timeout<T, F>(duration: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_elapses() {
        let result: Result<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let result: Result<()> = with_timeout(Duration::from_secs(1), async {
            Err(ProtocolError::NotConnected)
        })
        .await;
        assert!(matches!(result, Err(ProtocolError::NotConnected)));
    }
}
