//! Outbound half-duplex actor: dials an endpoint and sends framed messages.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::{RetryPolicy, TransportConfig};
use crate::core::endpoint::Endpoint;
use crate::core::frame::{write_frame, HEADER_LEN};
use crate::core::pipeline::MessagePipeline;
use crate::core::serialization::{MessageCodec, SerializationFormat};
use crate::error::{ProtocolError, Result};
use crate::service::registry::EndpointLease;
use crate::transport::actor::{ActorState, TransportActor};
use crate::transport::socket;
use crate::transport::stream::TransportStream;
use crate::transport::tls::ClientTls;
use crate::utils::timeout::{with_timeout, DEFAULT_HANDSHAKE_TIMEOUT};

/// Dials `endpoint`, optionally runs a TLS client handshake, then sends one message at a time.
///
/// Sends must not overlap; the `&mut self` receivers enforce this.
#[derive(Debug)]
pub struct Connector<C = SerializationFormat> {
    endpoint: Endpoint,
    config: Arc<TransportConfig>,
    pipeline: MessagePipeline<C>,
    state: ActorState,
    stream: Option<TransportStream>,
    send_timeout: Duration,
    lease: Option<EndpointLease>,
}

impl Connector<SerializationFormat> {
    /// Create an idle connector using the default codec. No I/O happens here.
    pub fn new(endpoint: Endpoint, config: Arc<TransportConfig>) -> Self {
        Self::with_codec(endpoint, config, SerializationFormat::default())
    }
}

impl<C: MessageCodec> Connector<C> {
    pub fn with_codec(endpoint: Endpoint, config: Arc<TransportConfig>, codec: C) -> Self {
        let pipeline = MessagePipeline::from_config(&config, codec);
        Self {
            endpoint,
            config,
            pipeline,
            state: ActorState::Idle,
            stream: None,
            send_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            lease: None,
        }
    }

    pub(crate) fn with_lease(mut self, lease: Option<EndpointLease>) -> Self {
        self.lease = lease;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ActorState {
        self.state
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Whether the current connection runs over TLS.
    pub fn is_tls(&self) -> bool {
        self.stream.as_ref().is_some_and(TransportStream::is_tls)
    }

    /// Run the connect retry loop.
    ///
    /// Returns `Ok(true)` once connected and `Ok(false)` when every attempt failed or `cancel`
    /// fired. Attempt failures are logged, never returned. Fails fast with `AlreadyConnected`,
    /// `Disposed` or `InvalidArgument` (unusable policy).
    #[instrument(skip(self, policy, cancel), fields(endpoint = %self.endpoint))]
    pub async fn connect(&mut self, policy: &RetryPolicy, cancel: &CancellationToken) -> Result<bool> {
        self.state.ensure_can_connect()?;
        policy.check()?;

        let tls = match self.config.tls() {
            Some(options) => Some(options.client()?),
            None => None,
        };
        let metrics = self.config.metrics().clone();

        self.state = ActorState::Connecting;
        self.send_timeout = policy.handshake_timeout;

        for attempt in 1..=policy.max_attempts {
            metrics.attempt_started();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = with_timeout(
                    policy.handshake_timeout,
                    open_stream(&self.endpoint, tls.as_ref()),
                ) => Some(result),
            };

            match outcome {
                None => {
                    info!(attempt, "Connect cancelled");
                    self.state = ActorState::Idle;
                    return Ok(false);
                }
                Some(Ok(stream)) => {
                    metrics.connection_established();
                    info!(attempt, tls = stream.is_tls(), "Connected");
                    self.stream = Some(stream);
                    self.state = ActorState::Connected;
                    return Ok(true);
                }
                Some(Err(e)) => {
                    metrics.attempt_failed(matches!(e, ProtocolError::HandshakeError(_)));
                    warn!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %e,
                        "Connection attempt failed"
                    );
                }
            }

            if attempt < policy.max_attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!(attempt, "Connect cancelled");
                        self.state = ActorState::Idle;
                        return Ok(false);
                    }
                    _ = tokio::time::sleep(policy.retry_delay) => {}
                }
            }
        }

        warn!(max_attempts = policy.max_attempts, "Connection attempts exhausted");
        self.state = ActorState::Idle;
        Ok(false)
    }

    /// Encode `message` and write it as one frame.
    ///
    /// Fails with `NotConnected` before connecting. Encoding failures (`CodecError`,
    /// `OversizedFrame`) leave the connection usable. A write failure is returned as is and
    /// drops the connection, since the peer may have seen part of the frame.
    pub async fn send<T: Serialize + ?Sized>(&mut self, message: &T) -> Result<()> {
        self.send_with_cancel(message, &CancellationToken::new())
            .await
    }

    /// [`send`](Self::send) that gives up with `Cancelled` when `cancel` fires.
    ///
    /// Cancellation before the first byte keeps the connection; cancellation mid-frame drops it.
    pub async fn send_with_cancel<T: Serialize + ?Sized>(
        &mut self,
        message: &T,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.state.ensure_connected()?;
        let payload = self.pipeline.encode_payload(message)?;

        if cancel.is_cancelled() {
            return Err(ProtocolError::Cancelled);
        }

        let send_timeout = self.send_timeout;
        let stream = self.stream.as_mut().ok_or(ProtocolError::NotConnected)?;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProtocolError::Cancelled),
            result = with_timeout(send_timeout, write_frame(stream, &payload)) => result,
        };

        match outcome {
            Ok(()) => {
                let bytes = HEADER_LEN + payload.len();
                self.config.metrics().frame_sent(bytes as u64);
                trace!(endpoint = %self.endpoint, bytes, "Frame sent");
                Ok(())
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "Send failed, dropping connection");
                self.stream = None;
                self.state = ActorState::Idle;
                Err(e)
            }
        }
    }

    async fn release_stream(&mut self) {
        match self.stream.take() {
            Some(stream) => {
                match tokio::time::timeout(self.send_timeout, stream.close()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(error = %e, "Error while closing stream"),
                    Err(_) => debug!("Timed out while closing stream"),
                }
                info!(endpoint = %self.endpoint, "Connector stopped");
            }
            None => debug!(endpoint = %self.endpoint, "Stop requested while not connected"),
        }
    }
}

impl<C: MessageCodec> TransportActor for Connector<C> {
    fn is_connected(&self) -> bool {
        self.state == ActorState::Connected
    }

    fn is_disposed(&self) -> bool {
        self.state == ActorState::Disposed
    }

    async fn stop(&mut self) {
        self.release_stream().await;
        if self.state != ActorState::Disposed {
            self.state = ActorState::Idle;
        }
    }

    async fn dispose(&mut self) {
        if self.state == ActorState::Disposed {
            return;
        }
        self.stop().await;
        self.state = ActorState::Disposed;
        self.lease = None;
        debug!(endpoint = %self.endpoint, "Connector disposed");
    }
}

/// One connection attempt: resolve, TCP connect (first reachable address wins), TLS.
async fn open_stream(endpoint: &Endpoint, tls: Option<&ClientTls>) -> Result<TransportStream> {
    let mut last_error = None;
    for addr in endpoint.resolve().await? {
        match socket::connect(addr).await {
            Ok(tcp) => {
                return match tls {
                    Some(tls) => Ok(tls.handshake(tcp, endpoint.host()).await?.into()),
                    None => Ok(tcp.into()),
                };
            }
            Err(e) => {
                debug!(%addr, error = %e, "TCP connect failed");
                last_error = Some(e);
            }
        }
    }

    Err(ProtocolError::ConnectionAttemptFailed(match last_error {
        Some(e) => format!("{endpoint}: {e}"),
        None => format!("{endpoint}: no address to connect to"),
    }))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn connector(port: u16) -> Connector {
        Connector::new(
            Endpoint::new("127.0.0.1", port).unwrap(),
            Arc::new(TransportConfig::default()),
        )
    }

    #[tokio::test]
    async fn test_send_before_connect() {
        let mut c = connector(1);
        assert!(matches!(
            c.send(&"hello").await,
            Err(ProtocolError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_zero_attempts_rejected() {
        let mut c = connector(1);
        let policy = RetryPolicy::new(0, Duration::ZERO, Duration::from_secs(1));
        let result = c.connect(&policy, &CancellationToken::new()).await;
        assert!(matches!(result, Err(ProtocolError::InvalidArgument(_))));
        assert_eq!(c.state(), ActorState::Idle);
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let mut c = connector(1);
        c.stop().await;
        c.stop().await;
        assert_eq!(c.state(), ActorState::Idle);
    }

    #[tokio::test]
    async fn test_disposed_refuses_everything() {
        let mut c = connector(1);
        c.dispose().await;
        assert!(c.is_disposed());
        let policy = RetryPolicy::default();
        assert!(matches!(
            c.connect(&policy, &CancellationToken::new()).await,
            Err(ProtocolError::Disposed)
        ));
        assert!(matches!(c.send(&1u32).await, Err(ProtocolError::Disposed)));
    }
}
