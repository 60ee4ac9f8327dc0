//! Inbound half-duplex actor: listens, accepts one connection and streams decoded messages.

use std::any::type_name;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::{RetryPolicy, TransportConfig};
use crate::core::endpoint::Endpoint;
use crate::core::frame::{FrameRead, FrameReader, HEADER_LEN};
use crate::core::pipeline::MessagePipeline;
use crate::core::serialization::{MessageCodec, SerializationFormat};
use crate::error::{ProtocolError, Result};
use crate::service::registry::EndpointLease;
use crate::transport::actor::{ActorState, TransportActor};
use crate::transport::socket;
use crate::transport::stream::TransportStream;
use crate::transport::tls::ServerTls;
use crate::utils::timeout::with_timeout;

/// Why a [`MessageStream`] stopped yielding.
#[derive(Debug)]
pub enum StreamEnd {
    /// The cancellation token fired.
    Cancelled,
    /// The remote side closed the connection on a frame boundary.
    Closed,
    /// A read, framing or decode failure ended the stream.
    Faulted(ProtocolError),
}

/// Lazy, non-restartable sequence of received messages.
///
/// Frame `n + 1` is not read until message `n` has been taken. The stream ends on cancellation,
/// remote close or any failure; no error is ever yielded. [`end_reason`](Self::end_reason)
/// tells the cases apart afterwards.
pub struct MessageStream<'a, T> {
    inner: BoxStream<'a, T>,
    end: Arc<OnceLock<StreamEnd>>,
}

impl<T> MessageStream<'_, T> {
    /// `None` while the stream is still live.
    pub fn end_reason(&self) -> Option<&StreamEnd> {
        self.end.get()
    }
}

impl<T> Stream for MessageStream<'_, T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.inner.as_mut().poll_next(cx)
    }
}

struct ReceiveState<'a, C> {
    acceptor: &'a mut Acceptor<C>,
    reader: FrameReader,
    cancel: CancellationToken,
    end: Arc<OnceLock<StreamEnd>>,
}

/// Binds a local endpoint, accepts exactly one client, optionally runs a TLS server handshake
/// and then receives.
#[derive(Debug)]
pub struct Acceptor<C = SerializationFormat> {
    endpoint: Endpoint,
    config: Arc<TransportConfig>,
    pipeline: MessagePipeline<C>,
    state: ActorState,
    listener: Option<TcpListener>,
    stream: Option<TransportStream>,
    remote: Option<SocketAddr>,
    lease: Option<EndpointLease>,
}

impl Acceptor<SerializationFormat> {
    /// Create an idle acceptor using the default codec. No I/O happens here.
    ///
    /// Fails with `TlsError` when TLS is configured without a certificate to present.
    pub fn new(endpoint: Endpoint, config: Arc<TransportConfig>) -> Result<Self> {
        Self::with_codec(endpoint, config, SerializationFormat::default())
    }
}

impl<C: MessageCodec> Acceptor<C> {
    pub fn with_codec(endpoint: Endpoint, config: Arc<TransportConfig>, codec: C) -> Result<Self> {
        if let Some(tls) = config.tls() {
            if tls.identity().is_none() {
                return Err(ProtocolError::TlsError(
                    "An acceptor using TLS needs a certificate".into(),
                ));
            }
        }

        let pipeline = MessagePipeline::from_config(&config, codec);
        Ok(Self {
            endpoint,
            config,
            pipeline,
            state: ActorState::Idle,
            listener: None,
            stream: None,
            remote: None,
            lease: None,
        })
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

    /// Address of the connected client.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// Address the listening socket is bound to, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn is_tls(&self) -> bool {
        self.stream.as_ref().is_some_and(TransportStream::is_tls)
    }

    /// Bind the listening socket now instead of on the first listen attempt.
    ///
    /// Returns the bound address (the real port when the endpoint asked for port 0). A bound
    /// listener is reused by every later attempt until [`stop`](TransportActor::stop).
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        if self.state == ActorState::Disposed {
            return Err(ProtocolError::Disposed);
        }
        if self.listener.is_none() {
            let listener = bind_listener(&self.endpoint).await?;
            info!(endpoint = %self.endpoint, addr = ?listener.local_addr().ok(), "Listening");
            self.listener = Some(listener);
        }
        match self.local_addr() {
            Some(addr) => Ok(addr),
            None => Err(ProtocolError::ConnectionAttemptFailed(format!(
                "{}: listener has no local address",
                self.endpoint
            ))),
        }
    }

    /// Run the listen retry loop until one client is connected.
    ///
    /// Same contract as [`Connector::connect`](super::Connector::connect): `Ok(false)` on
    /// cancellation or once attempts are exhausted, attempt failures only logged.
    /// `handshake_timeout` bounds the TLS handshake; waiting for a client is unbounded.
    #[instrument(skip(self, policy, cancel), fields(endpoint = %self.endpoint))]
    pub async fn listen(&mut self, policy: &RetryPolicy, cancel: &CancellationToken) -> Result<bool> {
        self.state.ensure_can_connect()?;
        policy.check()?;

        let tls = match self.config.tls() {
            Some(options) => Some(options.server()?),
            None => None,
        };
        let metrics = self.config.metrics().clone();

        self.state = ActorState::Connecting;

        for attempt in 1..=policy.max_attempts {
            metrics.attempt_started();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.accept_one(tls.as_ref(), policy) => Some(result),
            };

            match outcome {
                None => {
                    info!(attempt, "Listen cancelled");
                    self.state = ActorState::Idle;
                    return Ok(false);
                }
                Some(Ok((stream, remote))) => {
                    metrics.connection_established();
                    info!(attempt, %remote, tls = stream.is_tls(), "Accepted connection");
                    self.stream = Some(stream);
                    self.remote = Some(remote);
                    self.state = ActorState::Connected;
                    return Ok(true);
                }
                Some(Err(e)) => {
                    metrics.attempt_failed(matches!(e, ProtocolError::HandshakeError(_)));
                    warn!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %e,
                        "Listen attempt failed"
                    );
                }
            }

            if attempt < policy.max_attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!(attempt, "Listen cancelled");
                        self.state = ActorState::Idle;
                        return Ok(false);
                    }
                    _ = tokio::time::sleep(policy.retry_delay) => {}
                }
            }
        }

        warn!(max_attempts = policy.max_attempts, "Listen attempts exhausted");
        self.state = ActorState::Idle;
        Ok(false)
    }

    async fn accept_one(
        &mut self,
        tls: Option<&ServerTls>,
        policy: &RetryPolicy,
    ) -> Result<(TransportStream, SocketAddr)> {
        if self.listener.is_none() {
            let listener = bind_listener(&self.endpoint).await?;
            info!(addr = ?listener.local_addr().ok(), "Listening");
            self.listener = Some(listener);
        }

        let (tcp, remote) = match &self.listener {
            Some(listener) => listener.accept().await?,
            None => {
                return Err(ProtocolError::ConnectionAttemptFailed(format!(
                    "{}: listener unavailable",
                    self.endpoint
                )))
            }
        };
        socket::configure_stream(&tcp)?;
        debug!(%remote, "TCP connection accepted");

        let stream = match tls {
            Some(tls) => with_timeout(policy.handshake_timeout, tls.handshake(tcp))
                .await?
                .into(),
            None => tcp.into(),
        };
        Ok((stream, remote))
    }

    /// Stream messages of type `T` from the connected client.
    ///
    /// Fails with `NotConnected` (or `Disposed`) up front; after that nothing is raised. A
    /// remote close, a broken or oversized frame and a mid-frame cancellation also drop the
    /// connection. An undecodable payload ends the stream but keeps the connection, since
    /// framing is still intact.
    pub fn receive<T>(&mut self, cancel: CancellationToken) -> Result<MessageStream<'_, T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.state.ensure_connected()?;

        let end = Arc::new(OnceLock::new());
        let state = ReceiveState {
            reader: FrameReader::new(self.pipeline.max_frame_size()),
            acceptor: self,
            cancel,
            end: end.clone(),
        };

        let inner = stream::unfold(state, |state| async move {
            let ReceiveState {
                acceptor,
                mut reader,
                cancel,
                end,
            } = state;
            match acceptor.next_message::<T>(&mut reader, &cancel).await {
                Ok(message) => Some((
                    message,
                    ReceiveState {
                        acceptor,
                        reader,
                        cancel,
                        end,
                    },
                )),
                Err(reason) => {
                    let _ = end.set(reason);
                    None
                }
            }
        })
        .fuse()
        .boxed();

        Ok(MessageStream { inner, end })
    }

    async fn next_message<T: DeserializeOwned>(
        &mut self,
        reader: &mut FrameReader,
        cancel: &CancellationToken,
    ) -> std::result::Result<T, StreamEnd> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(StreamEnd::Closed);
        };
        let source = self.remote;
        let metrics = self.config.metrics().clone();

        let payload = match reader.read_frame(stream, cancel).await {
            Ok(FrameRead::Frame(payload)) => payload,
            Ok(FrameRead::Closed) => {
                info!(source = ?source, "Remote closed the connection");
                self.drop_connection();
                return Err(StreamEnd::Closed);
            }
            Ok(FrameRead::Cancelled { mid_frame }) => {
                debug!(mid_frame, "Receive cancelled");
                if mid_frame {
                    self.drop_connection();
                }
                return Err(StreamEnd::Cancelled);
            }
            Err(e) => {
                warn!(source = ?source, error = %e, "Read failed, ending receive stream");
                metrics.receive_fault();
                self.drop_connection();
                return Err(StreamEnd::Faulted(e));
            }
        };
        metrics.frame_received((HEADER_LEN + payload.len()) as u64);

        match self.pipeline.decode_payload::<T>(&payload) {
            Ok(message) => {
                debug!(
                    message_type = type_name::<T>(),
                    source = ?source,
                    bytes = payload.len(),
                    "Message received"
                );
                Ok(message)
            }
            Err(e) => {
                warn!(source = ?source, error = %e, "Undecodable frame, ending receive stream");
                metrics.receive_fault();
                Err(StreamEnd::Faulted(e))
            }
        }
    }

    fn drop_connection(&mut self) {
        self.stream = None;
        self.remote = None;
        if self.state == ActorState::Connected {
            self.state = ActorState::Idle;
        }
    }
}

impl<C: MessageCodec> TransportActor for Acceptor<C> {
    fn is_connected(&self) -> bool {
        self.state == ActorState::Connected
    }

    fn is_disposed(&self) -> bool {
        self.state == ActorState::Disposed
    }

    async fn stop(&mut self) {
        if self.listener.take().is_some() {
            debug!(endpoint = %self.endpoint, "Listener released");
        }

        match self.stream.take() {
            Some(stream) => {
                if let Err(e) = stream.close().await {
                    debug!(error = %e, "Error while closing stream");
                }
                info!(endpoint = %self.endpoint, "Acceptor stopped");
            }
            None => debug!(endpoint = %self.endpoint, "Stop requested while not connected"),
        }

        self.remote = None;
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
        debug!(endpoint = %self.endpoint, "Acceptor disposed");
    }
}

/// Bind the first resolved address that accepts a listener.
async fn bind_listener(endpoint: &Endpoint) -> Result<TcpListener> {
    let mut last_error = None;
    for addr in endpoint.resolve().await? {
        match socket::listen(addr) {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                debug!(%addr, error = %e, "Bind failed");
                last_error = Some(e);
            }
        }
    }

    Err(ProtocolError::ConnectionAttemptFailed(match last_error {
        Some(e) => format!("cannot bind {endpoint}: {e}"),
        None => format!("cannot bind {endpoint}: no address"),
    }))
}
