//! Full-duplex peer: one [`Connector`] for sending and one [`Acceptor`] for receiving, each with
//! its own endpoint and socket.

use std::net::SocketAddr;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::RetryPolicy;
use crate::core::serialization::{MessageCodec, SerializationFormat};
use crate::error::Result;
use crate::transport::acceptor::{Acceptor, MessageStream};
use crate::transport::actor::TransportActor;
use crate::transport::connector::Connector;

/// Connected iff both halves are connected.
///
/// The halves share nothing. [`split`](Self::split) hands out both at once so a live receive
/// stream and sends can be driven together.
#[derive(Debug)]
pub struct Peer<C = SerializationFormat> {
    connector: Connector<C>,
    acceptor: Acceptor<C>,
}

impl<C: MessageCodec> Peer<C> {
    pub fn new(connector: Connector<C>, acceptor: Acceptor<C>) -> Self {
        Self {
            connector,
            acceptor,
        }
    }

    pub fn connector(&self) -> &Connector<C> {
        &self.connector
    }

    pub fn acceptor(&self) -> &Acceptor<C> {
        &self.acceptor
    }

    pub fn connector_mut(&mut self) -> &mut Connector<C> {
        &mut self.connector
    }

    pub fn acceptor_mut(&mut self) -> &mut Acceptor<C> {
        &mut self.acceptor
    }

    /// Borrow the sending and receiving halves separately.
    pub fn split(&mut self) -> (&mut Connector<C>, &mut Acceptor<C>) {
        (&mut self.connector, &mut self.acceptor)
    }

    /// Bind the acceptor's listening socket ahead of [`connect`](Self::connect).
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        self.acceptor.bind().await
    }

    /// Local address of the acceptor's listener, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.acceptor.local_addr()
    }

    /// Run the connector's connect loop and the acceptor's listen loop concurrently.
    ///
    /// Neither loop cancels the other; both run to their own completion (or until `cancel`
    /// fires). Returns `Ok(a && b)`. Lifecycle violations of either half are returned as
    /// errors after both finished. Dropping the future leaves both halves in place, not
    /// connected, and ready for another call.
    #[instrument(skip_all)]
    pub async fn connect(&mut self, policy: &RetryPolicy, cancel: &CancellationToken) -> Result<bool> {
        let (sent, received) = tokio::join!(
            self.connector.connect(policy, cancel),
            self.acceptor.listen(policy, cancel),
        );

        let (sent, received) = (sent?, received?);
        let connected = sent && received;
        if connected {
            info!("Peer connected in both directions");
        } else {
            warn!(outbound = sent, inbound = received, "Peer connection incomplete");
        }
        Ok(connected)
    }

    /// Send through the connector.
    pub async fn send<T: Serialize + ?Sized>(&mut self, message: &T) -> Result<()> {
        self.connector.send(message).await
    }

    pub async fn send_with_cancel<T: Serialize + ?Sized>(
        &mut self,
        message: &T,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.connector.send_with_cancel(message, cancel).await
    }

    /// Receive through the acceptor.
    ///
    /// The stream borrows the whole peer; use [`split`](Self::split) to keep sending while it
    /// is live.
    pub fn receive<T>(&mut self, cancel: CancellationToken) -> Result<MessageStream<'_, T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.acceptor.receive(cancel)
    }
}

impl<C: MessageCodec> TransportActor for Peer<C> {
    fn is_connected(&self) -> bool {
        self.connector.is_connected() && self.acceptor.is_connected()
    }

    fn is_disposed(&self) -> bool {
        self.connector.is_disposed() && self.acceptor.is_disposed()
    }

    async fn stop(&mut self) {
        tokio::join!(self.connector.stop(), self.acceptor.stop());
    }

    async fn dispose(&mut self) {
        tokio::join!(self.connector.dispose(), self.acceptor.dispose());
    }
}
