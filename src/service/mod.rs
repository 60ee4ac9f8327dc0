//! # Transport Service
//!
//! Factory holding the shared [`TransportConfig`] and codec. Every actor built by one service
//! shares that configuration and its metrics, and is registered so that at most one live actor
//! exists per role and endpoint.

pub mod registry;

use std::sync::Arc;

use tracing::debug;

use crate::config::{NetworkConfig, TransportConfig};
use crate::core::endpoint::Endpoint;
use crate::core::serialization::{MessageCodec, SerializationFormat};
use crate::error::Result;
use crate::transport::actor::ActorRole;
use crate::transport::{Acceptor, Connector, Peer};
use crate::utils::metrics::TransportMetrics;

pub use registry::{EndpointLease, EndpointRegistry};

#[derive(Debug, Clone)]
pub struct TransportService<C = SerializationFormat> {
    config: Arc<TransportConfig>,
    codec: C,
    registry: EndpointRegistry,
}

impl TransportService<SerializationFormat> {
    pub fn new(config: TransportConfig) -> Self {
        Self::with_codec(config, SerializationFormat::default())
    }

    /// Build a service from file/env configuration, loading TLS material from disk.
    pub fn from_network_config(config: &NetworkConfig) -> Result<Self> {
        Ok(Self::new(config.transport_config()?))
    }
}

impl<C: MessageCodec> TransportService<C> {
    pub fn with_codec(config: TransportConfig, codec: C) -> Self {
        Self {
            config: Arc::new(config),
            codec,
            registry: EndpointRegistry::new(),
        }
    }

    pub fn config(&self) -> &Arc<TransportConfig> {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<TransportMetrics> {
        self.config.metrics()
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// Build an idle connector targeting `endpoint`.
    ///
    /// Fails with `AlreadyConnected` while another connector from this service holds the same
    /// endpoint.
    pub fn connector(&self, endpoint: Endpoint) -> Result<Connector<C>> {
        let lease = self.registry.claim(ActorRole::Connector, &endpoint)?;
        debug!(%endpoint, "Creating connector");
        Ok(Connector::with_codec(endpoint, self.config.clone(), self.codec.clone()).with_lease(lease))
    }

    /// Build an idle acceptor bound (later) to `endpoint`.
    pub fn acceptor(&self, endpoint: Endpoint) -> Result<Acceptor<C>> {
        let lease = self.registry.claim(ActorRole::Acceptor, &endpoint)?;
        debug!(%endpoint, "Creating acceptor");
        Ok(Acceptor::with_codec(endpoint, self.config.clone(), self.codec.clone())?.with_lease(lease))
    }

    /// Build a peer sending to `remote` and receiving on `local`.
    pub fn peer(&self, remote: Endpoint, local: Endpoint) -> Result<Peer<C>> {
        let connector = self.connector(remote)?;
        let acceptor = self.acceptor(local)?;
        Ok(Peer::new(connector, acceptor))
    }
}
