//! One live actor per role and endpoint.
//!
//! A service claims a lease when it builds an actor; the lease travels with the actor and frees
//! the slot when the actor is disposed or dropped.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::core::endpoint::Endpoint;
use crate::error::{ProtocolError, Result};
use crate::transport::actor::ActorRole;

type Slots = Arc<RwLock<HashSet<(ActorRole, Endpoint)>>>;

#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    slots: Slots,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `(role, endpoint)`.
    ///
    /// Ephemeral endpoints (port 0) are never tracked and yield `None`. A slot already held
    /// fails with `AlreadyConnected`.
    pub fn claim(&self, role: ActorRole, endpoint: &Endpoint) -> Result<Option<EndpointLease>> {
        if endpoint.is_ephemeral() {
            return Ok(None);
        }

        let key = (role, endpoint.clone());
        let mut slots = self.slots.write().map_err(|_| {
            ProtocolError::Custom("Failed to acquire write lock on endpoint registry".to_string())
        })?;

        if !slots.insert(key.clone()) {
            return Err(ProtocolError::AlreadyConnected);
        }
        debug!(%role, %endpoint, "Endpoint claimed");

        Ok(Some(EndpointLease {
            slots: self.slots.clone(),
            key,
        }))
    }

    pub fn is_claimed(&self, role: ActorRole, endpoint: &Endpoint) -> Result<bool> {
        let slots = self.slots.read().map_err(|_| {
            ProtocolError::Custom("Failed to acquire read lock on endpoint registry".to_string())
        })?;
        Ok(slots.contains(&(role, endpoint.clone())))
    }

    pub fn len(&self) -> usize {
        self.slots.read().map(|slots| slots.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Holds a registry slot until dropped.
#[derive(Debug)]
pub struct EndpointLease {
    slots: Slots,
    key: (ActorRole, Endpoint),
}

impl EndpointLease {
    pub fn endpoint(&self) -> &Endpoint {
        &self.key.1
    }

    pub fn role(&self) -> ActorRole {
        self.key.0
    }
}

impl Drop for EndpointLease {
    fn drop(&mut self) {
        if let Ok(mut slots) = self.slots.write() {
            slots.remove(&self.key);
            debug!(role = %self.key.0, endpoint = %self.key.1, "Endpoint released");
        }
    }
}
