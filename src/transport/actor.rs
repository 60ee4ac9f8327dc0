//! Behaviour shared by every transport actor.

use std::fmt;
use std::future::Future;

use serde::Serialize;

use crate::error::{ProtocolError, Result};

/// Lifecycle position of a single connector or acceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorState {
    /// Not connected; connect/listen may be called.
    #[default]
    Idle,
    /// A retry loop is running.
    Connecting,
    Connected,
    /// Terminal.
    Disposed,
}

impl ActorState {
    /// Fail fast before a connect/listen retry loop.
    pub(crate) fn ensure_can_connect(self) -> Result<()> {
        match self {
            ActorState::Disposed => Err(ProtocolError::Disposed),
            ActorState::Connected => Err(ProtocolError::AlreadyConnected),
            ActorState::Idle | ActorState::Connecting => Ok(()),
        }
    }

    /// Fail fast before send/receive.
    pub(crate) fn ensure_connected(self) -> Result<()> {
        match self {
            ActorState::Disposed => Err(ProtocolError::Disposed),
            ActorState::Connected => Ok(()),
            ActorState::Idle | ActorState::Connecting => Err(ProtocolError::NotConnected),
        }
    }
}

/// Which side of a connection an actor plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    /// Dials out and sends.
    Connector,
    /// Listens and receives.
    Acceptor,
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorRole::Connector => f.write_str("connector"),
            ActorRole::Acceptor => f.write_str("acceptor"),
        }
    }
}

/// Lifecycle operations common to [`Connector`](super::Connector),
/// [`Acceptor`](super::Acceptor) and [`Peer`](super::Peer).
pub trait TransportActor {
    fn is_connected(&self) -> bool;

    fn is_disposed(&self) -> bool;

    /// Release the connection. A no-op when not connected; the actor can connect again.
    fn stop(&mut self) -> impl Future<Output = ()> + Send;

    /// Stop, then refuse every further operation with `Disposed`.
    fn dispose(&mut self) -> impl Future<Output = ()> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_guards() {
        assert!(ActorState::Idle.ensure_can_connect().is_ok());
        assert!(matches!(
            ActorState::Connected.ensure_can_connect(),
            Err(ProtocolError::AlreadyConnected)
        ));
        assert!(matches!(
            ActorState::Disposed.ensure_can_connect(),
            Err(ProtocolError::Disposed)
        ));
        assert!(matches!(
            ActorState::Idle.ensure_connected(),
            Err(ProtocolError::NotConnected)
        ));
        assert!(ActorState::Connected.ensure_connected().is_ok());
    }

    #[test]
    fn test_role_display() {
        assert_eq!(ActorRole::Connector.to_string(), "connector");
        assert_eq!(ActorRole::Acceptor.to_string(), "acceptor");
    }
}
