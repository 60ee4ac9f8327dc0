//! # Transport Actors
//!
//! - [`Connector`]: outbound, dials and sends
//! - [`Acceptor`]: inbound, listens, accepts one client and streams received messages
//! - [`Peer`]: one of each, driven together
//!
//! Each actor exclusively owns its sockets. Lifecycle:
//! `Idle -> Connecting (retry loop) -> Connected -> Idle (stop / terminal I/O failure)`, and
//! `Disposed` from anywhere, after which every operation fails.

pub mod acceptor;
pub mod actor;
pub mod connector;
pub mod peer;
pub(crate) mod socket;
pub mod stream;
pub mod tls;

pub use acceptor::{Acceptor, MessageStream, StreamEnd};
pub use actor::{ActorRole, ActorState, TransportActor};
pub use connector::Connector;
pub use peer::Peer;
pub use stream::TransportStream;
pub use tls::{CertificateContext, CertificateValidator, TlsIdentity, TlsOptions};
