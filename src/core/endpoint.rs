//! Static `host:port` identity of a connector target or an acceptor bind address.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Immutable `(host, port)` pair. Equality and hashing use both fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint. Fails with `InvalidArgument` when `host` is empty.
    ///
    /// No name resolution happens here; see [`Endpoint::resolve`].
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        let trimmed = host.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::InvalidArgument(
                "endpoint host cannot be empty".into(),
            ));
        }
        Ok(Self {
            host: trimmed.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Port 0 asks the OS for an ephemeral port when binding.
    pub fn is_ephemeral(&self) -> bool {
        self.port == 0
    }

    /// Resolve the host to socket addresses.
    pub async fn resolve(&self) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                ProtocolError::ConnectionAttemptFailed(format!("cannot resolve {self}: {e}"))
            })?
            .collect();

        if addrs.is_empty() {
            return Err(ProtocolError::ConnectionAttemptFailed(format!(
                "{self} resolved to no addresses"
            )));
        }
        Ok(addrs)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = ProtocolError;

    /// Parse `host:port`, `[v6]:port` or a literal socket address.
    fn from_str(s: &str) -> Result<Self> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Endpoint::new(addr.ip().to_string(), addr.port());
        }

        let (host, port) = s.rsplit_once(':').ok_or_else(|| {
            ProtocolError::InvalidArgument(format!("'{s}' is not in host:port form"))
        })?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ProtocolError::InvalidArgument(format!("invalid port in '{s}'")))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Endpoint::new(host, port)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}
