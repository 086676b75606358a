//! `host:port` endpoint parsing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{NetError, Result};

/// A WireGuard endpoint: a host (DNS name or IPv4 literal) and a port.
///
/// Unlike a `SocketAddr`, the host is kept as text; operator endpoints are
/// routinely DNS names that only the client resolves.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates an endpoint from a host and port.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is empty or an IPv6 literal.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        if host.is_empty() {
            return Err(NetError::InvalidEndpoint("empty host".to_string()));
        }
        if host.contains(':') {
            return Err(NetError::NotIpv4(host));
        }
        Ok(Self { host, port })
    }

    /// The host component.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port component.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Endpoint {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| NetError::InvalidEndpoint(format!("{s}: missing port")))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| NetError::InvalidEndpoint(format!("{s}: bad port")))?;
        Self::new(host, port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
