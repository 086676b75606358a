//! Error types for address and endpoint parsing.

use thiserror::Error;

/// Errors that can occur parsing addresses, prefixes and endpoints.
#[derive(Debug, Clone, Error)]
pub enum NetError {
    /// Input was a valid address but not IPv4.
    #[error("not an IPv4 address: {0}")]
    NotIpv4(String),

    /// Input could not be parsed as `A.B.C.D/N`.
    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),

    /// Input could not be parsed as `host:port`.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Result type alias for net operations.
pub type Result<T> = std::result::Result<T, NetError>;
