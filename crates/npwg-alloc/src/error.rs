//! Error types for address allocation.

use thiserror::Error;

use npwg_store::StoreError;

/// Errors that can occur allocating or validating pool addresses.
#[derive(Debug, Error)]
pub enum AllocError {
    /// The pool does not exist.
    #[error("ip pool not found: {0}")]
    PoolNotFound(String),

    /// The pool exists but is disabled.
    #[error("ip pool disabled: {0}")]
    PoolDisabled(String),

    /// The pool's stored CIDR failed to parse.
    #[error("ip pool has invalid cidr: {0}")]
    InvalidCidr(String),

    /// The requested address is not IPv4.
    #[error("not an IPv4 address: {0}")]
    NotIpv4(String),

    /// The requested address lies outside the pool's prefix.
    #[error("ip {ip} is outside pool cidr {cidr}")]
    OutOfRange {
        /// The requested address.
        ip: String,
        /// The pool prefix.
        cidr: String,
    },

    /// The requested address is the network address.
    #[error("ip {0} is the network address")]
    NetworkAddress(String),

    /// The requested address is the broadcast address.
    #[error("ip {0} is the broadcast address")]
    BroadcastAddress(String),

    /// The requested address is the server's own tunnel address.
    #[error("ip {0} is the server address")]
    ServerIp(String),

    /// The requested address is already allocated.
    #[error("ip already in use: {0}")]
    AlreadyInUse(String),

    /// The pool has no free host addresses left.
    #[error("ip allocation failed: pool {0} exhausted")]
    Exhausted(String),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type alias for allocator operations.
pub type Result<T> = std::result::Result<T, AllocError>;
