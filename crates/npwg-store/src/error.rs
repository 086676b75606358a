//! Error types for the persistence layer.

use thiserror::Error;

/// Errors surfaced by the store.
///
/// Unique-constraint violations are translated into the typed conflict
/// variants by inspecting the SQLite error surface; everything else is
/// wrapped in [`StoreError::Database`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// A username is already taken.
    #[error("user already exists: {0}")]
    UserAlreadyExists(String),

    /// An email is already registered.
    #[error("email already exists: {0}")]
    EmailAlreadyExists(String),

    /// A pool name or CIDR already exists.
    #[error("ip pool already exists: {0}")]
    PoolAlreadyExists(String),

    /// A pool still has allocated addresses and cannot be deleted.
    #[error("ip pool in use: {0}")]
    PoolInUse(String),

    /// An address is already allocated within the pool.
    #[error("ip already in use: {0}")]
    IpAlreadyInUse(String),

    /// A pool CIDR cannot change once addresses are allocated from it.
    #[error("pool cidr is immutable once allocations exist: {0}")]
    PoolCidrImmutable(String),

    /// No such user.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// No such pool.
    #[error("ip pool not found: {0}")]
    PoolNotFound(String),

    /// No such peer.
    #[error("wireguard peer not found: {0}")]
    PeerNotFound(String),

    /// Wrong username or password. Deliberately identical for unknown
    /// users and bad passwords.
    #[error("password incorrect")]
    PasswordIncorrect,

    /// The user exists but is not active.
    #[error("user not active: {0}")]
    UserNotActive(String),

    /// Any other backend failure.
    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, Some(message)) = &err {
            if failure.code == rusqlite::ErrorCode::ConstraintViolation {
                if message.contains("users.username") {
                    return Self::UserAlreadyExists(message.clone());
                }
                if message.contains("users.email") {
                    return Self::EmailAlreadyExists(message.clone());
                }
                if message.contains("ip_pools.name") || message.contains("ip_pools.cidr") {
                    return Self::PoolAlreadyExists(message.clone());
                }
                if message.contains("ip_allocations.ip_address")
                    || message.contains("ip_allocations.peer_id")
                {
                    return Self::IpAlreadyInUse(message.clone());
                }
            }
        }
        Self::Database(err.to_string())
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
