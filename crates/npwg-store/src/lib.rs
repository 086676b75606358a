//! Data model and SQLite persistence for NexusPointWG.
//!
//! One store, one schema: users, IP pools, WireGuard peers and IP
//! allocations, with the transactional batch operations and secondary-key
//! lookups the management plane needs. The connection sits behind a mutex;
//! callers that need read-modify-write ordering against the config file
//! additionally take the file lock.

pub mod error;
mod models;
mod password;
mod sqlite;

pub use error::StoreError;
pub use models::{
    AllocationStatus, IpAllocation, IpPool, PeerStatus, PoolStatus, User, UserRole, UserStatus,
    WgPeer, EXTERNAL_MANAGED_KEY,
};
pub use password::{hash_password, verify_password};
pub use sqlite::{PeerFilter, Store, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
