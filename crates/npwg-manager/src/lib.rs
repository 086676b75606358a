//! Peer lifecycle, reconciliation and interface apply for NexusPointWG.
//!
//! This crate binds the leaf pieces (keys, CIDR math, the config codec,
//! the store, the allocator) into the management plane proper:
//!
//! - [`PeerManager`] owns peer mutations end to end: database rows,
//!   address allocation, key material, client artifacts, the managed block
//!   of the server config file, and the interface reload.
//! - [`Synchronizer`] reconciles the on-disk file with the database,
//!   adopting peers added by hand and retiring peers removed by hand.
//! - [`ApplyDriver`] asks the process supervisor to reload the interface.
//! - [`FileLock`] serializes every config-file touching operation.
//!
//! All mutating operations take a `CancellationToken` and hold the file
//! lock for their full extent. Failures after the database write are
//! logged and swallowed; the next synchronizer pass converges.

pub mod apply;
pub mod artifacts;
pub mod defaults;
pub mod error;
pub mod fsatomic;
pub mod fslock;
mod lifecycle;
mod pools;
mod sync;

pub use apply::ApplyDriver;
pub use artifacts::{ArtifactStore, PeerMeta};
pub use defaults::{GlobalDefaults, FALLBACK_ALLOWED_IPS};
pub use error::{Error, ErrorKind};
pub use fslock::FileLock;
pub use lifecycle::{CreatePeerRequest, DeleteMode, PeerManager, UpdatePeerRequest, WgSettings};
pub use pools::{NewPoolRequest, PoolAdmin, UpdatePoolRequest};
pub use sync::{SyncReport, Synchronizer};

/// Name of the advisory lock file under the WireGuard root directory.
pub const LOCK_FILE_NAME: &str = ".nexuspointwg.lock";
