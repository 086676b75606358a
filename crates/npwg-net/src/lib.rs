//! IPv4 prefix math and endpoint parsing for NexusPointWG.
//!
//! Everything here is IPv4-only: pool CIDRs, client addresses and server
//! tunnel addresses are all v4, and v6 input is rejected explicitly rather
//! than silently ignored.

mod cidr;
mod endpoint;
pub mod error;

pub use cidr::{host_range, parse_cidr, parse_ipv4, HostRange, MAX_POOL_PREFIX};
pub use endpoint::Endpoint;
pub use error::NetError;
