//! The pool allocator.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use tracing::debug;

use npwg_net::{host_range, parse_cidr};
use npwg_store::{IpAllocation, IpPool, PoolStatus, Store};

use crate::error::{AllocError, Result};

/// Allocates, validates and releases pool addresses against the store.
#[derive(Clone)]
pub struct PoolAllocator {
    store: Store,
}

/// A pool loaded together with its current exclusion state.
struct LoadedPool {
    pool: IpPool,
    net: Ipv4Net,
    allocated: HashSet<Ipv4Addr>,
}

impl PoolAllocator {
    /// Creates an allocator over a store handle.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    fn load(&self, pool_id: &str) -> Result<LoadedPool> {
        let pool = match self.store.pool_by_id(pool_id) {
            Ok(pool) => pool,
            Err(npwg_store::StoreError::PoolNotFound(id)) => {
                return Err(AllocError::PoolNotFound(id))
            }
            Err(e) => return Err(e.into()),
        };
        if pool.status != PoolStatus::Active {
            return Err(AllocError::PoolDisabled(pool.name.clone()));
        }
        let net = parse_cidr(&pool.cidr).map_err(|e| AllocError::InvalidCidr(e.to_string()))?;
        let allocated = self
            .store
            .allocated_ips_by_pool(&pool.id)?
            .iter()
            .filter_map(|ip| ip.parse().ok())
            .collect();
        Ok(LoadedPool { pool, net, allocated })
    }

    fn check(
        loaded: &LoadedPool,
        ip: Ipv4Addr,
        server_ip: Option<Ipv4Addr>,
    ) -> Result<()> {
        if !loaded.net.contains(&ip) {
            return Err(AllocError::OutOfRange {
                ip: ip.to_string(),
                cidr: loaded.pool.cidr.clone(),
            });
        }
        if ip == loaded.net.network() {
            return Err(AllocError::NetworkAddress(ip.to_string()));
        }
        if ip == loaded.net.broadcast() {
            return Err(AllocError::BroadcastAddress(ip.to_string()));
        }
        if Some(ip) == server_ip {
            return Err(AllocError::ServerIp(ip.to_string()));
        }
        if loaded.allocated.contains(&ip) {
            return Err(AllocError::AlreadyInUse(ip.to_string()));
        }
        Ok(())
    }

    /// Runs the allocation pipeline without writing: validates a preferred
    /// address, or picks the numerically lowest free host. The caller
    /// writes the allocation row inside its own locked section.
    pub fn validate_ip(
        &self,
        pool_id: &str,
        preferred: Option<Ipv4Addr>,
        server_ip: Option<Ipv4Addr>,
    ) -> Result<Ipv4Addr> {
        let loaded = self.load(pool_id)?;
        if let Some(ip) = preferred {
            Self::check(&loaded, ip, server_ip)?;
            return Ok(ip);
        }
        host_range(loaded.net)
            .find(|ip| Self::check(&loaded, *ip, server_ip).is_ok())
            .ok_or_else(|| AllocError::Exhausted(loaded.pool.name.clone()))
    }

    /// Validates (or picks) an address and writes the allocation row for
    /// `peer_id`.
    pub fn allocate_ip(
        &self,
        pool_id: &str,
        peer_id: &str,
        preferred: Option<Ipv4Addr>,
        server_ip: Option<Ipv4Addr>,
    ) -> Result<IpAllocation> {
        let ip = self.validate_ip(pool_id, preferred, server_ip)?;
        let alloc = IpAllocation::new(pool_id, peer_id, &ip.to_string());
        self.store.create_allocation(&alloc)?;
        debug!(pool = pool_id, peer = peer_id, ip = %ip, "allocated address");
        Ok(alloc)
    }

    /// Returns up to `limit` free host addresses, ascending. A zero limit
    /// falls back to the default page size.
    pub fn available_ips(
        &self,
        pool_id: &str,
        limit: u32,
        server_ip: Option<Ipv4Addr>,
    ) -> Result<Vec<Ipv4Addr>> {
        let limit = if limit == 0 {
            npwg_store::DEFAULT_LIST_LIMIT
        } else {
            limit.min(npwg_store::MAX_LIST_LIMIT)
        };
        let loaded = self.load(pool_id)?;
        Ok(host_range(loaded.net)
            .filter(|ip| Self::check(&loaded, *ip, server_ip).is_ok())
            .take(limit as usize)
            .collect())
    }

    /// Releases a peer's allocated address. A peer without an allocation
    /// is a no-op.
    pub fn release_ip(&self, peer_id: &str) -> Result<()> {
        self.store.release_allocation(peer_id)?;
        debug!(peer = peer_id, "released address");
        Ok(())
    }
}
