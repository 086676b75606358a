//! Pool administration.
//!
//! Thin validation layer over the store's pool CRUD: pool prefixes must
//! be IPv4 and wide enough to hold at least one allocatable host after
//! the network, broadcast and server addresses are excluded.

use tracing::info;

use npwg_net::{parse_cidr, Endpoint, MAX_POOL_PREFIX};
use npwg_store::{IpPool, PoolStatus, Store};

use crate::error::{Error, ErrorKind, Result};

/// Inputs for creating a pool.
#[derive(Clone, Debug, Default)]
pub struct NewPoolRequest {
    /// Unique display name.
    pub name: String,
    /// IPv4 prefix, `/30` or wider.
    pub cidr: String,
    /// Default AllowedIPs for clients in this pool.
    pub routes: String,
    /// DNS override.
    pub dns: String,
    /// Endpoint override, `host:port`.
    pub endpoint: String,
}

/// Inputs for updating a pool; `None` leaves the field alone.
#[derive(Clone, Debug, Default)]
pub struct UpdatePoolRequest {
    /// Pool to update.
    pub pool_id: String,
    /// New name.
    pub name: Option<String>,
    /// New CIDR; rejected once allocations exist.
    pub cidr: Option<String>,
    /// New routes.
    pub routes: Option<String>,
    /// New DNS.
    pub dns: Option<String>,
    /// New endpoint.
    pub endpoint: Option<String>,
    /// New status.
    pub status: Option<PoolStatus>,
}

/// Validated pool CRUD.
#[derive(Clone)]
pub struct PoolAdmin {
    store: Store,
}

impl PoolAdmin {
    /// Creates the admin over a store handle.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    fn validate_cidr(cidr: &str) -> Result<()> {
        let net = parse_cidr(cidr)?;
        if net.prefix_len() > MAX_POOL_PREFIX {
            return Err(Error::new(
                ErrorKind::WgPrefixTooSmall,
                format!("/{} leaves no allocatable hosts", net.prefix_len()),
            ));
        }
        Ok(())
    }

    fn validate_endpoint(endpoint: &str) -> Result<()> {
        if endpoint.is_empty() {
            return Ok(());
        }
        endpoint.parse::<Endpoint>()?;
        Ok(())
    }

    /// Creates a pool.
    ///
    /// # Errors
    ///
    /// Rejects empty names (`Validation`), non-IPv4 or malformed prefixes
    /// (`IpNotIpv4`/`IpPoolInvalidCidr`), prefixes narrower than /30
    /// (`WgPrefixTooSmall`) and duplicates (`IpPoolAlreadyExists`).
    pub fn create_pool(&self, req: &NewPoolRequest) -> Result<IpPool> {
        if req.name.trim().is_empty() {
            return Err(Error::new(ErrorKind::Validation, "pool name is empty"));
        }
        Self::validate_cidr(&req.cidr)?;
        Self::validate_endpoint(&req.endpoint)?;

        let mut pool = IpPool::new(req.name.trim(), req.cidr.trim());
        pool.routes = req.routes.clone();
        pool.dns = req.dns.clone();
        pool.endpoint = req.endpoint.clone();
        self.store.create_pool(&pool)?;
        info!(pool = %pool.name, cidr = %pool.cidr, "pool created");
        Ok(pool)
    }

    /// Updates a pool. The CIDR change is re-validated here and rejected
    /// by the store once allocations exist.
    pub fn update_pool(&self, req: &UpdatePoolRequest) -> Result<IpPool> {
        let mut pool = self.store.pool_by_id(&req.pool_id)?;
        if let Some(name) = &req.name {
            if name.trim().is_empty() {
                return Err(Error::new(ErrorKind::Validation, "pool name is empty"));
            }
            pool.name = name.trim().to_string();
        }
        if let Some(cidr) = &req.cidr {
            Self::validate_cidr(cidr)?;
            pool.cidr = cidr.trim().to_string();
        }
        if let Some(routes) = &req.routes {
            pool.routes = routes.clone();
        }
        if let Some(dns) = &req.dns {
            pool.dns = dns.clone();
        }
        if let Some(endpoint) = &req.endpoint {
            Self::validate_endpoint(endpoint)?;
            pool.endpoint = endpoint.clone();
        }
        if let Some(status) = req.status {
            pool.status = status;
        }
        self.store.update_pool(&pool)?;
        Ok(pool)
    }

    /// Deletes a pool; guarded by the store while addresses are
    /// allocated.
    pub fn delete_pool(&self, pool_id: &str) -> Result<()> {
        self.store.delete_pool(pool_id)?;
        Ok(())
    }

    /// Creates several pools in one transaction, validating each first.
    pub fn batch_create_pools(&self, reqs: &[NewPoolRequest]) -> Result<Vec<IpPool>> {
        let mut pools = Vec::with_capacity(reqs.len());
        for req in reqs {
            if req.name.trim().is_empty() {
                return Err(Error::new(ErrorKind::Validation, "pool name is empty"));
            }
            Self::validate_cidr(&req.cidr)?;
            Self::validate_endpoint(&req.endpoint)?;
            let mut pool = IpPool::new(req.name.trim(), req.cidr.trim());
            pool.routes = req.routes.clone();
            pool.dns = req.dns.clone();
            pool.endpoint = req.endpoint.clone();
            pools.push(pool);
        }
        self.store.batch_create_pools(&pools)?;
        Ok(pools)
    }

    /// Deletes several pools in one transaction; any in-use pool aborts
    /// the batch.
    pub fn batch_delete_pools(&self, ids: &[String]) -> Result<()> {
        self.store.batch_delete_pools(ids)?;
        Ok(())
    }

    /// Fetches a pool.
    pub fn get_pool(&self, pool_id: &str) -> Result<IpPool> {
        Ok(self.store.pool_by_id(pool_id)?)
    }

    /// Lists pools.
    pub fn list_pools(&self, q: Option<&str>, limit: u32, offset: u32) -> Result<(Vec<IpPool>, u64)> {
        Ok(self.store.list_pools(q, limit, offset)?)
    }
}
