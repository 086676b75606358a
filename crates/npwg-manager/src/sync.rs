//! Reconciliation between the config files and the database.
//!
//! Runs at boot and on demand. Peers found only in a file are adopted
//! into the database (with the `[external-managed]` key sentinel); active
//! database peers absent from every file are retired to `disabled`; peers
//! present in both are reactivated and their allocation rows repaired.
//! The synchronizer never rewrites the files themselves.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use npwg_conf::{parse, PeerSection};
use npwg_net::parse_cidr;
use npwg_store::{
    AllocationStatus, IpAllocation, IpPool, PeerStatus, PoolStatus, Store, WgPeer,
    EXTERNAL_MANAGED_KEY,
};

use crate::error::{Error, ErrorKind, Result};
use crate::fslock::FileLock;
use crate::lifecycle::WgSettings;

/// Device-name prefix given to adopted peers.
const EXTERNAL_DEVICE_PREFIX: &str = "[External] ";

/// Counters from one reconciliation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Peers promoted from file to database.
    pub adopted: u32,
    /// Active database peers disabled because no file mentions them.
    pub retired: u32,
    /// Database peers restored to active (or repaired).
    pub reactivated: u32,
    /// Per-peer failures, logged and skipped.
    pub failed: u32,
}

/// Reconciles the WireGuard root directory with the store.
#[derive(Clone)]
pub struct Synchronizer {
    store: Store,
    settings: WgSettings,
}

impl Synchronizer {
    /// Wires the synchronizer over a store and the WireGuard settings.
    #[must_use]
    pub fn new(store: Store, settings: WgSettings) -> Self {
        Self { store, settings }
    }

    /// Runs one reconciliation pass under the file lock.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory scan or a database query
    /// fails outright; per-peer failures are counted, not returned.
    pub async fn sync(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        let _lock = FileLock::acquire(&self.settings.lock_path(), cancel).await?;
        let file_peers = self.scan_files()?;
        let mut report = SyncReport::default();

        let db_active: HashMap<String, WgPeer> = self
            .store
            .active_peers()?
            .into_iter()
            .map(|p| (p.client_public_key.clone(), p))
            .collect();

        // Adopt: in a file, unknown to the database.
        for (public_key, section) in &file_peers {
            if self.store.peer_by_public_key(public_key)?.is_some() {
                continue;
            }
            match self.adopt(public_key, section) {
                Ok(()) => report.adopted += 1,
                Err(e) => {
                    warn!(public_key = %public_key, error = %e, "adoption failed");
                    report.failed += 1;
                }
            }
        }

        // Retire: active in the database, absent from every file.
        for (public_key, peer) in &db_active {
            if file_peers.contains_key(public_key) {
                continue;
            }
            let mut retired = peer.clone();
            retired.status = PeerStatus::Disabled;
            match self.store.update_peer(&retired) {
                Ok(()) => report.retired += 1,
                Err(e) => {
                    warn!(public_key = %public_key, error = %e, "retirement failed");
                    report.failed += 1;
                }
            }
        }

        // Reactivate and repair: present in both.
        for (public_key, section) in &file_peers {
            let Some(peer) = self.store.peer_by_public_key(public_key)? else {
                continue;
            };
            match self.reactivate(peer, section) {
                Ok(true) => report.reactivated += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(public_key = %public_key, error = %e, "reactivation failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            adopted = report.adopted,
            retired = report.retired,
            reactivated = report.reactivated,
            failed = report.failed,
            "sync pass complete"
        );
        Ok(report)
    }

    /// Parses every `.conf` under the root directory (skipping `.backup`
    /// files) into a map keyed by public key. The first file mentioning a
    /// key wins.
    fn scan_files(&self) -> Result<HashMap<String, PeerSection>> {
        let mut peers: HashMap<String, PeerSection> = HashMap::new();
        let entries = std::fs::read_dir(&self.settings.root_dir).map_err(|e| {
            Error::new(
                ErrorKind::WgConfigNotInitialized,
                format!("reading {}: {e}", self.settings.root_dir.display()),
            )
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(".conf") || name.ends_with(".backup") {
                continue;
            }
            let Ok(text) = std::fs::read_to_string(&path) else {
                warn!(path = %path.display(), "unreadable config file skipped");
                continue;
            };
            let doc = parse(&text);
            for peer in doc.peers {
                if peer.public_key.is_empty() {
                    continue;
                }
                peers.entry(peer.public_key.clone()).or_insert(peer);
            }
        }
        Ok(peers)
    }

    fn adopt(&self, public_key: &str, section: &PeerSection) -> Result<()> {
        let ip = peer_ip(section).ok_or_else(|| {
            Error::new(
                ErrorKind::WgAllowedIpsNotFound,
                format!("peer {public_key} has no parseable AllowedIPs"),
            )
        })?;
        let owner = self
            .store
            .first_active_admin()?
            .ok_or_else(|| Error::new(ErrorKind::UserNotFound, "no active admin to own adopted peers"))?;
        let pool = self.find_or_create_pool(ip)?;

        let device_name = format!(
            "{EXTERNAL_DEVICE_PREFIX}{}",
            comment_label(section).unwrap_or_else(|| public_key.chars().take(8).collect())
        );
        let now = chrono::Utc::now();
        let peer = WgPeer {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: owner.id,
            device_name,
            client_private_key: EXTERNAL_MANAGED_KEY.to_string(),
            client_public_key: public_key.to_string(),
            client_ip: format!("{ip}/32"),
            allowed_ips: section.allowed_ips.clone(),
            dns: String::new(),
            endpoint: section.endpoint.clone(),
            persistent_keepalive: section.persistent_keepalive,
            status: PeerStatus::Active,
            ip_pool_id: pool.id.clone(),
            created_at: now,
            updated_at: now,
        };
        let alloc = IpAllocation::new(&pool.id, &peer.id, &ip.to_string());
        self.store.create_peer_with_allocation(&peer, &alloc)?;
        info!(public_key, ip = %ip, pool = %pool.name, "adopted external peer");
        Ok(())
    }

    /// An existing pool covering the address wins; an exactly-matching
    /// disabled pool is re-enabled; otherwise a fresh `auto-<cidr>` pool
    /// for the address's /24 is created.
    fn find_or_create_pool(&self, ip: Ipv4Addr) -> Result<IpPool> {
        let pools = self.store.list_all_pools()?;
        for pool in &pools {
            if pool.status == PoolStatus::Active {
                if let Ok(net) = parse_cidr(&pool.cidr) {
                    if net.contains(&ip) {
                        return Ok(pool.clone());
                    }
                }
            }
        }

        let octets = ip.octets();
        let inferred = Ipv4Net::new(Ipv4Addr::new(octets[0], octets[1], octets[2], 0), 24)
            .map_err(|e| Error::new(ErrorKind::IpPoolInvalidCidr, e.to_string()))?;
        let inferred_cidr = inferred.to_string();

        for pool in &pools {
            if pool.cidr == inferred_cidr {
                let mut enabled = pool.clone();
                enabled.status = PoolStatus::Active;
                self.store.update_pool(&enabled)?;
                info!(pool = %enabled.name, "re-enabled pool for adoption");
                return Ok(enabled);
            }
        }

        let pool = IpPool::new(&format!("auto-{inferred_cidr}"), &inferred_cidr);
        self.store.create_pool(&pool)?;
        info!(pool = %pool.name, cidr = %pool.cidr, "created pool for adoption");
        Ok(pool)
    }

    /// Restores a known peer to active and repairs its allocation row so
    /// IP and pool match the file. Returns whether anything changed.
    fn reactivate(&self, mut peer: WgPeer, section: &PeerSection) -> Result<bool> {
        let mut changed = false;
        if peer.status != PeerStatus::Active {
            peer.status = PeerStatus::Active;
            self.store.update_peer(&peer)?;
            changed = true;
        }

        let Some(ip) = peer_ip(section) else {
            return Ok(changed);
        };
        let pool = self.find_or_create_pool(ip)?;
        match self.store.allocation_by_peer(&peer.id)? {
            None => {
                self.store
                    .create_allocation(&IpAllocation::new(&pool.id, &peer.id, &ip.to_string()))?;
                changed = true;
            }
            Some(mut alloc) => {
                if alloc.ip_address != ip.to_string()
                    || alloc.ip_pool_id != pool.id
                    || alloc.status != AllocationStatus::Allocated
                {
                    alloc.ip_address = ip.to_string();
                    alloc.ip_pool_id = pool.id.clone();
                    alloc.status = AllocationStatus::Allocated;
                    self.store.update_allocation(&alloc)?;
                    changed = true;
                }
            }
        }

        if peer.client_ip != format!("{ip}/32") || peer.ip_pool_id != pool.id {
            peer.client_ip = format!("{ip}/32");
            peer.ip_pool_id = pool.id;
            self.store.update_peer(&peer)?;
            changed = true;
        }
        Ok(changed)
    }
}

/// The peer's tunnel address: the host part of the first AllowedIPs
/// entry.
fn peer_ip(section: &PeerSection) -> Option<Ipv4Addr> {
    let first = section.allowed_ips.split(',').next()?.trim();
    if let Ok(net) = parse_cidr(first) {
        return Some(net.addr());
    }
    npwg_net::parse_ipv4(first).ok()
}

/// A human label from the peer's preceding comment, if it carries one.
fn comment_label(section: &PeerSection) -> Option<String> {
    let label = section
        .comment
        .trim_start_matches(['#', ';'])
        .trim()
        .to_string();
    (!label.is_empty()).then_some(label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use npwg_conf::ManagedTag;

    fn section(allowed_ips: &str, comment: &str) -> PeerSection {
        PeerSection {
            public_key: "PK".to_string(),
            allowed_ips: allowed_ips.to_string(),
            comment: comment.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn peer_ip_takes_first_entry_host() {
        assert_eq!(
            peer_ip(&section("100.100.100.50/32, 10.0.0.0/24", "")),
            Some("100.100.100.50".parse().expect("ip"))
        );
        assert_eq!(
            peer_ip(&section("100.100.100.50", "")),
            Some("100.100.100.50".parse().expect("ip"))
        );
        assert_eq!(peer_ip(&section("", "")), None);
        assert_eq!(peer_ip(&section("garbage", "")), None);
    }

    #[test]
    fn comment_label_strips_markers() {
        assert_eq!(comment_label(&section("", "# my phone")), Some("my phone".to_string()));
        assert_eq!(comment_label(&section("", "; legacy")), Some("legacy".to_string()));
        assert_eq!(comment_label(&section("", "")), None);
        assert_eq!(comment_label(&section("", "#   ")), None);
    }

    #[test]
    fn managed_tag_does_not_leak_into_label() {
        // Managed peers carry their tag separately; their comment field is
        // empty, so adoption of a tagged-but-unknown peer falls back to
        // the key prefix.
        let mut s = section("10.0.0.2/32", "");
        s.tag = Some(ManagedTag::default());
        assert_eq!(comment_label(&s), None);
    }
}
