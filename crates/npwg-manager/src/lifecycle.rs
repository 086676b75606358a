//! Peer lifecycle: create, update, delete.
//!
//! Every mutation follows the same ordering inside one locked section:
//! database rows first, then client artifacts, then the managed block of
//! the server file, then the interface reload. Failures after the
//! database write are logged and swallowed; the synchronizer converges on
//! the next pass.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use npwg_alloc::PoolAllocator;
use npwg_conf::{
    render, render_client_config, ClientConfig, ConfFile, ManagedTag, PeerSection, ServerDocument,
};
use npwg_keys::{KeyPair, PrivateKey};
use npwg_net::{parse_cidr, parse_ipv4};
use npwg_store::{IpAllocation, PeerFilter, PeerStatus, Store, StoreError, WgPeer};

use crate::apply::ApplyDriver;
use crate::artifacts::ArtifactStore;
use crate::defaults::{
    effective_allowed_ips, effective_dns, effective_endpoint, GlobalDefaults,
};
use crate::error::{Error, ErrorKind, Result};
use crate::fsatomic::atomic_write;
use crate::fslock::FileLock;
use crate::LOCK_FILE_NAME;

/// WireGuard-facing settings of the service.
#[derive(Clone, Debug)]
pub struct WgSettings {
    /// Directory holding the server config, backups and the lock file.
    pub root_dir: PathBuf,
    /// Interface name, e.g. `wg0`.
    pub interface: String,
    /// Directory for client artifacts.
    pub user_dir: PathBuf,
    /// Global endpoint fallback (`host:port`).
    pub endpoint: String,
    /// Global DNS fallback.
    pub dns: String,
    /// Global AllowedIPs fallback.
    pub default_allowed_ips: String,
    /// Public address of this host, used with the listen port.
    pub server_ip: String,
}

impl WgSettings {
    /// Path of the managed server config file.
    #[must_use]
    pub fn conf_path(&self) -> PathBuf {
        self.root_dir.join(format!("{}.conf", self.interface))
    }

    /// Path of the advisory lock file.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.root_dir.join(LOCK_FILE_NAME)
    }
}

/// Inputs for creating a peer. Optional fields inherit (pool → global).
#[derive(Clone, Debug, Default)]
pub struct CreatePeerRequest {
    /// Owning user id.
    pub user_id: String,
    /// Device name.
    pub device_name: String,
    /// Pool to allocate from; defaults to the first active pool.
    pub ip_pool_id: Option<String>,
    /// Preferred address; validated against the pool's exclusion set.
    pub client_ip: Option<String>,
    /// AllowedIPs override.
    pub allowed_ips: Option<String>,
    /// DNS override.
    pub dns: Option<String>,
    /// Endpoint override.
    pub endpoint: Option<String>,
    /// Keepalive override, seconds.
    pub persistent_keepalive: Option<u32>,
    /// Supply a private key instead of generating one.
    pub private_key: Option<String>,
}

/// Inputs for updating a peer; `None` leaves the field alone.
#[derive(Clone, Debug, Default)]
pub struct UpdatePeerRequest {
    /// Peer to update.
    pub peer_id: String,
    /// New device name.
    pub device_name: Option<String>,
    /// Move to another pool.
    pub ip_pool_id: Option<String>,
    /// Move to another address.
    pub client_ip: Option<String>,
    /// New AllowedIPs.
    pub allowed_ips: Option<String>,
    /// New DNS.
    pub dns: Option<String>,
    /// New endpoint.
    pub endpoint: Option<String>,
    /// New keepalive.
    pub persistent_keepalive: Option<u32>,
    /// New private key; the public key is re-derived.
    pub private_key: Option<String>,
    /// New status.
    pub status: Option<PeerStatus>,
}

/// How a peer's allocation is handled on delete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteMode {
    /// Mark the allocation released, keep the row.
    Soft,
    /// Remove the allocation row.
    Hard,
}

/// Owns peer mutations end to end.
#[derive(Clone)]
pub struct PeerManager {
    store: Store,
    allocator: PoolAllocator,
    conf: Arc<ConfFile>,
    artifacts: ArtifactStore,
    apply: ApplyDriver,
    settings: WgSettings,
}

impl PeerManager {
    /// Wires the manager over its collaborators.
    #[must_use]
    pub fn new(store: Store, conf: Arc<ConfFile>, settings: WgSettings, apply: ApplyDriver) -> Self {
        let allocator = PoolAllocator::new(store.clone());
        let artifacts = ArtifactStore::new(&settings.user_dir);
        Self {
            store,
            allocator,
            conf,
            artifacts,
            apply,
            settings,
        }
    }

    /// The store handle, for read-only pass-throughs.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    fn globals(&self, doc: &ServerDocument) -> GlobalDefaults {
        GlobalDefaults {
            default_allowed_ips: self.settings.default_allowed_ips.clone(),
            dns: self.settings.dns.clone(),
            endpoint: self.settings.endpoint.clone(),
            server_ip: self.settings.server_ip.clone(),
            listen_port: doc.interface.listen_port,
        }
    }

    fn tunnel_ip(doc: &ServerDocument) -> Result<Ipv4Addr> {
        if doc.interface.address.is_empty() {
            return Err(Error::new(
                ErrorKind::WgServerAddressInvalid,
                "interface has no Address",
            ));
        }
        let net = parse_cidr(&doc.interface.address).map_err(|e| {
            Error::new(
                ErrorKind::WgServerAddressInvalid,
                format!("interface Address: {e}"),
            )
        })?;
        Ok(net.addr())
    }

    fn managed_section(peer: &WgPeer) -> PeerSection {
        PeerSection {
            public_key: peer.client_public_key.clone(),
            allowed_ips: peer.client_ip.clone(),
            persistent_keepalive: peer.persistent_keepalive,
            is_managed: true,
            tag: Some(ManagedTag {
                peer_id: peer.id.clone(),
                user_id: peer.user_id.clone(),
                device: peer.device_name.clone(),
            }),
            ..Default::default()
        }
    }

    fn write_server_config(&self, doc: &ServerDocument) -> Result<()> {
        let text = render(doc);
        atomic_write(&self.settings.conf_path(), text.as_bytes()).map_err(|e| {
            Error::new(
                ErrorKind::WgWriteServerConfigFailed,
                format!("writing {}: {e}", self.settings.conf_path().display()),
            )
        })
    }

    fn render_client_text(&self, doc: &ServerDocument, peer: &WgPeer) -> Result<Option<String>> {
        if !peer.has_private_key() {
            return Ok(None);
        }
        let server_public = self.conf.server_public_key(doc)?;
        Ok(Some(render_client_config(&ClientConfig {
            device_name: &peer.device_name,
            private_key: &peer.client_private_key,
            address: &peer.client_ip,
            dns: &peer.dns,
            server_public_key: &server_public.to_base64(),
            allowed_ips: &peer.allowed_ips,
            endpoint: &peer.endpoint,
            persistent_keepalive: peer.persistent_keepalive,
        })))
    }

    fn write_client_artifacts(&self, doc: &ServerDocument, peer: &WgPeer) -> Result<()> {
        let username = match self.store.user_by_id(&peer.user_id) {
            Ok(user) => user.username,
            Err(_) => "unknown".to_string(),
        };
        let text = self.render_client_text(doc, peer)?;
        self.artifacts
            .write_peer(peer, &username, text.as_deref())
            .map_err(|e| Error::new(ErrorKind::Unknown, format!("writing client artifacts: {e}")))
    }

    async fn materialize(&self, doc: &mut ServerDocument, peer: &WgPeer) -> Result<()> {
        self.write_client_artifacts(doc, peer)?;
        doc.upsert_managed_peer(Self::managed_section(peer));
        self.write_server_config(doc)?;
        self.apply.apply(&self.settings.interface).await
    }

    /// Creates a peer: allocates an address, generates (or imports) key
    /// material, stores effective values, persists peer + allocation
    /// atomically, then materializes artifacts, file and reload.
    ///
    /// # Errors
    ///
    /// Validation, conflict and database errors propagate; failures past
    /// the database write are logged and swallowed.
    pub async fn create_peer(
        &self,
        req: CreatePeerRequest,
        cancel: &CancellationToken,
    ) -> Result<WgPeer> {
        let _lock = FileLock::acquire(&self.settings.lock_path(), cancel).await?;
        let mut doc = self.conf.load()?;
        let tunnel = Self::tunnel_ip(&doc)?;

        let pool = match &req.ip_pool_id {
            Some(id) => self.store.pool_by_id(id)?,
            None => self
                .store
                .first_active_pool()?
                .ok_or_else(|| Error::new(ErrorKind::IpPoolNotFound, "no active ip pool"))?,
        };
        let preferred = match &req.client_ip {
            Some(s) => Some(parse_ipv4(s)?),
            None => None,
        };
        let ip = self
            .allocator
            .validate_ip(&pool.id, preferred, Some(tunnel))?;

        let keypair = match &req.private_key {
            Some(s) => KeyPair::from_private_key(PrivateKey::from_base64(s)?),
            None => KeyPair::generate()?,
        };

        let globals = self.globals(&doc);
        let now = Utc::now();
        let peer = WgPeer {
            id: Uuid::new_v4().to_string(),
            user_id: req.user_id.clone(),
            device_name: req.device_name.clone(),
            client_private_key: keypair.private_key().to_base64(),
            client_public_key: keypair.public_key().to_base64(),
            client_ip: format!("{ip}/32"),
            allowed_ips: effective_allowed_ips(
                req.allowed_ips.as_deref().unwrap_or(""),
                Some(&pool),
                &globals,
            ),
            dns: effective_dns(req.dns.as_deref().unwrap_or(""), Some(&pool), &globals),
            endpoint: effective_endpoint(
                req.endpoint.as_deref().unwrap_or(""),
                Some(&pool),
                &globals,
            ),
            persistent_keepalive: req.persistent_keepalive.unwrap_or(0),
            status: PeerStatus::Active,
            ip_pool_id: pool.id.clone(),
            created_at: now,
            updated_at: now,
        };
        let alloc = IpAllocation::new(&pool.id, &peer.id, &ip.to_string());
        self.store.create_peer_with_allocation(&peer, &alloc)?;

        if let Err(e) = self.materialize(&mut doc, &peer).await {
            warn!(peer = %peer.id, error = %e, "post-database materialization failed; sync will converge");
        }
        Ok(peer)
    }

    /// Updates a peer. Address moves revalidate under the target pool;
    /// key changes re-derive the public key; empty endpoint/DNS (or a
    /// pool move) re-resolve effective values; status, address and
    /// keepalive changes rewrite the managed block.
    pub async fn update_peer(
        &self,
        req: UpdatePeerRequest,
        cancel: &CancellationToken,
    ) -> Result<WgPeer> {
        let _lock = FileLock::acquire(&self.settings.lock_path(), cancel).await?;
        let mut doc = self.conf.load()?;
        let tunnel = Self::tunnel_ip(&doc)?;

        let mut peer = self.store.peer_by_id(&req.peer_id)?;
        let old_status = peer.status;
        let old_client_ip = peer.client_ip.clone();
        let old_allowed_ips = peer.allowed_ips.clone();
        let old_keepalive = peer.persistent_keepalive;

        let pool_changed = req
            .ip_pool_id
            .as_ref()
            .is_some_and(|id| *id != peer.ip_pool_id);
        if let Some(id) = &req.ip_pool_id {
            peer.ip_pool_id = id.clone();
        }

        if let Some(ip_str) = &req.client_ip {
            let new_ip = parse_ipv4(ip_str)?;
            let current = old_client_ip.trim_end_matches("/32");
            if new_ip.to_string() != current || pool_changed {
                self.allocator
                    .validate_ip(&peer.ip_pool_id, Some(new_ip), Some(tunnel))?;
                self.allocator.release_ip(&peer.id)?;
                self.allocator
                    .allocate_ip(&peer.ip_pool_id, &peer.id, Some(new_ip), Some(tunnel))?;
                peer.client_ip = format!("{new_ip}/32");
            }
        } else if pool_changed {
            // Keep the address, move the allocation under the new pool.
            let current_ip = parse_ipv4(old_client_ip.trim_end_matches("/32"))?;
            self.allocator
                .validate_ip(&peer.ip_pool_id, Some(current_ip), Some(tunnel))?;
            self.allocator.release_ip(&peer.id)?;
            self.allocator
                .allocate_ip(&peer.ip_pool_id, &peer.id, Some(current_ip), Some(tunnel))?;
        }

        if let Some(key) = &req.private_key {
            if *key != peer.client_private_key {
                let private = PrivateKey::from_base64(key)?;
                peer.client_private_key = key.clone();
                peer.client_public_key = private.public_key().to_base64();
            }
        }
        if let Some(name) = &req.device_name {
            peer.device_name = name.clone();
        }
        if let Some(v) = &req.allowed_ips {
            peer.allowed_ips = v.clone();
        }
        if let Some(v) = &req.dns {
            peer.dns = v.clone();
        }
        if let Some(v) = &req.endpoint {
            peer.endpoint = v.clone();
        }
        if let Some(v) = req.persistent_keepalive {
            peer.persistent_keepalive = v;
        }
        if let Some(status) = req.status {
            peer.status = status;
        }

        if peer.endpoint.is_empty() || peer.dns.is_empty() || pool_changed {
            let pool = self.store.pool_by_id(&peer.ip_pool_id).ok();
            let globals = self.globals(&doc);
            peer.endpoint = effective_endpoint(&peer.endpoint, pool.as_ref(), &globals);
            peer.dns = effective_dns(&peer.dns, pool.as_ref(), &globals);
            peer.allowed_ips = effective_allowed_ips(&peer.allowed_ips, pool.as_ref(), &globals);
        }

        self.store.update_peer(&peer)?;

        let needs_file = peer.status != old_status
            || peer.client_ip != old_client_ip
            || peer.allowed_ips != old_allowed_ips
            || peer.persistent_keepalive != old_keepalive;
        if needs_file {
            if peer.status == PeerStatus::Active {
                doc.upsert_managed_peer(Self::managed_section(&peer));
            } else {
                doc.remove_managed_peer(&peer.id);
            }
            if let Err(e) = self.write_server_config(&doc) {
                warn!(peer = %peer.id, error = %e, "server config rewrite failed; sync will converge");
            } else if let Err(e) = self.apply.apply(&self.settings.interface).await {
                warn!(peer = %peer.id, error = %e, "interface reload failed; sync will converge");
            }
        }
        if let Err(e) = self.write_client_artifacts(&doc, &peer) {
            warn!(peer = %peer.id, error = %e, "client artifact regeneration failed");
        }
        Ok(peer)
    }

    /// Deletes a peer. `Soft` releases the allocation, `Hard` removes the
    /// row; either way the peer row, the managed entry and the client
    /// artifacts go away. Missing peers are a success.
    pub async fn delete_peer(
        &self,
        peer_id: &str,
        mode: DeleteMode,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let _lock = FileLock::acquire(&self.settings.lock_path(), cancel).await?;
        let peer = match self.store.peer_by_id(peer_id) {
            Ok(peer) => peer,
            Err(StoreError::PeerNotFound(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let username = self
            .store
            .user_by_id(&peer.user_id)
            .map(|u| u.username)
            .unwrap_or_else(|_| "unknown".to_string());

        self.store
            .delete_peer_with_allocation(peer_id, mode == DeleteMode::Hard)?;

        match self.conf.load() {
            Ok(mut doc) => {
                doc.remove_managed_peer(peer_id);
                if let Err(e) = self.write_server_config(&doc) {
                    warn!(peer = peer_id, error = %e, "server config rewrite failed; sync will converge");
                } else if let Err(e) = self.apply.apply(&self.settings.interface).await {
                    warn!(peer = peer_id, error = %e, "interface reload failed; sync will converge");
                }
            }
            Err(e) => {
                warn!(peer = peer_id, error = %e, "server config reload failed; sync will converge");
            }
        }
        self.artifacts.remove_peer(peer_id, &username);
        Ok(())
    }

    /// Fetches a peer.
    pub fn get_peer(&self, peer_id: &str) -> Result<WgPeer> {
        Ok(self.store.peer_by_id(peer_id)?)
    }

    /// Lists peers.
    pub fn list_peers(
        &self,
        filter: &PeerFilter,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<WgPeer>, u64)> {
        Ok(self.store.list_peers(filter, limit, offset)?)
    }

    /// Renders the client config text for download.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::WgUserConfigNotFound`] for peers whose private
    /// key the service does not hold.
    pub fn client_config_text(&self, peer_id: &str) -> Result<String> {
        let peer = self.store.peer_by_id(peer_id)?;
        let doc = self.conf.load()?;
        self.render_client_text(&doc, &peer)?.ok_or_else(|| {
            Error::new(
                ErrorKind::WgUserConfigNotFound,
                format!("peer {peer_id} is externally managed; no client config exists"),
            )
        })
    }

    /// Rewrites stored effective values after a change of the global
    /// defaults: peers whose stored endpoint/DNS/AllowedIPs still equal
    /// the resolution under `previous` are re-resolved under the current
    /// settings. Returns how many peers changed.
    pub async fn resync_effective_values(
        &self,
        previous: &GlobalDefaults,
        cancel: &CancellationToken,
    ) -> Result<u32> {
        let _lock = FileLock::acquire(&self.settings.lock_path(), cancel).await?;
        let doc = self.conf.load()?;
        let current = self.globals(&doc);
        let mut previous = previous.clone();
        previous.listen_port = doc.interface.listen_port;

        let (peers, _) =
            self.store
                .list_peers(&PeerFilter::default(), npwg_store::MAX_LIST_LIMIT, 0)?;
        let mut changed = 0u32;
        for mut peer in peers {
            let pool = self.store.pool_by_id(&peer.ip_pool_id).ok();
            let mut touched = false;

            let prev_endpoint = effective_endpoint("", pool.as_ref(), &previous);
            if peer.endpoint == prev_endpoint {
                let next = effective_endpoint("", pool.as_ref(), &current);
                if peer.endpoint != next {
                    peer.endpoint = next;
                    touched = true;
                }
            }
            let prev_dns = effective_dns("", pool.as_ref(), &previous);
            if peer.dns == prev_dns {
                let next = effective_dns("", pool.as_ref(), &current);
                if peer.dns != next {
                    peer.dns = next;
                    touched = true;
                }
            }
            let prev_allowed = effective_allowed_ips("", pool.as_ref(), &previous);
            if peer.allowed_ips == prev_allowed {
                let next = effective_allowed_ips("", pool.as_ref(), &current);
                if peer.allowed_ips != next {
                    peer.allowed_ips = next;
                    touched = true;
                }
            }

            if touched {
                self.store.update_peer(&peer)?;
                if let Err(e) = self.write_client_artifacts(&doc, &peer) {
                    warn!(peer = %peer.id, error = %e, "client artifact regeneration failed");
                }
                changed += 1;
            }
        }
        Ok(changed)
    }
}
