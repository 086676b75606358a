//! SQLite-backed store.
//!
//! The connection sits behind a `parking_lot` mutex, so every operation is
//! serialized; batch operations run inside a single transaction that rolls
//! back on the first per-row failure.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::models::{
    AllocationStatus, IpAllocation, IpPool, PeerStatus, PoolStatus, User, UserRole, UserStatus,
    WgPeer,
};
use crate::password::verify_password;

/// Default page size when a list call passes limit 0.
pub const DEFAULT_LIST_LIMIT: u32 = 20;

/// Upper bound on list page sizes.
pub const MAX_LIST_LIMIT: u32 = 10_000;

fn clamp_limit(limit: u32) -> u32 {
    if limit == 0 {
        DEFAULT_LIST_LIMIT
    } else {
        limit.min(MAX_LIST_LIMIT)
    }
}

/// Filter for peer listings.
#[derive(Clone, Debug, Default)]
pub struct PeerFilter {
    /// Restrict to one owner.
    pub user_id: Option<String>,
    /// Restrict to one pool.
    pub ip_pool_id: Option<String>,
    /// Restrict to one status.
    pub status: Option<PeerStatus>,
    /// Substring match on device name.
    pub q: Option<String>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY,
    username      TEXT NOT NULL UNIQUE,
    email         TEXT NOT NULL UNIQUE,
    password_salt TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    role          TEXT NOT NULL,
    status        TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ip_pools (
    id         TEXT PRIMARY KEY,
    name       TEXT NOT NULL UNIQUE,
    cidr       TEXT NOT NULL UNIQUE,
    routes     TEXT NOT NULL DEFAULT '',
    dns        TEXT NOT NULL DEFAULT '',
    endpoint   TEXT NOT NULL DEFAULT '',
    status     TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS wg_peers (
    id                   TEXT PRIMARY KEY,
    user_id              TEXT NOT NULL,
    device_name          TEXT NOT NULL,
    client_private_key   TEXT NOT NULL DEFAULT '',
    client_public_key    TEXT NOT NULL,
    client_ip            TEXT NOT NULL,
    allowed_ips          TEXT NOT NULL DEFAULT '',
    dns                  TEXT NOT NULL DEFAULT '',
    endpoint             TEXT NOT NULL DEFAULT '',
    persistent_keepalive INTEGER NOT NULL DEFAULT 0,
    status               TEXT NOT NULL,
    ip_pool_id           TEXT NOT NULL,
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_wg_peers_public_key ON wg_peers(client_public_key);
CREATE INDEX IF NOT EXISTS idx_wg_peers_user ON wg_peers(user_id);

CREATE TABLE IF NOT EXISTS ip_allocations (
    id         TEXT PRIMARY KEY,
    ip_pool_id TEXT NOT NULL,
    peer_id    TEXT NOT NULL,
    ip_address TEXT NOT NULL,
    status     TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_ip_allocations_peer
    ON ip_allocations(peer_id) WHERE status = 'allocated';
CREATE UNIQUE INDEX IF NOT EXISTS uq_ip_allocations_ip
    ON ip_allocations(ip_pool_id, ip_address) WHERE status = 'allocated';
";

/// The SQLite-backed store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (creating if needed) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot
    /// be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(StoreError::from)?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory database. Intended for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::from)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // Foreign key constraints aren't on in SQLite by default.
        conn.pragma_update(None, "foreign_keys", 1)
            .map_err(StoreError::from)?;
        conn.execute_batch(SCHEMA).map_err(StoreError::from)?;
        debug!("store schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ── users ────────────────────────────────────────────────────────

    /// Inserts a user.
    pub fn create_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (id, username, email, password_salt, password_hash, role, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                user.id,
                user.username,
                user.email,
                user.password_salt,
                user.password_hash,
                user.role,
                user.status,
                user.created_at,
                user.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Fetches a user by id.
    pub fn user_by_id(&self, id: &str) -> Result<User> {
        let conn = self.conn.lock();
        conn.query_row("SELECT * FROM users WHERE id = ?1", params![id], user_from_row)
            .optional()?
            .ok_or_else(|| StoreError::UserNotFound(id.to_string()))
    }

    /// Fetches a user by username.
    pub fn user_by_username(&self, username: &str) -> Result<User> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM users WHERE username = ?1",
            params![username],
            user_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::UserNotFound(username.to_string()))
    }

    /// Fetches a user by email.
    pub fn user_by_email(&self, email: &str) -> Result<User> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM users WHERE email = ?1",
            params![email],
            user_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::UserNotFound(email.to_string()))
    }

    /// Updates a user record wholesale, bumping `updated_at`.
    pub fn update_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET username = ?2, email = ?3, password_salt = ?4, password_hash = ?5,
             role = ?6, status = ?7, updated_at = ?8 WHERE id = ?1",
            params![
                user.id,
                user.username,
                user.email,
                user.password_salt,
                user.password_hash,
                user.role,
                user.status,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    /// Deletes a user. Missing rows are a success.
    pub fn delete_user(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Lists users, newest last, with an optional substring filter on
    /// username or email. Returns the page and the unpaged total.
    pub fn list_users(&self, q: Option<&str>, limit: u32, offset: u32) -> Result<(Vec<User>, u64)> {
        let limit = clamp_limit(limit);
        let pattern = q.map(|q| format!("%{q}%"));
        let conn = self.conn.lock();
        let (where_clause, args): (&str, Vec<&dyn ToSql>) = match &pattern {
            Some(p) => ("WHERE username LIKE ?1 OR email LIKE ?1", vec![p as &dyn ToSql]),
            None => ("", vec![]),
        };
        let total: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM users {where_clause}"),
            &args[..],
            |row| row.get(0),
        )?;
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM users {where_clause} ORDER BY created_at, id LIMIT {limit} OFFSET {offset}"
        ))?;
        let users = stmt
            .query_map(&args[..], user_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok((users, total))
    }

    /// The earliest-created active admin, if any.
    pub fn first_active_admin(&self) -> Result<Option<User>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT * FROM users WHERE role = ?1 AND status = ?2 ORDER BY created_at, id LIMIT 1",
                params![UserRole::Admin, UserStatus::Active],
                user_from_row,
            )
            .optional()?)
    }

    /// Verifies a username/password pair.
    ///
    /// Returns [`StoreError::PasswordIncorrect`] identically for unknown
    /// users and wrong passwords, and [`StoreError::UserNotActive`] when
    /// the credentials are right but the account is not active.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<User> {
        let user = match self.user_by_username(username) {
            Ok(user) => user,
            Err(StoreError::UserNotFound(_)) => return Err(StoreError::PasswordIncorrect),
            Err(e) => return Err(e),
        };
        if !verify_password(&user.password_salt, &user.password_hash, password) {
            return Err(StoreError::PasswordIncorrect);
        }
        if user.status != UserStatus::Active {
            return Err(StoreError::UserNotActive(username.to_string()));
        }
        Ok(user)
    }

    // ── pools ────────────────────────────────────────────────────────

    /// Inserts a pool.
    pub fn create_pool(&self, pool: &IpPool) -> Result<()> {
        let conn = self.conn.lock();
        insert_pool(&conn, pool)
    }

    /// Fetches a pool by id.
    pub fn pool_by_id(&self, id: &str) -> Result<IpPool> {
        let conn = self.conn.lock();
        conn.query_row("SELECT * FROM ip_pools WHERE id = ?1", params![id], pool_from_row)
            .optional()?
            .ok_or_else(|| StoreError::PoolNotFound(id.to_string()))
    }

    /// Fetches a pool by name.
    pub fn pool_by_name(&self, name: &str) -> Result<IpPool> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM ip_pools WHERE name = ?1",
            params![name],
            pool_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::PoolNotFound(name.to_string()))
    }

    /// All pools, creation order.
    pub fn list_all_pools(&self) -> Result<Vec<IpPool>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM ip_pools ORDER BY created_at, id")?;
        let pools = stmt
            .query_map([], pool_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pools)
    }

    /// Lists pools with an optional substring filter on name or CIDR.
    pub fn list_pools(&self, q: Option<&str>, limit: u32, offset: u32) -> Result<(Vec<IpPool>, u64)> {
        let limit = clamp_limit(limit);
        let pattern = q.map(|q| format!("%{q}%"));
        let conn = self.conn.lock();
        let (where_clause, args): (&str, Vec<&dyn ToSql>) = match &pattern {
            Some(p) => ("WHERE name LIKE ?1 OR cidr LIKE ?1", vec![p as &dyn ToSql]),
            None => ("", vec![]),
        };
        let total: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM ip_pools {where_clause}"),
            &args[..],
            |row| row.get(0),
        )?;
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM ip_pools {where_clause} ORDER BY created_at, id LIMIT {limit} OFFSET {offset}"
        ))?;
        let pools = stmt
            .query_map(&args[..], pool_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok((pools, total))
    }

    /// The earliest-created active pool, if any.
    pub fn first_active_pool(&self) -> Result<Option<IpPool>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT * FROM ip_pools WHERE status = ?1 ORDER BY created_at, id LIMIT 1",
                params![PoolStatus::Active],
                pool_from_row,
            )
            .optional()?)
    }

    /// Updates a pool. The CIDR is immutable once any allocation row
    /// references the pool.
    pub fn update_pool(&self, pool: &IpPool) -> Result<()> {
        let conn = self.conn.lock();
        let existing = conn
            .query_row(
                "SELECT * FROM ip_pools WHERE id = ?1",
                params![pool.id],
                pool_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::PoolNotFound(pool.id.clone()))?;
        if existing.cidr != pool.cidr {
            let allocations: u64 = conn.query_row(
                "SELECT COUNT(*) FROM ip_allocations WHERE ip_pool_id = ?1",
                params![pool.id],
                |row| row.get(0),
            )?;
            if allocations > 0 {
                return Err(StoreError::PoolCidrImmutable(pool.id.clone()));
            }
        }
        conn.execute(
            "UPDATE ip_pools SET name = ?2, cidr = ?3, routes = ?4, dns = ?5, endpoint = ?6,
             status = ?7, updated_at = ?8 WHERE id = ?1",
            params![
                pool.id,
                pool.name,
                pool.cidr,
                pool.routes,
                pool.dns,
                pool.endpoint,
                pool.status,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    /// Deletes a pool. Fails with [`StoreError::PoolInUse`] while any
    /// allocated address references it; missing rows are a success.
    pub fn delete_pool(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        guard_pool_unused(&tx, id)?;
        tx.execute("DELETE FROM ip_pools WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    /// Creates several pools in one transaction.
    pub fn batch_create_pools(&self, pools: &[IpPool]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for pool in pools {
            insert_pool(&tx, pool)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Updates several pools in one transaction. CIDRs are immutable
    /// here; use [`Store::update_pool`] for a guarded CIDR change.
    pub fn batch_update_pools(&self, pools: &[IpPool]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for pool in pools {
            tx.execute(
                "UPDATE ip_pools SET name = ?2, routes = ?3, dns = ?4, endpoint = ?5,
                 status = ?6, updated_at = ?7 WHERE id = ?1",
                params![
                    pool.id,
                    pool.name,
                    pool.routes,
                    pool.dns,
                    pool.endpoint,
                    pool.status,
                    Utc::now(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Deletes several pools in one transaction; any in-use pool aborts
    /// the whole batch.
    pub fn batch_delete_pools(&self, ids: &[String]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for id in ids {
            guard_pool_unused(&tx, id)?;
            tx.execute("DELETE FROM ip_pools WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(())
    }

    // ── peers ────────────────────────────────────────────────────────

    /// Inserts a peer.
    pub fn create_peer(&self, peer: &WgPeer) -> Result<()> {
        let conn = self.conn.lock();
        insert_peer(&conn, peer)
    }

    /// Fetches a peer by id.
    pub fn peer_by_id(&self, id: &str) -> Result<WgPeer> {
        let conn = self.conn.lock();
        conn.query_row("SELECT * FROM wg_peers WHERE id = ?1", params![id], peer_from_row)
            .optional()?
            .ok_or_else(|| StoreError::PeerNotFound(id.to_string()))
    }

    /// Fetches a peer by public key, if one exists.
    pub fn peer_by_public_key(&self, public_key: &str) -> Result<Option<WgPeer>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT * FROM wg_peers WHERE client_public_key = ?1",
                params![public_key],
                peer_from_row,
            )
            .optional()?)
    }

    /// Updates a peer record wholesale, bumping `updated_at`.
    pub fn update_peer(&self, peer: &WgPeer) -> Result<()> {
        let conn = self.conn.lock();
        update_peer_row(&conn, peer)
    }

    /// Deletes a peer row only. Missing rows are a success.
    pub fn delete_peer(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM wg_peers WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// All peers with `status = active`.
    pub fn active_peers(&self) -> Result<Vec<WgPeer>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM wg_peers WHERE status = ?1 ORDER BY created_at, id",
        )?;
        let peers = stmt
            .query_map(params![PeerStatus::Active], peer_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(peers)
    }

    /// Lists peers matching `filter`. Returns the page and the unpaged
    /// total.
    pub fn list_peers(
        &self,
        filter: &PeerFilter,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<WgPeer>, u64)> {
        let limit = clamp_limit(limit);
        let mut clauses: Vec<String> = Vec::new();
        let mut owned: Vec<String> = Vec::new();
        if let Some(user_id) = &filter.user_id {
            owned.push(user_id.clone());
            clauses.push(format!("user_id = ?{}", owned.len()));
        }
        if let Some(pool_id) = &filter.ip_pool_id {
            owned.push(pool_id.clone());
            clauses.push(format!("ip_pool_id = ?{}", owned.len()));
        }
        if let Some(status) = filter.status {
            owned.push(status.as_str().to_string());
            clauses.push(format!("status = ?{}", owned.len()));
        }
        if let Some(q) = &filter.q {
            owned.push(format!("%{q}%"));
            clauses.push(format!("device_name LIKE ?{}", owned.len()));
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let args: Vec<&dyn ToSql> = owned.iter().map(|s| s as &dyn ToSql).collect();

        let conn = self.conn.lock();
        let total: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM wg_peers {where_clause}"),
            &args[..],
            |row| row.get(0),
        )?;
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM wg_peers {where_clause} ORDER BY created_at, id LIMIT {limit} OFFSET {offset}"
        ))?;
        let peers = stmt
            .query_map(&args[..], peer_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok((peers, total))
    }

    /// Creates several peers in one transaction.
    pub fn batch_create_peers(&self, peers: &[WgPeer]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for peer in peers {
            insert_peer(&tx, peer)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Updates several peers in one transaction.
    pub fn batch_update_peers(&self, peers: &[WgPeer]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for peer in peers {
            update_peer_row(&tx, peer)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Deletes several peers (and their allocation rows) in one
    /// transaction.
    pub fn batch_delete_peers(&self, ids: &[String]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for id in ids {
            tx.execute("DELETE FROM ip_allocations WHERE peer_id = ?1", params![id])?;
            tx.execute("DELETE FROM wg_peers WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(())
    }

    // ── allocations ──────────────────────────────────────────────────

    /// Inserts an allocation row.
    pub fn create_allocation(&self, alloc: &IpAllocation) -> Result<()> {
        let conn = self.conn.lock();
        insert_allocation(&conn, alloc)
    }

    /// The most recent allocation row for a peer, if any.
    pub fn allocation_by_peer(&self, peer_id: &str) -> Result<Option<IpAllocation>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT * FROM ip_allocations WHERE peer_id = ?1 ORDER BY created_at DESC, id LIMIT 1",
                params![peer_id],
                allocation_from_row,
            )
            .optional()?)
    }

    /// The allocated row holding `ip_address` in `pool_id`, if any.
    pub fn allocation_by_ip(&self, pool_id: &str, ip_address: &str) -> Result<Option<IpAllocation>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT * FROM ip_allocations WHERE ip_pool_id = ?1 AND ip_address = ?2 AND status = ?3",
                params![pool_id, ip_address, AllocationStatus::Allocated],
                allocation_from_row,
            )
            .optional()?)
    }

    /// All allocated addresses in a pool.
    pub fn allocated_ips_by_pool(&self, pool_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT ip_address FROM ip_allocations WHERE ip_pool_id = ?1 AND status = ?2",
        )?;
        let ips = stmt
            .query_map(params![pool_id, AllocationStatus::Allocated], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ips)
    }

    /// Updates an allocation row wholesale, bumping `updated_at`.
    pub fn update_allocation(&self, alloc: &IpAllocation) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE ip_allocations SET ip_pool_id = ?2, peer_id = ?3, ip_address = ?4,
             status = ?5, updated_at = ?6 WHERE id = ?1",
            params![
                alloc.id,
                alloc.ip_pool_id,
                alloc.peer_id,
                alloc.ip_address,
                alloc.status,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    /// Marks a peer's allocated address as released. A missing allocation
    /// is a no-op.
    pub fn release_allocation(&self, peer_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE ip_allocations SET status = ?2, updated_at = ?3
             WHERE peer_id = ?1 AND status = ?4",
            params![peer_id, AllocationStatus::Released, Utc::now(), AllocationStatus::Allocated],
        )?;
        Ok(())
    }

    /// Removes a peer's allocation rows entirely. Missing rows are a
    /// success.
    pub fn delete_allocation(&self, peer_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM ip_allocations WHERE peer_id = ?1", params![peer_id])?;
        Ok(())
    }

    // ── combined peer + allocation transactions ──────────────────────

    /// Inserts a peer and its allocation atomically; a failed allocation
    /// write rolls the peer back.
    pub fn create_peer_with_allocation(&self, peer: &WgPeer, alloc: &IpAllocation) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        insert_peer(&tx, peer)?;
        insert_allocation(&tx, alloc)?;
        tx.commit()?;
        Ok(())
    }

    /// Removes a peer and handles its allocation in one transaction:
    /// `hard` removes the allocation rows, otherwise they are marked
    /// released. Idempotent.
    pub fn delete_peer_with_allocation(&self, peer_id: &str, hard: bool) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if hard {
            tx.execute("DELETE FROM ip_allocations WHERE peer_id = ?1", params![peer_id])?;
        } else {
            tx.execute(
                "UPDATE ip_allocations SET status = ?2, updated_at = ?3
                 WHERE peer_id = ?1 AND status = ?4",
                params![
                    peer_id,
                    AllocationStatus::Released,
                    Utc::now(),
                    AllocationStatus::Allocated
                ],
            )?;
        }
        tx.execute("DELETE FROM wg_peers WHERE id = ?1", params![peer_id])?;
        tx.commit()?;
        Ok(())
    }
}

fn guard_pool_unused(conn: &Connection, pool_id: &str) -> Result<()> {
    let in_use: u64 = conn.query_row(
        "SELECT COUNT(*) FROM ip_allocations WHERE ip_pool_id = ?1 AND status = ?2",
        params![pool_id, AllocationStatus::Allocated],
        |row| row.get(0),
    )?;
    if in_use > 0 {
        return Err(StoreError::PoolInUse(pool_id.to_string()));
    }
    Ok(())
}

fn insert_pool(conn: &Connection, pool: &IpPool) -> Result<()> {
    conn.execute(
        "INSERT INTO ip_pools (id, name, cidr, routes, dns, endpoint, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            pool.id,
            pool.name,
            pool.cidr,
            pool.routes,
            pool.dns,
            pool.endpoint,
            pool.status,
            pool.created_at,
            pool.updated_at,
        ],
    )?;
    Ok(())
}

fn insert_peer(conn: &Connection, peer: &WgPeer) -> Result<()> {
    conn.execute(
        "INSERT INTO wg_peers (id, user_id, device_name, client_private_key, client_public_key,
         client_ip, allowed_ips, dns, endpoint, persistent_keepalive, status, ip_pool_id,
         created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            peer.id,
            peer.user_id,
            peer.device_name,
            peer.client_private_key,
            peer.client_public_key,
            peer.client_ip,
            peer.allowed_ips,
            peer.dns,
            peer.endpoint,
            peer.persistent_keepalive,
            peer.status,
            peer.ip_pool_id,
            peer.created_at,
            peer.updated_at,
        ],
    )?;
    Ok(())
}

fn update_peer_row(conn: &Connection, peer: &WgPeer) -> Result<()> {
    conn.execute(
        "UPDATE wg_peers SET user_id = ?2, device_name = ?3, client_private_key = ?4,
         client_public_key = ?5, client_ip = ?6, allowed_ips = ?7, dns = ?8, endpoint = ?9,
         persistent_keepalive = ?10, status = ?11, ip_pool_id = ?12, updated_at = ?13
         WHERE id = ?1",
        params![
            peer.id,
            peer.user_id,
            peer.device_name,
            peer.client_private_key,
            peer.client_public_key,
            peer.client_ip,
            peer.allowed_ips,
            peer.dns,
            peer.endpoint,
            peer.persistent_keepalive,
            peer.status,
            peer.ip_pool_id,
            Utc::now(),
        ],
    )?;
    Ok(())
}

fn insert_allocation(conn: &Connection, alloc: &IpAllocation) -> Result<()> {
    conn.execute(
        "INSERT INTO ip_allocations (id, ip_pool_id, peer_id, ip_address, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            alloc.id,
            alloc.ip_pool_id,
            alloc.peer_id,
            alloc.ip_address,
            alloc.status,
            alloc.created_at,
            alloc.updated_at,
        ],
    )?;
    Ok(())
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        email: row.get("email")?,
        password_salt: row.get("password_salt")?,
        password_hash: row.get("password_hash")?,
        role: row.get("role")?,
        status: row.get("status")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn pool_from_row(row: &Row<'_>) -> rusqlite::Result<IpPool> {
    Ok(IpPool {
        id: row.get("id")?,
        name: row.get("name")?,
        cidr: row.get("cidr")?,
        routes: row.get("routes")?,
        dns: row.get("dns")?,
        endpoint: row.get("endpoint")?,
        status: row.get("status")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn peer_from_row(row: &Row<'_>) -> rusqlite::Result<WgPeer> {
    Ok(WgPeer {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        device_name: row.get("device_name")?,
        client_private_key: row.get("client_private_key")?,
        client_public_key: row.get("client_public_key")?,
        client_ip: row.get("client_ip")?,
        allowed_ips: row.get("allowed_ips")?,
        dns: row.get("dns")?,
        endpoint: row.get("endpoint")?,
        persistent_keepalive: row.get("persistent_keepalive")?,
        status: row.get("status")?,
        ip_pool_id: row.get("ip_pool_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn allocation_from_row(row: &Row<'_>) -> rusqlite::Result<IpAllocation> {
    Ok(IpAllocation {
        id: row.get("id")?,
        ip_pool_id: row.get("ip_pool_id")?,
        peer_id: row.get("peer_id")?,
        ip_address: row.get("ip_address")?,
        status: row.get("status")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{UserRole, EXTERNAL_MANAGED_KEY};

    fn store() -> Store {
        Store::open_in_memory().expect("open")
    }

    fn sample_user(name: &str) -> User {
        User::new(name, &format!("{name}@example.com"), "pw", UserRole::User)
    }

    fn sample_peer(user: &User, pool: &IpPool, ip: &str) -> WgPeer {
        let now = Utc::now();
        WgPeer {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            device_name: format!("dev-{ip}"),
            client_private_key: EXTERNAL_MANAGED_KEY.to_string(),
            client_public_key: format!("pk-{ip}"),
            client_ip: format!("{ip}/32"),
            allowed_ips: "0.0.0.0/0".to_string(),
            dns: String::new(),
            endpoint: String::new(),
            persistent_keepalive: 0,
            status: PeerStatus::Active,
            ip_pool_id: pool.id.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn user_crud_and_lookups() {
        let store = store();
        let user = sample_user("alice");
        store.create_user(&user).expect("create");
        assert_eq!(store.user_by_id(&user.id).expect("by id").username, "alice");
        assert_eq!(store.user_by_username("alice").expect("by name").id, user.id);
        assert_eq!(
            store.user_by_email("alice@example.com").expect("by email").id,
            user.id
        );

        let mut updated = user.clone();
        updated.email = "new@example.com".to_string();
        store.update_user(&updated).expect("update");
        assert_eq!(store.user_by_id(&user.id).expect("reload").email, "new@example.com");

        store.delete_user(&user.id).expect("delete");
        assert!(matches!(
            store.user_by_id(&user.id),
            Err(StoreError::UserNotFound(_))
        ));
        // Idempotent.
        store.delete_user(&user.id).expect("delete again");
    }

    #[test]
    fn duplicate_username_and_email_map_to_typed_errors() {
        let store = store();
        store.create_user(&sample_user("bob")).expect("create");

        let mut dup_name = sample_user("bob");
        dup_name.email = "other@example.com".to_string();
        assert!(matches!(
            store.create_user(&dup_name),
            Err(StoreError::UserAlreadyExists(_))
        ));

        let mut dup_email = sample_user("carol");
        dup_email.email = "bob@example.com".to_string();
        assert!(matches!(
            store.create_user(&dup_email),
            Err(StoreError::EmailAlreadyExists(_))
        ));
    }

    #[test]
    fn authenticate_is_uniform_for_missing_user_and_bad_password() {
        let store = store();
        store.create_user(&sample_user("dave")).expect("create");

        assert!(matches!(
            store.authenticate("nobody", "pw"),
            Err(StoreError::PasswordIncorrect)
        ));
        assert!(matches!(
            store.authenticate("dave", "wrong"),
            Err(StoreError::PasswordIncorrect)
        ));
        assert_eq!(store.authenticate("dave", "pw").expect("ok").username, "dave");
    }

    #[test]
    fn authenticate_rejects_inactive_users() {
        let store = store();
        let mut user = sample_user("erin");
        user.status = UserStatus::Inactive;
        store.create_user(&user).expect("create");
        assert!(matches!(
            store.authenticate("erin", "pw"),
            Err(StoreError::UserNotActive(_))
        ));
    }

    #[test]
    fn list_users_clamps_limit_and_reports_total() {
        let store = store();
        for i in 0..25 {
            store.create_user(&sample_user(&format!("user{i:02}"))).expect("create");
        }
        let (page, total) = store.list_users(None, 0, 0).expect("list");
        assert_eq!(total, 25);
        assert_eq!(page.len(), DEFAULT_LIST_LIMIT as usize);

        let (page, _) = store.list_users(None, 10, 20).expect("list");
        assert_eq!(page.len(), 5);

        let (page, total) = store.list_users(Some("user1"), 100, 0).expect("list");
        assert_eq!(total, 10);
        assert_eq!(page.len(), 10);
    }

    #[test]
    fn first_active_admin_skips_inactive_and_non_admin() {
        let store = store();
        store.create_user(&sample_user("plain")).expect("create");
        let mut suspended = User::new("old-admin", "old@example.com", "pw", UserRole::Admin);
        suspended.status = UserStatus::Inactive;
        store.create_user(&suspended).expect("create");
        assert!(store.first_active_admin().expect("query").is_none());

        let admin = User::new("root", "root@example.com", "pw", UserRole::Admin);
        store.create_user(&admin).expect("create");
        assert_eq!(store.first_active_admin().expect("query").expect("some").id, admin.id);
    }

    #[test]
    fn pool_unique_constraints() {
        let store = store();
        store.create_pool(&IpPool::new("lan", "10.0.0.0/24")).expect("create");
        assert!(matches!(
            store.create_pool(&IpPool::new("lan", "10.1.0.0/24")),
            Err(StoreError::PoolAlreadyExists(_))
        ));
        assert!(matches!(
            store.create_pool(&IpPool::new("other", "10.0.0.0/24")),
            Err(StoreError::PoolAlreadyExists(_))
        ));
    }

    #[test]
    fn pool_cidr_immutable_once_allocated() {
        let store = store();
        let pool = IpPool::new("lan", "10.0.0.0/24");
        store.create_pool(&pool).expect("create");

        let mut renamed = pool.clone();
        renamed.name = "lan2".to_string();
        store.update_pool(&renamed).expect("rename ok");

        store
            .create_allocation(&IpAllocation::new(&pool.id, "peer-1", "10.0.0.2"))
            .expect("allocate");
        let mut recidr = renamed.clone();
        recidr.cidr = "10.9.0.0/24".to_string();
        assert!(matches!(
            store.update_pool(&recidr),
            Err(StoreError::PoolCidrImmutable(_))
        ));
    }

    #[test]
    fn pool_delete_guarded_while_in_use() {
        let store = store();
        let pool = IpPool::new("lan", "10.0.0.0/24");
        store.create_pool(&pool).expect("create");
        store
            .create_allocation(&IpAllocation::new(&pool.id, "peer-1", "10.0.0.2"))
            .expect("allocate");

        assert!(matches!(store.delete_pool(&pool.id), Err(StoreError::PoolInUse(_))));

        store.release_allocation("peer-1").expect("release");
        store.delete_pool(&pool.id).expect("delete");
        store.delete_pool(&pool.id).expect("idempotent");
    }

    #[test]
    fn allocation_uniqueness_applies_to_allocated_rows_only() {
        let store = store();
        let pool = IpPool::new("lan", "10.0.0.0/24");
        store.create_pool(&pool).expect("create");
        store
            .create_allocation(&IpAllocation::new(&pool.id, "peer-1", "10.0.0.2"))
            .expect("first");

        // Same IP, same pool, still allocated: conflict.
        assert!(matches!(
            store.create_allocation(&IpAllocation::new(&pool.id, "peer-2", "10.0.0.2")),
            Err(StoreError::IpAlreadyInUse(_))
        ));

        // After release the address can be handed out again.
        store.release_allocation("peer-1").expect("release");
        store
            .create_allocation(&IpAllocation::new(&pool.id, "peer-2", "10.0.0.2"))
            .expect("reuse");

        let ips = store.allocated_ips_by_pool(&pool.id).expect("ips");
        assert_eq!(ips, vec!["10.0.0.2".to_string()]);
    }

    #[test]
    fn peer_with_allocation_is_atomic() {
        let store = store();
        let user = sample_user("frank");
        store.create_user(&user).expect("user");
        let pool = IpPool::new("lan", "10.0.0.0/24");
        store.create_pool(&pool).expect("pool");

        let first = sample_peer(&user, &pool, "10.0.0.2");
        store
            .create_peer_with_allocation(&first, &IpAllocation::new(&pool.id, &first.id, "10.0.0.2"))
            .expect("first");

        // Occupied address: the peer row must roll back with the allocation.
        let mut second = sample_peer(&user, &pool, "10.0.0.3");
        second.client_ip = "10.0.0.2/32".to_string();
        let err = store
            .create_peer_with_allocation(&second, &IpAllocation::new(&pool.id, &second.id, "10.0.0.2"))
            .expect_err("conflict");
        assert!(matches!(err, StoreError::IpAlreadyInUse(_)));
        assert!(matches!(
            store.peer_by_id(&second.id),
            Err(StoreError::PeerNotFound(_))
        ));
    }

    #[test]
    fn soft_and_hard_peer_delete() {
        let store = store();
        let user = sample_user("gail");
        store.create_user(&user).expect("user");
        let pool = IpPool::new("lan", "10.0.0.0/24");
        store.create_pool(&pool).expect("pool");

        let peer = sample_peer(&user, &pool, "10.0.0.2");
        store
            .create_peer_with_allocation(&peer, &IpAllocation::new(&pool.id, &peer.id, "10.0.0.2"))
            .expect("create");
        store.delete_peer_with_allocation(&peer.id, false).expect("soft");
        let alloc = store.allocation_by_peer(&peer.id).expect("query").expect("row kept");
        assert_eq!(alloc.status, AllocationStatus::Released);

        let peer2 = sample_peer(&user, &pool, "10.0.0.3");
        store
            .create_peer_with_allocation(&peer2, &IpAllocation::new(&pool.id, &peer2.id, "10.0.0.3"))
            .expect("create");
        store.delete_peer_with_allocation(&peer2.id, true).expect("hard");
        assert!(store.allocation_by_peer(&peer2.id).expect("query").is_none());

        // Idempotent either way.
        store.delete_peer_with_allocation(&peer.id, false).expect("again");
        store.delete_peer_with_allocation(&peer2.id, true).expect("again");
    }

    #[test]
    fn batch_create_pools_rolls_back_on_conflict() {
        let store = store();
        store.create_pool(&IpPool::new("existing", "10.0.0.0/24")).expect("create");
        let batch = vec![
            IpPool::new("fresh", "10.1.0.0/24"),
            IpPool::new("existing", "10.2.0.0/24"),
        ];
        assert!(store.batch_create_pools(&batch).is_err());
        assert!(matches!(
            store.pool_by_name("fresh"),
            Err(StoreError::PoolNotFound(_))
        ));
    }

    #[test]
    fn peer_filters() {
        let store = store();
        let user_a = sample_user("ann");
        let user_b = sample_user("ben");
        store.create_user(&user_a).expect("user");
        store.create_user(&user_b).expect("user");
        let pool = IpPool::new("lan", "10.0.0.0/24");
        store.create_pool(&pool).expect("pool");

        let mut p1 = sample_peer(&user_a, &pool, "10.0.0.2");
        p1.device_name = "laptop".to_string();
        let mut p2 = sample_peer(&user_b, &pool, "10.0.0.3");
        p2.device_name = "phone".to_string();
        p2.status = PeerStatus::Disabled;
        store.batch_create_peers(&[p1, p2]).expect("batch");

        let (page, total) = store
            .list_peers(
                &PeerFilter { user_id: Some(user_a.id.clone()), ..Default::default() },
                0,
                0,
            )
            .expect("list");
        assert_eq!((page.len(), total), (1, 1));

        let (page, _) = store
            .list_peers(
                &PeerFilter { status: Some(PeerStatus::Disabled), ..Default::default() },
                0,
                0,
            )
            .expect("list");
        assert_eq!(page[0].device_name, "phone");

        let (page, _) = store
            .list_peers(&PeerFilter { q: Some("lap".to_string()), ..Default::default() }, 0, 0)
            .expect("list");
        assert_eq!(page[0].device_name, "laptop");

        assert_eq!(store.active_peers().expect("active").len(), 1);
    }

    #[test]
    fn peer_lookup_by_public_key() {
        let store = store();
        let user = sample_user("kim");
        store.create_user(&user).expect("user");
        let pool = IpPool::new("lan", "10.0.0.0/24");
        store.create_pool(&pool).expect("pool");
        let peer = sample_peer(&user, &pool, "10.0.0.2");
        store.create_peer(&peer).expect("peer");

        let found = store
            .peer_by_public_key(&peer.client_public_key)
            .expect("query")
            .expect("found");
        assert_eq!(found.id, peer.id);
        assert!(store.peer_by_public_key("unknown").expect("query").is_none());
    }
}
