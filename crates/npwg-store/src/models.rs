//! Record types persisted by the store.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel stored in `client_private_key` for peers adopted from the
/// config file, whose real private key the service never saw.
pub const EXTERNAL_MANAGED_KEY: &str = "[external-managed]";

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// The canonical text form stored in the database.
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($name), ": {}"), other)),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

/// Role of a user account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Full administrative access.
    Admin,
    /// Regular user, restricted to own peers.
    User,
}

text_enum!(UserRole { Admin => "admin", User => "user" });

/// Lifecycle status of a user account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// May log in and operate.
    Active,
    /// Suspended.
    Inactive,
    /// Soft-deleted.
    Deleted,
}

text_enum!(UserStatus { Active => "active", Inactive => "inactive", Deleted => "deleted" });

/// A user account.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    /// Unique id.
    pub id: String,
    /// Unique login name.
    pub username: String,
    /// Unique email.
    pub email: String,
    /// Hex salt for the password hash.
    #[serde(skip_serializing)]
    pub password_salt: String,
    /// Hex salted hash of the password.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Role.
    pub role: UserRole,
    /// Status.
    pub status: UserStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Creates a new active user with a freshly hashed password.
    #[must_use]
    pub fn new(username: &str, email: &str, password: &str, role: UserRole) -> Self {
        let (password_salt, password_hash) = crate::password::hash_password(password);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: email.to_string(),
            password_salt,
            password_hash,
            role,
            status: UserStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Status of an IP pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolStatus {
    /// Allocations permitted.
    Active,
    /// No new allocations.
    Disabled,
}

text_enum!(PoolStatus { Active => "active", Disabled => "disabled" });

/// An operator-defined IPv4 address pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IpPool {
    /// Unique id.
    pub id: String,
    /// Unique display name.
    pub name: String,
    /// Unique IPv4 prefix, immutable once allocations exist.
    pub cidr: String,
    /// Default AllowedIPs advertised to clients in this pool.
    pub routes: String,
    /// Optional DNS override for the pool.
    pub dns: String,
    /// Optional endpoint override for the pool.
    pub endpoint: String,
    /// Status.
    pub status: PoolStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl IpPool {
    /// Creates a new active pool.
    #[must_use]
    pub fn new(name: &str, cidr: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            cidr: cidr.to_string(),
            routes: String::new(),
            dns: String::new(),
            endpoint: String::new(),
            status: PoolStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Status of a WireGuard peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    /// Present in the managed block and expected in the kernel interface.
    Active,
    /// Kept in the database, removed from the file.
    Disabled,
}

text_enum!(PeerStatus { Active => "active", Disabled => "disabled" });

/// A WireGuard peer record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WgPeer {
    /// Unique id.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Human-readable device name.
    pub device_name: String,
    /// Base64 private key, or [`EXTERNAL_MANAGED_KEY`] for adopted peers.
    #[serde(skip_serializing)]
    pub client_private_key: String,
    /// Base64 public key.
    pub client_public_key: String,
    /// Tunnel address, always stored as `A.B.C.D/32`.
    pub client_ip: String,
    /// Comma-separated CIDRs advertised to the client.
    pub allowed_ips: String,
    /// Effective DNS, stored at write time.
    pub dns: String,
    /// Effective endpoint, stored at write time.
    pub endpoint: String,
    /// Keepalive seconds; 0 means unset.
    pub persistent_keepalive: u32,
    /// Status.
    pub status: PeerStatus,
    /// Pool the address came from.
    pub ip_pool_id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl WgPeer {
    /// Whether the private key is known to the service.
    #[must_use]
    pub fn has_private_key(&self) -> bool {
        !self.client_private_key.is_empty() && self.client_private_key != EXTERNAL_MANAGED_KEY
    }
}

/// Status of an IP allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationStatus {
    /// The address is held by a peer.
    Allocated,
    /// The address has been returned to the pool.
    Released,
}

text_enum!(AllocationStatus { Allocated => "allocated", Released => "released" });

/// An IPv4 address handed out from a pool to a peer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IpAllocation {
    /// Unique id.
    pub id: String,
    /// Pool the address belongs to.
    pub ip_pool_id: String,
    /// Holding peer; unique among allocated rows.
    pub peer_id: String,
    /// Bare IPv4 address; unique per pool among allocated rows.
    pub ip_address: String,
    /// Status.
    pub status: AllocationStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl IpAllocation {
    /// Creates a new allocated row.
    #[must_use]
    pub fn new(ip_pool_id: &str, peer_id: &str, ip_address: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            ip_pool_id: ip_pool_id.to_string(),
            peer_id: peer_id.to_string(),
            ip_address: ip_address.to_string(),
            status: AllocationStatus::Allocated,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn enum_text_roundtrip() {
        assert_eq!(UserRole::from_str("admin").expect("parse"), UserRole::Admin);
        assert_eq!(UserStatus::Active.as_str(), "active");
        assert_eq!(PoolStatus::from_str("disabled").expect("parse"), PoolStatus::Disabled);
        assert_eq!(AllocationStatus::Released.as_str(), "released");
        assert!(PeerStatus::from_str("bogus").is_err());
    }

    #[test]
    fn new_user_hashes_password() {
        let user = User::new("admin", "admin@example.com", "secret", UserRole::Admin);
        assert!(crate::password::verify_password(
            &user.password_salt,
            &user.password_hash,
            "secret"
        ));
        assert_eq!(user.status, UserStatus::Active);
    }

    #[test]
    fn external_managed_peers_have_no_usable_key() {
        let mut peer = WgPeer {
            id: String::new(),
            user_id: String::new(),
            device_name: String::new(),
            client_private_key: EXTERNAL_MANAGED_KEY.to_string(),
            client_public_key: String::new(),
            client_ip: String::new(),
            allowed_ips: String::new(),
            dns: String::new(),
            endpoint: String::new(),
            persistent_keepalive: 0,
            status: PeerStatus::Active,
            ip_pool_id: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(!peer.has_private_key());
        peer.client_private_key = "aGVsbG8=".to_string();
        assert!(peer.has_private_key());
    }
}
