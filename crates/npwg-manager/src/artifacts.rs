//! On-disk client artifacts.
//!
//! For every peer with a known private key the service maintains:
//!
//! ```text
//! <user_dir>/<peer_id>.conf              flat client config
//! <user_dir>/<username>/<peer_id>/
//!     peer.conf  privatekey  publickey  meta.json
//! ```
//!
//! Key-bearing files are written 0600. Removal is best-effort; a peer
//! whose artifacts cannot be deleted is still gone from the database and
//! the server config.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use npwg_store::WgPeer;

/// Contents of a peer's `meta.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerMeta {
    /// Database id of the peer.
    pub peer_id: String,
    /// Owning username.
    pub user: String,
    /// Device name.
    pub device_name: String,
    /// Tunnel address, `A.B.C.D/32`.
    pub client_ip: String,
    /// Effective endpoint.
    pub endpoint: String,
    /// When the artifact set was generated (RFC3339).
    pub generated_at: DateTime<Utc>,
}

/// Writes and removes client artifacts under the user directory.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    user_dir: PathBuf,
}

impl ArtifactStore {
    /// Binds to the user directory.
    #[must_use]
    pub fn new(user_dir: impl Into<PathBuf>) -> Self {
        Self {
            user_dir: user_dir.into(),
        }
    }

    /// The flat config path for a peer.
    #[must_use]
    pub fn flat_config_path(&self, peer_id: &str) -> PathBuf {
        self.user_dir.join(format!("{peer_id}.conf"))
    }

    /// The per-user directory for a peer.
    #[must_use]
    pub fn peer_dir(&self, username: &str, peer_id: &str) -> PathBuf {
        self.user_dir.join(username).join(peer_id)
    }

    /// Writes the full artifact set for a peer.
    ///
    /// `config_text` is the rendered client config. Peers without a known
    /// private key get no `privatekey` file and no config (there is
    /// nothing useful to hand out), only `publickey` and `meta.json`.
    ///
    /// # Errors
    ///
    /// Returns the first I/O error; partially written artifacts are left
    /// for the next regeneration to overwrite.
    pub fn write_peer(
        &self,
        peer: &WgPeer,
        username: &str,
        config_text: Option<&str>,
    ) -> io::Result<()> {
        let dir = self.peer_dir(username, &peer.id);
        fs::create_dir_all(&dir)?;

        if let Some(text) = config_text {
            write_secret(&self.flat_config_path(&peer.id), text.as_bytes())?;
            write_secret(&dir.join("peer.conf"), text.as_bytes())?;
        }
        if peer.has_private_key() {
            write_secret(&dir.join("privatekey"), peer.client_private_key.as_bytes())?;
        }
        fs::write(dir.join("publickey"), peer.client_public_key.as_bytes())?;

        let meta = PeerMeta {
            peer_id: peer.id.clone(),
            user: username.to_string(),
            device_name: peer.device_name.clone(),
            client_ip: peer.client_ip.clone(),
            endpoint: peer.endpoint.clone(),
            generated_at: Utc::now(),
        };
        let meta_json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(dir.join("meta.json"), meta_json)?;
        Ok(())
    }

    /// Removes a peer's artifacts. Failures are logged, never returned.
    pub fn remove_peer(&self, peer_id: &str, username: &str) {
        let flat = self.flat_config_path(peer_id);
        if let Err(e) = fs::remove_file(&flat) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %flat.display(), error = %e, "failed to remove client config");
            }
        }
        let dir = self.peer_dir(username, peer_id);
        if let Err(e) = fs::remove_dir_all(&dir) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %dir.display(), error = %e, "failed to remove peer directory");
            }
        }
    }
}

fn write_secret(path: &Path, contents: &[u8]) -> io::Result<()> {
    fs::write(path, contents)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(test)]
mod tests {
    use super::*;
    use npwg_store::{PeerStatus, EXTERNAL_MANAGED_KEY};

    fn sample_peer(private_key: &str) -> WgPeer {
        let now = Utc::now();
        WgPeer {
            id: "peer-1".to_string(),
            user_id: "user-1".to_string(),
            device_name: "laptop".to_string(),
            client_private_key: private_key.to_string(),
            client_public_key: "PUB".to_string(),
            client_ip: "10.0.0.2/32".to_string(),
            allowed_ips: "0.0.0.0/0".to_string(),
            dns: String::new(),
            endpoint: "vpn.example.com:51820".to_string(),
            persistent_keepalive: 25,
            status: PeerStatus::Active,
            ip_pool_id: "pool-1".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn writes_full_artifact_set() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path());
        let peer = sample_peer("PRIV");
        store
            .write_peer(&peer, "alice", Some("[Interface]\n"))
            .expect("write");

        assert!(store.flat_config_path("peer-1").exists());
        let peer_dir = store.peer_dir("alice", "peer-1");
        assert!(peer_dir.join("peer.conf").exists());
        assert_eq!(fs::read_to_string(peer_dir.join("privatekey")).expect("read"), "PRIV");
        assert_eq!(fs::read_to_string(peer_dir.join("publickey")).expect("read"), "PUB");

        let meta: PeerMeta =
            serde_json::from_slice(&fs::read(peer_dir.join("meta.json")).expect("read"))
                .expect("parse");
        assert_eq!(meta.peer_id, "peer-1");
        assert_eq!(meta.user, "alice");
        assert_eq!(meta.client_ip, "10.0.0.2/32");

        let mode = fs::metadata(peer_dir.join("privatekey"))
            .expect("meta")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn external_managed_peer_gets_no_private_key_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path());
        let peer = sample_peer(EXTERNAL_MANAGED_KEY);
        store.write_peer(&peer, "alice", None).expect("write");

        let peer_dir = store.peer_dir("alice", "peer-1");
        assert!(!peer_dir.join("privatekey").exists());
        assert!(!peer_dir.join("peer.conf").exists());
        assert!(!store.flat_config_path("peer-1").exists());
        assert!(peer_dir.join("publickey").exists());
        assert!(peer_dir.join("meta.json").exists());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path());
        let peer = sample_peer("PRIV");
        store.write_peer(&peer, "alice", Some("x")).expect("write");

        store.remove_peer("peer-1", "alice");
        assert!(!store.flat_config_path("peer-1").exists());
        assert!(!store.peer_dir("alice", "peer-1").exists());
        // Second removal is quiet.
        store.remove_peer("peer-1", "alice");
    }
}
