//! The parsed representation of a server configuration file.

use serde::{Deserialize, Serialize};

/// First sentinel line of the managed block. Literal, never localized.
pub const MANAGED_BEGIN: &str = "# NexusPointWG BEGIN";

/// Last sentinel line of the managed block. Literal, never localized.
pub const MANAGED_END: &str = "# NexusPointWG END";

/// Prefix of the per-peer ownership tag inside the managed block.
pub const TAG_PREFIX: &str = "# NPWG peer_id=";

/// A parsed server configuration file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDocument {
    /// Lines outside any section: file headers, blank lines, comments that
    /// do not precede a peer. Re-emitted first, verbatim.
    pub raw_lines: Vec<String>,
    /// The single `[Interface]` section.
    pub interface: InterfaceSection,
    /// All `[Peer]` sections, in file order.
    pub peers: Vec<PeerSection>,
}

impl ServerDocument {
    /// Looks up a peer by its exact `PublicKey` value.
    #[must_use]
    pub fn peer_by_public_key(&self, public_key: &str) -> Option<&PeerSection> {
        self.peers.iter().find(|p| p.public_key == public_key)
    }

    /// Removes the managed peer tagged with `peer_id`. Returns whether a
    /// peer was removed.
    pub fn remove_managed_peer(&mut self, peer_id: &str) -> bool {
        let before = self.peers.len();
        self.peers
            .retain(|p| p.tag.as_ref().is_none_or(|t| t.peer_id != peer_id));
        self.peers.len() != before
    }

    /// Inserts or replaces the managed peer tagged with `peer.tag.peer_id`.
    pub fn upsert_managed_peer(&mut self, peer: PeerSection) {
        if let Some(tag) = &peer.tag {
            let peer_id = tag.peer_id.clone();
            self.remove_managed_peer(&peer_id);
        }
        self.peers.push(peer);
    }
}

/// The `[Interface]` section of a server configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceSection {
    /// Base64 Curve25519 private key.
    pub private_key: String,
    /// Tunnel address in CIDR form, e.g. `10.0.0.1/24`.
    pub address: String,
    /// UDP listen port; 0 when absent or unparseable.
    pub listen_port: u16,
    /// Interface MTU; 0 when absent or unparseable.
    pub mtu: u16,
    /// DNS servers advertised by this interface.
    pub dns: String,
    /// Script hooks.
    pub pre_up: String,
    /// Script hooks.
    pub post_up: String,
    /// Script hooks.
    pub pre_down: String,
    /// Script hooks.
    pub post_down: String,
    /// Unknown keys, preserved verbatim in first-seen order.
    pub extra: Vec<(String, String)>,
}

/// A `[Peer]` section.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSection {
    /// Base64 Curve25519 public key.
    pub public_key: String,
    /// Comma-separated CIDRs routed to this peer.
    pub allowed_ips: String,
    /// Optional `host:port` endpoint.
    pub endpoint: String,
    /// Keepalive interval in seconds; 0 when absent or unparseable.
    pub persistent_keepalive: u32,
    /// The comment line immediately preceding the section header, if any.
    pub comment: String,
    /// Whether this peer is owned by the service: it sat between the
    /// sentinels, or its preceding comment is an `# NPWG peer_id=` tag.
    pub is_managed: bool,
    /// Parsed ownership tag for managed peers.
    pub tag: Option<ManagedTag>,
    /// Unknown keys, preserved verbatim in first-seen order.
    pub extra: Vec<(String, String)>,
}

/// Ownership metadata encoded in a managed peer's tag comment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedTag {
    /// Database id of the peer.
    pub peer_id: String,
    /// Database id of the owning user.
    pub user_id: String,
    /// Human-readable device name.
    pub device: String,
}

impl ManagedTag {
    /// Renders the tag back into its comment form.
    #[must_use]
    pub fn to_comment(&self) -> String {
        format!(
            "{TAG_PREFIX}{} user_id={} device={}",
            self.peer_id, self.user_id, self.device
        )
    }

    /// Parses a tag comment. Returns `None` when the line is not a tag.
    #[must_use]
    pub fn from_comment(line: &str) -> Option<Self> {
        let rest = line.trim().strip_prefix(TAG_PREFIX)?;
        let (peer_id, rest) = rest.split_once(" user_id=")?;
        let (user_id, device) = rest.split_once(" device=")?;
        Some(Self {
            peer_id: peer_id.trim().to_string(),
            user_id: user_id.trim().to_string(),
            device: device.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_comment_roundtrip() {
        let tag = ManagedTag {
            peer_id: "p-1".to_string(),
            user_id: "u-1".to_string(),
            device: "work laptop".to_string(),
        };
        let comment = tag.to_comment();
        assert_eq!(ManagedTag::from_comment(&comment), Some(tag));
    }

    #[test]
    fn tag_device_keeps_spaces() {
        let tag =
            ManagedTag::from_comment("# NPWG peer_id=a user_id=b device=[External] old phone")
                .expect("tag");
        assert_eq!(tag.device, "[External] old phone");
    }

    #[test]
    fn non_tag_comments_are_rejected() {
        assert_eq!(ManagedTag::from_comment("# just a note"), None);
        assert_eq!(ManagedTag::from_comment("# NPWG peer_id=x"), None);
    }

    #[test]
    fn upsert_replaces_by_peer_id() {
        let mut doc = ServerDocument::default();
        let mk = |ip: &str| PeerSection {
            public_key: "k".to_string(),
            allowed_ips: ip.to_string(),
            is_managed: true,
            tag: Some(ManagedTag {
                peer_id: "p-1".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        doc.upsert_managed_peer(mk("10.0.0.2/32"));
        doc.upsert_managed_peer(mk("10.0.0.3/32"));
        assert_eq!(doc.peers.len(), 1);
        assert_eq!(doc.peers[0].allowed_ips, "10.0.0.3/32");
    }
}
