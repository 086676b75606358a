//! Rendering of server configuration files.

use std::fmt::Write as _;

use crate::document::{PeerSection, ServerDocument, MANAGED_BEGIN, MANAGED_END};

/// Renders a document back into file form.
///
/// Raw lines come first, then the Interface block with fields in a fixed
/// order, then unmanaged peer blocks in parse order, then the managed block
/// bracketed by the sentinels. Managed peers are sorted by client address
/// then peer id so the output is byte-stable for a given database state;
/// managed peers missing a public key or address are omitted.
#[must_use]
pub fn render(doc: &ServerDocument) -> String {
    let mut out = String::new();

    for line in &doc.raw_lines {
        let _ = writeln!(out, "{line}");
    }
    if !doc.raw_lines.is_empty() {
        out.push('\n');
    }

    render_interface(&mut out, doc);

    for peer in doc.peers.iter().filter(|p| !p.is_managed) {
        out.push('\n');
        render_peer(&mut out, peer);
    }

    let mut managed: Vec<&PeerSection> = doc
        .peers
        .iter()
        .filter(|p| p.is_managed && !p.public_key.is_empty() && !p.allowed_ips.is_empty())
        .collect();
    managed.sort_by(|a, b| {
        let key = |p: &PeerSection| {
            (
                p.allowed_ips.clone(),
                p.tag.as_ref().map(|t| t.peer_id.clone()).unwrap_or_default(),
            )
        };
        key(a).cmp(&key(b))
    });

    out.push('\n');
    let _ = writeln!(out, "{MANAGED_BEGIN}");
    for (i, peer) in managed.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        render_peer(&mut out, peer);
    }
    let _ = writeln!(out, "{MANAGED_END}");

    out
}

fn render_interface(out: &mut String, doc: &ServerDocument) {
    let interface = &doc.interface;
    let _ = writeln!(out, "[Interface]");
    if !interface.private_key.is_empty() {
        let _ = writeln!(out, "PrivateKey = {}", interface.private_key);
    }
    if !interface.address.is_empty() {
        let _ = writeln!(out, "Address = {}", interface.address);
    }
    if interface.listen_port != 0 {
        let _ = writeln!(out, "ListenPort = {}", interface.listen_port);
    }
    if interface.mtu != 0 {
        let _ = writeln!(out, "MTU = {}", interface.mtu);
    }
    if !interface.dns.is_empty() {
        let _ = writeln!(out, "DNS = {}", interface.dns);
    }
    if !interface.pre_up.is_empty() {
        let _ = writeln!(out, "PreUp = {}", interface.pre_up);
    }
    if !interface.post_up.is_empty() {
        let _ = writeln!(out, "PostUp = {}", interface.post_up);
    }
    if !interface.pre_down.is_empty() {
        let _ = writeln!(out, "PreDown = {}", interface.pre_down);
    }
    if !interface.post_down.is_empty() {
        let _ = writeln!(out, "PostDown = {}", interface.post_down);
    }
    for (key, value) in &interface.extra {
        let _ = writeln!(out, "{key} = {value}");
    }
}

fn render_peer(out: &mut String, peer: &PeerSection) {
    if let Some(tag) = &peer.tag {
        let _ = writeln!(out, "{}", tag.to_comment());
    } else if !peer.comment.is_empty() {
        let _ = writeln!(out, "{}", peer.comment);
    }
    let _ = writeln!(out, "[Peer]");
    if !peer.public_key.is_empty() {
        let _ = writeln!(out, "PublicKey = {}", peer.public_key);
    }
    if !peer.allowed_ips.is_empty() {
        let _ = writeln!(out, "AllowedIPs = {}", peer.allowed_ips);
    }
    if !peer.endpoint.is_empty() {
        let _ = writeln!(out, "Endpoint = {}", peer.endpoint);
    }
    if peer.persistent_keepalive != 0 {
        let _ = writeln!(out, "PersistentKeepalive = {}", peer.persistent_keepalive);
    }
    for (key, value) in &peer.extra {
        let _ = writeln!(out, "{key} = {value}");
    }
}
