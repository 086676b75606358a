//! Parsing of server configuration files.

use crate::document::{
    InterfaceSection, ManagedTag, PeerSection, ServerDocument, MANAGED_BEGIN, MANAGED_END,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Interface,
    Peer,
}

/// Parses a server configuration file.
///
/// The parser never fails: unknown sections and unparseable lines are
/// preserved as raw text, unknown keys ride in the catch-all maps, and
/// integer fields that fail to parse become 0. Keys are matched
/// case-insensitively and values are trimmed.
#[must_use]
pub fn parse(input: &str) -> ServerDocument {
    let mut doc = ServerDocument::default();
    let mut section = Section::None;
    let mut in_managed = false;
    // Comment lines held back until we know whether they precede a [Peer].
    let mut pending: Vec<String> = Vec::new();
    let mut current: Option<PeerSection> = None;

    for line in input.lines() {
        let trimmed = line.trim();

        if trimmed == MANAGED_BEGIN {
            finish_peer(&mut current, &mut doc);
            doc.raw_lines.append(&mut pending);
            section = Section::None;
            in_managed = true;
            continue;
        }
        if trimmed == MANAGED_END {
            finish_peer(&mut current, &mut doc);
            doc.raw_lines.append(&mut pending);
            section = Section::None;
            in_managed = false;
            continue;
        }

        if trimmed.is_empty() {
            // A comment separated from the next header by a blank line does
            // not "precede" it.
            doc.raw_lines.append(&mut pending);
            if section == Section::None && !in_managed {
                doc.raw_lines.push(String::new());
            }
            continue;
        }

        if trimmed.starts_with('#') || trimmed.starts_with(';') {
            pending.push(trimmed.to_string());
            continue;
        }

        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            let name = trimmed[1..trimmed.len() - 1].trim();
            finish_peer(&mut current, &mut doc);
            if name.eq_ignore_ascii_case("interface") {
                doc.raw_lines.append(&mut pending);
                section = Section::Interface;
            } else if name.eq_ignore_ascii_case("peer") {
                let comment = pending.pop().unwrap_or_default();
                doc.raw_lines.append(&mut pending);
                let tag = ManagedTag::from_comment(&comment);
                let is_managed = in_managed || tag.is_some();
                current = Some(PeerSection {
                    comment: if tag.is_some() { String::new() } else { comment },
                    is_managed,
                    tag,
                    ..Default::default()
                });
                section = Section::Peer;
            } else {
                // Unknown section: keep its header and body as raw text.
                doc.raw_lines.append(&mut pending);
                doc.raw_lines.push(trimmed.to_string());
                section = Section::None;
            }
            continue;
        }

        // Key-value line (or junk).
        doc.raw_lines.append(&mut pending);
        let Some((key, value)) = trimmed.split_once('=') else {
            doc.raw_lines.push(trimmed.to_string());
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        match section {
            Section::None => doc.raw_lines.push(trimmed.to_string()),
            Section::Interface => interface_key(&mut doc.interface, key, value),
            Section::Peer => {
                if let Some(peer) = current.as_mut() {
                    peer_key(peer, key, value);
                }
            }
        }
    }

    finish_peer(&mut current, &mut doc);
    doc.raw_lines.append(&mut pending);
    while doc.raw_lines.last().is_some_and(String::is_empty) {
        doc.raw_lines.pop();
    }
    doc
}

fn finish_peer(current: &mut Option<PeerSection>, doc: &mut ServerDocument) {
    if let Some(peer) = current.take() {
        doc.peers.push(peer);
    }
}

fn interface_key(interface: &mut InterfaceSection, key: &str, value: &str) {
    match key.to_ascii_lowercase().as_str() {
        "privatekey" => interface.private_key = value.to_string(),
        "address" => interface.address = value.to_string(),
        "listenport" => interface.listen_port = value.parse().unwrap_or(0),
        "mtu" => interface.mtu = value.parse().unwrap_or(0),
        "dns" => interface.dns = value.to_string(),
        "preup" => interface.pre_up = value.to_string(),
        "postup" => interface.post_up = value.to_string(),
        "predown" => interface.pre_down = value.to_string(),
        "postdown" => interface.post_down = value.to_string(),
        _ => interface.extra.push((key.to_string(), value.to_string())),
    }
}

fn peer_key(peer: &mut PeerSection, key: &str, value: &str) {
    match key.to_ascii_lowercase().as_str() {
        "publickey" => peer.public_key = value.to_string(),
        "allowedips" => peer.allowed_ips = value.to_string(),
        "endpoint" => peer.endpoint = value.to_string(),
        "persistentkeepalive" => peer.persistent_keepalive = value.parse().unwrap_or(0),
        _ => peer.extra.push((key.to_string(), value.to_string())),
    }
}
