//! Effective-value resolution for client configs.
//!
//! AllowedIPs, DNS and Endpoint resolve peer → pool → global, with empty
//! meaning "inherit". Values are resolved once, at peer write time, and
//! stored on the record so later global changes do not silently rewrite
//! already-issued configs.

use npwg_store::IpPool;

/// The ultimate AllowedIPs fallback when nothing is configured anywhere.
pub const FALLBACK_ALLOWED_IPS: &str = "0.0.0.0/0,::/0";

/// Global (service-level) defaults, from the startup configuration plus
/// the parsed server Interface section.
#[derive(Clone, Debug, Default)]
pub struct GlobalDefaults {
    /// `wireguard.default_allowed_ips`.
    pub default_allowed_ips: String,
    /// `wireguard.dns`.
    pub dns: String,
    /// `wireguard.endpoint`, a `host:port`.
    pub endpoint: String,
    /// `wireguard.server_ip`, the public address of this host.
    pub server_ip: String,
    /// The interface's ListenPort; 0 when unknown.
    pub listen_port: u16,
}

/// Resolves the AllowedIPs advertised to a client.
#[must_use]
pub fn effective_allowed_ips(peer: &str, pool: Option<&IpPool>, global: &GlobalDefaults) -> String {
    if !peer.is_empty() {
        return peer.to_string();
    }
    if let Some(pool) = pool {
        if !pool.routes.is_empty() {
            return pool.routes.clone();
        }
    }
    if !global.default_allowed_ips.is_empty() {
        return global.default_allowed_ips.clone();
    }
    FALLBACK_ALLOWED_IPS.to_string()
}

/// Resolves the DNS advertised to a client.
///
/// A peer that belongs to a pool inherits the pool's DNS and stops there,
/// even when the pool's DNS is empty; the global DNS only applies to
/// peers without a pool.
#[must_use]
pub fn effective_dns(peer: &str, pool: Option<&IpPool>, global: &GlobalDefaults) -> String {
    if !peer.is_empty() {
        return peer.to_string();
    }
    match pool {
        Some(pool) => pool.dns.clone(),
        None => global.dns.clone(),
    }
}

/// Resolves the endpoint handed to a client.
#[must_use]
pub fn effective_endpoint(peer: &str, pool: Option<&IpPool>, global: &GlobalDefaults) -> String {
    if !peer.is_empty() {
        return peer.to_string();
    }
    if let Some(pool) = pool {
        if !pool.endpoint.is_empty() {
            return pool.endpoint.clone();
        }
    }
    if !global.server_ip.is_empty() && global.listen_port != 0 {
        return format!("{}:{}", global.server_ip, global.listen_port);
    }
    global.endpoint.clone()
}
