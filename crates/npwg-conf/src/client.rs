//! Rendering of client configuration files.

use std::fmt::Write as _;

/// Everything needed to emit a client-side `.conf` for one peer.
#[derive(Clone, Debug)]
pub struct ClientConfig<'a> {
    /// Device name, emitted in the header comment.
    pub device_name: &'a str,
    /// The client's base64 private key.
    pub private_key: &'a str,
    /// The client's tunnel address, `A.B.C.D/32`.
    pub address: &'a str,
    /// Effective DNS servers; empty omits the line.
    pub dns: &'a str,
    /// The server's base64 public key.
    pub server_public_key: &'a str,
    /// Effective AllowedIPs advertised to the client.
    pub allowed_ips: &'a str,
    /// Effective `host:port` endpoint; empty omits the line.
    pub endpoint: &'a str,
    /// Keepalive interval in seconds; 0 omits the line.
    pub persistent_keepalive: u32,
}

/// Renders the client configuration file text.
#[must_use]
pub fn render_client_config(config: &ClientConfig<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Generated by NexusPointWG");
    let _ = writeln!(out, "# Device: {}", config.device_name);
    let _ = writeln!(out, "[Interface]");
    let _ = writeln!(out, "PrivateKey = {}", config.private_key);
    let _ = writeln!(out, "Address = {}", config.address);
    if !config.dns.is_empty() {
        let _ = writeln!(out, "DNS = {}", config.dns);
    }
    out.push('\n');
    let _ = writeln!(out, "[Peer]");
    let _ = writeln!(out, "PublicKey = {}", config.server_public_key);
    let _ = writeln!(out, "AllowedIPs = {}", config.allowed_ips);
    if !config.endpoint.is_empty() {
        let _ = writeln!(out, "Endpoint = {}", config.endpoint);
    }
    if config.persistent_keepalive != 0 {
        let _ = writeln!(out, "PersistentKeepalive = {}", config.persistent_keepalive);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ClientConfig<'static> {
        ClientConfig {
            device_name: "laptop",
            private_key: "PRIV",
            address: "100.100.100.2/32",
            dns: "1.1.1.1",
            server_public_key: "SRV",
            allowed_ips: "0.0.0.0/0,::/0",
            endpoint: "vpn.example.com:51820",
            persistent_keepalive: 25,
        }
    }

    #[test]
    fn renders_all_fields() {
        let out = render_client_config(&sample());
        assert!(out.starts_with("# Generated by NexusPointWG\n# Device: laptop\n"));
        assert!(out.contains("PrivateKey = PRIV"));
        assert!(out.contains("Address = 100.100.100.2/32"));
        assert!(out.contains("DNS = 1.1.1.1"));
        assert!(out.contains("PublicKey = SRV"));
        assert!(out.contains("AllowedIPs = 0.0.0.0/0,::/0"));
        assert!(out.contains("Endpoint = vpn.example.com:51820"));
        assert!(out.contains("PersistentKeepalive = 25"));
    }

    #[test]
    fn omits_empty_optionals() {
        let mut config = sample();
        config.dns = "";
        config.endpoint = "";
        config.persistent_keepalive = 0;
        let out = render_client_config(&config);
        assert!(!out.contains("DNS"));
        assert!(!out.contains("Endpoint"));
        assert!(!out.contains("PersistentKeepalive"));
    }

    #[test]
    fn client_config_parses_back() {
        let out = render_client_config(&sample());
        let doc = crate::parse(&out);
        assert_eq!(doc.interface.private_key, "PRIV");
        assert_eq!(doc.peers.len(), 1);
        assert_eq!(doc.peers[0].public_key, "SRV");
    }
}
