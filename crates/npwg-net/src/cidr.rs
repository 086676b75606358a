//! IPv4 CIDR parsing and host enumeration.

use std::net::{IpAddr, Ipv4Addr};

use ipnet::{IpNet, Ipv4Net};

use crate::error::{NetError, Result};

/// The narrowest pool prefix that still yields allocatable hosts once the
/// network, broadcast and server tunnel addresses are excluded.
pub const MAX_POOL_PREFIX: u8 = 30;

/// Parses `A.B.C.D/N` into an [`Ipv4Net`].
///
/// The address part is preserved as-is: for `10.0.0.1/24` the returned
/// net's `addr()` is `10.0.0.1` (the server tunnel address when parsing
/// an Interface `Address` line) and `network()` is `10.0.0.0`.
///
/// # Errors
///
/// Returns [`NetError::NotIpv4`] for v6 input and [`NetError::InvalidCidr`]
/// for anything else unparseable.
pub fn parse_cidr(s: &str) -> Result<Ipv4Net> {
    let s = s.trim();
    match s.parse::<IpNet>() {
        Ok(IpNet::V4(net)) => Ok(net),
        Ok(IpNet::V6(_)) => Err(NetError::NotIpv4(s.to_string())),
        Err(e) => Err(NetError::InvalidCidr(format!("{s}: {e}"))),
    }
}

/// Parses a bare IPv4 address.
///
/// # Errors
///
/// Returns [`NetError::NotIpv4`] for v6 addresses or unparseable input.
pub fn parse_ipv4(s: &str) -> Result<Ipv4Addr> {
    let s = s.trim();
    match s.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => Ok(ip),
        _ => Err(NetError::NotIpv4(s.to_string())),
    }
}

/// Iterator over the usable host addresses of a prefix, ascending,
/// excluding the network and broadcast addresses.
#[derive(Debug, Clone)]
pub struct HostRange {
    next: u32,
    end: u32, // exclusive (broadcast)
}

impl Iterator for HostRange {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Ipv4Addr> {
        if self.next >= self.end {
            return None;
        }
        let ip = Ipv4Addr::from(self.next);
        self.next += 1;
        Some(ip)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.saturating_sub(self.next) as usize;
        (remaining, Some(remaining))
    }
}

/// Returns the ascending host range of `net`, excluding network and
/// broadcast. Empty for /31 and /32.
#[must_use]
pub fn host_range(net: Ipv4Net) -> HostRange {
    let network = u32::from(net.network());
    let broadcast = u32::from(net.broadcast());
    if net.prefix_len() >= 31 {
        return HostRange { next: 0, end: 0 };
    }
    HostRange {
        next: network + 1,
        end: broadcast,
    }
}
