use crate::error::RelayError;
use std::net::{Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// Refuse targets that point into private or reserved address space (SSRF guard).
///
/// Only IP literals are checked. Hostnames pass without DNS resolution, so a
/// public name resolving to a private address is not caught here.
///
/// # Errors
/// [`RelayError::ForbiddenTarget`] for loopback, RFC 1918, link-local,
/// carrier-grade NAT and unique-local addresses, and for `localhost`.
pub fn validate_target_url(target: &Url) -> Result<(), RelayError> {
    match target.host() {
        Some(Host::Ipv4(ip)) if is_blocked_ipv4(ip) => Err(RelayError::ForbiddenTarget(format!(
            "private or reserved IPv4 address {ip}"
        ))),
        Some(Host::Ipv6(ip)) if is_blocked_ipv6(ip) => Err(RelayError::ForbiddenTarget(format!(
            "private or reserved IPv6 address {ip}"
        ))),
        Some(Host::Domain(name)) if is_local_name(name) => Err(RelayError::ForbiddenTarget(
            format!("local host name {name}"),
        )),
        Some(_) => Ok(()),
        None => Err(RelayError::MalformedTarget(format!(
            "no host in {target}"
        ))),
    }
}

fn is_local_name(name: &str) -> bool {
    let name = name.trim_end_matches('.').to_ascii_lowercase();
    name == "localhost" || name.ends_with(".localhost")
}

/// Blocked: `0/8`, `10/8`, `100.64/10`, `127/8`, `169.254/16`, `172.16/12`, `192.168/16`.
fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();

    a == 0
        || a == 10
        || (a == 100 && (64..=127).contains(&b))
        || a == 127
        || (a == 169 && b == 254)
        || (a == 172 && (16..=31).contains(&b))
        || (a == 192 && b == 168)
}

/// Blocked: `::`, `::1`, `fe80::/10`, `fc00::/7`, and IPv4-mapped forms of blocked IPv4.
fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_ipv4(v4);
    }
    let s = ip.segments();

    ip.is_unspecified()
        || ip.is_loopback()
        || (s[0] & 0xffc0) == 0xfe80
        || (s[0] & 0xfe00) == 0xfc00
}
