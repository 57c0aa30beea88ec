//! Target validation: a scan target must be a CIDR block, a single IP address or a hostname.

use ipnet::IpNet;
use regex::Regex;
use spectre_core::ScanError;
use std::net::IpAddr;
use std::sync::OnceLock;

/// Networks larger than this are accepted but logged as slow.
pub const LARGE_NETWORK_ADDRESSES: u128 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetKind {
    Network(IpNet),
    Address(IpAddr),
    Hostname(String),
}

fn hostname_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9.-]+$").expect("static hostname pattern"))
}

/// Number of addresses covered by a network (saturating for huge v6 prefixes).
pub fn address_count(net: &IpNet) -> u128 {
    let host_bits = u32::from(net.max_prefix_len() - net.prefix_len());
    1u128.checked_shl(host_bits).unwrap_or(u128::MAX)
}

/// Classify and validate a target string.
pub fn validate_target(target: &str) -> Result<TargetKind, ScanError> {
    let t = target.trim();
    if t.is_empty() {
        return Err(ScanError::invalid_target(target, "target must not be empty"));
    }
    if t.contains('/') {
        // Host bits may be set (10.0.0.5/24); the engine scans the enclosing network.
        let net: IpNet = t
            .parse()
            .map_err(|e| ScanError::invalid_target(target, format!("bad CIDR: {}", e)))?;
        let count = address_count(&net);
        if count > LARGE_NETWORK_ADDRESSES {
            tracing::warn!(input = %t, addresses = %count, "large network, this may take a while");
        }
        return Ok(TargetKind::Network(net.trunc()));
    }
    if let Ok(ip) = t.parse::<IpAddr>() {
        return Ok(TargetKind::Address(ip));
    }
    if hostname_re().is_match(t) && !t.starts_with('-') {
        return Ok(TargetKind::Hostname(t.to_string()));
    }
    Err(ScanError::invalid_target(target, "not an IP address, CIDR block or hostname"))
}
