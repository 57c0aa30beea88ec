use crate::{HostRecord, PortRecord};
use regex::Regex;
use std::sync::OnceLock;

fn report_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"report for (\S+)(?:\s+\(([^()\s]+)\))?\s*$").expect("static report pattern"))
}

fn port_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d+)/(tcp|udp)\s+open\s+(\S+)(?:\s+(.*\S))?\s*$").expect("static port pattern")
    })
}

/// Recover hosts and open ports from human-readable engine output.
///
/// Unmatched lines are skipped. A host only survives if at least one open port
/// line followed its report line.
pub fn parse_text(raw: &str) -> Vec<HostRecord> {
    let mut hosts = Vec::new();
    let mut current: Option<HostRecord> = None;

    for line in raw.lines().map(str::trim) {
        if let Some(caps) = report_re().captures(line) {
            flush(&mut hosts, current.take());
            let target = caps[1].to_string();
            let (ip, hostname) = match caps.get(2) {
                Some(ip) => (ip.as_str().to_string(), Some(target)),
                None => (target, None),
            };
            current = Some(HostRecord { ip, hostname, state: None, os_guess: None, ports: Vec::new() });
            continue;
        }
        let Some(host) = current.as_mut() else { continue };
        if let Some(caps) = port_re().captures(line) {
            host.ports.push(PortRecord {
                port: caps[1].to_string(),
                protocol: caps[2].to_string(),
                state: "open".to_string(),
                service: Some(caps[3].to_string()),
                product: None,
                version: caps.get(4).map(|m| m.as_str().to_string()),
            });
        }
    }
    flush(&mut hosts, current);
    hosts
}

fn flush(hosts: &mut Vec<HostRecord>, host: Option<HostRecord>) {
    if let Some(h) = host {
        if !h.ports.is_empty() {
            hosts.push(h);
        }
    }
}
