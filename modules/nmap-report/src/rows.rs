use crate::HostRecord;
use spectre_core::ScanResultRow;

/// Values stamped on every row of one scan.
#[derive(Debug, Clone, Copy)]
pub struct RowContext<'a> {
    pub scan_id: &'a str,
    pub timestamp: &'a str,
}

/// One row per (host, open port). Hosts without open ports produce nothing.
pub fn flatten(hosts: &[HostRecord], ctx: &RowContext) -> Vec<ScanResultRow> {
    hosts
        .iter()
        .flat_map(|host| {
            host.open_ports().map(move |port| ScanResultRow {
                timestamp: ctx.timestamp.to_string(),
                scan_id: ctx.scan_id.to_string(),
                target_ip: host.ip.clone(),
                hostname: host.hostname.clone(),
                port: port.port.clone(),
                protocol: port.protocol.clone(),
                service: port.service.clone(),
                version: port.version.clone(),
                product: port.product.clone(),
                os_guess: host.os_guess.clone(),
            })
        })
        .collect()
}
