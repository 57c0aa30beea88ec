use serde::Serialize;
use spectre_core::ScanResultRow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Csv,
    Json,
}

impl ReportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Some(ReportFormat::Csv),
            "json" => Some(ReportFormat::Json),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Csv => "csv",
            ReportFormat::Json => "json",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// What the formatter needs to know about a finished scan besides its rows.
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub scan_id: String,
    pub target: String,
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
    /// Pre-flattening host count; rows alone undercount hosts without open ports.
    pub hosts_scanned: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanMetadata {
    pub scan_id: String,
    pub target: String,
    pub start_time: String,
    pub end_time: String,
    pub duration_seconds: f64,
    pub duration_human: String,
    pub total_hosts_scanned: usize,
    pub total_services_found: usize,
    pub scan_date: String,
    pub scan_time: String,
}

impl ScanMetadata {
    pub fn new(ctx: &ScanContext, rows: &[ScanResultRow]) -> Self {
        let secs = (ctx.finished_at - ctx.started_at).as_seconds_f64().max(0.0);
        ScanMetadata {
            scan_id: ctx.scan_id.clone(),
            target: ctx.target.clone(),
            start_time: ctx.started_at.format(&Rfc3339).unwrap_or_else(|_| String::new()),
            end_time: ctx.finished_at.format(&Rfc3339).unwrap_or_else(|_| String::new()),
            duration_seconds: (secs * 100.0).round() / 100.0,
            duration_human: format_duration(secs),
            total_hosts_scanned: ctx.hosts_scanned,
            total_services_found: rows.len(),
            scan_date: ctx
                .started_at
                .format(format_description!("[year]-[month]-[day]"))
                .unwrap_or_else(|_| String::new()),
            scan_time: ctx
                .started_at
                .format(format_description!("[hour]:[minute]:[second]"))
                .unwrap_or_else(|_| String::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortCount {
    pub port: u16,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub total_services: usize,
    pub unique_hosts: usize,
    pub open_ports: Vec<u16>,
    pub services_breakdown: BTreeMap<String, usize>,
    pub top_ports: Vec<PortCount>,
}

const TOP_PORTS: usize = 10;

impl ScanSummary {
    pub fn from_rows(rows: &[ScanResultRow]) -> Self {
        let hosts: BTreeSet<&str> = rows.iter().map(|r| r.target_ip.as_str()).collect();
        let mut services: BTreeMap<String, usize> = BTreeMap::new();
        let mut per_port: HashMap<u16, usize> = HashMap::new();
        for r in rows {
            let name = r.service.clone().unwrap_or_else(|| "unknown".to_string());
            *services.entry(name).or_default() += 1;
            if let Ok(p) = r.port.parse::<u16>() {
                *per_port.entry(p).or_default() += 1;
            }
        }
        let mut open_ports: Vec<u16> = per_port.keys().copied().collect();
        open_ports.sort_unstable();
        let mut top_ports: Vec<PortCount> = per_port.into_iter().map(|(port, count)| PortCount { port, count }).collect();
        top_ports.sort_by(|a, b| b.count.cmp(&a.count).then(a.port.cmp(&b.port)));
        top_ports.truncate(TOP_PORTS);
        ScanSummary {
            total_services: rows.len(),
            unique_hosts: hosts.len(),
            open_ports,
            services_breakdown: services,
            top_ports,
        }
    }

    /// Services by descending count, name ascending on ties.
    pub fn top_services(&self, n: usize) -> Vec<(&str, usize)> {
        let mut v: Vec<(&str, usize)> = self.services_breakdown.iter().map(|(k, c)| (k.as_str(), *c)).collect();
        v.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        v.truncate(n);
        v
    }
}

/// `12.3s`, `4.5m` or `1.2h`.
pub fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        format!("{:.1}m", secs / 60.0)
    } else {
        format!("{:.1}h", secs / 3600.0)
    }
}

/// `scan_<YYYYmmdd_HHMMSS>.<ext>`
pub fn default_output_filename(at: OffsetDateTime, format: ReportFormat) -> String {
    let stamp = at
        .format(format_description!("[year][month][day]_[hour][minute][second]"))
        .unwrap_or_else(|_| at.unix_timestamp().to_string());
    format!("scan_{}.{}", stamp, format.extension())
}
