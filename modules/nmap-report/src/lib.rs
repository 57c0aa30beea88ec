//! Turns captured nmap output into a host/port tree and flattens it into result rows.
//!
//! The XML report is the primary source. When it is missing or malformed (a killed
//! engine leaves a truncated document behind) the same text is re-read line by line
//! with [`parse_text`]. That fallback cannot recover OS guesses or product details.

mod rows;
mod text;
mod xml;

pub use rows::{flatten, RowContext};
pub use text::parse_text;
pub use xml::{parse_xml, REPORT_START};

/// Scan metadata taken from the `<nmaprun>` root and its `<runstats>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanInfo {
    pub scanner: Option<String>,
    pub args: Option<String>,
    pub version: Option<String>,
    pub start: Option<String>,
    pub elapsed: Option<String>,
    pub summary: Option<String>,
    pub exit: Option<String>,
    pub hosts_up: Option<u32>,
    pub hosts_down: Option<u32>,
    pub hosts_total: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRecord {
    pub port: String,
    pub protocol: String,
    pub state: String,
    pub service: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
}

impl PortRecord {
    pub fn is_open(&self) -> bool {
        self.state == "open"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    pub ip: String,
    pub hostname: Option<String>,
    pub state: Option<String>,
    pub os_guess: Option<String>,
    pub ports: Vec<PortRecord>,
}

impl HostRecord {
    pub fn open_ports(&self) -> impl Iterator<Item = &PortRecord> {
        self.ports.iter().filter(|p| p.is_open())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NmapReport {
    pub info: ScanInfo,
    pub hosts: Vec<HostRecord>,
}

impl NmapReport {
    pub fn open_port_count(&self) -> usize {
        self.hosts.iter().map(|h| h.open_ports().count()).sum()
    }
}

/// Result of the structured parse. `Malformed` is an expected outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Parsed(NmapReport),
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSource {
    Structured,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedScan {
    pub report: NmapReport,
    pub source: ReportSource,
    /// Why the structured parse was abandoned, when it was.
    pub degraded: Option<String>,
}

impl ParsedScan {
    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// Settle a structured parse outcome, re-reading `raw` as text when it was malformed.
pub fn resolve(outcome: ParseOutcome, raw: &str) -> ParsedScan {
    match outcome {
        ParseOutcome::Parsed(report) => ParsedScan { report, source: ReportSource::Structured, degraded: None },
        ParseOutcome::Malformed(reason) => {
            let hosts = parse_text(raw);
            tracing::warn!(%reason, hosts = hosts.len(), "structured output unusable, used text fallback");
            ParsedScan {
                report: NmapReport { info: ScanInfo::default(), hosts },
                source: ReportSource::Fallback,
                degraded: Some(reason),
            }
        }
    }
}

/// Parse captured engine output: XML first, text fallback second.
pub fn parse_output(raw: &str) -> ParsedScan {
    resolve(parse_xml(raw), raw)
}
