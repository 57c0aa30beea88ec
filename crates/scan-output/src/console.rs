use crate::models::{ScanMetadata, ScanSummary};
use std::fmt::Write as _;
use std::path::Path;

const CONSOLE_TOP: usize = 5;

/// Human-readable end-of-scan summary.
pub fn render_summary(metadata: &ScanMetadata, summary: &ScanSummary, saved_to: Option<&Path>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Scan completed: {}", metadata.target);
    let _ = writeln!(out, "  Duration:        {}", metadata.duration_human);
    let _ = writeln!(out, "  Hosts scanned:   {}", metadata.total_hosts_scanned);
    let _ = writeln!(out, "  Services found:  {}", metadata.total_services_found);
    if !summary.top_ports.is_empty() {
        let ports: Vec<String> = summary.top_ports.iter().take(CONSOLE_TOP).map(|p| format!("{} ({})", p.port, p.count)).collect();
        let _ = writeln!(out, "  Top ports:       {}", ports.join(", "));
    }
    let services = summary.top_services(CONSOLE_TOP);
    if !services.is_empty() {
        let names: Vec<String> = services.iter().map(|(name, n)| format!("{} ({})", name, n)).collect();
        let _ = writeln!(out, "  Top services:    {}", names.join(", "));
    }
    if let Some(p) = saved_to {
        let _ = writeln!(out, "  Results saved to: {}", p.display());
    }
    out
}

pub fn print_summary(metadata: &ScanMetadata, summary: &ScanSummary, saved_to: Option<&Path>) {
    print!("{}", render_summary(metadata, summary, saved_to));
}
