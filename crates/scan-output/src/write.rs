use crate::models::{ReportFormat, ScanMetadata, ScanSummary};
use anyhow::{Context, Result};
use serde::Serialize;
use spectre_core::ScanResultRow;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct JsonReport<'a> {
    metadata: &'a ScanMetadata,
    summary: &'a ScanSummary,
    results: &'a [ScanResultRow],
}

/// Append `.<ext>` unless the path already ends with it.
pub fn with_extension(path: &Path, format: ReportFormat) -> PathBuf {
    let ext = format.extension();
    match path.extension().and_then(|e| e.to_str()) {
        Some(e) if e.eq_ignore_ascii_case(ext) => path.to_path_buf(),
        _ => {
            let mut s = path.as_os_str().to_os_string();
            s.push(".");
            s.push(ext);
            PathBuf::from(s)
        }
    }
}

/// `<dir>/<stem>_metadata.json` for a report at `path`.
pub fn metadata_path(path: &Path) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "scan".to_string());
    path.with_file_name(format!("{}_metadata.json", stem))
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    Ok(BufWriter::new(f))
}

/// Write rows as CSV plus the metadata sidecar. Returns the report path actually used.
pub fn write_csv(path: &Path, metadata: &ScanMetadata, rows: &[ScanResultRow]) -> Result<PathBuf> {
    let path = with_extension(path, ReportFormat::Csv);
    let mut wtr = csv::Writer::from_writer(create(&path)?);
    if rows.is_empty() {
        wtr.write_record(CSV_HEADER)?;
    }
    for r in rows {
        wtr.serialize(r)?;
    }
    wtr.flush()?;

    let sidecar = metadata_path(&path);
    let mut w = create(&sidecar)?;
    serde_json::to_writer_pretty(&mut w, metadata)?;
    writeln!(w)?;
    w.flush()?;
    tracing::info!(path = %path.display(), metadata = %sidecar.display(), rows = rows.len(), "csv report written");
    Ok(path)
}

pub fn write_json(path: &Path, metadata: &ScanMetadata, summary: &ScanSummary, rows: &[ScanResultRow]) -> Result<PathBuf> {
    let path = with_extension(path, ReportFormat::Json);
    let mut w = create(&path)?;
    serde_json::to_writer_pretty(&mut w, &JsonReport { metadata, summary, results: rows })?;
    writeln!(w)?;
    w.flush()?;
    tracing::info!(path = %path.display(), rows = rows.len(), "json report written");
    Ok(path)
}

pub fn write_report(
    path: &Path,
    format: ReportFormat,
    metadata: &ScanMetadata,
    summary: &ScanSummary,
    rows: &[ScanResultRow],
) -> Result<PathBuf> {
    match format {
        ReportFormat::Csv => write_csv(path, metadata, rows),
        ReportFormat::Json => write_json(path, metadata, summary, rows),
    }
}

/// Column order of the CSV report.
pub const CSV_HEADER: [&str; 10] =
    ["timestamp", "scan_id", "target_ip", "hostname", "port", "protocol", "service", "version", "product", "os_guess"];
