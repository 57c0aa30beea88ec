use anyhow::{anyhow, Result};
use nmap_runner::EngineOptions;
use scan_output::ReportFormat;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG: &str = "spectre.yaml";
const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_RATE: u32 = 1000;

/// `scan:` section. Every key is optional; the same shape carries CLI overrides.
#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ScanConfig {
    pub ports: Option<String>,
    pub timeout_secs: Option<u64>,
    pub rate: Option<u32>,
    pub format: Option<String>,
    pub nmap_path: Option<String>,
    pub os_detection: Option<bool>,
    pub service_detection: Option<bool>,
    pub stats_every_secs: Option<u64>,
    pub kill_grace_ms: Option<u64>,
    pub extra_args: Option<Vec<String>>,
}

impl ScanConfig {
    /// Fill every unset key of `self` from `lower`.
    pub fn or(self, lower: ScanConfig) -> ScanConfig {
        ScanConfig {
            ports: self.ports.or(lower.ports),
            timeout_secs: self.timeout_secs.or(lower.timeout_secs),
            rate: self.rate.or(lower.rate),
            format: self.format.or(lower.format),
            nmap_path: self.nmap_path.or(lower.nmap_path),
            os_detection: self.os_detection.or(lower.os_detection),
            service_detection: self.service_detection.or(lower.service_detection),
            stats_every_secs: self.stats_every_secs.or(lower.stats_every_secs),
            kill_grace_ms: self.kill_grace_ms.or(lower.kill_grace_ms),
            extra_args: self.extra_args.or(lower.extra_args),
        }
    }
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    pub scan: Option<ScanConfig>,
}

/// Load `path`, or `./spectre.yaml` when no path is given and the file exists.
/// A missing default file is not an error; an explicit one that cannot be read is.
pub fn load_config(path: Option<&Path>) -> Result<Option<Config>> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => {
            let p = Path::new(DEFAULT_CONFIG);
            if p.exists() { (p.to_path_buf(), false) } else { return Ok(None); }
        }
    };
    let s = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if !explicit => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable config");
            return Ok(None);
        }
        Err(e) => return Err(anyhow!("reading {}: {}", path.display(), e)),
    };
    let cfg: Config = serde_yaml::from_str(&s).map_err(|e| anyhow!("parsing {}: {}", path.display(), e))?;
    tracing::debug!(path = %path.display(), "config loaded");
    Ok(Some(cfg))
}

/// Fully resolved scan settings: CLI over config file over built-in defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub ports: String,
    pub timeout: Duration,
    pub rate: u32,
    pub format: ReportFormat,
    pub engine: EngineOptions,
}

impl Settings {
    pub fn resolve(cli: ScanConfig, file: Option<ScanConfig>) -> Result<Settings> {
        let merged = cli.or(file.unwrap_or_default());
        let format = match merged.format.as_deref() {
            None => ReportFormat::Csv,
            Some(f) => ReportFormat::parse(f).ok_or_else(|| anyhow!("unknown output format '{}' (expected csv or json)", f))?,
        };
        let defaults = EngineOptions::default();
        let engine = EngineOptions {
            program: merged.nmap_path.unwrap_or(defaults.program),
            os_detection: merged.os_detection.unwrap_or(defaults.os_detection),
            service_detection: merged.service_detection.unwrap_or(defaults.service_detection),
            stats_every: merged.stats_every_secs.map(Duration::from_secs).unwrap_or(defaults.stats_every),
            kill_grace: merged.kill_grace_ms.map(Duration::from_millis).unwrap_or(defaults.kill_grace),
            extra_args: merged.extra_args.unwrap_or_default(),
            ..defaults
        };
        Ok(Settings {
            ports: merged.ports.unwrap_or_else(|| spectre_core::PortSpec::DEFAULT.to_string()),
            timeout: Duration::from_secs(merged.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            rate: merged.rate.unwrap_or(DEFAULT_RATE),
            format,
            engine,
        })
    }
}
