//! Core types shared by the spectre crates: scan requests, result rows and the error taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub mod error;

pub use error::ScanError;

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Target string as given by the user (IP, CIDR block or hostname).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target(pub String);

impl Target {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Target(s.trim().to_string())
    }
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        Target(s.trim().to_string())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Port selection handed to the engine.
///
/// `top1000` is the sentinel for the engine's own default port set. Other
/// explicit specs are not validated here; the engine rejects malformed ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSpec {
    DefaultTop,
    Top(u32),
    All,
    Explicit(String),
}

impl PortSpec {
    pub const DEFAULT: &'static str = "top1000";

    pub fn parse(spec: &str) -> Self {
        let s = spec.trim();
        let lower = s.to_ascii_lowercase();
        if lower.is_empty() || lower == Self::DEFAULT {
            return PortSpec::DefaultTop;
        }
        if lower == "all" {
            return PortSpec::All;
        }
        if let Some(n) = lower.strip_prefix("top") {
            if let Ok(n) = n.trim().parse::<u32>() {
                return match n {
                    1000 => PortSpec::DefaultTop,
                    n => PortSpec::Top(n),
                };
            }
        }
        PortSpec::Explicit(s.to_string())
    }
}

impl From<&str> for PortSpec {
    fn from(s: &str) -> Self {
        PortSpec::parse(s)
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSpec::DefaultTop => f.write_str(Self::DEFAULT),
            PortSpec::Top(n) => write!(f, "top{}", n),
            PortSpec::All => f.write_str("all"),
            PortSpec::Explicit(s) => f.write_str(s),
        }
    }
}

/// One scan invocation. Built once by the caller and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    target: Target,
    ports: PortSpec,
    deadline: Duration,
    rate_limit: Option<u32>,
}

impl ScanRequest {
    pub fn new(target: impl Into<Target>, ports: impl Into<PortSpec>, deadline: Duration) -> Result<Self, ScanError> {
        let target = target.into();
        if target.0.is_empty() {
            return Err(ScanError::invalid_target("", "target must not be empty"));
        }
        Ok(ScanRequest { target, ports: ports.into(), deadline, rate_limit: None })
    }

    /// Advisory packets-per-second hint forwarded to the engine. Zero clears it.
    pub fn with_rate_limit(mut self, rate: u32) -> Self {
        self.rate_limit = if rate == 0 { None } else { Some(rate) };
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn ports(&self) -> &PortSpec {
        &self.ports
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn rate_limit(&self) -> Option<u32> {
        self.rate_limit
    }
}

/// Flattened, serialization-ready result: one row per (host, open port).
///
/// Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResultRow {
    pub timestamp: String,
    pub scan_id: String,
    pub target_ip: String,
    pub hostname: Option<String>,
    pub port: String,
    pub protocol: String,
    pub service: Option<String>,
    pub version: Option<String>,
    pub product: Option<String>,
    pub os_guess: Option<String>,
}
