use std::time::Duration;
use thiserror::Error;

/// Failure kinds surfaced to the caller of a scan. Every kind maps to its own exit status.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("permission denied: {detail}")]
    PermissionDenied { detail: String },

    #[error("{tool} is not installed or not runnable: {detail}")]
    DependencyMissing { tool: String, detail: String },

    #[error("invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("scan failed: {message}")]
    Execution { message: String, diagnostics: String },

    #[error("scan timed out after {}s", .after.as_secs_f64())]
    Timeout { after: Duration },

    #[error("scan cancelled by user")]
    Interrupted,
}

impl ScanError {
    pub fn invalid_target(target: impl Into<String>, reason: impl Into<String>) -> Self {
        ScanError::InvalidTarget { target: target.into(), reason: reason.into() }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        ScanError::Execution { message: message.into(), diagnostics: String::new() }
    }

    pub fn execution_with(message: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        ScanError::Execution { message: message.into(), diagnostics: diagnostics.into() }
    }

    pub fn dependency_missing(tool: impl Into<String>, detail: impl Into<String>) -> Self {
        ScanError::DependencyMissing { tool: tool.into(), detail: detail.into() }
    }

    /// Process exit status for this kind. An interrupt is a clean exit.
    pub fn exit_code(&self) -> i32 {
        match self {
            ScanError::Execution { .. } => 1,
            ScanError::InvalidTarget { .. } => 2,
            ScanError::DependencyMissing { .. } => 3,
            ScanError::PermissionDenied { .. } => 4,
            ScanError::Timeout { .. } => 5,
            ScanError::Interrupted => 0,
        }
    }

    /// Remediation text shown under the error message, if any.
    pub fn hint(&self) -> Option<String> {
        match self {
            ScanError::PermissionDenied { .. } => Some(
                "OS fingerprinting and raw scans need root privileges; retry with elevated privileges (e.g. sudo) or pass --no-os".to_string(),
            ),
            ScanError::DependencyMissing { tool, .. } => Some(format!(
                "install {tool} first:\n  Ubuntu/Debian: sudo apt-get install {tool}\n  MacOS: brew install {tool}\n  RHEL/CentOS: sudo yum install {tool}"
            )),
            ScanError::Timeout { .. } => Some("retry with a larger --timeout".to_string()),
            _ => None,
        }
    }
}
