use spectre_core::ScanError;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

pub const CHECK_LIMIT: Duration = Duration::from_secs(10);

/// Confirm the engine is runnable. Returns the first line of `<program> --version`.
pub async fn check_nmap(program: &str, limit: Duration) -> Result<String, ScanError> {
    let tool = tool_name(program);
    let mut cmd = Command::new(program);
    cmd.arg("--version").stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
    let output = match tokio::time::timeout(limit, cmd.output()).await {
        Ok(Ok(out)) => out,
        Ok(Err(e)) => return Err(ScanError::dependency_missing(tool, format!("cannot run {}: {}", program, e))),
        Err(_) => {
            return Err(ScanError::dependency_missing(tool, format!("{} --version did not finish within {}s", program, limit.as_secs())))
        }
    };
    if !output.status.success() {
        return Err(ScanError::dependency_missing(tool, format!("{} --version exited with {}", program, output.status)));
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let version = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or_default().to_string();
    tracing::debug!(%program, %version, "engine available");
    Ok(version)
}

fn tool_name(program: &str) -> String {
    std::path::Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string())
}
