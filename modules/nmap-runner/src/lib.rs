//! Runs nmap against one target and turns its output into result rows.
//!
//! [`NmapScanner::run`] spawns the engine in its own process group, feeds every
//! output line to a tap (progress reporting) and buffers stdout. The wait is
//! bounded by the request deadline; parsing happens afterwards on the captured
//! text and is not subject to it.

pub mod command;
pub mod deadline;
pub mod process;
pub mod progress;

pub use command::{EngineCommand, EngineOptions};
pub use deadline::Deadline;
pub use process::{CapturedOutput, EngineProcess, NullTap, OutputStream, OutputTap, RawOutputLine};
pub use progress::{ProgressSample, ProgressTracker};

use nmap_report::{flatten, parse_output, ReportSource, RowContext, ScanInfo};
use spectre_core::{PortSpec, ScanError, ScanRequest, ScanResultRow, Target};
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

/// Everything one completed scan produced.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub scan_id: String,
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
    pub info: ScanInfo,
    /// Hosts in the parsed report, including those without open ports.
    pub hosts_scanned: usize,
    pub source: ReportSource,
    pub degraded: bool,
    pub rows: Vec<ScanResultRow>,
}

pub fn scan_id_for(at: OffsetDateTime) -> String {
    at.format(format_description!("[year][month][day]_[hour][minute][second]"))
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

#[derive(Debug, Clone, Default)]
pub struct NmapScanner {
    opts: EngineOptions,
}

impl NmapScanner {
    pub fn new(opts: EngineOptions) -> Self {
        NmapScanner { opts }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.opts
    }

    /// Run one scan to completion, timeout or cancellation.
    pub async fn run(
        &self,
        request: &ScanRequest,
        tap: &mut dyn OutputTap,
        cancel: CancellationToken,
    ) -> Result<ScanOutcome, ScanError> {
        let started_at = OffsetDateTime::now_utc();
        let scan_id = scan_id_for(started_at);
        let cmd = EngineCommand::for_request(request, &self.opts);
        tracing::info!(%scan_id, scan_target = %request.target(), ports = %request.ports(), "starting scan");
        tracing::debug!(%scan_id, command = %cmd, "engine command");

        let clock = Instant::now();
        let mut engine = EngineProcess::spawn(&cmd)?;
        let deadline = Deadline::new(request.deadline(), self.opts.kill_grace);
        let captured = deadline.supervise(&mut engine, tap, &cancel).await?;
        captured.check(&self.opts.program)?;
        let finished_at = OffsetDateTime::now_utc();

        let parsed = parse_output(&captured.stdout);
        let timestamp = finished_at.format(&Rfc3339).unwrap_or_else(|_| String::new());
        let rows = flatten(&parsed.report.hosts, &RowContext { scan_id: &scan_id, timestamp: &timestamp });
        tracing::info!(
            %scan_id,
            hosts = parsed.report.hosts.len(),
            services = rows.len(),
            degraded = parsed.is_degraded(),
            elapsed_ms = clock.elapsed().as_millis() as u64,
            "scan finished"
        );

        Ok(ScanOutcome {
            scan_id,
            started_at,
            finished_at,
            hosts_scanned: parsed.report.hosts.len(),
            degraded: parsed.is_degraded(),
            source: parsed.source,
            info: parsed.report.info,
            rows,
        })
    }
}

/// Scan `target` with the default engine options. All-or-nothing: either every row
/// or one error.
pub async fn scan(target: &str, ports: &str, timeout: Duration, rate_limit: u32) -> Result<Vec<ScanResultRow>, ScanError> {
    let request = ScanRequest::new(Target::from(target), PortSpec::parse(ports), timeout)?.with_rate_limit(rate_limit);
    let mut progress = ProgressTracker::new();
    let outcome = NmapScanner::default().run(&request, &mut progress, CancellationToken::new()).await?;
    Ok(outcome.rows)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    const FAKE_XML: &str = r#"cat <<'EOF'
<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap" args="nmap -oX - 10.0.0.5" start="1700000000" version="7.94">
<taskprogress task="SYN Stealth Scan" percent="12.50" remaining="10"/>
<taskprogress task="SYN Stealth Scan" percent="55.00" remaining="5"/>
<taskprogress task="Service scan" percent="20.00" remaining="5"/>
<host><status state="up"/><address addr="10.0.0.5" addrtype="ipv4"/>
<hostnames><hostname name="box.lan" type="PTR"/></hostnames>
<ports>
<port protocol="tcp" portid="22"><state state="open"/><service name="ssh" product="OpenSSH" version="8.2"/></port>
<port protocol="tcp" portid="23"><state state="closed"/></port>
</ports>
<os><osmatch name="Linux 5.X" accuracy="97"/></os>
</host>
<host><status state="up"/><address addr="10.0.0.6" addrtype="ipv4"/><ports/></host>
<runstats><finished elapsed="3.10" exit="success"/><hosts up="2" down="0" total="2"/></runstats>
</nmaprun>
EOF
echo 'Nmap done: 1 IP address' >&2"#;

    fn fake(script: &str) -> NmapScanner {
        NmapScanner::new(EngineOptions {
            program: "fake-nmap".into(),
            launcher: vec!["/bin/sh".into(), "-c".into(), script.into()],
            kill_grace: Duration::from_millis(200),
            ..EngineOptions::default()
        })
    }

    fn request(secs: u64) -> ScanRequest {
        ScanRequest::new("10.0.0.5", "top1000", Duration::from_secs(secs)).unwrap()
    }

    #[test]
    fn scan_id_shape() {
        let at = time::macros::datetime!(2024-03-05 07:08:09 UTC);
        assert_eq!(scan_id_for(at), "20240305_070809");
    }

    #[tokio::test]
    async fn structured_run_produces_rows_and_progress() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_c = seen.clone();
        let mut tracker = ProgressTracker::with_sink(move |s| seen_c.lock().unwrap().push(s.percent));
        let outcome = fake(FAKE_XML).run(&request(10), &mut tracker, CancellationToken::new()).await.unwrap();

        assert!(!outcome.degraded);
        assert_eq!(outcome.source, ReportSource::Structured);
        assert_eq!(outcome.hosts_scanned, 2);
        assert_eq!(outcome.rows.len(), 1);
        let row = &outcome.rows[0];
        assert_eq!(row.target_ip, "10.0.0.5");
        assert_eq!(row.hostname.as_deref(), Some("box.lan"));
        assert_eq!(row.port, "22");
        assert_eq!(row.os_guess.as_deref(), Some("Linux 5.X"));
        assert_eq!(row.scan_id, outcome.scan_id);
        assert_eq!(outcome.info.exit.as_deref(), Some("success"));
        assert!(outcome.finished_at >= outcome.started_at);
        assert_eq!(*seen.lock().unwrap(), vec![12.5, 55.0]);
    }

    #[tokio::test]
    async fn truncated_report_falls_back() {
        let script = "printf '<nmaprun scanner=\"nmap\">\\n<host><address addr=\"10.0.0.5\" addrtype=\"ipv4\"/>\\nNmap scan report for 10.0.0.5\\n22/tcp open ssh OpenSSH 8.2\\n'";
        let outcome = fake(script).run(&request(10), &mut NullTap, CancellationToken::new()).await.unwrap();
        assert!(outcome.degraded);
        assert_eq!(outcome.source, ReportSource::Fallback);
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rows[0].service.as_deref(), Some("ssh"));
        assert_eq!(outcome.rows[0].os_guess, None);
    }

    #[tokio::test]
    async fn empty_scan_is_not_an_error() {
        let script = "echo '<nmaprun scanner=\"nmap\"><runstats><hosts up=\"0\" down=\"1\" total=\"1\"/></runstats></nmaprun>'";
        let outcome = fake(script).run(&request(10), &mut NullTap, CancellationToken::new()).await.unwrap();
        assert!(outcome.rows.is_empty());
        assert_eq!(outcome.hosts_scanned, 0);
        assert_eq!(outcome.info.hosts_down, Some(1));
    }

    #[tokio::test]
    async fn root_requirement_surfaces_as_permission_denied() {
        let script = "echo 'TCP/IP fingerprinting (for OS scan) requires root privileges.' >&2; exit 1";
        let err = fake(script).run(&request(10), &mut NullTap, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ScanError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn engine_failure_names_the_program() {
        let err = fake("echo 'Failed to resolve \"nope\".' >&2; exit 2")
            .run(&request(10), &mut NullTap, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("fake-nmap exited with"));
    }

    #[tokio::test]
    async fn hung_engine_times_out() {
        let err = fake("sleep 20").run(&request(1), &mut NullTap, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ScanError::Timeout { .. }));
    }

    #[tokio::test]
    async fn cancelled_before_start_is_interrupted() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fake("sleep 20").run(&request(10), &mut NullTap, cancel).await.unwrap_err();
        assert!(matches!(err, ScanError::Interrupted));
    }
}
