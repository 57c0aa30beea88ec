//! Engine child process: spawn in its own process group, stream output lines, reap or kill.

use crate::command::EngineCommand;
use spectre_core::ScanError;
use std::collections::VecDeque;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

const LINE_BUFFER: usize = 256;
const TAIL_LINES: usize = 40;
/// Upper bound on waiting for a SIGKILLed process to be reaped.
const REAP_LIMIT: Duration = Duration::from_secs(5);

const PRIVILEGE_MARKERS: &[&str] = &[
    "requires root privileges",
    "Operation not permitted",
    "you need to be root",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of engine output, numbered in arrival order across both streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutputLine {
    pub seq: u64,
    pub stream: OutputStream,
    pub text: String,
}

/// Read-only observer called for every output line before it is buffered.
pub trait OutputTap: Send {
    fn observe(&mut self, line: &RawOutputLine);
}

impl<F> OutputTap for F
where
    F: FnMut(&RawOutputLine) + Send,
{
    fn observe(&mut self, line: &RawOutputLine) {
        (self)(line)
    }
}

/// Tap that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTap;

impl OutputTap for NullTap {
    fn observe(&mut self, _line: &RawOutputLine) {}
}

/// Everything the engine produced, available once its output streams have closed.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    /// Full stdout, newline-joined, in emission order.
    pub stdout: String,
    /// Last lines of combined output, for diagnostics.
    pub tail: Vec<String>,
}

impl CapturedOutput {
    pub fn diagnostics(&self) -> String {
        self.tail.join("\n")
    }

    /// Map a failed exit to the matching error kind.
    pub fn check(&self, program: &str) -> Result<(), ScanError> {
        if self.status.success() {
            return Ok(());
        }
        if let Some(line) = self.tail.iter().find(|l| PRIVILEGE_MARKERS.iter().any(|m| l.contains(m))) {
            return Err(ScanError::PermissionDenied { detail: line.trim().to_string() });
        }
        Err(ScanError::execution_with(format!("{} exited with {}", program, self.status), self.diagnostics()))
    }
}

#[derive(Default)]
struct Collected {
    stdout: String,
    tail: VecDeque<String>,
}

pub struct EngineProcess {
    program: String,
    child: Child,
    pid: Option<u32>,
    lines: mpsc::Receiver<(OutputStream, String)>,
    next_seq: u64,
    collected: Collected,
    reaped: bool,
}

impl EngineProcess {
    /// Start the engine as leader of a fresh process group with piped stdout/stderr.
    pub fn spawn(cmd: &EngineCommand) -> Result<Self, ScanError> {
        let mut std_cmd = std::process::Command::new(&cmd.program);
        std_cmd.args(&cmd.args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }
        let mut command = Command::from(std_cmd);
        command.kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| spawn_error(&cmd.program, e))?;
        let pid = child.id();
        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        if let Some(out) = child.stdout.take() {
            tokio::spawn(forward(out, OutputStream::Stdout, tx.clone()));
        }
        if let Some(err) = child.stderr.take() {
            tokio::spawn(forward(err, OutputStream::Stderr, tx));
        }
        tracing::debug!(program = %cmd.program, ?pid, "engine started");
        Ok(EngineProcess {
            program: cmd.program.clone(),
            child,
            pid,
            lines: rx,
            next_seq: 0,
            collected: Collected::default(),
            reaped: false,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Read lines until both streams close, then reap the process.
    ///
    /// Cancel-safe: lines read before the future is dropped stay buffered.
    pub async fn drain(&mut self, tap: &mut dyn OutputTap) -> Result<CapturedOutput, ScanError> {
        while let Some((stream, text)) = self.lines.recv().await {
            let line = RawOutputLine { seq: self.next_seq, stream, text };
            self.next_seq += 1;
            tap.observe(&line);
            if stream == OutputStream::Stdout {
                self.collected.stdout.push_str(&line.text);
                self.collected.stdout.push('\n');
            }
            if self.collected.tail.len() == TAIL_LINES {
                self.collected.tail.pop_front();
            }
            self.collected.tail.push_back(line.text);
        }
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| ScanError::execution(format!("waiting for {}: {}", self.program, e)))?;
        self.reaped = true;
        tracing::debug!(program = %self.program, %status, lines = self.next_seq, "engine exited");
        let collected = std::mem::take(&mut self.collected);
        Ok(CapturedOutput { status, stdout: collected.stdout, tail: collected.tail.into() })
    }

    /// Stop the whole process group: SIGTERM, up to `grace` to exit, then SIGKILL.
    /// Returns only once the leader has been reaped or the reap limit ran out.
    pub async fn terminate(&mut self, grace: Duration) -> Result<ExitStatus, ScanError> {
        self.signal_group(Termination::Polite);
        let exited = matches!(tokio::time::timeout(grace, self.child.wait()).await, Ok(Ok(_)));
        if !exited {
            tracing::warn!(pid = ?self.pid, "engine ignored SIGTERM, escalating");
        }
        // Also sweeps descendants that outlived the leader.
        self.signal_group(Termination::Forced);
        match tokio::time::timeout(REAP_LIMIT, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.reaped = true;
                Ok(status)
            }
            Ok(Err(e)) => Err(ScanError::execution(format!("waiting for {}: {}", self.program, e))),
            Err(_) => Err(ScanError::execution(format!(
                "{} (pid {:?}) still running {}s after SIGKILL",
                self.program,
                self.pid,
                REAP_LIMIT.as_secs()
            ))),
        }
    }

    #[cfg(unix)]
    fn signal_group(&mut self, how: Termination) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else { return };
        let sig = match how {
            Termination::Polite => Signal::SIGTERM,
            Termination::Forced => Signal::SIGKILL,
        };
        // ESRCH once the whole group is gone.
        if let Err(e) = killpg(Pid::from_raw(pid as i32), sig) {
            tracing::trace!(pid, ?sig, error = %e, "killpg");
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&mut self, _how: Termination) {
        let _ = self.child.start_kill();
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        if !self.reaped {
            // kill_on_drop covers the leader only.
            self.signal_group(Termination::Forced);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Termination {
    Polite,
    Forced,
}

fn spawn_error(program: &str, e: io::Error) -> ScanError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => {
            ScanError::PermissionDenied { detail: format!("cannot execute {}: {}", program, e) }
        }
        _ => ScanError::execution(format!("failed to start {}: {}", program, e)),
    }
}

async fn forward<R>(reader: R, stream: OutputStream, tx: mpsc::Sender<(OutputStream, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf).trim_end_matches(&['\r', '\n'][..]).to_string();
                if tx.send((stream, text)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(?stream, error = %e, "engine output read failed");
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> EngineCommand {
        EngineCommand::new("/bin/sh", ["-c", script])
    }

    async fn run(script: &str) -> (CapturedOutput, Vec<RawOutputLine>) {
        let mut seen = Vec::new();
        let mut tap = |l: &RawOutputLine| seen.push(l.clone());
        let mut engine = EngineProcess::spawn(&sh(script)).unwrap();
        let out = engine.drain(&mut tap).await.unwrap();
        (out, seen)
    }

    #[tokio::test]
    async fn stdout_is_collected_in_order() {
        let (out, seen) = run("printf 'one\\ntwo\\r\\nthree'; echo warn >&2").await;
        assert!(out.status.success());
        assert_eq!(out.stdout, "one\ntwo\nthree\n");
        let seqs: Vec<u64> = seen.iter().map(|l| l.seq).collect();
        assert_eq!(seqs, (0..seen.len() as u64).collect::<Vec<_>>());
        let stdout: Vec<&str> = seen.iter().filter(|l| l.stream == OutputStream::Stdout).map(|l| l.text.as_str()).collect();
        assert_eq!(stdout, vec!["one", "two", "three"]);
        assert!(seen.iter().any(|l| l.stream == OutputStream::Stderr && l.text == "warn"));
        assert!(out.check("sh").is_ok());
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced() {
        let (out, _) = run("printf '\\377abc\\n'").await;
        assert_eq!(out.stdout, "\u{FFFD}abc\n");
    }

    #[tokio::test]
    async fn nonzero_exit_is_execution_error_with_tail() {
        let (out, _) = run("echo 'Failed to resolve \"nope\".' >&2; exit 1").await;
        match out.check("nmap") {
            Err(ScanError::Execution { message, diagnostics }) => {
                assert!(message.starts_with("nmap exited with"));
                assert!(diagnostics.contains("Failed to resolve"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn root_requirement_is_permission_denied() {
        let (out, _) = run("echo 'TCP/IP fingerprinting (for OS scan) requires root privileges.' >&2; echo 'QUITTING!' >&2; exit 1").await;
        assert!(matches!(out.check("nmap"), Err(ScanError::PermissionDenied { .. })));
    }

    #[tokio::test]
    async fn tail_is_bounded() {
        let (out, _) = run("i=0; while [ $i -lt 100 ]; do echo line$i; i=$((i+1)); done").await;
        assert_eq!(out.tail.len(), TAIL_LINES);
        assert_eq!(out.tail.last().map(String::as_str), Some("line99"));
    }

    #[tokio::test]
    async fn missing_binary_fails_to_start() {
        let err = EngineProcess::spawn(&EngineCommand::new("/nonexistent/engine-binary", Vec::<String>::new())).err().unwrap();
        assert!(matches!(err, ScanError::Execution { .. }));
        assert!(err.to_string().contains("failed to start"));
    }

    #[tokio::test]
    async fn terminate_signals_the_group() {
        use std::os::unix::process::ExitStatusExt;
        let mut engine = EngineProcess::spawn(&sh("sleep 30")).unwrap();
        let status = engine.terminate(Duration::from_secs(2)).await.unwrap();
        assert_eq!(status.signal(), Some(15));
    }

    #[tokio::test]
    async fn terminate_after_exit_is_harmless() {
        let mut engine = EngineProcess::spawn(&sh("exit 0")).unwrap();
        let out = engine.drain(&mut NullTap).await.unwrap();
        assert!(out.status.success());
        let status = engine.terminate(Duration::from_millis(100)).await.unwrap();
        assert!(status.success());
    }
}
