//! Wall-clock bound around one engine run.

use crate::process::{CapturedOutput, EngineProcess, OutputTap};
use spectre_core::ScanError;
use std::process::ExitStatus;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Races the engine's output stream against a timer and a cancel token.
///
/// Holds no state between calls, so one value can bound any number of runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub limit: Duration,
    /// SIGTERM-to-SIGKILL delay used when the run is torn down.
    pub grace: Duration,
}

enum Stop {
    Expired,
    Cancelled,
}

impl Deadline {
    pub fn new(limit: Duration, grace: Duration) -> Self {
        Deadline { limit, grace }
    }

    /// Drain `process` unless the limit elapses or `cancel` fires first.
    ///
    /// Once the timer has fired the result is always `Timeout`, even if the engine
    /// exits in the same instant. The process group is confirmed dead before the error
    /// is returned; if the kill escalation is exhausted the result is `Execution` instead.
    pub async fn supervise(
        &self,
        process: &mut EngineProcess,
        tap: &mut dyn OutputTap,
        cancel: &CancellationToken,
    ) -> Result<CapturedOutput, ScanError> {
        let timer = tokio::time::sleep(self.limit);
        tokio::pin!(timer);

        let stop = tokio::select! {
            biased;
            _ = &mut timer => Stop::Expired,
            _ = cancel.cancelled() => Stop::Cancelled,
            res = process.drain(tap) => return res,
        };

        let pid = process.id();
        match stop {
            Stop::Expired => tracing::warn!(?pid, limit_ms = self.limit.as_millis() as u64, "deadline reached, terminating engine"),
            Stop::Cancelled => tracing::info!(?pid, "scan cancelled, terminating engine"),
        }
        let terminated = process.terminate(self.grace).await;
        Err(self.stop_error(stop, pid, terminated))
    }

    /// `Timeout`/`Interrupted` only once the group is known to be gone; a failed
    /// teardown is reported as `Execution` naming the pid so the survivor can be found.
    fn stop_error(&self, stop: Stop, pid: Option<u32>, terminated: Result<ExitStatus, ScanError>) -> ScanError {
        let reason = match stop {
            Stop::Expired => format!("deadline of {}s reached", self.limit.as_secs_f64()),
            Stop::Cancelled => "scan cancelled".to_string(),
        };
        match (terminated, stop) {
            (Ok(_), Stop::Expired) => ScanError::Timeout { after: self.limit },
            (Ok(_), Stop::Cancelled) => ScanError::Interrupted,
            (Err(e), _) => {
                tracing::error!(?pid, error = %e, "engine termination not confirmed");
                let pid = pid.map_or_else(|| "unknown".to_string(), |p| p.to_string());
                ScanError::execution(format!("{}, but engine (pid {}) could not be stopped: {}", reason, pid, e))
            }
        }
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::command::EngineCommand;
    use crate::process::{NullTap, RawOutputLine};
    use std::time::Instant;

    fn sh(script: &str) -> EngineProcess {
        EngineProcess::spawn(&EngineCommand::new("/bin/sh", ["-c", script])).unwrap()
    }

    /// Running and not a zombie.
    fn is_alive(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(')')
                .map(|(_, rest)| !rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn eventually_dead(pid: u32) -> bool {
        for _ in 0..40 {
            if !is_alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn completes_before_deadline() {
        let mut engine = sh("echo done");
        let deadline = Deadline::new(Duration::from_secs(10), Duration::from_millis(200));
        let out = deadline.supervise(&mut engine, &mut NullTap, &CancellationToken::new()).await.unwrap();
        assert!(out.status.success());
        assert_eq!(out.stdout, "done\n");
    }

    #[tokio::test]
    async fn inner_error_passes_through_unchanged() {
        let mut engine = sh("echo nope >&2; exit 3");
        let deadline = Deadline::new(Duration::from_secs(10), Duration::from_millis(200));
        let out = deadline.supervise(&mut engine, &mut NullTap, &CancellationToken::new()).await.unwrap();
        assert_eq!(out.status.code(), Some(3));
    }

    #[tokio::test]
    async fn sleeping_engine_times_out_on_schedule() {
        let mut engine = sh("sleep 10");
        let pid = engine.id().unwrap();
        let deadline = Deadline::new(Duration::from_secs(2), Duration::from_millis(500));
        let started = Instant::now();
        let err = deadline.supervise(&mut engine, &mut NullTap, &CancellationToken::new()).await.unwrap_err();
        let elapsed = started.elapsed();
        assert!(matches!(err, ScanError::Timeout { after } if after == Duration::from_secs(2)));
        assert!(elapsed >= Duration::from_secs(2), "returned early: {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(2500), "overhead too large: {:?}", elapsed);
        assert!(!is_alive(pid));
    }

    #[tokio::test]
    async fn grandchildren_are_killed_with_the_group() {
        let mut pids = Vec::new();
        let mut tap = |l: &RawOutputLine| {
            if let Ok(pid) = l.text.trim().parse::<u32>() {
                pids.push(pid);
            }
        };
        let mut engine = sh("sleep 30 & echo $!; wait");
        let leader = engine.id().unwrap();
        let deadline = Deadline::new(Duration::from_secs(1), Duration::from_millis(200));
        let err = deadline.supervise(&mut engine, &mut tap, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ScanError::Timeout { .. }));
        assert_eq!(pids.len(), 1, "grandchild pid not reported");
        assert!(!is_alive(leader));
        assert!(eventually_dead(pids[0]).await, "grandchild {} survived", pids[0]);
    }

    #[tokio::test]
    async fn term_ignoring_engine_gets_killed() {
        let mut engine = sh("trap '' TERM; sleep 10; sleep 10");
        let pid = engine.id().unwrap();
        let deadline = Deadline::new(Duration::from_millis(300), Duration::from_millis(300));
        let started = Instant::now();
        let err = deadline.supervise(&mut engine, &mut NullTap, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ScanError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!is_alive(pid));
    }

    #[tokio::test]
    async fn cancel_token_interrupts() {
        let mut engine = sh("sleep 10");
        let pid = engine.id().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let deadline = Deadline::new(Duration::from_secs(30), Duration::from_millis(200));
        let err = deadline.supervise(&mut engine, &mut NullTap, &cancel).await.unwrap_err();
        assert!(matches!(err, ScanError::Interrupted));
        assert!(!is_alive(pid));
    }

    #[test]
    fn unconfirmed_teardown_names_the_pid() {
        use std::os::unix::process::ExitStatusExt;
        let deadline = Deadline::new(Duration::from_secs(2), Duration::from_millis(200));
        let stuck = || Err(ScanError::execution("fake-nmap (pid Some(4242)) still running 5s after SIGKILL"));

        let err = deadline.stop_error(Stop::Expired, Some(4242), stuck());
        match &err {
            ScanError::Execution { message, .. } => {
                assert!(message.contains("pid 4242"), "{}", message);
                assert!(message.contains("deadline"), "{}", message);
            }
            other => panic!("unexpected {:?}", other),
        }
        let err = deadline.stop_error(Stop::Cancelled, None, stuck());
        assert!(matches!(err, ScanError::Execution { ref message, .. } if message.contains("pid unknown")));

        let reaped = ExitStatus::from_raw(9);
        assert!(matches!(deadline.stop_error(Stop::Expired, Some(1), Ok(reaped)), ScanError::Timeout { .. }));
        assert!(matches!(deadline.stop_error(Stop::Cancelled, Some(1), Ok(reaped)), ScanError::Interrupted));
    }

    #[tokio::test]
    async fn reusable_after_timeout() {
        let deadline = Deadline::new(Duration::from_millis(200), Duration::from_millis(100));
        let mut slow = sh("sleep 5");
        assert!(deadline.supervise(&mut slow, &mut NullTap, &CancellationToken::new()).await.is_err());
        let mut fast = sh("echo ok");
        let out = deadline.supervise(&mut fast, &mut NullTap, &CancellationToken::new()).await.unwrap();
        assert_eq!(out.stdout, "ok\n");
    }
}
