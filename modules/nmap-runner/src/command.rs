//! Builds the engine invocation for one scan request.

use spectre_core::{PortSpec, ScanRequest};
use std::fmt;
use std::time::Duration;

/// How the engine is launched. Defaults ask for XML on stdout with version and OS detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Engine binary (name on PATH or absolute path).
    pub program: String,
    /// Wrapper command placed in front of the engine, e.g. `sudo -n` or `nice -n 10`.
    pub launcher: Vec<String>,
    pub service_detection: bool,
    pub os_detection: bool,
    pub verbose: bool,
    /// Interval for the engine's `<taskprogress>` reports.
    pub stats_every: Duration,
    /// Extra flags appended after the generated ones, in order.
    pub extra_args: Vec<String>,
    /// Time between SIGTERM and SIGKILL when a scan is torn down.
    pub kill_grace: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            program: "nmap".to_string(),
            launcher: Vec::new(),
            service_detection: true,
            os_detection: true,
            verbose: true,
            stats_every: Duration::from_secs(2),
            extra_args: Vec::new(),
            kill_grace: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl EngineCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EngineCommand { program: program.into(), args: args.into_iter().map(Into::into).collect() }
    }

    pub fn for_request(request: &ScanRequest, opts: &EngineOptions) -> Self {
        let mut args: Vec<String> = vec!["-oX".into(), "-".into()];
        if opts.verbose {
            args.push("-v".into());
        }
        if opts.service_detection {
            args.push("-sV".into());
        }
        if opts.os_detection {
            args.push("-O".into());
        }
        args.push("--stats-every".into());
        args.push(format!("{}s", opts.stats_every.as_secs().max(1)));
        if let Some(rate) = request.rate_limit() {
            args.push("--max-rate".into());
            args.push(rate.to_string());
        }
        args.extend(port_args(request.ports()));
        args.extend(opts.extra_args.iter().cloned());
        args.push(request.target().as_str().to_string());

        match opts.launcher.split_first() {
            Some((launcher, rest)) => {
                let mut full = rest.to_vec();
                full.push(opts.program.clone());
                full.extend(args);
                EngineCommand { program: launcher.clone(), args: full }
            }
            None => EngineCommand { program: opts.program.clone(), args },
        }
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for a in &self.args {
            write!(f, " {}", a)?;
        }
        Ok(())
    }
}

pub fn port_args(spec: &PortSpec) -> Vec<String> {
    match spec {
        PortSpec::DefaultTop => Vec::new(),
        PortSpec::Top(n) => vec!["--top-ports".into(), n.to_string()],
        PortSpec::All => vec!["-p-".into()],
        PortSpec::Explicit(s) => vec!["-p".into(), s.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(ports: &str) -> ScanRequest {
        ScanRequest::new("10.0.0.0/24", ports, Duration::from_secs(60)).unwrap()
    }

    #[test]
    fn default_invocation() {
        let cmd = EngineCommand::for_request(&request("top1000"), &EngineOptions::default());
        assert_eq!(cmd.program, "nmap");
        assert_eq!(cmd.args, vec!["-oX", "-", "-v", "-sV", "-O", "--stats-every", "2s", "10.0.0.0/24"]);
    }

    #[test]
    fn ports_rate_and_extra_flags() {
        let opts = EngineOptions {
            os_detection: false,
            extra_args: vec!["-T4".into(), "-Pn".into()],
            ..EngineOptions::default()
        };
        let req = request("22,80,443").with_rate_limit(1000);
        let cmd = EngineCommand::for_request(&req, &opts);
        assert_eq!(
            cmd.args,
            vec!["-oX", "-", "-v", "-sV", "--stats-every", "2s", "--max-rate", "1000", "-p", "22,80,443", "-T4", "-Pn", "10.0.0.0/24"]
        );
    }

    #[test]
    fn symbolic_port_specs() {
        assert_eq!(port_args(&PortSpec::All), vec!["-p-"]);
        assert_eq!(port_args(&PortSpec::Top(100)), vec!["--top-ports", "100"]);
        assert!(port_args(&PortSpec::DefaultTop).is_empty());
    }

    #[test]
    fn launcher_wraps_engine() {
        let opts = EngineOptions {
            launcher: vec!["sudo".into(), "-n".into()],
            verbose: false,
            service_detection: false,
            os_detection: false,
            stats_every: Duration::from_millis(10),
            ..EngineOptions::default()
        };
        let cmd = EngineCommand::for_request(&request("all"), &opts);
        assert_eq!(cmd.program, "sudo");
        assert_eq!(cmd.to_string(), "sudo -n nmap -oX - --stats-every 1s -p- 10.0.0.0/24");
    }
}
