//! Percent-complete extraction from the engine's `<taskprogress ... percent="NN.NN"/>` lines.

use crate::process::{OutputTap, RawOutputLine};
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    pub percent: f64,
}

fn percent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\bpercent\s*=\s*["']?(\d+(?:\.\d+)?)"#).expect("static percent pattern"))
}

/// Pull a percentage out of a line, clamped to 0..=100.
pub fn extract_percent(line: &str) -> Option<f64> {
    let caps = percent_re().captures(line)?;
    let value: f64 = caps[1].parse().ok()?;
    Some(value.clamp(0.0, 100.0))
}

/// Emits a sample only when progress moves forward. Lower or equal readings are dropped.
pub struct ProgressTracker {
    last: f64,
    sink: Option<Box<dyn FnMut(ProgressSample) + Send>>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        ProgressTracker { last: 0.0, sink: None }
    }

    pub fn with_sink(sink: impl FnMut(ProgressSample) + Send + 'static) -> Self {
        ProgressTracker { last: 0.0, sink: Some(Box::new(sink)) }
    }

    pub fn last_percent(&self) -> f64 {
        self.last
    }

    pub fn record(&mut self, line: &str) -> Option<ProgressSample> {
        let percent = extract_percent(line)?;
        if percent - self.last <= 0.0 {
            return None;
        }
        self.last = percent;
        Some(ProgressSample { percent })
    }
}

impl OutputTap for ProgressTracker {
    fn observe(&mut self, line: &RawOutputLine) {
        if let Some(sample) = self.record(&line.text) {
            tracing::info!(percent = sample.percent, "scan progress");
            if let Some(sink) = self.sink.as_mut() {
                sink(sample);
            }
        }
    }
}
