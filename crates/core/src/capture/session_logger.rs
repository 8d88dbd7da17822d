use std::collections::HashMap;
use std::time::Instant;

use crate::capture::domain::session::{Phase, SessionId};

/// Observer for capture-loop events.
///
/// Keeps the runtime free of any particular output mechanism so the CLI can
/// print a summary while tests stay silent.
pub trait SessionLogger: Send {
    /// A session moved between phases.
    fn transition(&mut self, session: SessionId, from: Phase, to: Phase);

    /// Record how long a named stage took (e.g. one `detect` call).
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Record a point-in-time metric (e.g. frames dropped so far).
    fn metric(&mut self, name: &str, value: f64);

    fn info(&mut self, message: &str);

    /// Emit an end-of-run summary. Default: no-op.
    fn summary(&self) {}
}

/// Discards all events.
pub struct NullSessionLogger;

impl SessionLogger for NullSessionLogger {
    fn transition(&mut self, _session: SessionId, _from: Phase, _to: Phase) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// Aggregates timings, metrics and completed sessions for a summary report
/// at shutdown. Individual events go to the `log` facade.
pub struct StdoutSessionLogger {
    timings: HashMap<String, Vec<f64>>,
    /// Latest value per metric.
    metrics: HashMap<String, f64>,
    transitions: usize,
    completed: usize,
    start_time: Instant,
}

impl StdoutSessionLogger {
    pub fn new() -> Self {
        Self {
            timings: HashMap::new(),
            metrics: HashMap::new(),
            transitions: 0,
            completed: 0,
            start_time: Instant::now(),
        }
    }

    /// Returns the formatted summary string, or `None` if nothing happened.
    pub fn summary_string(&self) -> Option<String> {
        if self.transitions == 0 && self.timings.is_empty() {
            return None;
        }

        let elapsed = self.start_time.elapsed().as_secs_f64();
        let mut lines = vec![format!(
            "Capture summary ({} completed, {:.1}s total):",
            self.completed, elapsed
        )];

        let mut stages: Vec<_> = self.timings.keys().collect();
        stages.sort();
        for stage in stages {
            let durations = &self.timings[stage];
            let total_ms: f64 = durations.iter().sum();
            let avg_ms = total_ms / durations.len().max(1) as f64;
            lines.push(format!(
                "  {stage:12}: avg {avg_ms:6.1}ms  calls {:5}",
                durations.len()
            ));
        }

        let mut names: Vec<_> = self.metrics.keys().collect();
        names.sort();
        for name in names {
            lines.push(format!("  {name}: {}", self.metrics[name]));
        }

        Some(lines.join("\n"))
    }

    pub fn timings_for(&self, stage: &str) -> Option<&[f64]> {
        self.timings.get(stage).map(|v| v.as_slice())
    }

    pub fn metric_value(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn completed(&self) -> usize {
        self.completed
    }
}

impl Default for StdoutSessionLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLogger for StdoutSessionLogger {
    fn transition(&mut self, session: SessionId, from: Phase, to: Phase) {
        self.transitions += 1;
        if to == Phase::Complete {
            self.completed += 1;
        }
        log::info!("Session {session}: {from} -> {to}");
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_string())
            .or_default()
            .push(duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        self.metrics.insert(name.to_string(), value);
    }

    fn info(&mut self, message: &str) {
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_null_logger_all_methods_are_noop() {
        let mut logger = NullSessionLogger;
        logger.transition(SessionId::new(1), Phase::Idle, Phase::Capturing);
        logger.timing("detect", 5.0);
        logger.metric("frames_dropped", 3.0);
        logger.info("hello");
        logger.summary();
    }

    #[test]
    fn test_timing_records_values() {
        let mut logger = StdoutSessionLogger::new();
        logger.timing("detect", 20.0);
        logger.timing("detect", 30.0);

        let detect = logger.timings_for("detect").unwrap();
        assert_eq!(detect.len(), 2);
        assert_relative_eq!(detect[1], 30.0);
        assert!(logger.timings_for("still").is_none());
    }

    #[test]
    fn test_metric_keeps_latest_value() {
        let mut logger = StdoutSessionLogger::new();
        logger.metric("frames_dropped", 3.0);
        logger.metric("frames_dropped", 7.0);
        assert_eq!(logger.metric_value("frames_dropped"), Some(7.0));
    }

    #[test]
    fn test_completed_sessions_are_counted() {
        let mut logger = StdoutSessionLogger::new();
        let id = SessionId::new(1);
        logger.transition(id, Phase::Idle, Phase::Capturing);
        logger.transition(id, Phase::Capturing, Phase::Processing);
        logger.transition(id, Phase::Processing, Phase::Complete);
        logger.transition(id, Phase::Complete, Phase::Idle);
        assert_eq!(logger.completed(), 1);
    }

    #[test]
    fn test_summary_includes_timing_and_metrics() {
        let mut logger = StdoutSessionLogger::new();
        logger.timing("detect", 20.0);
        logger.timing("detect", 30.0);
        logger.metric("frames_dropped", 12.0);

        let summary = logger.summary_string().unwrap();
        assert!(summary.contains("Capture summary"));
        assert!(summary.contains("detect"));
        assert!(summary.contains("avg   25.0ms"));
        assert!(summary.contains("frames_dropped: 12"));
    }

    #[test]
    fn test_empty_summary_returns_none() {
        assert!(StdoutSessionLogger::new().summary_string().is_none());
    }
}
