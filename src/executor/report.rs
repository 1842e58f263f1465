//! The test executor's report.
//!
//! The executor writes one JSON object per line on stdout:
//!
//! ```text
//! {"type":"result","instance":"chromium","passed":12,"failed":0,"skipped":1,"entries":[...]}
//! {"type":"result","instance":"firefox","passed":12,"failed":1,"skipped":0,"error":"timeout"}
//! {"type":"coverage","lines":91.2,"statements":90.0,"functions":88.5,"branches":75.0}
//! {"type":"complete"}
//! ```
//!
//! Lines that are not JSON objects of a known type are ignored, so tools may
//! interleave their own logging. Per-instance results are collected into a
//! [`ResultAccumulator`] owned by the component being tested.

use serde::{Deserialize, Serialize};

use crate::types::{CoverageSummary, ExecutionLog, TestTotals};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ExecutorEvent {
    /// Final results of one executor instance (one browser).
    Result(ExecutionLog),
    /// Coverage summary, in coverage mode.
    Coverage(CoverageSummary),
    /// The executor finished reporting.
    Complete,
}

impl ExecutorEvent {
    /// Parses one report line. Returns `None` for anything that is not an event.
    pub fn parse_line(line: &str) -> Option<ExecutorEvent> {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        serde_json::from_str(line).ok()
    }
}

/// Per-instance results of one component's test execution.
///
/// A later result for the same instance replaces the earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultAccumulator {
    logs: Vec<ExecutionLog>,
}

impl ResultAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, log: ExecutionLog) {
        match self.logs.iter_mut().find(|l| l.instance == log.instance) {
            Some(existing) => *existing = log,
            None => self.logs.push(log),
        }
    }

    /// Totals summed over all instances.
    pub fn totals(&self) -> TestTotals {
        let mut totals = TestTotals::default();
        for log in &self.logs {
            totals.add(&log.totals());
        }
        totals
    }

    pub fn has_logs(&self) -> bool {
        !self.logs.is_empty()
    }

    /// Returns true if any instance reported an error.
    pub fn has_errors(&self) -> bool {
        self.logs.iter().any(|l| l.error.is_some())
    }

    pub fn logs(&self) -> &[ExecutionLog] {
        &self.logs
    }

    pub fn into_logs(self) -> Vec<ExecutionLog> {
        self.logs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(instance: &str, passed: u32, failed: u32, error: Option<&str>) -> ExecutionLog {
        ExecutionLog {
            instance: instance.to_string(),
            passed,
            failed,
            skipped: 0,
            error: error.map(String::from),
            entries: vec![],
        }
    }

    #[test]
    fn parse_result_line() {
        let line = r#"{"type":"result","instance":"chromium","passed":3,"failed":1,"skipped":2,"error":null}"#;
        let event = ExecutorEvent::parse_line(line).unwrap();
        match event {
            ExecutorEvent::Result(log) => {
                assert_eq!(log.instance, "chromium");
                assert_eq!(log.totals().total, 6);
                assert!(log.entries.is_empty());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn parse_ignores_noise() {
        assert_eq!(ExecutorEvent::parse_line("Starting browsers..."), None);
        assert_eq!(ExecutorEvent::parse_line(r#"{"type":"progress"}"#), None);
        assert_eq!(ExecutorEvent::parse_line(""), None);
        assert_eq!(
            ExecutorEvent::parse_line(r#"  {"type":"complete"}  "#),
            Some(ExecutorEvent::Complete)
        );
    }

    #[test]
    fn accumulator_sums_and_replaces_by_instance() {
        let mut acc = ResultAccumulator::new();
        assert!(!acc.has_logs());

        acc.record(log("chromium", 5, 0, None));
        acc.record(log("firefox", 4, 1, None));
        acc.record(log("chromium", 6, 0, None));

        let totals = acc.totals();
        assert_eq!(totals.success, 10);
        assert_eq!(totals.failed, 1);
        assert_eq!(acc.logs().len(), 2);
        assert!(!acc.has_errors());

        acc.record(log("safari", 0, 0, Some("launcher crashed")));
        assert!(acc.has_errors());
    }

    #[test]
    fn separate_accumulators_do_not_alias() {
        let mut a = ResultAccumulator::new();
        let b = ResultAccumulator::new();
        a.record(log("chromium", 1, 0, None));
        assert!(a.has_logs());
        assert!(!b.has_logs());
    }
}
