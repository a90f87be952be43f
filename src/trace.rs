use std::collections::VecDeque;

use crate::config::TrackerConfig;
use crate::{Error, Result};

/// Bounded diagnostics buffer. Lines are only kept while tracing is enabled;
/// faults are always counted and forwarded to `tracing`.
#[derive(Debug)]
pub(crate) struct TraceState {
    pub(crate) enabled: bool,
    pub(crate) logs: VecDeque<String>,
    pub(crate) log_limit: usize,
    pub(crate) to_stderr: bool,
    pub(crate) faults: usize,
}

impl Default for TraceState {
    fn default() -> Self {
        Self {
            enabled: false,
            logs: VecDeque::new(),
            log_limit: 10_000,
            to_stderr: true,
            faults: 0,
        }
    }
}

impl TraceState {
    pub(crate) fn from_config(config: &TrackerConfig) -> Self {
        Self {
            enabled: config.trace,
            logs: VecDeque::new(),
            log_limit: config.trace_log_limit.max(1),
            to_stderr: config.trace_to_stderr,
            faults: 0,
        }
    }

    pub(crate) fn trace_line(&mut self, line: String) {
        if self.enabled {
            if self.to_stderr {
                eprintln!("{line}");
            }
            if self.logs.len() >= self.log_limit {
                self.logs.pop_front();
            }
            self.logs.push_back(line);
        }
    }

    pub(crate) fn record_fault(&mut self, context: &str, detail: &str) {
        self.faults += 1;
        tracing::warn!(target: "dataflow_tracer::runtime", context, detail, "tracking fault");
        self.trace_line(format!("[fault] {context}: {detail}"));
    }

    pub(crate) fn take_logs(&mut self) -> Vec<String> {
        self.logs.drain(..).collect()
    }

    pub(crate) fn set_log_limit(&mut self, max_entries: usize) -> Result<()> {
        if max_entries == 0 {
            return Err(Error::Config(
                "set_trace_log_limit requires at least 1 entry".into(),
            ));
        }
        self.log_limit = max_entries;
        while self.logs.len() > self.log_limit {
            self.logs.pop_front();
        }
        Ok(())
    }
}
