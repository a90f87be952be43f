use std::time::Duration;

use crate::{Error, Result};

/// Polling schedule used while waiting for a record to reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(1),
            timeout: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_interval.is_zero() {
            return Err(Error::Config(
                "retry policy requires a non-zero initial interval".into(),
            ));
        }
        if self.max_interval < self.initial_interval {
            return Err(Error::Config(
                "retry policy max interval must not be below the initial interval".into(),
            ));
        }
        Ok(())
    }

    /// Interval to sleep after `attempt` failed polls (0-based), doubling up to
    /// `max_interval`.
    pub(crate) fn interval_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial_interval
            .saturating_mul(factor)
            .min(self.max_interval)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    pub trace: bool,
    pub trace_to_stderr: bool,
    pub trace_log_limit: usize,
    /// Check every text origin produced by HTML alignment against the assigned
    /// string and downgrade mismatches to coarse confidence.
    pub validate_html_mapping: bool,
    pub first_log_id: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            trace: false,
            trace_to_stderr: true,
            trace_log_limit: 10_000,
            validate_html_mapping: true,
            first_log_id: 1,
        }
    }
}

impl TrackerConfig {
    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.trace = enabled;
        self
    }

    pub fn with_trace_stderr(mut self, enabled: bool) -> Self {
        self.trace_to_stderr = enabled;
        self
    }

    pub fn with_validate_html_mapping(mut self, enabled: bool) -> Self {
        self.validate_html_mapping = enabled;
        self
    }

    pub fn with_first_log_id(mut self, id: u64) -> Self {
        self.first_log_id = id;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.trace_log_limit == 0 {
            return Err(Error::Config(
                "trace log limit requires at least 1 entry".into(),
            ));
        }
        if self.first_log_id == 0 {
            return Err(Error::Config("log ids start at 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.interval_for(0), Duration::from_millis(250));
        assert_eq!(policy.interval_for(1), Duration::from_millis(500));
        assert_eq!(policy.interval_for(2), Duration::from_secs(1));
        assert_eq!(policy.interval_for(40), Duration::from_secs(1));
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let zero_interval = RetryPolicy::default().with_initial_interval(Duration::ZERO);
        assert!(matches!(zero_interval.validate(), Err(Error::Config(_))));

        let config = TrackerConfig {
            trace_log_limit: 0,
            ..TrackerConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        assert!(TrackerConfig::default().validate().is_ok());
    }
}
