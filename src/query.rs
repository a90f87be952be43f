//! Query entry points. A store may be filled by another thread, so lookups
//! poll for the starting record before walking.

use std::thread;
use std::time::Instant;

use crate::alignment::{HtmlMapping, OriginHit};
use crate::config::RetryPolicy;
use crate::operation_log::LogId;
use crate::store::LogStore;
use crate::traversal::{TraversalOutcome, traverse};
use crate::{Error, Result};

/// Origin of output char `char_index` of a serialized document, if any
/// assignment wrote it.
pub fn get_origin_at_character_index(mapping: &HtmlMapping, char_index: usize) -> Option<OriginHit> {
    mapping.origin_at_char_index(char_index)
}

#[derive(Debug)]
pub struct TraversalService<S> {
    store: S,
    policy: RetryPolicy,
}

impl<S: LogStore> TraversalService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(store: S, policy: RetryPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self { store, policy })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Waits for `id` to be stored, then traverses from char `char_index` of
    /// its result.
    pub fn traverse(&self, id: LogId, char_index: usize) -> Result<TraversalOutcome> {
        self.wait_for(id)?;
        Ok(traverse(&self.store, id, char_index))
    }

    /// Traverses from a char of serialized document HTML. `None` when no
    /// tracked origin wrote that char.
    pub fn traverse_document_char(
        &self,
        mapping: &HtmlMapping,
        char_index: usize,
    ) -> Result<Option<TraversalOutcome>> {
        let Some(hit) = get_origin_at_character_index(mapping, char_index) else {
            return Ok(None);
        };
        let Some(tracking) = hit.tracking else {
            return Ok(None);
        };
        self.traverse(tracking, hit.char_index).map(Some)
    }

    fn wait_for(&self, id: LogId) -> Result<()> {
        let started = Instant::now();
        let mut attempt = 0;
        loop {
            if self.store.has_record(id) {
                return Ok(());
            }
            let waited = started.elapsed();
            if waited >= self.policy.timeout {
                tracing::warn!(target: "dataflow_tracer::query", id = id.0, "record never arrived");
                return Err(Error::RecordNotFound {
                    id,
                    waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                });
            }
            let pause = self
                .policy
                .interval_for(attempt)
                .min(self.policy.timeout - waited);
            tracing::debug!(
                target: "dataflow_tracer::query",
                id = id.0,
                attempt,
                pause_ms = pause.as_millis() as u64,
                "record not stored yet"
            );
            thread::sleep(pause);
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLogStore;
    use std::time::Duration;

    #[test]
    fn missing_record_times_out() {
        let policy = RetryPolicy::default()
            .with_initial_interval(Duration::from_millis(5))
            .with_max_interval(Duration::from_millis(10))
            .with_timeout(Duration::from_millis(30));
        let Ok(service) = TraversalService::with_policy(MemoryLogStore::new(), policy) else {
            panic!("policy is valid");
        };
        let err = service.traverse(LogId(4), 0);
        assert!(matches!(err, Err(Error::RecordNotFound { id: LogId(4), .. })));
    }

    #[test]
    fn zero_interval_policy_is_rejected() {
        let policy = RetryPolicy::default().with_initial_interval(Duration::ZERO);
        assert!(TraversalService::with_policy(MemoryLogStore::new(), policy).is_err());
    }
}
