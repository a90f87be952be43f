use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::operation_log::{LogId, OperationRecord};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A record with this id was already stored. Records are immutable.
    Duplicate(LogId),
    /// The backing storage refused the write.
    Rejected(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate(id) => write!(f, "record {id} already stored"),
            Self::Rejected(msg) => write!(f, "store rejected record: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Append-only record table keyed by id.
///
/// Absence is not an error: `load_record` returns `None` for ids that were
/// never stored or have not been persisted yet.
pub trait LogStore {
    fn store_record(&mut self, record: OperationRecord) -> std::result::Result<(), StoreError>;

    fn load_record(&self, id: LogId) -> Option<Arc<OperationRecord>>;

    fn has_record(&self, id: LogId) -> bool {
        self.load_record(id).is_some()
    }
}

impl<S: LogStore + ?Sized> LogStore for &mut S {
    fn store_record(&mut self, record: OperationRecord) -> std::result::Result<(), StoreError> {
        (**self).store_record(record)
    }

    fn load_record(&self, id: LogId) -> Option<Arc<OperationRecord>> {
        (**self).load_record(id)
    }

    fn has_record(&self, id: LogId) -> bool {
        (**self).has_record(id)
    }
}

#[derive(Debug, Default)]
pub struct MemoryLogStore {
    records: HashMap<LogId, Arc<OperationRecord>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records ordered by id.
    pub fn records(&self) -> Vec<Arc<OperationRecord>> {
        let mut out = self.records.values().cloned().collect::<Vec<_>>();
        out.sort_by_key(|record| record.id);
        out
    }
}

impl LogStore for MemoryLogStore {
    fn store_record(&mut self, record: OperationRecord) -> std::result::Result<(), StoreError> {
        if self.records.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id));
        }
        tracing::trace!(target: "dataflow_tracer::store", id = record.id.0, operation = %record.operation, "stored record");
        self.records.insert(record.id, Arc::new(record));
        Ok(())
    }

    fn load_record(&self, id: LogId) -> Option<Arc<OperationRecord>> {
        self.records.get(&id).cloned()
    }

    fn has_record(&self, id: LogId) -> bool {
        self.records.contains_key(&id)
    }
}

/// Cloneable handle over a [`MemoryLogStore`] that can be written by a runtime
/// and read by a traversal service on another thread.
#[derive(Debug, Clone, Default)]
pub struct SharedLogStore {
    inner: Arc<RwLock<MemoryLogStore>>,
}

impl SharedLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|store| store.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogStore for SharedLogStore {
    fn store_record(&mut self, record: OperationRecord) -> std::result::Result<(), StoreError> {
        let mut store = self
            .inner
            .write()
            .map_err(|_| StoreError::Rejected("shared store lock poisoned".into()))?;
        store.store_record(record)
    }

    fn load_record(&self, id: LogId) -> Option<Arc<OperationRecord>> {
        self.inner.read().ok()?.load_record(id)
    }

    fn has_record(&self, id: LogId) -> bool {
        self.inner
            .read()
            .map(|store| store.has_record(id))
            .unwrap_or(false)
    }
}

pub fn encode_record(record: &OperationRecord) -> Result<String> {
    Ok(serde_json::to_string(record)?)
}

pub fn decode_record(text: &str) -> Result<OperationRecord> {
    Ok(serde_json::from_str(text)?)
}
