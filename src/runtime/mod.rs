//! The runtime instrumented code calls into. Every entry point evaluates one
//! operation, stores an [`OperationRecord`](crate::OperationRecord) describing
//! it and returns the value together with that record's id.

mod calls;
mod document;
mod expressions;

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use crate::alignment::{
    HtmlAssignment, HtmlMapping, OriginTable, ValueOrigin, map_inner_html_assignment,
};
use crate::config::TrackerConfig;
use crate::dom::{Dom, NodeId, NodeKind};
use crate::handlers::{self, HandlerOutcome, KnownFunction, NativeCall, arg_ref};
use crate::json::PropertyProvenance;
use crate::operation_log::{ArgRef, Loc, LogId, Operation, RecordDraft, ResultValue, RuntimeArgs};
use crate::store::LogStore;
use crate::trace::TraceState;
use crate::values::{ArrayValue, FunctionValue, HostObject, ObjectId, ObjectValue, Value};
use crate::{Error, Result};

/// A value paired with the record that produced it.
#[derive(Debug, Clone)]
pub struct Tracked {
    pub value: Value,
    pub tracking: Option<LogId>,
}

impl Tracked {
    pub fn new(value: Value, tracking: Option<LogId>) -> Self {
        Self { value, tracking }
    }

    pub fn untracked(value: Value) -> Self {
        Self {
            value,
            tracking: None,
        }
    }
}

/// Scope of one call into an instrumented function.
#[derive(Debug, Clone, Default)]
pub struct CallFrame {
    pub this: Option<Tracked>,
    /// `FunctionArgument` results, one per argument.
    pub args: Vec<Tracked>,
    returned: Option<Tracked>,
}

impl CallFrame {
    pub fn new(this: Option<Tracked>, args: Vec<Tracked>) -> Self {
        Self {
            this,
            args,
            returned: None,
        }
    }

    pub fn arg(&self, index: usize) -> Tracked {
        self.args
            .get(index)
            .cloned()
            .unwrap_or_else(|| Tracked::untracked(Value::Undefined))
    }

    /// What the last `return_statement` in this frame returned.
    pub fn returned(&self) -> Option<&Tracked> {
        self.returned.as_ref()
    }
}

/// Provenance of one property: the record that produced its value and the
/// one that produced its name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PropertyTracking {
    pub(crate) value: Option<LogId>,
    pub(crate) name: Option<LogId>,
}

pub struct TrackingRuntime {
    store: Box<dyn LogStore>,
    next_id: u64,
    /// Side table of property provenance. Entries live as long as the runtime
    /// because a container's id says nothing about whether the script still
    /// holds it.
    properties: HashMap<ObjectId, HashMap<String, PropertyTracking>>,
    dom: Dom,
    origins: OriginTable,
    local_storage: BTreeMap<String, String>,
    trace: TraceState,
    config: TrackerConfig,
}

impl fmt::Debug for TrackingRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingRuntime")
            .field("next_id", &self.next_id)
            .field("tracked_containers", &self.properties.len())
            .field("faults", &self.trace.faults)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TrackingRuntime {
    pub fn new(store: impl LogStore + 'static) -> Self {
        Self::build(Box::new(store), TrackerConfig::default())
    }

    pub fn with_config(store: impl LogStore + 'static, config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(Box::new(store), config))
    }

    fn build(store: Box<dyn LogStore>, config: TrackerConfig) -> Self {
        Self {
            store,
            next_id: config.first_log_id,
            properties: HashMap::new(),
            dom: Dom::new(),
            origins: OriginTable::new(),
            local_storage: BTreeMap::new(),
            trace: TraceState::from_config(&config),
            config,
        }
    }

    pub fn store(&self) -> &dyn LogStore {
        self.store.as_ref()
    }

    pub fn dom(&self) -> &Dom {
        &self.dom
    }

    pub fn origins(&self) -> &OriginTable {
        &self.origins
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub(crate) fn dom_mut(&mut self) -> &mut Dom {
        &mut self.dom
    }

    pub(crate) fn origins_mut(&mut self) -> &mut OriginTable {
        &mut self.origins
    }

    pub(crate) fn dom_and_origins_mut(&mut self) -> (&mut Dom, &mut OriginTable) {
        (&mut self.dom, &mut self.origins)
    }

    /// Tracking faults recovered so far.
    pub fn fault_count(&self) -> usize {
        self.trace.faults
    }

    pub fn enable_trace(&mut self, enabled: bool) {
        self.trace.enabled = enabled;
    }

    pub fn set_trace_stderr(&mut self, enabled: bool) {
        self.trace.to_stderr = enabled;
    }

    pub fn set_trace_log_limit(&mut self, max_entries: usize) -> Result<()> {
        self.trace.set_log_limit(max_entries)
    }

    pub fn take_trace_logs(&mut self) -> Vec<String> {
        self.trace.take_logs()
    }

    /// Assigns the next id and stores the record.
    fn commit(&mut self, draft: RecordDraft) -> Result<LogId> {
        let id = LogId(self.next_id);
        self.next_id += 1;
        let record = draft.finish(id);
        tracing::debug!(
            target: "dataflow_tracer::runtime",
            id = id.0,
            operation = record.operation.name(),
            "operation recorded"
        );
        self.trace
            .trace_line(format!("[record] {id} {}", record.operation));
        self.store.store_record(record)?;
        Ok(id)
    }

    /// Stores a record; a rejected write leaves the value untracked.
    pub(crate) fn emit(&mut self, draft: RecordDraft) -> Option<LogId> {
        let context = draft.operation.name();
        self.guard(context, |rt| rt.commit(draft))
    }

    /// Runs provenance bookkeeping that must never change what the program
    /// observes. Failures are logged and counted.
    pub(crate) fn guard<T>(
        &mut self,
        context: &str,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Option<T> {
        match f(self) {
            Ok(value) => Some(value),
            Err(err) => {
                self.trace.record_fault(context, &err.to_string());
                None
            }
        }
    }

    pub(crate) fn property_tracking(&self, owner: ObjectId, key: &str) -> PropertyTracking {
        self.properties
            .get(&owner)
            .and_then(|properties| properties.get(key))
            .copied()
            .unwrap_or_default()
    }

    pub(crate) fn set_property_tracking(
        &mut self,
        owner: ObjectId,
        key: impl Into<String>,
        tracking: PropertyTracking,
    ) {
        let properties = self.properties.entry(owner).or_default();
        let key = key.into();
        if tracking == PropertyTracking::default() {
            properties.remove(&key);
        } else {
            properties.insert(key, tracking);
        }
    }

    /// Value provenance of every element, in order.
    pub(crate) fn element_trackings(&self, array: &Rc<RefCell<ArrayValue>>) -> Vec<Option<LogId>> {
        let array = array.borrow();
        let owner = array.id();
        (0..array.len())
            .map(|index| self.property_tracking(owner, &index.to_string()).value)
            .collect()
    }

    /// Replaces all index provenance of `owner`.
    pub(crate) fn set_element_trackings(&mut self, owner: ObjectId, trackings: Vec<Option<LogId>>) {
        let properties = self.properties.entry(owner).or_default();
        properties.retain(|key, _| key.parse::<usize>().is_err());
        for (index, tracking) in trackings.into_iter().enumerate() {
            if tracking.is_some() {
                properties.insert(
                    index.to_string(),
                    PropertyTracking {
                        value: tracking,
                        name: None,
                    },
                );
            }
        }
    }

    /// Record that produced the value currently stored under `key`.
    pub fn property_value_tracking(&self, container: &Value, key: &str) -> Option<LogId> {
        let owner = container.object_id()?;
        self.property_tracking(owner, key).value
    }

    /// Record that produced the name `key`, e.g. a key literal or a parsed JSON key.
    pub fn property_name_tracking(&self, container: &Value, key: &str) -> Option<LogId> {
        let owner = container.object_id()?;
        self.property_tracking(owner, key).name
    }

    pub fn element_tracking(&self, array: &Value, index: usize) -> Option<LogId> {
        self.property_value_tracking(array, &index.to_string())
    }
}

impl PropertyProvenance for TrackingRuntime {
    fn property(&self, owner: ObjectId, key: &str) -> (Option<LogId>, Option<LogId>) {
        let tracking = self.property_tracking(owner, key);
        (tracking.name, tracking.value)
    }
}
