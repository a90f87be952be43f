//! Character-level provenance for instrumented programs.
//!
//! Every tracked operation an instrumented program performs is recorded as an
//! immutable [`OperationRecord`]. Values carry a tracking reference to the record
//! that produced them, and [`traverse`] walks backward from any character of any
//! value, or of the document's serialized HTML, to the expression that wrote it.
//!
//! ```no_run
//! use dataflow_tracer::{MemoryLogStore, Loc, TrackingRuntime, traverse};
//!
//! # fn main() -> dataflow_tracer::Result<()> {
//! let mut rt = TrackingRuntime::new(MemoryLogStore::new());
//! let left = rt.string_literal("Hello ", Some(Loc::new("app.js", 1, 10)));
//! let right = rt.string_literal("World", Some(Loc::new("app.js", 1, 21)));
//! let joined = rt.binary_expression("+", &left, &right, None)?;
//!
//! let id = joined.tracking.expect("tracked");
//! let outcome = traverse(rt.store(), id, 7);
//! assert_eq!(outcome.last().map(|step| step.char_index), Some(1));
//! # Ok(())
//! # }
//! ```

use std::error::Error as StdError;
use std::fmt;

mod alignment;
mod config;
mod dom;
mod handlers;
mod js_regex;
mod json;
mod operation_log;
mod query;
mod runtime;
mod store;
mod trace;
mod traversal;
mod values;

pub use alignment::{
    AlignmentReport, AttributeOrigin, Confidence, HtmlAssignment, HtmlMapping, HtmlOrigin,
    MappedSegment, NodeOrigin, Origin, OriginHit, OriginTable, ValueOrigin,
    map_inner_html_assignment,
};
pub use config::{RetryPolicy, TrackerConfig};
pub use dom::{AdjacentPosition, Dom, Element, NodeId, NodeKind};
pub use handlers::KnownFunction;
pub use operation_log::{
    ArgRef, AstArgs, JsonIndexEntry, Loc, LogId, Operation, OperationRecord, PieceSource,
    ReplacementPiece, ReplacementRange, ResultValue, RuntimeArgs,
};
pub use query::{TraversalService, get_origin_at_character_index};
pub use runtime::{CallFrame, Tracked, TrackingRuntime};
pub use store::{
    LogStore, MemoryLogStore, SharedLogStore, StoreError, decode_record, encode_record,
};
pub use traversal::{
    RecordSummary, Step, Termination, TraversalOutcome, TraversalStep, step_once, traverse,
};
pub use values::{
    ArrayValue, FunctionValue, HostObject, ObjectId, ObjectValue, RegexValue, Value,
};

#[derive(Debug)]
pub enum Error {
    HtmlParse(String),
    ScriptRuntime(String),
    Store(String),
    RecordNotFound { id: LogId, waited_ms: u64 },
    Config(String),
    Serialization(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HtmlParse(msg) => write!(f, "html parse error: {msg}"),
            Self::ScriptRuntime(msg) => write!(f, "script runtime error: {msg}"),
            Self::Store(msg) => write!(f, "log store error: {msg}"),
            Self::RecordNotFound { id, waited_ms } => write!(
                f,
                "log {id} not found after {waited_ms}ms - might still be saving data"
            ),
            Self::Config(msg) => write!(f, "config error: {msg}"),
            Self::Serialization(msg) => write!(f, "serialization error: {msg}"),
        }
    }
}

impl StdError for Error {}

impl From<StoreError> for Error {
    fn from(value: StoreError) -> Self {
        Self::Store(value.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
