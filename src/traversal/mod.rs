//! Backward traversal: from a character of a recorded value to the record
//! that first produced it.

mod rules;

use serde::Serialize;

use crate::operation_log::{Loc, LogId, Operation, OperationRecord, ResultValue};
use crate::store::LogStore;

/// Where one character of a record's result came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Char `.1` of record `.0`'s result.
    Next(LogId, usize),
    /// The record created the character.
    Leaf,
    /// The character entered without provenance.
    Untracked,
    /// The character was synthesized by the operation itself (a separator
    /// quote, a serializer's punctuation) or lies outside every mapped range.
    Boundary,
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordSummary {
    pub id: LogId,
    pub operation: Operation,
    pub loc: Option<Loc>,
    pub result: ResultValue,
}

impl From<&OperationRecord> for RecordSummary {
    fn from(record: &OperationRecord) -> Self {
        Self {
            id: record.id,
            operation: record.operation,
            loc: record.loc.clone(),
            result: record.result.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraversalStep {
    pub record: RecordSummary,
    pub char_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum Termination {
    Leaf,
    Untracked,
    BoundaryReached,
    Unsupported(String),
    MissingRecord(LogId),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraversalOutcome {
    /// Visited records, starting with the queried one.
    pub steps: Vec<TraversalStep>,
    pub termination: Termination,
}

impl TraversalOutcome {
    pub fn last(&self) -> Option<&TraversalStep> {
        self.steps.last()
    }

    /// Source location of the record the walk ended on.
    pub fn origin_loc(&self) -> Option<&Loc> {
        self.last().and_then(|step| step.record.loc.as_ref())
    }

    pub fn reached_leaf(&self) -> bool {
        self.termination == Termination::Leaf
    }
}

/// Applies the traversal rule of `record`'s operation to one character.
pub fn step_once(record: &OperationRecord, char_index: usize) -> Step {
    rules::step(record, char_index)
}

/// Follows char `char_index` of record `start` back to its origin.
///
/// Every hop moves to a strictly smaller id, so the walk ends after at most
/// `start.0` hops.
pub fn traverse<S: LogStore + ?Sized>(store: &S, start: LogId, char_index: usize) -> TraversalOutcome {
    let mut steps = Vec::new();
    let Some(mut record) = store.load_record(start) else {
        return TraversalOutcome {
            steps,
            termination: Termination::MissingRecord(start),
        };
    };
    let mut char_index = char_index;
    let termination = loop {
        steps.push(TraversalStep {
            record: RecordSummary::from(&*record),
            char_index,
        });
        if record
            .result
            .text_len()
            .is_some_and(|len| char_index >= len)
        {
            break Termination::BoundaryReached;
        }
        match rules::step(&record, char_index) {
            Step::Next(next, next_index) => {
                if next >= record.id {
                    break Termination::Unsupported(format!(
                        "{} references {next}, which is not older",
                        record.id
                    ));
                }
                let Some(next_record) = store.load_record(next) else {
                    break Termination::MissingRecord(next);
                };
                tracing::debug!(
                    target: "dataflow_tracer::traversal",
                    from = record.id.0,
                    to = next.0,
                    operation = record.operation.name(),
                    char_index = next_index,
                    "traversal hop"
                );
                record = next_record;
                char_index = next_index;
            }
            Step::Leaf => break Termination::Leaf,
            Step::Untracked => break Termination::Untracked,
            Step::Boundary => break Termination::BoundaryReached,
            Step::Unsupported(reason) => break Termination::Unsupported(reason),
        }
    };
    TraversalOutcome { steps, termination }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use crate::runtime::TrackingRuntime;
    use crate::store::MemoryLogStore;

    #[test]
    fn concatenation_splits_by_operand_length() -> Result<()> {
        let mut rt = TrackingRuntime::new(MemoryLogStore::new());
        let left = rt.string_literal("ab", Some(Loc::new("a.js", 1, 1)));
        let right = rt.string_literal("cd", Some(Loc::new("a.js", 1, 8)));
        let joined = rt.binary_expression("+", &left, &right, None)?;
        let Some(id) = joined.tracking else {
            panic!("concat recorded");
        };
        let outcome = traverse(rt.store(), id, 3);
        assert!(outcome.reached_leaf());
        let Some(last) = outcome.last() else {
            panic!("walk visited records");
        };
        assert_eq!(Some(last.record.id), right.tracking);
        assert_eq!(last.char_index, 1);
        assert_eq!(outcome.origin_loc().map(|loc| loc.column), Some(8));
        Ok(())
    }

    #[test]
    fn index_past_the_end_is_a_boundary() {
        let mut rt = TrackingRuntime::new(MemoryLogStore::new());
        let text = rt.string_literal("ab", None);
        let Some(id) = text.tracking else {
            panic!("literal recorded");
        };
        let outcome = traverse(rt.store(), id, 2);
        assert_eq!(outcome.termination, Termination::BoundaryReached);
        assert_eq!(outcome.steps.len(), 1);
    }

    #[test]
    fn unknown_start_is_reported() {
        let store = MemoryLogStore::new();
        let outcome = traverse(&store, LogId(9), 0);
        assert_eq!(outcome.termination, Termination::MissingRecord(LogId(9)));
        assert!(outcome.steps.is_empty());
    }

    #[test]
    fn untracked_values_end_the_walk() {
        let mut rt = TrackingRuntime::new(MemoryLogStore::new());
        let value = rt.untracked(crate::values::Value::from("x"), "host input");
        let Some(id) = value.tracking else {
            panic!("untracked value recorded");
        };
        assert_eq!(traverse(rt.store(), id, 0).termination, Termination::Untracked);
    }
}
