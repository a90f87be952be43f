use std::cell::RefCell;
use std::rc::Rc;

use crate::handlers::{HandlerOutcome, NativeCall};
use crate::json::{JsonKind, JsonNode, JsonWriter, parse_json_text};
use crate::operation_log::{ArgRef, Loc, LogId, Operation, RecordDraft, ResultValue, RuntimeArgs};
use crate::runtime::{PropertyTracking, TrackingRuntime};
use crate::values::{ObjectValue, Value};
use crate::Result;

/// Rebuilds parsed JSON as script values, recording where in the source text
/// every key and primitive came from.
struct ParseRecorder<'a> {
    rt: &'a mut TrackingRuntime,
    json: Option<LogId>,
    loc: Option<Loc>,
}

impl ParseRecorder<'_> {
    fn record(
        &mut self,
        result: ResultValue,
        key_path: &str,
        source_offset: usize,
        is_key: bool,
    ) -> Option<LogId> {
        self.rt.emit(
            RecordDraft::new(Operation::JsonParseResult, result)
                .arg("json", ArgRef::tracking_only(self.json))
                .runtime(RuntimeArgs {
                    key_path: Some(key_path.to_string()),
                    is_key,
                    source_offset: Some(source_offset),
                    ..RuntimeArgs::default()
                })
                .loc(self.loc.clone()),
        )
    }

    /// The value for `node` and, for primitives, its provenance.
    fn build(&mut self, node: &JsonNode, path: &str) -> (Value, Option<LogId>) {
        stacker::maybe_grow(64 * 1024, 1024 * 1024, || {
            let primitive = match &node.kind {
                JsonKind::Null => Value::Null,
                JsonKind::Bool(flag) => Value::Bool(*flag),
                JsonKind::Number(n) => Value::Number(*n),
                JsonKind::String(text) => Value::String(text.clone()),
                JsonKind::Array(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    let mut trackings = Vec::with_capacity(items.len());
                    for (index, item) in items.iter().enumerate() {
                        let item_path = child_path(path, &index.to_string());
                        let (value, tracking) = self.build(item, &item_path);
                        values.push(value);
                        trackings.push(tracking);
                    }
                    let array = Value::new_array(values);
                    if let Some(owner) = array.object_id() {
                        self.rt.set_element_trackings(owner, trackings);
                    }
                    return (array, None);
                }
                JsonKind::Object(members) => {
                    let inner = Rc::new(RefCell::new(ObjectValue::default()));
                    let owner = inner.borrow().id();
                    for member in members {
                        let member_path = child_path(path, &member.key);
                        let (value, value_tracking) = self.build(&member.value, &member_path);
                        let name_tracking = self.record(
                            ResultValue::String(member.key.clone()),
                            &member_path,
                            member.key_start,
                            true,
                        );
                        inner.borrow_mut().set_entry(member.key.clone(), value);
                        self.rt.set_property_tracking(
                            owner,
                            member.key.clone(),
                            PropertyTracking {
                                value: value_tracking,
                                name: name_tracking,
                            },
                        );
                    }
                    return (Value::Object(inner), None);
                }
            };
            let tracking = self.record(primitive.summarize(), path, node.start, false);
            (primitive, tracking)
        })
    }
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

pub(super) fn parse(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let text = call.arg(0);
    let root = parse_json_text(&text.value.to_display_string())?;
    let mut recorder = ParseRecorder {
        rt,
        json: text.tracking,
        loc: call.loc(),
    };
    let (value, tracking) = recorder.build(&root, "");
    Ok(HandlerOutcome::new(value).returning(tracking))
}

pub(super) fn stringify(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let value = call.arg(0);
    let written = JsonWriter::new(&*rt).stringify(&value.value, value.tracking)?;
    let Some((text, json_index)) = written else {
        return Ok(HandlerOutcome::new(Value::Undefined));
    };
    Ok(HandlerOutcome::new(Value::String(text)).runtime(RuntimeArgs {
        json_index,
        ..RuntimeArgs::default()
    }))
}
