use std::cell::RefCell;
use std::rc::Rc;

use crate::handlers::{HandlerOutcome, KnownFunction, NativeCall};
use crate::operation_log::{ArgRef, LogId, Operation, RecordDraft, ResultValue, RuntimeArgs};
use crate::runtime::{Tracked, TrackingRuntime};
use crate::values::{ArrayValue, Value, relative_index};
use crate::{Error, Result};

type ArrayRef = Rc<RefCell<ArrayValue>>;

fn receiver_array(known: KnownFunction, call: &NativeCall<'_>) -> Result<ArrayRef> {
    match &call.receiver(known)?.value {
        Value::Array(array) => Ok(Rc::clone(array)),
        other => Err(Error::ScriptRuntime(format!(
            "{} called on {}",
            known.name(),
            other.to_display_string()
        ))),
    }
}

fn callback(known: KnownFunction, call: &NativeCall<'_>) -> Result<Tracked> {
    let callback = call.arg(0);
    if !matches!(callback.value, Value::Function(_)) {
        return Err(Error::ScriptRuntime(format!(
            "{}: {} is not a function",
            known.name(),
            callback.value.to_display_string()
        )));
    }
    Ok(callback)
}

/// Elements with their provenance, snapshotted so callbacks may mutate the
/// array.
fn tracked_elements(rt: &TrackingRuntime, array: &ArrayRef) -> Vec<Tracked> {
    let trackings = rt.element_trackings(array);
    array
        .borrow()
        .iter()
        .cloned()
        .zip(trackings)
        .map(|(value, tracking)| Tracked::new(value, tracking))
        .collect()
}

/// A fresh array whose element provenance is taken from `elements`.
fn new_array(rt: &mut TrackingRuntime, elements: Vec<Tracked>) -> Value {
    let (values, trackings): (Vec<Value>, Vec<Option<LogId>>) = elements
        .into_iter()
        .map(|element| (element.value, element.tracking))
        .unzip();
    let array = Value::new_array(values);
    if let Some(owner) = array.object_id() {
        rt.set_element_trackings(owner, trackings);
    }
    array
}

fn store_elements(rt: &mut TrackingRuntime, array: &ArrayRef, elements: Vec<Tracked>) {
    let owner = array.borrow().id();
    let (values, trackings): (Vec<Value>, Vec<Option<LogId>>) = elements
        .into_iter()
        .map(|element| (element.value, element.tracking))
        .unzip();
    array.borrow_mut().elements = values;
    rt.set_element_trackings(owner, trackings);
}

pub(super) fn push(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let array = receiver_array(KnownFunction::ArrayPush, call)?;
    let mut elements = tracked_elements(rt, &array);
    elements.extend(call.args.iter().cloned());
    let len = elements.len();
    store_elements(rt, &array, elements);
    Ok(HandlerOutcome::new(Value::Number(len as f64)))
}

pub(super) fn pop(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let array = receiver_array(KnownFunction::ArrayPop, call)?;
    let mut elements = tracked_elements(rt, &array);
    let Some(last) = elements.pop() else {
        return Ok(HandlerOutcome::new(Value::Undefined));
    };
    store_elements(rt, &array, elements);
    Ok(HandlerOutcome::new(last.value).returning(last.tracking))
}

pub(super) fn shift(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let array = receiver_array(KnownFunction::ArrayShift, call)?;
    let mut elements = tracked_elements(rt, &array);
    if elements.is_empty() {
        return Ok(HandlerOutcome::new(Value::Undefined));
    }
    let first = elements.remove(0);
    store_elements(rt, &array, elements);
    Ok(HandlerOutcome::new(first.value).returning(first.tracking))
}

pub(super) fn unshift(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let array = receiver_array(KnownFunction::ArrayUnshift, call)?;
    let mut elements = call.args.to_vec();
    elements.extend(tracked_elements(rt, &array));
    let len = elements.len();
    store_elements(rt, &array, elements);
    Ok(HandlerOutcome::new(Value::Number(len as f64)))
}

pub(super) fn slice(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let array = receiver_array(KnownFunction::ArraySlice, call)?;
    let elements = tracked_elements(rt, &array);
    let len = elements.len();
    let start = relative_index(call.arg(0).value.to_number(), len);
    let end = match call.arg(1).value {
        Value::Undefined => len,
        other => relative_index(other.to_number(), len),
    };
    let selected = elements
        .into_iter()
        .skip(start)
        .take(end.saturating_sub(start))
        .collect();
    Ok(HandlerOutcome::new(new_array(rt, selected)))
}

pub(super) fn splice(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let array = receiver_array(KnownFunction::ArraySplice, call)?;
    let mut elements = tracked_elements(rt, &array);
    let len = elements.len();
    let start = relative_index(call.arg(0).value.to_number(), len);
    let delete_count = match call.args.len() {
        0 => 0,
        1 => len - start,
        _ => {
            let count = call.arg(1).value.to_number();
            if count.is_nan() || count <= 0.0 {
                0
            } else {
                (count.trunc() as usize).min(len - start)
            }
        }
    };
    let inserted = call.args.iter().skip(2).cloned();
    let removed: Vec<Tracked> = elements
        .splice(start..start + delete_count, inserted)
        .collect();
    store_elements(rt, &array, elements);
    Ok(HandlerOutcome::new(new_array(rt, removed)))
}

pub(super) fn concat(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let array = receiver_array(KnownFunction::ArrayConcat, call)?;
    let mut elements = tracked_elements(rt, &array);
    for arg in call.args {
        match &arg.value {
            Value::Array(other) => elements.extend(tracked_elements(rt, other)),
            _ => elements.push(arg.clone()),
        }
    }
    Ok(HandlerOutcome::new(new_array(rt, elements)))
}

fn callback_args(element: &Tracked, index: usize, array: &ArrayRef) -> Vec<Tracked> {
    vec![
        element.clone(),
        Tracked::untracked(Value::Number(index as f64)),
        Tracked::untracked(Value::Array(Rc::clone(array))),
    ]
}

pub(super) fn map(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let array = receiver_array(KnownFunction::ArrayMap, call)?;
    let callback = callback(KnownFunction::ArrayMap, call)?;
    let elements = tracked_elements(rt, &array);
    let mut mapped = Vec::with_capacity(elements.len());
    for (index, element) in elements.iter().enumerate() {
        let args = callback_args(element, index, &array);
        mapped.push(rt.call_expression(&callback, None, &args, call.loc())?);
    }
    Ok(HandlerOutcome::new(new_array(rt, mapped)))
}

pub(super) fn filter(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let array = receiver_array(KnownFunction::ArrayFilter, call)?;
    let callback = callback(KnownFunction::ArrayFilter, call)?;
    let elements = tracked_elements(rt, &array);
    let mut kept = Vec::new();
    for (index, element) in elements.into_iter().enumerate() {
        let args = callback_args(&element, index, &array);
        if rt
            .call_expression(&callback, None, &args, call.loc())?
            .value
            .truthy()
        {
            kept.push(element);
        }
    }
    Ok(HandlerOutcome::new(new_array(rt, kept)))
}

pub(super) fn reduce(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let array = receiver_array(KnownFunction::ArrayReduce, call)?;
    let callback = callback(KnownFunction::ArrayReduce, call)?;
    let elements = tracked_elements(rt, &array);
    let mut remaining = elements.into_iter().enumerate();
    let mut accumulator = if call.args.len() >= 2 {
        call.arg(1)
    } else {
        match remaining.next() {
            Some((_, first)) => first,
            None => {
                return Err(Error::ScriptRuntime(
                    "Reduce of empty array with no initial value".into(),
                ));
            }
        }
    };
    for (index, element) in remaining {
        let args = vec![
            accumulator,
            element,
            Tracked::untracked(Value::Number(index as f64)),
            Tracked::untracked(Value::Array(Rc::clone(&array))),
        ];
        accumulator = rt.call_expression(&callback, None, &args, call.loc())?;
    }
    Ok(HandlerOutcome::new(accumulator.value).returning(accumulator.tracking))
}

/// `join` keeps every element's text and the separator as extra arguments so
/// the traversal rule can walk the output.
pub(super) fn join(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let array = receiver_array(KnownFunction::ArrayJoin, call)?;
    let elements = tracked_elements(rt, &array);
    let separator = call.arg(0);
    let (separator_text, separator_tracking) = match &separator.value {
        Value::Undefined => {
            let id = rt.emit(
                RecordDraft::new(
                    Operation::DefaultArrayJoinSeparator,
                    ResultValue::String(",".into()),
                )
                .loc(call.loc()),
            );
            (",".to_string(), id)
        }
        other => (other.to_display_string(), separator.tracking),
    };

    let mut outcome = HandlerOutcome::default();
    let mut parts = Vec::with_capacity(elements.len());
    for (n, element) in elements.iter().enumerate() {
        let text = match element.value {
            Value::Undefined | Value::Null => String::new(),
            ref other => other.to_display_string(),
        };
        let tracking = match element.tracking {
            Some(id) => Some(id),
            None => rt.emit(
                RecordDraft::new(Operation::UntrackedValue, ResultValue::String(text.clone()))
                    .runtime(RuntimeArgs {
                        untracked_reason: Some("array element without provenance".into()),
                        ..RuntimeArgs::default()
                    })
                    .loc(call.loc()),
            ),
        };
        outcome = outcome.extra(
            format!("arrayValue{n}"),
            ArgRef::new(ResultValue::String(text.clone()), tracking),
        );
        parts.push(text);
    }
    outcome = outcome.extra(
        "separator",
        ArgRef::new(ResultValue::String(separator_text.clone()), separator_tracking),
    );
    outcome.value = Value::String(parts.join(&separator_text));
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLogStore;

    fn array_of(rt: &mut TrackingRuntime, items: &[&str]) -> Tracked {
        let elements = items
            .iter()
            .map(|item| rt.string_literal(item, None))
            .collect();
        rt.array_expression(elements, None)
    }

    #[test]
    fn shift_moves_provenance_down() -> Result<()> {
        let mut rt = TrackingRuntime::new(MemoryLogStore::new());
        let array = array_of(&mut rt, &["a", "b", "c"]);
        let before = rt.element_tracking(&array.value, 1);
        let call = NativeCall {
            this: Some(&array),
            args: &[],
            loc: None,
        };
        let outcome = shift(&mut rt, &call)?;
        assert_eq!(outcome.value.as_str(), Some("a"));
        assert_eq!(rt.element_tracking(&array.value, 0), before);
        assert_eq!(rt.element_tracking(&array.value, 2), None);
        Ok(())
    }

    #[test]
    fn splice_returns_removed_elements_with_their_provenance() -> Result<()> {
        let mut rt = TrackingRuntime::new(MemoryLogStore::new());
        let array = array_of(&mut rt, &["a", "b", "c"]);
        let b = rt.element_tracking(&array.value, 1);
        let c = rt.element_tracking(&array.value, 2);
        let start = Tracked::untracked(Value::Number(1.0));
        let count = Tracked::untracked(Value::Number(1.0));
        let inserted = rt.string_literal("x", None);
        let args = [start, count, inserted.clone()];
        let call = NativeCall {
            this: Some(&array),
            args: &args,
            loc: None,
        };
        let outcome = splice(&mut rt, &call)?;
        assert_eq!(rt.element_tracking(&outcome.value, 0), b);
        assert_eq!(rt.element_tracking(&array.value, 1), inserted.tracking);
        assert_eq!(rt.element_tracking(&array.value, 2), c);
        Ok(())
    }

    #[test]
    fn join_records_every_part() -> Result<()> {
        let mut rt = TrackingRuntime::new(MemoryLogStore::new());
        let array = array_of(&mut rt, &["a", "b"]);
        let call = NativeCall {
            this: Some(&array),
            args: &[],
            loc: None,
        };
        let outcome = join(&mut rt, &call)?;
        assert_eq!(outcome.value.as_str(), Some("a,b"));
        assert!(outcome.extra_args.contains_key("arrayValue1"));
        assert!(
            outcome
                .extra_args
                .get("separator")
                .is_some_and(|arg| arg.tracking.is_some())
        );
        Ok(())
    }
}
