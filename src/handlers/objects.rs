use crate::handlers::{HandlerOutcome, NativeCall};
use crate::runtime::{PropertyTracking, TrackingRuntime};
use crate::values::Value;
use crate::{Error, Result};

/// `(key, value, provenance)` of every own property of an object or array.
fn own_properties(rt: &TrackingRuntime, value: &Value) -> Vec<(String, Value, PropertyTracking)> {
    match value {
        Value::Object(object) => {
            let object = object.borrow();
            let owner = object.id();
            object
                .entries()
                .iter()
                .map(|(key, value)| (key.clone(), value.clone(), rt.property_tracking(owner, key)))
                .collect()
        }
        Value::Array(array) => {
            let array = array.borrow();
            let owner = array.id();
            array
                .iter()
                .enumerate()
                .map(|(index, value)| {
                    let key = index.to_string();
                    let tracking = rt.property_tracking(owner, &key);
                    (key, value.clone(), tracking)
                })
                .collect()
        }
        Value::String(text) => text
            .chars()
            .enumerate()
            .map(|(index, ch)| {
                (index.to_string(), Value::String(ch.to_string()), PropertyTracking::default())
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn require_object(name: &str, value: &Value) -> Result<()> {
    if matches!(value, Value::Undefined | Value::Null) {
        return Err(Error::ScriptRuntime(format!(
            "{name}: cannot convert undefined or null to object"
        )));
    }
    Ok(())
}

pub(super) fn keys(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let target = call.arg(0).value;
    require_object("Object.keys", &target)?;
    let (keys, trackings): (Vec<Value>, Vec<_>) = own_properties(rt, &target)
        .into_iter()
        .map(|(key, _, tracking)| (Value::String(key), tracking.name))
        .unzip();
    let array = Value::new_array(keys);
    if let Some(owner) = array.object_id() {
        rt.set_element_trackings(owner, trackings);
    }
    Ok(HandlerOutcome::new(array))
}

pub(super) fn entries(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let target = call.arg(0).value;
    require_object("Object.entries", &target)?;
    let mut pairs = Vec::new();
    for (key, value, tracking) in own_properties(rt, &target) {
        let pair = Value::new_array(vec![Value::String(key), value]);
        if let Some(owner) = pair.object_id() {
            rt.set_element_trackings(owner, vec![tracking.name, tracking.value]);
        }
        pairs.push(pair);
    }
    Ok(HandlerOutcome::new(Value::new_array(pairs)))
}

/// Copies properties and their provenance onto the target, which is returned.
pub(super) fn assign(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let target = call.arg(0);
    let Value::Object(object) = &target.value else {
        return Err(Error::ScriptRuntime(
            "Object.assign target must be an object".into(),
        ));
    };
    let owner = object.borrow().id();
    for source in call.args.iter().skip(1) {
        for (key, value, tracking) in own_properties(rt, &source.value) {
            object.borrow_mut().set_entry(key.clone(), value);
            rt.set_property_tracking(owner, key, tracking);
        }
    }
    Ok(HandlerOutcome::new(target.value.clone()).returning(target.tracking))
}
