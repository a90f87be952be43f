use crate::handlers::{HandlerOutcome, NativeCall};
use crate::runtime::TrackingRuntime;
use crate::values::Value;
use crate::Result;

/// Stored strings have no provenance beyond the storage itself, so the
/// returned value is a `LocalStorageValue` leaf.
pub(super) fn get_item(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let key = call.arg(0).value.to_display_string();
    let loc = call.loc();
    let (value, tracking) = rt.read_storage_item(&key, &loc);
    Ok(HandlerOutcome::new(value.unwrap_or(Value::Null)).returning(tracking))
}

pub(super) fn set_item(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let key = call.arg(0).value.to_display_string();
    let value = call.arg(1).value.to_display_string();
    rt.set_local_storage_item(&key, &value);
    Ok(HandlerOutcome::new(Value::Undefined))
}

pub(super) fn remove_item(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let key = call.arg(0).value.to_display_string();
    rt.remove_local_storage_item(&key);
    Ok(HandlerOutcome::new(Value::Undefined))
}
