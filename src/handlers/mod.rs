//! Built-ins whose provenance the generic call rule cannot express. Each
//! handler computes the script-visible result and the extra arguments and
//! runtime data the traversal rule for its call needs.

mod arrays;
mod dom_calls;
mod json_calls;
mod objects;
mod storage;
mod strings;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::operation_log::{ArgRef, Loc, LogId, RuntimeArgs};
use crate::runtime::{Tracked, TrackingRuntime};
use crate::values::{HostObject, Value};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KnownFunction {
    StringReplace,
    StringReplaceAll,
    StringMatch,
    StringSplit,
    StringSlice,
    StringSubstring,
    StringSubstr,
    StringTrim,
    StringToUpperCase,
    StringToLowerCase,
    StringConcat,
    JsonParse,
    JsonStringify,
    ArrayPush,
    ArrayPop,
    ArrayShift,
    ArrayUnshift,
    ArraySlice,
    ArraySplice,
    ArrayConcat,
    ArrayMap,
    ArrayFilter,
    ArrayReduce,
    ArrayJoin,
    ObjectKeys,
    ObjectEntries,
    ObjectAssign,
    CreateElement,
    CreateTextNode,
    CreateComment,
    CloneNode,
    SetAttribute,
    GetAttribute,
    AppendChild,
    InsertAdjacentHtml,
    DomParserConstructor,
    ParseFromString,
    StorageGetItem,
    StorageSetItem,
    StorageRemoveItem,
}

impl KnownFunction {
    pub fn name(self) -> &'static str {
        match self {
            Self::StringReplace => "String.prototype.replace",
            Self::StringReplaceAll => "String.prototype.replaceAll",
            Self::StringMatch => "String.prototype.match",
            Self::StringSplit => "String.prototype.split",
            Self::StringSlice => "String.prototype.slice",
            Self::StringSubstring => "String.prototype.substring",
            Self::StringSubstr => "String.prototype.substr",
            Self::StringTrim => "String.prototype.trim",
            Self::StringToUpperCase => "String.prototype.toUpperCase",
            Self::StringToLowerCase => "String.prototype.toLowerCase",
            Self::StringConcat => "String.prototype.concat",
            Self::JsonParse => "JSON.parse",
            Self::JsonStringify => "JSON.stringify",
            Self::ArrayPush => "Array.prototype.push",
            Self::ArrayPop => "Array.prototype.pop",
            Self::ArrayShift => "Array.prototype.shift",
            Self::ArrayUnshift => "Array.prototype.unshift",
            Self::ArraySlice => "Array.prototype.slice",
            Self::ArraySplice => "Array.prototype.splice",
            Self::ArrayConcat => "Array.prototype.concat",
            Self::ArrayMap => "Array.prototype.map",
            Self::ArrayFilter => "Array.prototype.filter",
            Self::ArrayReduce => "Array.prototype.reduce",
            Self::ArrayJoin => "Array.prototype.join",
            Self::ObjectKeys => "Object.keys",
            Self::ObjectEntries => "Object.entries",
            Self::ObjectAssign => "Object.assign",
            Self::CreateElement => "document.createElement",
            Self::CreateTextNode => "document.createTextNode",
            Self::CreateComment => "document.createComment",
            Self::CloneNode => "Node.prototype.cloneNode",
            Self::SetAttribute => "Element.prototype.setAttribute",
            Self::GetAttribute => "Element.prototype.getAttribute",
            Self::AppendChild => "Node.prototype.appendChild",
            Self::InsertAdjacentHtml => "Element.prototype.insertAdjacentHTML",
            Self::DomParserConstructor => "DOMParser",
            Self::ParseFromString => "DOMParser.prototype.parseFromString",
            Self::StorageGetItem => "Storage.prototype.getItem",
            Self::StorageSetItem => "Storage.prototype.setItem",
            Self::StorageRemoveItem => "Storage.prototype.removeItem",
        }
    }

    /// The built-in reached by reading `property` from `receiver`, if any.
    pub fn lookup(receiver: &Value, property: &str) -> Option<Self> {
        let known = match (receiver, property) {
            (Value::String(_), "replace") => Self::StringReplace,
            (Value::String(_), "replaceAll") => Self::StringReplaceAll,
            (Value::String(_), "match") => Self::StringMatch,
            (Value::String(_), "split") => Self::StringSplit,
            (Value::String(_), "slice") => Self::StringSlice,
            (Value::String(_), "substring") => Self::StringSubstring,
            (Value::String(_), "substr") => Self::StringSubstr,
            (Value::String(_), "trim") => Self::StringTrim,
            (Value::String(_), "toUpperCase") => Self::StringToUpperCase,
            (Value::String(_), "toLowerCase") => Self::StringToLowerCase,
            (Value::String(_), "concat") => Self::StringConcat,
            (Value::Array(_), "push") => Self::ArrayPush,
            (Value::Array(_), "pop") => Self::ArrayPop,
            (Value::Array(_), "shift") => Self::ArrayShift,
            (Value::Array(_), "unshift") => Self::ArrayUnshift,
            (Value::Array(_), "slice") => Self::ArraySlice,
            (Value::Array(_), "splice") => Self::ArraySplice,
            (Value::Array(_), "concat") => Self::ArrayConcat,
            (Value::Array(_), "map") => Self::ArrayMap,
            (Value::Array(_), "filter") => Self::ArrayFilter,
            (Value::Array(_), "reduce") => Self::ArrayReduce,
            (Value::Array(_), "join") => Self::ArrayJoin,
            (Value::Host(HostObject::Json), "parse") => Self::JsonParse,
            (Value::Host(HostObject::Json), "stringify") => Self::JsonStringify,
            (Value::Host(HostObject::Object), "keys") => Self::ObjectKeys,
            (Value::Host(HostObject::Object), "entries") => Self::ObjectEntries,
            (Value::Host(HostObject::Object), "assign") => Self::ObjectAssign,
            (Value::Host(HostObject::Document), "createElement") => Self::CreateElement,
            (Value::Host(HostObject::Document), "createTextNode") => Self::CreateTextNode,
            (Value::Host(HostObject::Document), "createComment") => Self::CreateComment,
            (Value::Node(_), "cloneNode") => Self::CloneNode,
            (Value::Node(_), "setAttribute") => Self::SetAttribute,
            (Value::Node(_), "getAttribute") => Self::GetAttribute,
            (Value::Node(_), "appendChild") => Self::AppendChild,
            (Value::Node(_), "insertAdjacentHTML") => Self::InsertAdjacentHtml,
            (Value::Host(HostObject::DomParser), "parseFromString") => Self::ParseFromString,
            (Value::Host(HostObject::LocalStorage), "getItem") => Self::StorageGetItem,
            (Value::Host(HostObject::LocalStorage), "setItem") => Self::StorageSetItem,
            (Value::Host(HostObject::LocalStorage), "removeItem") => Self::StorageRemoveItem,
            _ => return None,
        };
        Some(known)
    }
}

/// A call of a built-in. `args` are the call's `FunctionArgument` results.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NativeCall<'a> {
    pub(crate) this: Option<&'a Tracked>,
    pub(crate) args: &'a [Tracked],
    pub(crate) loc: Option<&'a Loc>,
}

impl<'a> NativeCall<'a> {
    /// Argument `index`, or an untracked `undefined`.
    pub(crate) fn arg(&self, index: usize) -> Tracked {
        self.args
            .get(index)
            .cloned()
            .unwrap_or_else(|| Tracked::untracked(Value::Undefined))
    }

    pub(crate) fn receiver(&self, known: KnownFunction) -> Result<&'a Tracked> {
        self.this.ok_or_else(|| {
            Error::ScriptRuntime(format!("{} called without a receiver", known.name()))
        })
    }

    pub(crate) fn loc(&self) -> Option<Loc> {
        self.loc.cloned()
    }
}

/// What a handler contributes to the call record.
#[derive(Debug, Clone, Default)]
pub(crate) struct HandlerOutcome {
    pub(crate) value: Value,
    /// Tracking of the returned value when it is not built from the call record
    /// itself (e.g. `pop` returns an element that already has provenance).
    pub(crate) return_tracking: Option<LogId>,
    pub(crate) extra_args: BTreeMap<String, ArgRef>,
    pub(crate) runtime_args: RuntimeArgs,
}

impl HandlerOutcome {
    pub(crate) fn new(value: Value) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    pub(crate) fn returning(mut self, tracking: Option<LogId>) -> Self {
        self.return_tracking = tracking;
        self
    }

    pub(crate) fn extra(mut self, name: impl Into<String>, arg: ArgRef) -> Self {
        self.extra_args.insert(name.into(), arg);
        self
    }

    pub(crate) fn runtime(mut self, runtime_args: RuntimeArgs) -> Self {
        self.runtime_args = runtime_args;
        self
    }
}

pub(crate) fn dispatch(
    rt: &mut TrackingRuntime,
    known: KnownFunction,
    call: &NativeCall<'_>,
) -> Result<HandlerOutcome> {
    tracing::trace!(target: "dataflow_tracer::handlers", function = known.name(), "special-case call");
    let mut outcome = match known {
        KnownFunction::StringReplace => strings::replace(rt, call, false),
        KnownFunction::StringReplaceAll => strings::replace(rt, call, true),
        KnownFunction::StringMatch => strings::match_pattern(rt, call),
        KnownFunction::StringSplit => strings::split(rt, call),
        KnownFunction::StringSlice
        | KnownFunction::StringSubstring
        | KnownFunction::StringSubstr
        | KnownFunction::StringTrim => strings::extract(known, call),
        KnownFunction::StringToUpperCase | KnownFunction::StringToLowerCase => {
            strings::change_case(known, call)
        }
        KnownFunction::StringConcat => strings::concat(call),
        KnownFunction::JsonParse => json_calls::parse(rt, call),
        KnownFunction::JsonStringify => json_calls::stringify(rt, call),
        KnownFunction::ArrayPush => arrays::push(rt, call),
        KnownFunction::ArrayPop => arrays::pop(rt, call),
        KnownFunction::ArrayShift => arrays::shift(rt, call),
        KnownFunction::ArrayUnshift => arrays::unshift(rt, call),
        KnownFunction::ArraySlice => arrays::slice(rt, call),
        KnownFunction::ArraySplice => arrays::splice(rt, call),
        KnownFunction::ArrayConcat => arrays::concat(rt, call),
        KnownFunction::ArrayMap => arrays::map(rt, call),
        KnownFunction::ArrayFilter => arrays::filter(rt, call),
        KnownFunction::ArrayReduce => arrays::reduce(rt, call),
        KnownFunction::ArrayJoin => arrays::join(rt, call),
        KnownFunction::ObjectKeys => objects::keys(rt, call),
        KnownFunction::ObjectEntries => objects::entries(rt, call),
        KnownFunction::ObjectAssign => objects::assign(rt, call),
        KnownFunction::CreateElement => dom_calls::create_element(rt, call),
        KnownFunction::CreateTextNode => dom_calls::create_character_data(rt, call, false),
        KnownFunction::CreateComment => dom_calls::create_character_data(rt, call, true),
        KnownFunction::CloneNode => dom_calls::clone_node(rt, call),
        KnownFunction::SetAttribute => dom_calls::set_attribute(rt, call),
        KnownFunction::GetAttribute => dom_calls::get_attribute(rt, call),
        KnownFunction::AppendChild => dom_calls::append_child(rt, call),
        KnownFunction::InsertAdjacentHtml => dom_calls::insert_adjacent_html(rt, call),
        KnownFunction::DomParserConstructor => {
            Ok(HandlerOutcome::new(Value::Host(HostObject::DomParser)))
        }
        KnownFunction::ParseFromString => dom_calls::parse_from_string(rt, call),
        KnownFunction::StorageGetItem => storage::get_item(rt, call),
        KnownFunction::StorageSetItem => storage::set_item(rt, call),
        KnownFunction::StorageRemoveItem => storage::remove_item(rt, call),
    }?;
    outcome.runtime_args.known_function = Some(known);
    Ok(outcome)
}

/// The receiver's string, for `String.prototype` methods.
pub(crate) fn receiver_text(known: KnownFunction, call: &NativeCall<'_>) -> Result<String> {
    match &call.receiver(known)?.value {
        Value::String(text) => Ok(text.clone()),
        other => Err(Error::ScriptRuntime(format!(
            "{} called on {}",
            known.name(),
            other.to_display_string()
        ))),
    }
}

pub(crate) fn arg_ref(tracked: &Tracked) -> ArgRef {
    ArgRef::new(tracked.value.summarize(), tracked.tracking)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_depends_on_the_receiver() {
        assert_eq!(
            KnownFunction::lookup(&Value::from("x"), "slice"),
            Some(KnownFunction::StringSlice)
        );
        assert_eq!(
            KnownFunction::lookup(&Value::new_array(Vec::new()), "slice"),
            Some(KnownFunction::ArraySlice)
        );
        assert_eq!(KnownFunction::lookup(&Value::Null, "slice"), None);
        assert_eq!(
            KnownFunction::lookup(&Value::Host(HostObject::Json), "parse").map(KnownFunction::name),
            Some("JSON.parse")
        );
        assert_eq!(
            KnownFunction::lookup(&Value::Host(HostObject::DomParser), "parseFromString"),
            Some(KnownFunction::ParseFromString)
        );
        assert_eq!(
            KnownFunction::lookup(&Value::Host(HostObject::LocalStorage), "getItem"),
            Some(KnownFunction::StorageGetItem)
        );
        assert_eq!(KnownFunction::lookup(&Value::Host(HostObject::Document), "getItem"), None);
    }
}
