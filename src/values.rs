use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::Result;
use crate::dom::NodeId;
use crate::handlers::KnownFunction;
use crate::js_regex::{Regex, RegexError};
use crate::operation_log::ResultValue;
use crate::runtime::{CallFrame, TrackingRuntime};

static NEXT_OBJECT_ID: AtomicUsize = AtomicUsize::new(1);

/// Identity of an array or object, used to key property provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(usize);

impl ObjectId {
    fn next() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug)]
pub struct ObjectValue {
    id: ObjectId,
    entries: Vec<(String, Value)>,
    index_by_key: HashMap<String, usize>,
}

impl Default for ObjectValue {
    fn default() -> Self {
        Self {
            id: ObjectId::next(),
            entries: Vec::new(),
            index_by_key: HashMap::new(),
        }
    }
}

impl ObjectValue {
    pub fn new(entries: Vec<(String, Value)>) -> Self {
        let mut value = Self::default();
        for (key, entry_value) in entries {
            value.set_entry(key, entry_value);
        }
        value
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn set_entry(&mut self, key: String, value: Value) {
        if let Some(index) = self.index_by_key.get(&key).copied() {
            if let Some((_, existing)) = self.entries.get_mut(index) {
                *existing = value;
                return;
            }
        }
        let index = self.entries.len();
        self.entries.push((key.clone(), value));
        self.index_by_key.insert(key, index);
    }

    pub fn get_entry(&self, key: &str) -> Option<Value> {
        self.index_by_key
            .get(key)
            .and_then(|index| self.entries.get(*index))
            .map(|(_, value)| value.clone())
    }

    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Arrays are stored densely, so writes that would grow one past this many
/// elements fail with a `RangeError` instead of materializing every hole.
pub const MAX_DENSE_ARRAY_LENGTH: usize = 1 << 20;

#[derive(Debug)]
pub struct ArrayValue {
    id: ObjectId,
    pub elements: Vec<Value>,
}

impl ArrayValue {
    pub fn new(elements: Vec<Value>) -> Self {
        Self {
            id: ObjectId::next(),
            elements,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }
}

impl std::ops::Deref for ArrayValue {
    type Target = Vec<Value>;

    fn deref(&self) -> &Self::Target {
        &self.elements
    }
}

impl std::ops::DerefMut for ArrayValue {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.elements
    }
}

#[derive(Debug)]
pub struct RegexValue {
    pub source: String,
    pub flags: String,
    pub global: bool,
    pub(crate) compiled: Regex,
}

impl RegexValue {
    pub fn new(source: &str, flags: &str) -> Result<Self> {
        let compiled = Regex::with_flags(source, flags).map_err(regex_error)?;
        Ok(Self {
            source: source.to_string(),
            flags: flags.to_string(),
            global: flags.contains('g'),
            compiled,
        })
    }
}

pub(crate) fn regex_error(err: RegexError) -> crate::Error {
    crate::Error::ScriptRuntime(format!("invalid regular expression: {err}"))
}

pub type ScriptBody = Rc<dyn Fn(&mut TrackingRuntime, &mut CallFrame) -> Result<Value>>;
pub type NativeBody = Rc<dyn Fn(&[Value]) -> Result<Value>>;

pub enum FunctionValue {
    /// A built-in with provenance-aware handling.
    Builtin(KnownFunction),
    /// An instrumented function; it reports its return through
    /// [`TrackingRuntime::return_statement`].
    Script { name: String, body: ScriptBody },
    /// An uninstrumented function; its result is tracked only best-effort.
    Native { name: String, body: NativeBody },
}

impl FunctionValue {
    pub fn name(&self) -> &str {
        match self {
            Self::Builtin(known) => known.name(),
            Self::Script { name, .. } | Self::Native { name, .. } => name,
        }
    }
}

impl fmt::Debug for FunctionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin(known) => write!(f, "Builtin({known:?})"),
            Self::Script { name, .. } => write!(f, "Script({name})"),
            Self::Native { name, .. } => write!(f, "Native({name})"),
        }
    }
}

/// Host globals reachable from instrumented code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostObject {
    Document,
    Json,
    Object,
    LocalStorage,
    /// An instance made by `new DOMParser()`.
    DomParser,
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Rc<RefCell<ArrayValue>>),
    Object(Rc<RefCell<ObjectValue>>),
    Function(Rc<FunctionValue>),
    RegExp(Rc<RegexValue>),
    Node(NodeId),
    Host(HostObject),
}

impl Value {
    pub fn string(text: impl Into<String>) -> Self {
        Self::String(text.into())
    }

    pub fn new_array(elements: Vec<Value>) -> Self {
        Self::Array(Rc::new(RefCell::new(ArrayValue::new(elements))))
    }

    pub fn new_object(entries: Vec<(String, Value)>) -> Self {
        Self::Object(Rc::new(RefCell::new(ObjectValue::new(entries))))
    }

    pub fn new_regex(source: &str, flags: &str) -> Result<Self> {
        Ok(Self::RegExp(Rc::new(RegexValue::new(source, flags)?)))
    }

    pub fn script_function(
        name: impl Into<String>,
        body: impl Fn(&mut TrackingRuntime, &mut CallFrame) -> Result<Value> + 'static,
    ) -> Self {
        Self::Function(Rc::new(FunctionValue::Script {
            name: name.into(),
            body: Rc::new(body),
        }))
    }

    pub fn native_function(
        name: impl Into<String>,
        body: impl Fn(&[Value]) -> Result<Value> + 'static,
    ) -> Self {
        Self::Function(Rc::new(FunctionValue::Native {
            name: name.into(),
            body: Rc::new(body),
        }))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(text) => Some(text),
            _ => None,
        }
    }

    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            Self::Array(array) => Some(array.borrow().id()),
            Self::Object(object) => Some(object.borrow().id()),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(value) => *value,
            Self::Number(value) => *value != 0.0 && !value.is_nan(),
            Self::String(text) => !text.is_empty(),
            _ => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(value) => f64::from(u8::from(*value)),
            Self::Number(value) => *value,
            Self::String(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            _ => f64::NAN,
        }
    }

    /// Script `ToString` conversion.
    pub fn to_display_string(&self) -> String {
        let mut array_stack = Vec::new();
        self.to_display_string_inner(&mut array_stack)
    }

    fn to_display_string_inner(&self, array_stack: &mut Vec<usize>) -> String {
        match self {
            Self::Undefined => "undefined".to_string(),
            Self::Null => "null".to_string(),
            Self::Bool(value) => value.to_string(),
            Self::Number(value) => format_number(*value),
            Self::String(text) => text.clone(),
            Self::Array(array) => {
                let ptr = Rc::as_ptr(array) as usize;
                if array_stack.contains(&ptr) {
                    return String::new();
                }
                array_stack.push(ptr);
                let out = array
                    .borrow()
                    .iter()
                    .map(|item| match item {
                        Self::Undefined | Self::Null => String::new(),
                        other => other.to_display_string_inner(array_stack),
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                array_stack.pop();
                out
            }
            Self::Object(_) => "[object Object]".to_string(),
            Self::Function(function) => {
                format!("function {}() {{ [native code] }}", function.name())
            }
            Self::RegExp(regex) => format!("/{}/{}", regex.source, regex.flags),
            Self::Node(_) => "[object Node]".to_string(),
            Self::Host(HostObject::Document) => "[object HTMLDocument]".to_string(),
            Self::Host(HostObject::Json) => "[object JSON]".to_string(),
            Self::Host(HostObject::Object) => "function Object() { [native code] }".to_string(),
            Self::Host(HostObject::LocalStorage) => "[object Storage]".to_string(),
            Self::Host(HostObject::DomParser) => "[object DOMParser]".to_string(),
        }
    }

    pub fn summarize(&self) -> ResultValue {
        match self {
            Self::Undefined => ResultValue::Undefined,
            Self::Null => ResultValue::Null,
            Self::Bool(value) => ResultValue::Bool(*value),
            Self::Number(value) => ResultValue::Number(*value),
            Self::String(text) => ResultValue::String(text.clone()),
            Self::Array(array) => ResultValue::Array {
                length: array.borrow().len(),
            },
            Self::Object(_) | Self::Host(_) => ResultValue::Object,
            Self::Function(function) => ResultValue::Function(function.name().to_string()),
            Self::RegExp(regex) => ResultValue::RegExp {
                source: regex.source.clone(),
                flags: regex.flags.clone(),
            },
            Self::Node(node) => ResultValue::Node(node.0),
        }
    }

    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::RegExp(a), Self::RegExp(b)) => Rc::ptr_eq(a, b),
            (Self::Node(a), Self::Node(b)) => a == b,
            (Self::Host(a), Self::Host(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

pub(crate) fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value == f64::INFINITY {
        return "Infinity".to_string();
    }
    if value == f64::NEG_INFINITY {
        return "-Infinity".to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }

    let abs = value.abs();
    if (1e-6..1e21).contains(&abs) {
        return format!("{value}");
    }

    let raw = format!("{value:e}");
    let Some(exp_idx) = raw.find('e') else {
        return raw;
    };
    let mantissa = &raw[..exp_idx];
    let exponent = raw[exp_idx + 1..].parse::<i32>().unwrap_or(0);
    format!("{mantissa}e{exponent:+}")
}

pub(crate) fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Chars `[start, end)` of `text`, clamped to its length.
pub(crate) fn char_slice(text: &str, start: usize, end: usize) -> String {
    if end <= start {
        return String::new();
    }
    text.chars().skip(start).take(end - start).collect()
}

/// Char index of the first occurrence of `needle` at or after char `from`.
pub(crate) fn char_index_of(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let byte_from = haystack
        .char_indices()
        .nth(from)
        .map(|(idx, _)| idx)
        .or_else(|| (from == char_len(haystack)).then_some(haystack.len()))?;
    let found = haystack.get(byte_from..)?.find(needle)?;
    Some(from + char_len(&haystack[byte_from..byte_from + found]))
}

/// Resolves a relative index the way `slice` does: negative counts from the end.
pub(crate) fn relative_index(value: f64, len: usize) -> usize {
    if value.is_nan() {
        return 0;
    }
    let len_f = len as f64;
    let resolved = if value < 0.0 {
        (len_f + value.trunc()).max(0.0)
    } else {
        value.trunc().min(len_f)
    };
    resolved as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_format_like_scripts() {
        assert_eq!(format_number(1.0), "1");
        assert_eq!(format_number(-2.5), "-2.5");
        assert_eq!(format_number(1e21), "1e+21");
        assert_eq!(format_number(1e-7), "1e-7");
        assert_eq!(format_number(f64::NAN), "NaN");
    }

    #[test]
    fn arrays_join_with_commas_and_skip_nullish() {
        let value = Value::new_array(vec![
            Value::from(1.0),
            Value::Null,
            Value::from("x"),
        ]);
        assert_eq!(value.to_display_string(), "1,,x");
    }

    #[test]
    fn char_helpers_use_scalar_offsets() {
        assert_eq!(char_slice("héllo", 1, 3), "él");
        assert_eq!(char_index_of("aéb-éb", "éb", 2), Some(4));
        assert_eq!(char_index_of("abc", "", 3), Some(3));
        assert_eq!(relative_index(-1.0, 5), 4);
        assert_eq!(relative_index(9.0, 5), 5);
    }

    #[test]
    fn object_ids_are_distinct() {
        let a = Value::new_object(Vec::new());
        let b = Value::new_array(Vec::new());
        assert_ne!(a.object_id(), b.object_id());
    }
}
