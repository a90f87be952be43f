use super::*;

use crate::values::{MAX_DENSE_ARRAY_LENGTH, char_len, char_slice};

/// A property read before it is recorded.
struct PropertyRead {
    value: Value,
    /// Side-table provenance of the stored value.
    tracking: Option<LogId>,
    /// Char offset into the object when it is a string.
    start: Option<usize>,
}

impl PropertyRead {
    fn plain(value: Value) -> Self {
        Self {
            value,
            tracking: None,
            start: None,
        }
    }
}

fn type_error(message: String) -> Error {
    Error::ScriptRuntime(format!("TypeError: {message}"))
}

fn check_dense_length(length: usize) -> Result<()> {
    if length > MAX_DENSE_ARRAY_LENGTH {
        return Err(Error::ScriptRuntime(format!(
            "RangeError: array length {length} exceeds the dense limit of {MAX_DENSE_ARRAY_LENGTH}"
        )));
    }
    Ok(())
}

impl TrackingRuntime {
    fn literal(&mut self, value: Value, loc: Option<Loc>) -> Tracked {
        let tracking = self.emit(RecordDraft::new(Operation::Literal, value.summarize()).loc(loc));
        Tracked::new(value, tracking)
    }

    pub fn string_literal(&mut self, text: &str, loc: Option<Loc>) -> Tracked {
        self.literal(Value::from(text), loc)
    }

    pub fn number_literal(&mut self, value: f64, loc: Option<Loc>) -> Tracked {
        self.literal(Value::Number(value), loc)
    }

    pub fn boolean_literal(&mut self, value: bool, loc: Option<Loc>) -> Tracked {
        self.literal(Value::Bool(value), loc)
    }

    pub fn null_literal(&mut self, loc: Option<Loc>) -> Tracked {
        self.literal(Value::Null, loc)
    }

    /// Fails when the pattern does not compile, like the script would.
    pub fn regex_literal(&mut self, source: &str, flags: &str, loc: Option<Loc>) -> Result<Tracked> {
        let value = Value::new_regex(source, flags)?;
        Ok(self.literal(value, loc))
    }

    /// Marks a value that enters tracked code without provenance.
    pub fn untracked(&mut self, value: Value, reason: &str) -> Tracked {
        let tracking = self.emit(
            RecordDraft::new(Operation::UntrackedValue, value.summarize()).runtime(RuntimeArgs {
                untracked_reason: Some(reason.to_string()),
                ..RuntimeArgs::default()
            }),
        );
        Tracked::new(value, tracking)
    }

    pub fn identifier(&mut self, value: &Tracked, loc: Option<Loc>) -> Tracked {
        let tracking = self.emit(
            RecordDraft::new(Operation::Identifier, value.value.summarize())
                .arg("value", arg_ref(value))
                .loc(loc),
        );
        Tracked::new(value.value.clone(), tracking)
    }

    /// Host globals. They carry no provenance of their own.
    pub fn global(&self, name: &str) -> Result<Tracked> {
        let host = match name {
            "document" => HostObject::Document,
            "JSON" => HostObject::Json,
            "Object" => HostObject::Object,
            "localStorage" => HostObject::LocalStorage,
            "DOMParser" => {
                return Ok(Tracked::untracked(Value::Function(Rc::new(
                    FunctionValue::Builtin(KnownFunction::DomParserConstructor),
                ))));
            }
            other => {
                return Err(Error::ScriptRuntime(format!(
                    "ReferenceError: {other} is not defined"
                )));
            }
        };
        Ok(Tracked::untracked(Value::Host(host)))
    }

    fn read_property(&self, object: &Tracked, key: &str) -> Result<PropertyRead> {
        let read = match &object.value {
            Value::Undefined | Value::Null => {
                return Err(type_error(format!(
                    "Cannot read properties of {} (reading '{key}')",
                    object.value.to_display_string()
                )));
            }
            Value::String(text) => {
                if key == "length" {
                    PropertyRead::plain(Value::Number(char_len(text) as f64))
                } else if let Ok(index) = key.parse::<usize>() {
                    match text.chars().nth(index) {
                        Some(ch) => PropertyRead {
                            value: Value::String(ch.to_string()),
                            tracking: object.tracking,
                            start: Some(index),
                        },
                        None => PropertyRead::plain(Value::Undefined),
                    }
                } else {
                    PropertyRead::plain(self.builtin_or_undefined(&object.value, key))
                }
            }
            Value::Array(array) => {
                if key == "length" {
                    PropertyRead::plain(Value::Number(array.borrow().len() as f64))
                } else if let Ok(index) = key.parse::<usize>() {
                    let value = array.borrow().get(index).cloned().unwrap_or_default();
                    PropertyRead {
                        value,
                        tracking: self.property_value_tracking(&object.value, key),
                        start: None,
                    }
                } else {
                    PropertyRead::plain(self.builtin_or_undefined(&object.value, key))
                }
            }
            Value::Object(inner) => {
                let value = inner.borrow().get_entry(key).unwrap_or_default();
                PropertyRead {
                    value,
                    tracking: self.property_value_tracking(&object.value, key),
                    start: None,
                }
            }
            Value::RegExp(regex) => PropertyRead::plain(match key {
                "source" => Value::String(regex.source.clone()),
                "flags" => Value::String(regex.flags.clone()),
                "global" => Value::Bool(regex.global),
                _ => Value::Undefined,
            }),
            Value::Function(function) if key == "name" => {
                PropertyRead::plain(Value::String(function.name().to_string()))
            }
            other => PropertyRead::plain(self.builtin_or_undefined(other, key)),
        };
        Ok(read)
    }

    fn builtin_or_undefined(&self, receiver: &Value, key: &str) -> Value {
        match KnownFunction::lookup(receiver, key) {
            Some(known) => Value::Function(Rc::new(FunctionValue::Builtin(known))),
            None => Value::Undefined,
        }
    }

    pub fn member_expression(
        &mut self,
        object: &Tracked,
        property: &str,
        loc: Option<Loc>,
    ) -> Result<Tracked> {
        let read = match &object.value {
            Value::Node(node) if KnownFunction::lookup(&object.value, property).is_none() => {
                let (value, tracking) = self.read_node_property(object, *node, property, &loc)?;
                PropertyRead {
                    value,
                    tracking,
                    start: None,
                }
            }
            Value::Host(HostObject::Document)
                if KnownFunction::lookup(&object.value, property).is_none() =>
            {
                PropertyRead::plain(self.document_property(self.dom.root(), property))
            }
            Value::Host(HostObject::LocalStorage)
                if KnownFunction::lookup(&object.value, property).is_none() =>
            {
                let (value, tracking) = self.read_storage_item(property, &loc);
                PropertyRead {
                    value: value.unwrap_or_default(),
                    tracking,
                    start: None,
                }
            }
            _ => self.read_property(object, property)?,
        };
        let mut draft = RecordDraft::new(Operation::MemberExpression, read.value.summarize())
            .arg("object", arg_ref(object))
            .arg(
                "propertyName",
                ArgRef::new(ResultValue::String(property.to_string()), None),
            )
            .loc(loc);
        match read.start {
            Some(start) => {
                draft = draft.runtime(RuntimeArgs {
                    start: Some(start),
                    ..RuntimeArgs::default()
                });
            }
            None => {
                if read.tracking.is_some() {
                    draft = draft.extra(
                        "propertyValue",
                        ArgRef::new(read.value.summarize(), read.tracking),
                    );
                }
            }
        }
        let tracking = self.emit(draft);
        Ok(Tracked::new(read.value, tracking))
    }

    pub fn binary_expression(
        &mut self,
        operator: &str,
        left: &Tracked,
        right: &Tracked,
        loc: Option<Loc>,
    ) -> Result<Tracked> {
        let (l, r) = (&left.value, &right.value);
        let value = match operator {
            "+" => {
                let primitive = |value: &Value| {
                    matches!(
                        value,
                        Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_)
                    )
                };
                if primitive(l) && primitive(r) {
                    Value::Number(l.to_number() + r.to_number())
                } else {
                    let mut text = l.to_display_string();
                    text.push_str(&r.to_display_string());
                    Value::String(text)
                }
            }
            "-" => Value::Number(l.to_number() - r.to_number()),
            "*" => Value::Number(l.to_number() * r.to_number()),
            "/" => Value::Number(l.to_number() / r.to_number()),
            "%" => Value::Number(l.to_number() % r.to_number()),
            "===" => Value::Bool(l.same_value(r)),
            "!==" => Value::Bool(!l.same_value(r)),
            "<" | ">" | "<=" | ">=" => Value::Bool(compare(operator, l, r)),
            other => {
                return Err(Error::ScriptRuntime(format!(
                    "unsupported binary operator '{other}'"
                )));
            }
        };
        let tracking = self.emit(
            RecordDraft::new(Operation::BinaryExpression, value.summarize())
                .operator(operator)
                .arg("left", arg_ref(left))
                .arg("right", arg_ref(right))
                .loc(loc),
        );
        Ok(Tracked::new(value, tracking))
    }

    /// `test ? a : b` once evaluated; `result` is the branch that was taken.
    pub fn conditional_expression(
        &mut self,
        test: &Tracked,
        result: &Tracked,
        loc: Option<Loc>,
    ) -> Tracked {
        let tracking = self.emit(
            RecordDraft::new(Operation::ConditionalExpression, result.value.summarize())
                .arg("test", arg_ref(test))
                .arg("result", arg_ref(result))
                .loc(loc),
        );
        Tracked::new(result.value.clone(), tracking)
    }

    /// Quasis and substitutions in source order.
    pub fn template_literal(&mut self, parts: &[Tracked], loc: Option<Loc>) -> Tracked {
        let text: String = parts
            .iter()
            .map(|part| part.value.to_display_string())
            .collect();
        let mut draft = RecordDraft::new(Operation::TemplateLiteral, ResultValue::String(text.clone()));
        for (index, part) in parts.iter().enumerate() {
            let summary = ResultValue::String(part.value.to_display_string());
            draft = draft.arg(format!("part{index}"), ArgRef::new(summary, part.tracking));
        }
        let tracking = self.emit(draft.loc(loc));
        Tracked::new(Value::String(text), tracking)
    }

    /// `{ key: value, ... }`. Each property gets its own record; the object
    /// record itself has no character mapping.
    pub fn object_expression(
        &mut self,
        properties: Vec<(Tracked, Tracked)>,
        loc: Option<Loc>,
    ) -> Tracked {
        let object = Rc::new(RefCell::new(ObjectValue::default()));
        let owner = object.borrow().id();
        for (key, value) in properties {
            let name = key.value.to_display_string();
            let property = self.emit(
                RecordDraft::new(Operation::ObjectProperty, value.value.summarize())
                    .arg("propertyKey", arg_ref(&key))
                    .arg("propertyValue", arg_ref(&value))
                    .loc(loc.clone()),
            );
            object.borrow_mut().set_entry(name.clone(), value.value);
            self.set_property_tracking(
                owner,
                name,
                PropertyTracking {
                    value: property,
                    name: key.tracking,
                },
            );
        }
        let value = Value::Object(object);
        let tracking =
            self.emit(RecordDraft::new(Operation::ObjectExpression, value.summarize()).loc(loc));
        Tracked::new(value, tracking)
    }

    pub fn array_expression(&mut self, elements: Vec<Tracked>, loc: Option<Loc>) -> Tracked {
        let (values, trackings): (Vec<Value>, Vec<Option<LogId>>) = elements
            .into_iter()
            .map(|element| (element.value, element.tracking))
            .unzip();
        let array = Value::new_array(values);
        if let Some(owner) = array.object_id() {
            self.set_element_trackings(owner, trackings);
        }
        let tracking =
            self.emit(RecordDraft::new(Operation::ArrayExpression, array.summarize()).loc(loc));
        Tracked::new(array, tracking)
    }

    fn compound(
        &mut self,
        operator: &str,
        current: impl FnOnce(&mut Self) -> Result<Tracked>,
        argument: &Tracked,
        loc: &Option<Loc>,
    ) -> Result<Tracked> {
        match operator {
            "=" => Ok(argument.clone()),
            "+=" => {
                let current = current(self)?;
                self.binary_expression("+", &current, argument, loc.clone())
            }
            other => Err(Error::ScriptRuntime(format!(
                "unsupported assignment operator '{other}'"
            ))),
        }
    }

    /// `name = argument` or `name += argument`; `current` is the variable's
    /// value before the assignment.
    pub fn assign_identifier(
        &mut self,
        current: &Tracked,
        operator: &str,
        argument: &Tracked,
        loc: Option<Loc>,
    ) -> Result<Tracked> {
        let assigned = self.compound(operator, |_| Ok(current.clone()), argument, &loc)?;
        let tracking = self.emit(
            RecordDraft::new(Operation::AssignmentExpression, assigned.value.summarize())
                .operator(operator)
                .arg("argument", arg_ref(&assigned))
                .loc(loc),
        );
        Ok(Tracked::new(assigned.value, tracking))
    }

    /// `object[property] = argument`. Writes to DOM nodes update the document
    /// and its origin table.
    pub fn assign_member(
        &mut self,
        object: &Tracked,
        property: &str,
        operator: &str,
        argument: &Tracked,
        loc: Option<Loc>,
    ) -> Result<Tracked> {
        if matches!(object.value, Value::Undefined | Value::Null) {
            return Err(type_error(format!(
                "Cannot set properties of {} (setting '{property}')",
                object.value.to_display_string()
            )));
        }
        if matches!(object.value, Value::Node(_)) && property == "outerHTML" {
            return Err(Error::ScriptRuntime(
                "outerHTML assignment is not supported".into(),
            ));
        }
        let assigned = self.compound(
            operator,
            |rt| rt.member_expression(object, property, loc.clone()),
            argument,
            &loc,
        )?;
        let tracking = self.emit(
            RecordDraft::new(Operation::AssignmentExpression, assigned.value.summarize())
                .operator(operator)
                .arg("argument", arg_ref(&assigned))
                .arg("object", arg_ref(object))
                .arg(
                    "propertyName",
                    ArgRef::new(ResultValue::String(property.to_string()), None),
                )
                .loc(loc),
        );
        let stored = PropertyTracking {
            value: tracking,
            name: None,
        };
        match &object.value {
            Value::Object(inner) => {
                let owner = inner.borrow().id();
                inner
                    .borrow_mut()
                    .set_entry(property.to_string(), assigned.value.clone());
                self.set_property_tracking(owner, property, stored);
            }
            Value::Array(array) => {
                let owner = array.borrow().id();
                if let Ok(index) = property.parse::<usize>() {
                    check_dense_length(index.saturating_add(1))?;
                    {
                        let mut array = array.borrow_mut();
                        if array.len() <= index {
                            array.elements.resize(index + 1, Value::Undefined);
                        }
                        array.elements[index] = assigned.value.clone();
                    }
                    self.set_property_tracking(owner, property, stored);
                } else if property == "length" {
                    let length = assigned.value.to_number();
                    if length.fract() != 0.0 || length < 0.0 {
                        return Err(Error::ScriptRuntime("RangeError: Invalid array length".into()));
                    }
                    let length = length as usize;
                    check_dense_length(length)?;
                    let mut trackings = self.element_trackings(array);
                    array.borrow_mut().elements.resize(length, Value::Undefined);
                    trackings.resize(length, None);
                    self.set_element_trackings(owner, trackings);
                }
            }
            Value::Node(node) => self.write_node_property(*node, property, &assigned.value, tracking)?,
            Value::Host(HostObject::LocalStorage) => {
                self.set_local_storage_item(property, &assigned.value.to_display_string());
            }
            _ => {}
        }
        Ok(Tracked::new(assigned.value, tracking))
    }

    /// `const { key } = source` or `const [a, b] = source` for one binding.
    pub fn destructure_property(
        &mut self,
        source: &Tracked,
        key: &str,
        loc: Option<Loc>,
    ) -> Result<Tracked> {
        let read = self.read_property(source, key)?;
        let value_arg = match read.start {
            Some(_) => arg_ref(source),
            None => ArgRef::new(read.value.summarize(), read.tracking),
        };
        let tracking = self.emit(
            RecordDraft::new(Operation::Destructuring, read.value.summarize())
                .arg("value", value_arg)
                .arg("key", ArgRef::new(ResultValue::String(key.to_string()), None))
                .runtime(RuntimeArgs {
                    start: read.start,
                    ..RuntimeArgs::default()
                })
                .loc(loc),
        );
        Ok(Tracked::new(read.value, tracking))
    }

    pub fn destructure_index(
        &mut self,
        source: &Tracked,
        index: usize,
        loc: Option<Loc>,
    ) -> Result<Tracked> {
        self.destructure_property(source, &index.to_string(), loc)
    }

    /// Element `index` of a `for (const x of iterable)` loop.
    pub fn for_of_element(
        &mut self,
        iterable: &Tracked,
        index: usize,
        loc: Option<Loc>,
    ) -> Result<Tracked> {
        let (value, element_tracking) = match &iterable.value {
            Value::String(text) => (Value::String(char_slice(text, index, index + 1)), None),
            Value::Array(array) => (
                array.borrow().get(index).cloned().unwrap_or_default(),
                self.element_tracking(&iterable.value, index),
            ),
            other => {
                return Err(type_error(format!(
                    "{} is not iterable",
                    other.to_display_string()
                )));
            }
        };
        let tracking = self.emit(
            RecordDraft::new(Operation::ForOfElement, value.summarize())
                .arg("iterable", arg_ref(iterable))
                .arg("value", ArgRef::new(value.summarize(), element_tracking))
                .runtime(RuntimeArgs {
                    iteration_index: Some(index),
                    ..RuntimeArgs::default()
                })
                .loc(loc),
        );
        Ok(Tracked::new(value, tracking))
    }
}

fn compare(operator: &str, left: &Value, right: &Value) -> bool {
    if let (Value::String(l), Value::String(r)) = (left, right) {
        return match operator {
            "<" => l < r,
            ">" => l > r,
            "<=" => l <= r,
            _ => l >= r,
        };
    }
    let (l, r) = (left.to_number(), right.to_number());
    match operator {
        "<" => l < r,
        ">" => l > r,
        "<=" => l <= r,
        _ => l >= r,
    }
}
