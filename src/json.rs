//! JSON text codec that reports character positions, so provenance can point at
//! the exact place a key or value came from (or went to).

use std::rc::Rc;

use crate::operation_log::{JsonIndexEntry, LogId};
use crate::values::{ObjectId, Value, format_number};
use crate::{Error, Result};

/// A parsed JSON value with the char offset where its content starts. For
/// strings that is the first char after the opening quote.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct JsonNode {
    pub(crate) start: usize,
    pub(crate) kind: JsonKind,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum JsonKind {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<JsonNode>),
    Object(Vec<JsonMember>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct JsonMember {
    pub(crate) key: String,
    pub(crate) key_start: usize,
    pub(crate) value: JsonNode,
}

struct CharPositions {
    /// Byte offset of every char; empty when the source is ASCII.
    starts: Vec<usize>,
}

impl CharPositions {
    fn new(src: &str) -> Self {
        let starts = if src.is_ascii() {
            Vec::new()
        } else {
            src.char_indices().map(|(idx, _)| idx).collect()
        };
        Self { starts }
    }

    fn char_at(&self, byte: usize) -> usize {
        if self.starts.is_empty() {
            return byte;
        }
        match self.starts.binary_search(&byte) {
            Ok(idx) | Err(idx) => idx,
        }
    }
}

pub(crate) fn parse_json_text(src: &str) -> Result<JsonNode> {
    let bytes = src.as_bytes();
    let positions = CharPositions::new(src);
    let mut i = 0usize;
    json_skip_ws(bytes, &mut i);
    let value = parse_json_value(src, bytes, &positions, &mut i)?;
    json_skip_ws(bytes, &mut i);
    if i != bytes.len() {
        return Err(Error::ScriptRuntime(
            "JSON.parse invalid JSON: trailing characters".into(),
        ));
    }
    Ok(value)
}

fn parse_json_value(
    src: &str,
    bytes: &[u8],
    positions: &CharPositions,
    i: &mut usize,
) -> Result<JsonNode> {
    stacker::maybe_grow(64 * 1024, 1024 * 1024, || {
        json_skip_ws(bytes, i);
        let Some(&b) = bytes.get(*i) else {
            return Err(Error::ScriptRuntime(
                "JSON.parse invalid JSON: unexpected end of input".into(),
            ));
        };
        let start = positions.char_at(*i);

        let kind = match b {
            b'{' => parse_json_object(src, bytes, positions, i)?,
            b'[' => parse_json_array(src, bytes, positions, i)?,
            b'"' => {
                let text = parse_json_string(src, bytes, i)?;
                return Ok(JsonNode {
                    start: start + 1,
                    kind: JsonKind::String(text),
                });
            }
            b't' if json_consume_ascii(bytes, i, "true") => JsonKind::Bool(true),
            b'f' if json_consume_ascii(bytes, i, "false") => JsonKind::Bool(false),
            b'n' if json_consume_ascii(bytes, i, "null") => JsonKind::Null,
            b'-' | b'0'..=b'9' => parse_json_number(src, bytes, i)?,
            _ => {
                return Err(Error::ScriptRuntime(
                    "JSON.parse invalid JSON: unexpected token".into(),
                ));
            }
        };
        Ok(JsonNode { start, kind })
    })
}

fn parse_json_object(
    src: &str,
    bytes: &[u8],
    positions: &CharPositions,
    i: &mut usize,
) -> Result<JsonKind> {
    *i += 1; // consume '{'
    json_skip_ws(bytes, i);
    let mut members: Vec<JsonMember> = Vec::new();

    if bytes.get(*i) == Some(&b'}') {
        *i += 1;
        return Ok(JsonKind::Object(members));
    }

    loop {
        json_skip_ws(bytes, i);
        if bytes.get(*i) != Some(&b'"') {
            return Err(Error::ScriptRuntime(
                "JSON.parse invalid JSON: object key must be string".into(),
            ));
        }
        let key_start = positions.char_at(*i) + 1;
        let key = parse_json_string(src, bytes, i)?;
        json_skip_ws(bytes, i);
        if bytes.get(*i) != Some(&b':') {
            return Err(Error::ScriptRuntime(
                "JSON.parse invalid JSON: expected ':' after object key".into(),
            ));
        }
        *i += 1;
        let value = parse_json_value(src, bytes, positions, i)?;
        // Later duplicates win, keeping the first key's position in order.
        if let Some(existing) = members.iter_mut().find(|member| member.key == key) {
            existing.key_start = key_start;
            existing.value = value;
        } else {
            members.push(JsonMember {
                key,
                key_start,
                value,
            });
        }
        json_skip_ws(bytes, i);

        match bytes.get(*i) {
            Some(b',') => {
                *i += 1;
            }
            Some(b'}') => {
                *i += 1;
                break;
            }
            _ => {
                return Err(Error::ScriptRuntime(
                    "JSON.parse invalid JSON: expected ',' or '}'".into(),
                ));
            }
        }
    }

    Ok(JsonKind::Object(members))
}

fn parse_json_array(
    src: &str,
    bytes: &[u8],
    positions: &CharPositions,
    i: &mut usize,
) -> Result<JsonKind> {
    *i += 1; // consume '['
    json_skip_ws(bytes, i);
    let mut items = Vec::new();

    if bytes.get(*i) == Some(&b']') {
        *i += 1;
        return Ok(JsonKind::Array(items));
    }

    loop {
        let item = parse_json_value(src, bytes, positions, i)?;
        items.push(item);
        json_skip_ws(bytes, i);
        match bytes.get(*i) {
            Some(b',') => {
                *i += 1;
            }
            Some(b']') => {
                *i += 1;
                break;
            }
            _ => {
                return Err(Error::ScriptRuntime(
                    "JSON.parse invalid JSON: expected ',' or ']'".into(),
                ));
            }
        }
    }

    Ok(JsonKind::Array(items))
}

fn parse_json_string(src: &str, bytes: &[u8], i: &mut usize) -> Result<String> {
    if bytes.get(*i) != Some(&b'"') {
        return Err(Error::ScriptRuntime(
            "JSON.parse invalid JSON: expected string".into(),
        ));
    }
    *i += 1;
    let mut out = String::new();

    while *i < bytes.len() {
        let b = bytes[*i];
        if b == b'"' {
            *i += 1;
            return Ok(out);
        }
        if b < 0x20 {
            return Err(Error::ScriptRuntime(
                "JSON.parse invalid JSON: unescaped control character in string".into(),
            ));
        }
        if b == b'\\' {
            *i += 1;
            let Some(&esc) = bytes.get(*i) else {
                return Err(Error::ScriptRuntime(
                    "JSON.parse invalid JSON: unterminated escape sequence".into(),
                ));
            };
            match esc {
                b'"' => out.push('"'),
                b'\\' => out.push('\\'),
                b'/' => out.push('/'),
                b'b' => out.push('\u{0008}'),
                b'f' => out.push('\u{000C}'),
                b'n' => out.push('\n'),
                b'r' => out.push('\r'),
                b't' => out.push('\t'),
                b'u' => {
                    *i += 1;
                    out.push(parse_json_unicode_escape(src, bytes, i)?);
                    continue;
                }
                _ => {
                    return Err(Error::ScriptRuntime(
                        "JSON.parse invalid JSON: invalid escape sequence".into(),
                    ));
                }
            }
            *i += 1;
            continue;
        }

        if b.is_ascii() {
            out.push(b as char);
            *i += 1;
        } else {
            let rest = src.get(*i..).ok_or_else(|| {
                Error::ScriptRuntime("JSON.parse invalid JSON: invalid utf-8".into())
            })?;
            let Some(ch) = rest.chars().next() else {
                return Err(Error::ScriptRuntime(
                    "JSON.parse invalid JSON: invalid utf-8".into(),
                ));
            };
            out.push(ch);
            *i += ch.len_utf8();
        }
    }

    Err(Error::ScriptRuntime(
        "JSON.parse invalid JSON: unterminated string".into(),
    ))
}

fn parse_json_unicode_escape(src: &str, bytes: &[u8], i: &mut usize) -> Result<char> {
    let invalid_pair =
        || Error::ScriptRuntime("JSON.parse invalid JSON: invalid unicode surrogate pair".into());
    let invalid_escape =
        || Error::ScriptRuntime("JSON.parse invalid JSON: invalid unicode escape".into());

    let first = parse_json_hex4(src, i)?;
    if (0xD800..=0xDBFF).contains(&first) {
        if bytes.get(*i) != Some(&b'\\') || bytes.get(*i + 1) != Some(&b'u') {
            return Err(invalid_pair());
        }
        *i += 2;
        let second = parse_json_hex4(src, i)?;
        if !(0xDC00..=0xDFFF).contains(&second) {
            return Err(invalid_pair());
        }
        let codepoint = 0x10000 + (((first as u32 - 0xD800) << 10) | (second as u32 - 0xDC00));
        char::from_u32(codepoint).ok_or_else(invalid_escape)
    } else if (0xDC00..=0xDFFF).contains(&first) {
        Err(invalid_pair())
    } else {
        char::from_u32(first as u32).ok_or_else(invalid_escape)
    }
}

fn parse_json_hex4(src: &str, i: &mut usize) -> Result<u16> {
    let end = i.saturating_add(4);
    let segment = src.get(*i..end).ok_or_else(|| {
        Error::ScriptRuntime("JSON.parse invalid JSON: invalid unicode escape".into())
    })?;
    if !segment.as_bytes().iter().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::ScriptRuntime(
            "JSON.parse invalid JSON: invalid unicode escape".into(),
        ));
    }
    *i = end;
    u16::from_str_radix(segment, 16)
        .map_err(|_| Error::ScriptRuntime("JSON.parse invalid JSON: invalid unicode escape".into()))
}

fn parse_json_number(src: &str, bytes: &[u8], i: &mut usize) -> Result<JsonKind> {
    let start = *i;
    let invalid = || Error::ScriptRuntime("JSON.parse invalid JSON: invalid number".into());

    if bytes.get(*i) == Some(&b'-') {
        *i += 1;
    }

    match bytes.get(*i).copied() {
        Some(b'0') => {
            *i += 1;
            if bytes.get(*i).is_some_and(u8::is_ascii_digit) {
                return Err(invalid());
            }
        }
        Some(b'1'..=b'9') => {
            *i += 1;
            while bytes.get(*i).is_some_and(u8::is_ascii_digit) {
                *i += 1;
            }
        }
        _ => return Err(invalid()),
    }

    if bytes.get(*i) == Some(&b'.') {
        *i += 1;
        if !bytes.get(*i).is_some_and(u8::is_ascii_digit) {
            return Err(invalid());
        }
        while bytes.get(*i).is_some_and(u8::is_ascii_digit) {
            *i += 1;
        }
    }

    if bytes.get(*i).is_some_and(|b| *b == b'e' || *b == b'E') {
        *i += 1;
        if bytes.get(*i).is_some_and(|b| *b == b'+' || *b == b'-') {
            *i += 1;
        }
        if !bytes.get(*i).is_some_and(u8::is_ascii_digit) {
            return Err(invalid());
        }
        while bytes.get(*i).is_some_and(u8::is_ascii_digit) {
            *i += 1;
        }
    }

    let token = src.get(start..*i).ok_or_else(invalid)?;
    let n = token.parse::<f64>().map_err(|_| invalid())?;
    Ok(JsonKind::Number(n))
}

fn json_skip_ws(bytes: &[u8], i: &mut usize) {
    while bytes
        .get(*i)
        .is_some_and(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
    {
        *i += 1;
    }
}

fn json_consume_ascii(bytes: &[u8], i: &mut usize, token: &str) -> bool {
    let token_bytes = token.as_bytes();
    let end = i.saturating_add(token_bytes.len());
    if end <= bytes.len() && &bytes[*i..end] == token_bytes {
        *i = end;
        true
    } else {
        false
    }
}

fn json_escape_char(ch: char) -> Option<String> {
    match ch {
        '"' => Some("\\\"".to_string()),
        '\\' => Some("\\\\".to_string()),
        '\u{0008}' => Some("\\b".to_string()),
        '\u{000C}' => Some("\\f".to_string()),
        '\n' => Some("\\n".to_string()),
        '\r' => Some("\\r".to_string()),
        '\t' => Some("\\t".to_string()),
        c if c <= '\u{001F}' => Some(format!("\\u{:04x}", c as u32)),
        _ => None,
    }
}

/// Provenance of a property, looked up while stringifying.
pub(crate) trait PropertyProvenance {
    /// `(name tracking, value tracking)` of `key` on the container `owner`.
    fn property(&self, owner: ObjectId, key: &str) -> (Option<LogId>, Option<LogId>);
}

/// Serializes a value and records where every key and primitive value landed.
pub(crate) struct JsonWriter<'a> {
    out: String,
    chars: usize,
    index: Vec<JsonIndexEntry>,
    provenance: &'a dyn PropertyProvenance,
    array_stack: Vec<usize>,
    object_stack: Vec<usize>,
}

impl<'a> JsonWriter<'a> {
    pub(crate) fn new(provenance: &'a dyn PropertyProvenance) -> Self {
        Self {
            out: String::new(),
            chars: 0,
            index: Vec::new(),
            provenance,
            array_stack: Vec::new(),
            object_stack: Vec::new(),
        }
    }

    /// Returns `None` when the top-level value has no JSON form.
    pub(crate) fn stringify(
        mut self,
        value: &Value,
        tracking: Option<LogId>,
    ) -> Result<Option<(String, Vec<JsonIndexEntry>)>> {
        if !self.write_value(value, tracking)? {
            return Ok(None);
        }
        Ok(Some((self.out, self.index)))
    }

    fn push(&mut self, text: &str) {
        self.chars += text.chars().count();
        self.out.push_str(text);
    }

    fn write_string(&mut self, text: &str, tracking: Option<LogId>, is_key: bool) {
        self.push("\"");
        let mut run_start = self.chars;
        let mut run_value_offset = 0usize;
        let mut run_len = 0usize;
        for (value_offset, ch) in text.chars().enumerate() {
            match json_escape_char(ch) {
                Some(escaped) => {
                    if run_len > 0 {
                        self.index.push(JsonIndexEntry {
                            offset: run_start,
                            len: run_len,
                            value_offset: run_value_offset,
                            point: false,
                            tracking,
                            is_key,
                        });
                    }
                    let escape_start = self.chars;
                    self.push(&escaped);
                    self.index.push(JsonIndexEntry {
                        offset: escape_start,
                        len: self.chars - escape_start,
                        value_offset,
                        point: true,
                        tracking,
                        is_key,
                    });
                    run_start = self.chars;
                    run_value_offset = value_offset + 1;
                    run_len = 0;
                }
                None => {
                    self.chars += 1;
                    self.out.push(ch);
                    run_len += 1;
                }
            }
        }
        if run_len > 0 {
            self.index.push(JsonIndexEntry {
                offset: run_start,
                len: run_len,
                value_offset: run_value_offset,
                point: false,
                tracking,
                is_key,
            });
        }
        self.push("\"");
    }

    fn write_scalar(&mut self, text: &str, tracking: Option<LogId>) {
        let start = self.chars;
        self.push(text);
        self.index.push(JsonIndexEntry {
            offset: start,
            len: self.chars - start,
            value_offset: 0,
            point: false,
            tracking,
            is_key: false,
        });
    }

    fn write_value(&mut self, value: &Value, tracking: Option<LogId>) -> Result<bool> {
        stacker::maybe_grow(64 * 1024, 1024 * 1024, || match value {
            Value::String(text) => {
                self.write_string(text, tracking, false);
                Ok(true)
            }
            Value::Bool(flag) => {
                self.write_scalar(if *flag { "true" } else { "false" }, tracking);
                Ok(true)
            }
            Value::Number(n) => {
                if n.is_finite() {
                    self.write_scalar(&format_number(*n), tracking);
                } else {
                    self.write_scalar("null", tracking);
                }
                Ok(true)
            }
            Value::Null => {
                self.write_scalar("null", tracking);
                Ok(true)
            }
            Value::Undefined | Value::Function(_) => Ok(false),
            Value::RegExp(_) | Value::Node(_) | Value::Host(_) => {
                self.push("{}");
                Ok(true)
            }
            Value::Array(array) => {
                let ptr = Rc::as_ptr(array) as usize;
                if self.array_stack.contains(&ptr) {
                    return Err(Error::ScriptRuntime(
                        "JSON.stringify circular structure".into(),
                    ));
                }
                self.array_stack.push(ptr);
                let (owner, items) = {
                    let array = array.borrow();
                    (array.id(), array.elements.clone())
                };
                self.push("[");
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        self.push(",");
                    }
                    let (_, item_tracking) = self.provenance.property(owner, &idx.to_string());
                    if !self.write_value(item, item_tracking)? {
                        self.push("null");
                    }
                }
                self.push("]");
                self.array_stack.pop();
                Ok(true)
            }
            Value::Object(object) => {
                let ptr = Rc::as_ptr(object) as usize;
                if self.object_stack.contains(&ptr) {
                    return Err(Error::ScriptRuntime(
                        "JSON.stringify circular structure".into(),
                    ));
                }
                self.object_stack.push(ptr);
                let (owner, entries) = {
                    let object = object.borrow();
                    (object.id(), object.entries().to_vec())
                };
                self.push("{");
                let mut wrote = false;
                for (key, entry) in &entries {
                    if matches!(entry, Value::Undefined | Value::Function(_)) {
                        continue;
                    }
                    if wrote {
                        self.push(",");
                    }
                    wrote = true;
                    let (name_tracking, value_tracking) = self.provenance.property(owner, key);
                    self.write_string(key, name_tracking, true);
                    self.push(":");
                    self.write_value(entry, value_tracking)?;
                }
                self.push("}");
                self.object_stack.pop();
                Ok(true)
            }
        })
    }
}
