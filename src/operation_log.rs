use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::alignment::MappedSegment;
use crate::handlers::KnownFunction;
use crate::values::format_number;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LogId(pub u64);

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Source position in the uninstrumented program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loc {
    pub file: String,
    pub line: u32,
    pub column: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_column: Option<u32>,
}

impl Loc {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
            end_line: None,
            end_column: None,
        }
    }

    pub fn with_end(mut self, line: u32, column: u32) -> Self {
        self.end_line = Some(line);
        self.end_column = Some(column);
        self
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Summary of a produced value. Primitives are kept in full so traversal rules
/// can bound offsets; containers only keep their shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum ResultValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array { length: usize },
    Object,
    Node(usize),
    Function(String),
    RegExp { source: String, flags: String },
}

impl ResultValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::String(text) => Some(text),
            _ => None,
        }
    }

    /// Text of a primitive result as a script would print it. Containers have
    /// no textual form here.
    pub fn display_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::String(text) => Some(Cow::Borrowed(text)),
            Self::Number(value) => Some(Cow::Owned(format_number(*value))),
            Self::Bool(value) => Some(Cow::Borrowed(if *value { "true" } else { "false" })),
            Self::Null => Some(Cow::Borrowed("null")),
            Self::Undefined => Some(Cow::Borrowed("undefined")),
            _ => None,
        }
    }

    /// Length in chars of [`display_text`](Self::display_text).
    pub fn text_len(&self) -> Option<usize> {
        self.display_text().map(|text| text.chars().count())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ResultValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking: Option<LogId>,
}

impl ArgRef {
    pub fn new(value: ResultValue, tracking: Option<LogId>) -> Self {
        Self {
            value: Some(value),
            tracking,
        }
    }

    pub fn tracking_only(tracking: Option<LogId>) -> Self {
        Self {
            value: None,
            tracking,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Literal,
    UntrackedValue,
    InitialPageHtml,
    DefaultArrayJoinSeparator,
    Identifier,
    MemberExpression,
    BinaryExpression,
    ConditionalExpression,
    TemplateLiteral,
    CallExpression,
    NewExpressionResult,
    FunctionArgument,
    ReturnStatement,
    ObjectExpression,
    ObjectProperty,
    ArrayExpression,
    AssignmentExpression,
    Destructuring,
    ForOfElement,
    StringReplacement,
    MatchResult,
    SplitResult,
    JsonParseResult,
    ReadElementHtml,
    ReadTextContent,
    ReadAttribute,
    LocalStorageValue,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Self::Literal => "literal",
            Self::UntrackedValue => "untracked-value",
            Self::InitialPageHtml => "initial-page-html",
            Self::DefaultArrayJoinSeparator => "default-array-join-separator",
            Self::Identifier => "identifier",
            Self::MemberExpression => "member-expression",
            Self::BinaryExpression => "binary-expression",
            Self::ConditionalExpression => "conditional-expression",
            Self::TemplateLiteral => "template-literal",
            Self::CallExpression => "call-expression",
            Self::NewExpressionResult => "new-expression-result",
            Self::FunctionArgument => "function-argument",
            Self::ReturnStatement => "return-statement",
            Self::ObjectExpression => "object-expression",
            Self::ObjectProperty => "object-property",
            Self::ArrayExpression => "array-expression",
            Self::AssignmentExpression => "assignment-expression",
            Self::Destructuring => "destructuring",
            Self::ForOfElement => "for-of-element",
            Self::StringReplacement => "string-replacement",
            Self::MatchResult => "match-result",
            Self::SplitResult => "split-result",
            Self::JsonParseResult => "json-parse-result",
            Self::ReadElementHtml => "read-element-html",
            Self::ReadTextContent => "read-text-content",
            Self::ReadAttribute => "read-attribute",
            Self::LocalStorageValue => "local-storage-value",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AstArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_new_expression: bool,
}

/// One substitution made by a replace call. Output offsets are `[start, end)` in
/// the call's result; subject offsets are the matched range in the subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacementRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<LogId>,
    pub start: usize,
    pub end: usize,
    pub subject_start: usize,
    pub subject_end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "kebab-case")]
pub enum PieceSource {
    /// Characters of the replacement argument (or of a replacer's return value).
    Replacement { offset: usize },
    /// Characters copied from the subject by `$&`, `$n`, `` $` `` or `$'`.
    Subject { offset: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacementPiece {
    pub start: usize,
    pub len: usize,
    pub source: PieceSource,
}

/// Output range of a key or primitive value written by `JSON.stringify`.
/// Output char `offset + k` maps to char `value_offset + k` of the source value,
/// or to `value_offset` itself for a `point` entry (an escape sequence).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonIndexEntry {
    pub offset: usize,
    pub len: usize,
    #[serde(default)]
    pub value_offset: usize,
    #[serde(default, skip_serializing_if = "is_false")]
    pub point: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking: Option<LogId>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_key: bool,
}

/// Execution-time data read by the traversal rule of the owning operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_function: Option<KnownFunction>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub opaque_callee: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replacements: Vec<ReplacementRange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replacement_pieces: Vec<ReplacementPiece>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_offset: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_offset: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub json_index: Vec<JsonIndexEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<MappedSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub untracked_reason: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: LogId,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, ArgRef>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_args: BTreeMap<String, ArgRef>,
    #[serde(default)]
    pub ast_args: AstArgs,
    #[serde(default)]
    pub runtime_args: RuntimeArgs,
    pub result: ResultValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<Loc>,
}

impl OperationRecord {
    pub fn arg(&self, name: &str) -> Option<&ArgRef> {
        self.args.get(name)
    }

    pub fn arg_tracking(&self, name: &str) -> Option<LogId> {
        self.args.get(name).and_then(|arg| arg.tracking)
    }

    pub fn arg_text(&self, name: &str) -> Option<&str> {
        self.args
            .get(name)
            .and_then(|arg| arg.value.as_ref())
            .and_then(ResultValue::as_text)
    }

    pub fn extra_tracking(&self, name: &str) -> Option<LogId> {
        self.extra_args.get(name).and_then(|arg| arg.tracking)
    }

    pub fn extra_text(&self, name: &str) -> Option<&str> {
        self.extra_args
            .get(name)
            .and_then(|arg| arg.value.as_ref())
            .and_then(ResultValue::as_text)
    }

    /// Every tracking reference this record holds, in no particular order.
    pub fn references(&self) -> impl Iterator<Item = LogId> + '_ {
        self.args
            .values()
            .chain(self.extra_args.values())
            .filter_map(|arg| arg.tracking)
    }
}

/// Record under construction inside the runtime; the id is assigned on commit.
#[derive(Debug, Clone)]
pub(crate) struct RecordDraft {
    pub(crate) operation: Operation,
    pub(crate) args: BTreeMap<String, ArgRef>,
    pub(crate) extra_args: BTreeMap<String, ArgRef>,
    pub(crate) ast_args: AstArgs,
    pub(crate) runtime_args: RuntimeArgs,
    pub(crate) result: ResultValue,
    pub(crate) loc: Option<Loc>,
}

impl RecordDraft {
    pub(crate) fn new(operation: Operation, result: ResultValue) -> Self {
        Self {
            operation,
            args: BTreeMap::new(),
            extra_args: BTreeMap::new(),
            ast_args: AstArgs::default(),
            runtime_args: RuntimeArgs::default(),
            result,
            loc: None,
        }
    }

    pub(crate) fn arg(mut self, name: impl Into<String>, arg: ArgRef) -> Self {
        self.args.insert(name.into(), arg);
        self
    }

    pub(crate) fn extra(mut self, name: impl Into<String>, arg: ArgRef) -> Self {
        self.extra_args.insert(name.into(), arg);
        self
    }

    pub(crate) fn operator(mut self, operator: &str) -> Self {
        self.ast_args.operator = Some(operator.to_string());
        self
    }

    pub(crate) fn new_expression(mut self) -> Self {
        self.ast_args.is_new_expression = true;
        self
    }

    pub(crate) fn runtime(mut self, runtime_args: RuntimeArgs) -> Self {
        self.runtime_args = runtime_args;
        self
    }

    pub(crate) fn loc(mut self, loc: Option<Loc>) -> Self {
        self.loc = loc;
        self
    }

    pub(crate) fn finish(self, id: LogId) -> OperationRecord {
        OperationRecord {
            id,
            operation: self.operation,
            args: self.args,
            extra_args: self.extra_args,
            ast_args: self.ast_args,
            runtime_args: self.runtime_args,
            result: self.result,
            loc: self.loc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_serialize_without_empty_sections() -> Result<(), serde_json::Error> {
        let record = RecordDraft::new(Operation::Literal, ResultValue::String("hi".into()))
            .loc(Some(Loc::new("app.js", 3, 7)))
            .finish(LogId(9));
        let json = serde_json::to_string(&record)?;
        assert!(json.contains("\"operation\":\"literal\""));
        assert!(!json.contains("extra_args"));
        assert!(!json.contains("known_function"));
        Ok(())
    }

    #[test]
    fn text_len_counts_chars() {
        assert_eq!(ResultValue::String("añb".into()).text_len(), Some(3));
        assert_eq!(ResultValue::Number(3.0).text_len(), Some(1));
        assert_eq!(ResultValue::Null.text_len(), Some(4));
        assert_eq!(ResultValue::Object.text_len(), None);
    }
}
