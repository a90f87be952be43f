use super::Step;
use crate::handlers::KnownFunction;
use crate::operation_log::{ArgRef, LogId, Operation, OperationRecord, PieceSource, ResultValue};
use crate::values::char_index_of;

fn follow(tracking: Option<LogId>, char_index: usize) -> Step {
    match tracking {
        Some(id) => Step::Next(id, char_index),
        None => Step::Untracked,
    }
}

fn unsupported(record: &OperationRecord, what: &str) -> Step {
    Step::Unsupported(format!("{}: {what}", record.operation))
}

/// Operands laid end to end; `char_index` lands in exactly one of them.
fn split_parts<'a>(parts: impl IntoIterator<Item = &'a ArgRef>, char_index: usize) -> Step {
    let mut position = 0;
    for part in parts {
        let Some(len) = part.value.as_ref().and_then(ResultValue::text_len) else {
            return Step::Unsupported("operand without a textual value".into());
        };
        if char_index < position + len {
            return follow(part.tracking, char_index - position);
        }
        position += len;
    }
    Step::Boundary
}

/// `prefix0`, `prefix1`, ... in index order.
fn numbered<'a>(
    args: &'a std::collections::BTreeMap<String, ArgRef>,
    prefix: &'a str,
) -> impl Iterator<Item = &'a ArgRef> + 'a {
    (0usize..).map_while(move |index| args.get(&format!("{prefix}{index}")))
}

pub(super) fn step(record: &OperationRecord, char_index: usize) -> Step {
    let runtime = &record.runtime_args;
    match record.operation {
        Operation::Literal
        | Operation::InitialPageHtml
        | Operation::DefaultArrayJoinSeparator
        | Operation::LocalStorageValue => Step::Leaf,
        Operation::UntrackedValue => Step::Untracked,
        Operation::Identifier | Operation::FunctionArgument => {
            follow(record.arg_tracking("value"), char_index)
        }
        Operation::ReturnStatement => follow(record.arg_tracking("returnValue"), char_index),
        Operation::ConditionalExpression => follow(record.arg_tracking("result"), char_index),
        Operation::AssignmentExpression => follow(record.arg_tracking("argument"), char_index),
        Operation::ObjectProperty => follow(record.arg_tracking("propertyValue"), char_index),
        Operation::MemberExpression => {
            if let Some(value) = record.extra_tracking("propertyValue") {
                Step::Next(value, char_index)
            } else if let Some(start) = runtime.start {
                follow(record.arg_tracking("object"), start + char_index)
            } else {
                Step::Untracked
            }
        }
        Operation::Destructuring => follow(
            record.arg_tracking("value"),
            runtime.start.unwrap_or(0) + char_index,
        ),
        Operation::ForOfElement => {
            let over_string = matches!(
                record.arg("iterable").and_then(|arg| arg.value.as_ref()),
                Some(ResultValue::String(_))
            );
            if over_string {
                follow(
                    record.arg_tracking("iterable"),
                    runtime.iteration_index.unwrap_or(0) + char_index,
                )
            } else {
                follow(record.arg_tracking("value"), char_index)
            }
        }
        Operation::BinaryExpression => {
            let concatenation = record.ast_args.operator.as_deref() == Some("+")
                && matches!(record.result, ResultValue::String(_));
            if !concatenation {
                return unsupported(record, "arithmetic result has no character mapping");
            }
            let parts = ["left", "right"].into_iter().filter_map(|name| record.arg(name));
            split_parts(parts, char_index)
        }
        Operation::TemplateLiteral => split_parts(numbered(&record.args, "part"), char_index),
        Operation::CallExpression => call(record, char_index),
        Operation::NewExpressionResult | Operation::ObjectExpression | Operation::ArrayExpression => {
            unsupported(record, "containers have no character mapping")
        }
        Operation::StringReplacement => {
            let Some(piece) = runtime
                .replacement_pieces
                .iter()
                .find(|piece| char_index >= piece.start && char_index < piece.start + piece.len)
            else {
                return Step::Boundary;
            };
            let within = char_index - piece.start;
            match piece.source {
                PieceSource::Replacement { offset } => {
                    follow(record.arg_tracking("replacement"), offset + within)
                }
                PieceSource::Subject { offset } => {
                    follow(record.arg_tracking("subject"), offset + within)
                }
            }
        }
        Operation::MatchResult => follow(
            record.arg_tracking("input"),
            runtime.match_index.unwrap_or(0) + char_index,
        ),
        Operation::SplitResult => follow(
            record.arg_tracking("string"),
            runtime.split_offset.unwrap_or(0) + char_index,
        ),
        Operation::JsonParseResult => json_parse_result(record, char_index),
        Operation::ReadElementHtml | Operation::ReadTextContent | Operation::ReadAttribute => {
            let Some(segment) = runtime
                .segments
                .iter()
                .find(|segment| segment.contains(char_index))
            else {
                return Step::Untracked;
            };
            match segment.target(char_index) {
                Some(target) => follow(segment.tracking, target),
                None => Step::Boundary,
            }
        }
    }
}

fn json_parse_result(record: &OperationRecord, char_index: usize) -> Step {
    if let Some(offset) = record.runtime_args.source_offset {
        return follow(record.arg_tracking("json"), offset + char_index);
    }
    // Records without a position fall back to the first textual occurrence.
    let (Some(json), Some(text)) = (record.arg_text("json"), record.result.display_text()) else {
        return unsupported(record, "no source position recorded");
    };
    match char_index_of(json, &text, 0) {
        Some(position) => follow(record.arg_tracking("json"), position + char_index),
        None => unsupported(record, "value not found in the parsed text"),
    }
}

fn call(record: &OperationRecord, char_index: usize) -> Step {
    let runtime = &record.runtime_args;
    let Some(known) = runtime.known_function else {
        return follow(record.extra_tracking("returnValue"), char_index);
    };
    match known {
        KnownFunction::StringSlice
        | KnownFunction::StringSubstring
        | KnownFunction::StringSubstr
        | KnownFunction::StringTrim => follow(
            record.arg_tracking("context"),
            runtime.start.unwrap_or(0) + char_index,
        ),
        KnownFunction::StringToUpperCase | KnownFunction::StringToLowerCase => {
            follow(record.arg_tracking("context"), char_index)
        }
        KnownFunction::StringConcat => {
            let parts = record
                .arg("context")
                .into_iter()
                .chain(numbered(&record.args, "arg"));
            split_parts(parts, char_index)
        }
        KnownFunction::StringReplace | KnownFunction::StringReplaceAll => {
            replace(record, char_index)
        }
        KnownFunction::ArrayJoin => join(record, char_index),
        KnownFunction::JsonStringify => stringify(record, char_index),
        _ => follow(record.extra_tracking("returnValue"), char_index),
    }
}

/// Inside a substitution the char comes from its `StringReplacement` record;
/// elsewhere it is an unchanged subject char, shifted by earlier
/// substitutions.
fn replace(record: &OperationRecord, char_index: usize) -> Step {
    let mut shift: isize = 0;
    for range in &record.runtime_args.replacements {
        if char_index < range.start {
            break;
        }
        if char_index < range.end {
            return follow(range.record, char_index - range.start);
        }
        shift += (range.subject_end - range.subject_start) as isize
            - (range.end - range.start) as isize;
    }
    match usize::try_from(char_index as isize + shift) {
        Ok(subject_index) => follow(record.arg_tracking("context"), subject_index),
        Err(_) => Step::Boundary,
    }
}

fn join(record: &OperationRecord, char_index: usize) -> Step {
    let separator = record.extra_args.get("separator");
    let separator_len = separator
        .and_then(|arg| arg.value.as_ref())
        .and_then(ResultValue::text_len)
        .unwrap_or(0);
    let mut position = 0;
    for (index, part) in numbered(&record.extra_args, "arrayValue").enumerate() {
        if index > 0 {
            if char_index < position + separator_len {
                return follow(separator.and_then(|arg| arg.tracking), char_index - position);
            }
            position += separator_len;
        }
        let len = part
            .value
            .as_ref()
            .and_then(ResultValue::text_len)
            .unwrap_or(0);
        if char_index < position + len {
            return follow(part.tracking, char_index - position);
        }
        position += len;
    }
    Step::Boundary
}

fn stringify(record: &OperationRecord, char_index: usize) -> Step {
    let entry = record
        .runtime_args
        .json_index
        .iter()
        .find(|entry| char_index >= entry.offset && char_index < entry.offset + entry.len);
    match entry {
        Some(entry) if entry.point => follow(entry.tracking, entry.value_offset),
        Some(entry) => follow(entry.tracking, entry.value_offset + char_index - entry.offset),
        None => Step::Boundary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation_log::{ReplacementRange, RuntimeArgs};

    fn record(operation: Operation, result: &str) -> OperationRecord {
        OperationRecord {
            id: LogId(50),
            operation,
            args: Default::default(),
            extra_args: Default::default(),
            ast_args: Default::default(),
            runtime_args: RuntimeArgs::default(),
            result: ResultValue::String(result.to_string()),
            loc: None,
        }
    }

    #[test]
    fn replace_shifts_unchanged_chars_by_earlier_substitutions() {
        // "a-b" with "-" replaced by "==" gives "a==b".
        let mut call = record(Operation::CallExpression, "a==b");
        call.args.insert(
            "context".into(),
            ArgRef::new(ResultValue::String("a-b".into()), Some(LogId(1))),
        );
        call.runtime_args.known_function = Some(KnownFunction::StringReplace);
        call.runtime_args.replacements = vec![ReplacementRange {
            record: Some(LogId(7)),
            start: 1,
            end: 3,
            subject_start: 1,
            subject_end: 2,
        }];
        assert_eq!(step(&call, 0), Step::Next(LogId(1), 0));
        assert_eq!(step(&call, 2), Step::Next(LogId(7), 1));
        assert_eq!(step(&call, 3), Step::Next(LogId(1), 2));
    }

    #[test]
    fn join_attributes_separators() {
        let mut call = record(Operation::CallExpression, "x, y");
        call.runtime_args.known_function = Some(KnownFunction::ArrayJoin);
        call.extra_args.insert(
            "arrayValue0".into(),
            ArgRef::new(ResultValue::String("x".into()), Some(LogId(2))),
        );
        call.extra_args.insert(
            "arrayValue1".into(),
            ArgRef::new(ResultValue::String("y".into()), Some(LogId(3))),
        );
        call.extra_args.insert(
            "separator".into(),
            ArgRef::new(ResultValue::String(", ".into()), Some(LogId(4))),
        );
        assert_eq!(step(&call, 0), Step::Next(LogId(2), 0));
        assert_eq!(step(&call, 2), Step::Next(LogId(4), 1));
        assert_eq!(step(&call, 3), Step::Next(LogId(3), 0));
    }

    #[test]
    fn json_parse_without_offset_searches_the_source() {
        let mut parsed = record(Operation::JsonParseResult, "hi");
        parsed.args.insert(
            "json".into(),
            ArgRef::new(ResultValue::String(r#"{"k":"hi"}"#.into()), Some(LogId(9))),
        );
        assert_eq!(step(&parsed, 1), Step::Next(LogId(9), 7));
    }

    #[test]
    fn arithmetic_is_unsupported() {
        let mut sum = record(Operation::BinaryExpression, "");
        sum.result = ResultValue::Number(3.0);
        sum.ast_args.operator = Some("-".into());
        assert!(matches!(step(&sum, 0), Step::Unsupported(_)));
    }
}
