use crate::handlers::{HandlerOutcome, KnownFunction, NativeCall, receiver_text};
use crate::js_regex::{Regex, char_offset, has_nested_groups};
use crate::operation_log::{
    ArgRef, LogId, Operation, PieceSource, RecordDraft, ReplacementPiece, ReplacementRange,
    ResultValue, RuntimeArgs,
};
use crate::runtime::{Tracked, TrackingRuntime};
use crate::values::{
    RegexValue, Value, char_index_of, char_len, char_slice, regex_error, relative_index,
};
use crate::{Error, Result};

/// One regex or string match, in char offsets of the subject.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Found {
    start: usize,
    end: usize,
    /// Capture groups 1..; `None` for a group that did not participate.
    groups: Vec<Option<(usize, usize)>>,
}

impl Found {
    fn text(&self, subject: &[char]) -> String {
        subject[self.start..self.end].iter().collect()
    }
}

enum Pattern<'a> {
    Regex(&'a RegexValue),
    Text(String),
}

impl<'a> Pattern<'a> {
    fn from_value(value: &'a Value) -> Self {
        match value {
            Value::RegExp(regex) => Self::Regex(regex),
            other => Self::Text(other.to_display_string()),
        }
    }
}

/// All matches of a regex from the start of `subject`, or only the first.
fn regex_matches(regex: &Regex, subject: &str, all: bool) -> Result<Vec<Found>> {
    let mut found = Vec::new();
    let mut byte_pos = 0usize;
    while byte_pos <= subject.len() {
        let Some(captures) = regex
            .captures_from_pos(subject, byte_pos)
            .map_err(regex_error)?
        else {
            break;
        };
        let Some(whole) = captures.get(0) else {
            break;
        };
        let groups = (1..captures.len())
            .map(|index| {
                captures.get(index).map(|group| {
                    (char_offset(subject, group.start()), char_offset(subject, group.end()))
                })
            })
            .collect();
        found.push(Found {
            start: char_offset(subject, whole.start()),
            end: char_offset(subject, whole.end()),
            groups,
        });
        if !all {
            break;
        }
        byte_pos = if whole.end() == whole.start() {
            match subject.get(whole.end()..).and_then(|rest| rest.chars().next()) {
                Some(next) => whole.end() + next.len_utf8(),
                None => break,
            }
        } else {
            whole.end()
        };
    }
    Ok(found)
}

fn text_matches(subject: &str, needle: &str, all: bool) -> Vec<Found> {
    let needle_len = char_len(needle);
    let subject_len = char_len(subject);
    let mut found = Vec::new();
    let mut from = 0usize;
    while from <= subject_len {
        let Some(start) = char_index_of(subject, needle, from) else {
            break;
        };
        found.push(Found {
            start,
            end: start + needle_len,
            groups: Vec::new(),
        });
        if !all {
            break;
        }
        from = start + needle_len.max(1);
    }
    found
}

fn find_matches(subject: &str, pattern: &Pattern<'_>, all: bool) -> Result<Vec<Found>> {
    match pattern {
        Pattern::Regex(regex) => regex_matches(&regex.compiled, subject, all || regex.global),
        Pattern::Text(needle) => Ok(text_matches(subject, needle, all)),
    }
}

/// Replacement text under construction with the source of every char.
#[derive(Default)]
struct Expansion {
    out: String,
    len: usize,
    pieces: Vec<ReplacementPiece>,
}

impl Expansion {
    fn push_piece(&mut self, len: usize, source: PieceSource) {
        if len == 0 {
            return;
        }
        if let (Some(last), PieceSource::Replacement { offset }) = (self.pieces.last_mut(), source)
        {
            if let PieceSource::Replacement {
                offset: last_offset,
            } = last.source
            {
                if last.start + last.len == self.len && last_offset + last.len == offset {
                    last.len += len;
                    self.len += len;
                    return;
                }
            }
        }
        self.pieces.push(ReplacementPiece {
            start: self.len,
            len,
            source,
        });
        self.len += len;
    }

    fn literal(&mut self, ch: char, offset: usize) {
        self.out.push(ch);
        self.push_piece(1, PieceSource::Replacement { offset });
    }

    fn copy_subject(&mut self, subject: &[char], from: usize, to: usize) {
        let to = to.min(subject.len());
        if from >= to {
            return;
        }
        self.out.extend(&subject[from..to]);
        self.push_piece(to - from, PieceSource::Subject { offset: from });
    }
}

/// Expands `$` patterns of a replacement template for one match and records
/// where every output char came from.
fn expand_template(
    template: &str,
    found: &Found,
    subject: &[char],
) -> (String, Vec<ReplacementPiece>) {
    let chars: Vec<char> = template.chars().collect();
    let mut expansion = Expansion::default();
    let mut i = 0usize;
    while i < chars.len() {
        if chars[i] == '$' {
            match chars.get(i + 1) {
                Some('$') => {
                    expansion.literal('$', i);
                    i += 2;
                    continue;
                }
                Some('&') => {
                    expansion.copy_subject(subject, found.start, found.end);
                    i += 2;
                    continue;
                }
                Some('`') => {
                    expansion.copy_subject(subject, 0, found.start);
                    i += 2;
                    continue;
                }
                Some('\'') => {
                    expansion.copy_subject(subject, found.end, subject.len());
                    i += 2;
                    continue;
                }
                Some(first) if first.is_ascii_digit() => {
                    let declared = found.groups.len();
                    let one = first.to_digit(10).unwrap_or(0) as usize;
                    let two = chars
                        .get(i + 2)
                        .and_then(|second| second.to_digit(10))
                        .map(|second| one * 10 + second as usize);
                    let group = match two {
                        Some(n) if (1..=declared).contains(&n) => Some((n, 3)),
                        _ if (1..=declared).contains(&one) => Some((one, 2)),
                        _ => None,
                    };
                    if let Some((n, consumed)) = group {
                        if let Some(Some((start, end))) = found.groups.get(n - 1) {
                            expansion.copy_subject(subject, *start, *end);
                        }
                        i += consumed;
                        continue;
                    }
                }
                _ => {}
            }
        }
        expansion.literal(chars[i], i);
        i += 1;
    }
    (expansion.out, expansion.pieces)
}

pub(super) fn replace(
    rt: &mut TrackingRuntime,
    call: &NativeCall<'_>,
    all: bool,
) -> Result<HandlerOutcome> {
    let known = if all {
        KnownFunction::StringReplaceAll
    } else {
        KnownFunction::StringReplace
    };
    let subject_tracked = call.receiver(known)?.clone();
    let subject = receiver_text(known, call)?;
    let pattern_arg = call.arg(0);
    let replacement = call.arg(1);
    let pattern = Pattern::from_value(&pattern_arg.value);
    if let (true, Pattern::Regex(regex)) = (all, &pattern) {
        if !regex.global {
            return Err(Error::ScriptRuntime(
                "TypeError: replaceAll must be called with a global RegExp".into(),
            ));
        }
    }
    let matches = find_matches(&subject, &pattern, all)?;
    let subject_chars: Vec<char> = subject.chars().collect();

    let mut out = String::new();
    let mut out_len = 0usize;
    let mut last = 0usize;
    let mut ranges = Vec::with_capacity(matches.len());
    let mut outcome = HandlerOutcome::default();
    for (n, found) in matches.iter().enumerate() {
        out.extend(&subject_chars[last..found.start]);
        out_len += found.start - last;

        let (text, source_text, pieces, tracking) = match &replacement.value {
            Value::Function(_) => {
                let mut args = vec![Tracked::untracked(Value::String(found.text(&subject_chars)))];
                for group in &found.groups {
                    let value = group.map_or(Value::Undefined, |(start, end)| {
                        Value::String(subject_chars[start..end].iter().collect())
                    });
                    args.push(Tracked::untracked(value));
                }
                args.push(Tracked::untracked(Value::Number(found.start as f64)));
                args.push(Tracked::untracked(Value::String(subject.clone())));
                let returned = rt.call_expression(&replacement, None, &args, call.loc())?;
                let text = returned.value.to_display_string();
                let len = char_len(&text);
                let pieces = if len == 0 {
                    Vec::new()
                } else {
                    vec![ReplacementPiece {
                        start: 0,
                        len,
                        source: PieceSource::Replacement { offset: 0 },
                    }]
                };
                (text.clone(), text, pieces, returned.tracking)
            }
            other => {
                let template = other.to_display_string();
                let (text, pieces) = expand_template(&template, found, &subject_chars);
                (text, template, pieces, replacement.tracking)
            }
        };
        let len = char_len(&text);
        let record = rt.emit(
            RecordDraft::new(Operation::StringReplacement, ResultValue::String(text.clone()))
                .arg("replacement", ArgRef::new(ResultValue::String(source_text), tracking))
                .arg("subject", ArgRef::tracking_only(subject_tracked.tracking))
                .runtime(RuntimeArgs {
                    start: Some(found.start),
                    end: Some(found.end),
                    replacement_pieces: pieces,
                    ..RuntimeArgs::default()
                })
                .loc(call.loc()),
        );
        ranges.push(ReplacementRange {
            record,
            start: out_len,
            end: out_len + len,
            subject_start: found.start,
            subject_end: found.end,
        });
        outcome = outcome.extra(
            format!("replacement{n}"),
            ArgRef::new(ResultValue::String(text.clone()), record),
        );
        out.push_str(&text);
        out_len += len;
        last = found.end;
    }
    out.extend(&subject_chars[last..]);

    outcome.value = Value::String(out);
    Ok(outcome.runtime(RuntimeArgs {
        replacements: ranges,
        ..RuntimeArgs::default()
    }))
}

fn match_record(
    rt: &mut TrackingRuntime,
    subject: &Tracked,
    text: String,
    index: usize,
    call: &NativeCall<'_>,
) -> Option<LogId> {
    rt.emit(
        RecordDraft::new(Operation::MatchResult, ResultValue::String(text))
            .arg("input", ArgRef::tracking_only(subject.tracking))
            .runtime(RuntimeArgs {
                match_index: Some(index),
                ..RuntimeArgs::default()
            })
            .loc(call.loc()),
    )
}

pub(super) fn match_pattern(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let subject_tracked = call.receiver(KnownFunction::StringMatch)?.clone();
    let subject = receiver_text(KnownFunction::StringMatch, call)?;
    let pattern_arg = call.arg(0);
    let compiled;
    let regex = match &pattern_arg.value {
        Value::RegExp(regex) => regex.as_ref(),
        Value::Undefined => {
            compiled = RegexValue::new("", "")?;
            &compiled
        }
        other => {
            compiled = RegexValue::new(&other.to_display_string(), "")?;
            &compiled
        }
    };
    let subject_chars: Vec<char> = subject.chars().collect();
    let matches = regex_matches(&regex.compiled, &subject, regex.global)?;
    if matches.is_empty() {
        return Ok(HandlerOutcome::new(Value::Null));
    }

    let mut elements = Vec::new();
    let mut trackings = Vec::new();
    if regex.global {
        for found in &matches {
            let text = found.text(&subject_chars);
            trackings.push(match_record(rt, &subject_tracked, text.clone(), found.start, call));
            elements.push(Value::String(text));
        }
    } else {
        let found = &matches[0];
        let full = found.text(&subject_chars);
        trackings.push(match_record(rt, &subject_tracked, full.clone(), found.start, call));
        elements.push(Value::String(full.clone()));

        // Group positions are recovered by searching the unmatched rest of the
        // full match, which is only reliable for flat patterns.
        let nested = has_nested_groups(&regex.source);
        let mut remaining = full;
        let mut removed = 0usize;
        for group in &found.groups {
            let Some((start, end)) = group else {
                elements.push(Value::Undefined);
                trackings.push(None);
                continue;
            };
            let text: String = subject_chars[*start..*end].iter().collect();
            let Some(offset) = char_index_of(&remaining, &text, 0) else {
                elements.push(Value::String(text));
                trackings.push(None);
                continue;
            };
            let index = found.start + offset + removed;
            trackings.push(match_record(rt, &subject_tracked, text.clone(), index, call));
            let to_remove = if nested { 0 } else { offset + char_len(&text) };
            removed += to_remove;
            remaining = char_slice(&remaining, to_remove, char_len(&remaining));
            elements.push(Value::String(text));
        }
    }

    let array = Value::new_array(elements);
    if let Some(owner) = array.object_id() {
        rt.set_element_trackings(owner, trackings);
    }
    Ok(HandlerOutcome::new(array))
}

/// Char ranges of the pieces `subject` splits into. Capture groups of a
/// regex separator are spliced in after the piece they follow; `None` is a
/// group that did not participate.
fn split_ranges(subject: &str, separator: &Value) -> Result<Vec<Option<(usize, usize)>>> {
    let total = char_len(subject);
    match separator {
        Value::Undefined => Ok(vec![Some((0, total))]),
        Value::RegExp(regex) => {
            if total == 0 {
                let matches_empty = !regex_matches(&regex.compiled, subject, false)?.is_empty();
                return Ok(if matches_empty { Vec::new() } else { vec![Some((0, 0))] });
            }
            let mut ranges = Vec::new();
            let mut last = 0usize;
            for found in regex_matches(&regex.compiled, subject, true)? {
                if found.start >= total {
                    break;
                }
                if found.end == found.start && found.start == last {
                    continue;
                }
                ranges.push(Some((last, found.start)));
                ranges.extend(found.groups.iter().copied());
                last = found.end;
            }
            ranges.push(Some((last, total)));
            Ok(ranges)
        }
        other => {
            let needle = other.to_display_string();
            if needle.is_empty() {
                return Ok((0..total).map(|index| Some((index, index + 1))).collect());
            }
            let mut ranges = Vec::new();
            let mut last = 0usize;
            for found in text_matches(subject, &needle, true) {
                ranges.push(Some((last, found.start)));
                last = found.end;
            }
            ranges.push(Some((last, total)));
            Ok(ranges)
        }
    }
}

pub(super) fn split(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let subject_tracked = call.receiver(KnownFunction::StringSplit)?.clone();
    let subject = receiver_text(KnownFunction::StringSplit, call)?;
    let mut ranges = split_ranges(&subject, &call.arg(0).value)?;
    let limit = call.arg(1).value;
    if !matches!(limit, Value::Undefined) {
        let limit = limit.to_number();
        let limit = if limit.is_finite() && limit > 0.0 {
            limit as usize
        } else {
            0
        };
        ranges.truncate(limit);
    }

    let mut elements = Vec::with_capacity(ranges.len());
    let mut trackings = Vec::with_capacity(ranges.len());
    for range in ranges {
        let Some((start, end)) = range else {
            elements.push(Value::Undefined);
            trackings.push(None);
            continue;
        };
        let text = char_slice(&subject, start, end);
        trackings.push(rt.emit(
            RecordDraft::new(Operation::SplitResult, ResultValue::String(text.clone()))
                .arg("string", ArgRef::tracking_only(subject_tracked.tracking))
                .runtime(RuntimeArgs {
                    split_offset: Some(start),
                    ..RuntimeArgs::default()
                })
                .loc(call.loc()),
        ));
        elements.push(Value::String(text));
    }
    let array = Value::new_array(elements);
    if let Some(owner) = array.object_id() {
        rt.set_element_trackings(owner, trackings);
    }
    Ok(HandlerOutcome::new(array))
}

fn is_script_whitespace(ch: char) -> bool {
    ch.is_whitespace() || ch == '\u{FEFF}'
}

/// `[start, end)` of the substring a `slice`-like call selects.
fn extract_range(known: KnownFunction, text: &str, call: &NativeCall<'_>) -> (usize, usize) {
    let len = char_len(text);
    let first = call.arg(0).value;
    let second = call.arg(1).value;
    let clamp = |value: f64| -> usize {
        if value.is_nan() || value <= 0.0 {
            0
        } else {
            (value.trunc() as usize).min(len)
        }
    };
    match known {
        KnownFunction::StringSlice => {
            let start = relative_index(first.to_number(), len);
            let end = match second {
                Value::Undefined => len,
                other => relative_index(other.to_number(), len),
            };
            (start, end.max(start))
        }
        KnownFunction::StringSubstring => {
            let a = clamp(first.to_number());
            let b = match second {
                Value::Undefined => len,
                other => clamp(other.to_number()),
            };
            (a.min(b), a.max(b))
        }
        KnownFunction::StringSubstr => {
            let start = relative_index(first.to_number(), len);
            let count = match second {
                Value::Undefined => len - start,
                other => clamp(other.to_number()).min(len - start),
            };
            (start, start + count)
        }
        _ => {
            let chars: Vec<char> = text.chars().collect();
            let start = chars
                .iter()
                .position(|ch| !is_script_whitespace(*ch))
                .unwrap_or(len);
            let end = chars
                .iter()
                .rposition(|ch| !is_script_whitespace(*ch))
                .map_or(start, |last| last + 1);
            (start, end.max(start))
        }
    }
}

/// `slice`, `substring`, `substr` and `trim`: the result is a window of the
/// receiver starting at `runtime_args.start`.
pub(super) fn extract(known: KnownFunction, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let text = receiver_text(known, call)?;
    let (start, end) = extract_range(known, &text, call);
    Ok(HandlerOutcome::new(Value::String(char_slice(&text, start, end))).runtime(
        RuntimeArgs {
            start: Some(start),
            end: Some(end),
            ..RuntimeArgs::default()
        },
    ))
}

pub(super) fn change_case(known: KnownFunction, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let text = receiver_text(known, call)?;
    let changed = if known == KnownFunction::StringToUpperCase {
        text.to_uppercase()
    } else {
        text.to_lowercase()
    };
    Ok(HandlerOutcome::new(Value::String(changed)))
}

pub(super) fn concat(call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let mut text = receiver_text(KnownFunction::StringConcat, call)?;
    for arg in call.args {
        text.push_str(&arg.value.to_display_string());
    }
    Ok(HandlerOutcome::new(Value::String(text)))
}
