use super::{AttributeOrigin, Confidence, HtmlOrigin, Origin, OriginTable};
use crate::dom::{
    Dom, EscapeContext, NodeId, NodeKind, escape_attr_value, escape_context, escape_text,
    is_void_tag,
};
use crate::operation_log::LogId;

/// Longest entity the offset scan looks for.
const MAX_ENTITY_LEN: usize = 30;

/// One HTML string that was parsed into the children of a node.
#[derive(Debug, Clone, Copy)]
pub struct HtmlAssignment<'a> {
    pub assigned: &'a str,
    /// Record whose result is `assigned`.
    pub tracking: Option<LogId>,
    pub action: &'a str,
    /// Drift before the first mapped node; negative when `assigned` starts
    /// with text that produced no node.
    pub initial_extra: isize,
    /// Children that existed before the assignment and must not be mapped.
    pub nodes_to_ignore: &'a [NodeId],
    pub validate: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignmentReport {
    pub mapped_nodes: usize,
    pub coarse_origins: usize,
    pub diagnostics: Vec<String>,
}

/// Records the origin of every node produced under `target` by assigning
/// `assignment.assigned`. Mismatches degrade to [`Confidence::Coarse`]; this
/// never fails.
pub fn map_inner_html_assignment(
    dom: &Dom,
    origins: &mut OriginTable,
    target: NodeId,
    assignment: &HtmlAssignment<'_>,
) -> AlignmentReport {
    let assigned: Vec<char> = assignment.assigned.chars().collect();
    let mut aligner = Aligner {
        dom,
        origins,
        content_end: assigned.len(),
        assigned,
        tracking: assignment.tracking,
        action: assignment.action,
        validate: assignment.validate,
        cursor: 0,
        extra: assignment.initial_extra,
        report: AlignmentReport::default(),
    };
    aligner.process_children(target, assignment.nodes_to_ignore);
    aligner.report
}

struct Aligner<'a> {
    dom: &'a Dom,
    origins: &'a mut OriginTable,
    assigned: Vec<char>,
    content_end: usize,
    tracking: Option<LogId>,
    action: &'a str,
    validate: bool,
    /// Offset in the serialized HTML being reconstructed.
    cursor: isize,
    /// Chars the serialized form has gained over the assigned string so far.
    extra: isize,
    report: AlignmentReport,
}

impl Aligner<'_> {
    fn assigned_pos(&self) -> isize {
        self.cursor - self.extra
    }

    fn assigned_from(&self, pos: isize) -> &[char] {
        if pos < 0 {
            return &[];
        }
        self.assigned.get(pos as usize..).unwrap_or(&[])
    }

    fn origin(&self, offsets: Option<Vec<isize>>, confidence: Confidence) -> HtmlOrigin {
        HtmlOrigin {
            tracking: self.tracking,
            action: self.action.to_string(),
            input_index: self.cursor,
            extra_chars_added: self.extra,
            offsets,
            confidence,
        }
    }

    fn note(&mut self, confidence: Confidence, message: impl FnOnce() -> String) {
        if confidence == Confidence::Coarse {
            self.report.coarse_origins += 1;
            self.report.diagnostics.push(message());
        }
    }

    fn process_children(&mut self, parent: NodeId, ignore: &[NodeId]) {
        stacker::maybe_grow(64 * 1024, 1024 * 1024, || {
            let children = self.dom.children(parent).to_vec();
            self.origins.set_contents(parent, children.clone());
            for child in children {
                if ignore.contains(&child) {
                    continue;
                }
                self.skip_declarations();
                self.process_node(child);
                self.report.mapped_nodes += 1;
            }
        });
    }

    /// `<!DOCTYPE ...>` and similar produce no node.
    fn skip_declarations(&mut self) {
        loop {
            let tail = self.assigned_from(self.assigned_pos());
            if !(tail.starts_with(&['<', '!']) && !tail.starts_with(&['<', '!', '-', '-'])) {
                return;
            }
            let Some(end) = tail.iter().position(|ch| *ch == '>') else {
                return;
            };
            self.extra -= end as isize + 1;
        }
    }

    fn process_node(&mut self, node: NodeId) {
        let dom = self.dom;
        match dom.kind(node) {
            Some(NodeKind::Text(text)) => {
                let parent_tag = dom.parent(node).and_then(|p| dom.tag_name(p));
                let context = escape_context(parent_tag);
                let serialized: Vec<char> = escape_text(text, context).chars().collect();
                self.process_text(node, &serialized, context);
            }
            Some(NodeKind::Comment(text)) => {
                let len = text.chars().count() as isize;
                let start = Origin::Html(self.origin(None, Confidence::Exact));
                self.origins.entry(node).comment_start = Some(start);
                self.cursor += 4;
                let body = Origin::Html(self.origin(None, Confidence::Exact));
                self.origins.entry(node).text_value = Some(body);
                self.cursor += len;
                let end = Origin::Html(self.origin(None, Confidence::Exact));
                self.origins.entry(node).comment_end = Some(end);
                self.cursor += 3;
            }
            Some(NodeKind::Element(_)) => self.process_element(node),
            Some(NodeKind::Document) | None => {}
        }
    }

    fn process_text(&mut self, node: NodeId, serialized: &[char], context: EscapeContext) {
        let (offsets, extra_here) = self.char_mapping_offsets(serialized, 0, context);
        let mut confidence = Confidence::Exact;
        if self.validate && !serialized.is_empty() {
            let first = self.origin(Some(offsets.clone()), Confidence::Exact);
            let assigned = self.assigned_from(first.assigned_index(0));
            if !chars_correspond(serialized, assigned) {
                confidence = Confidence::Coarse;
            }
        }
        let offsets = (!offsets.is_empty()).then_some(offsets);
        let origin = self.origin(offsets, confidence);
        let at = self.assigned_pos();
        self.note(confidence, || format!("text node at assigned offset {at} does not line up"));
        self.origins.entry(node).text_value = Some(Origin::Html(origin));
        self.extra += extra_here;
        self.cursor += serialized.len() as isize;
    }

    /// Per-char corrections for `serialized`, which starts `adjustment` chars
    /// past the current assigned offset. Returns the corrections and the drift
    /// they add.
    fn char_mapping_offsets(
        &self,
        serialized: &[char],
        adjustment: isize,
        context: EscapeContext,
    ) -> (Vec<isize>, isize) {
        let mut offsets = Vec::with_capacity(serialized.len());
        let mut extra_here = 0isize;
        let mut i = 0usize;
        while i < serialized.len() {
            offsets.push(-extra_here);
            let pos = self.cursor + i as isize - self.extra + adjustment - extra_here;
            if pos >= self.content_end as isize {
                break;
            }
            let assigned = self.assigned_from(pos);
            if serialized[i] == '\n' && assigned.first() == Some(&'\r') {
                extra_here -= 1;
            }

            let entity_serialized = entity_len(serialized, i);
            let entity_assigned = entity_len(assigned, 0);
            match (entity_serialized, entity_assigned) {
                (Some(_), Some(_)) if context == EscapeContext::Noscript => {
                    // "&amp;" stays raw when parsed and is escaped again on output.
                    for _ in 0.."amp;".len() {
                        i += 1;
                        extra_here += 1;
                        offsets.push(-extra_here);
                    }
                }
                (Some(len), None) => {
                    for _ in 1..len {
                        i += 1;
                        extra_here += 1;
                        offsets.push(-extra_here);
                    }
                }
                (None, Some(len)) => extra_here -= len as isize - 1,
                _ => {}
            }
            i += 1;
        }
        offsets.truncate(serialized.len());
        (offsets, extra_here)
    }

    fn process_element(&mut self, node: NodeId) {
        let dom = self.dom;
        let Some(element) = dom.element(node) else {
            return;
        };
        let tag = element.tag_name().to_string();
        let tag_len = tag.chars().count() as isize;
        let present = starts_with_tag(self.assigned_from(self.assigned_pos()), &tag);
        let confidence = if present {
            Confidence::Exact
        } else {
            Confidence::Coarse
        };
        let at = self.assigned_pos();
        self.note(confidence, || {
            format!("<{tag}> at assigned offset {at} was synthesized by the parser")
        });

        let start = Origin::Html(self.origin(None, confidence));
        self.origins.entry(node).opening_tag_start = Some(start);
        if !present {
            self.extra += 1 + tag_len;
        }
        self.cursor += 1 + tag_len;

        for (name, value) in element.attrs() {
            self.process_attribute(node, name, value, present);
        }

        if present {
            self.account_tag_end(&tag);
        }
        let end = Origin::Html(self.origin(None, confidence));
        self.origins.entry(node).opening_tag_end = Some(end);
        if !present {
            self.extra += 1;
        }
        self.cursor += 1;

        if is_void_tag(&tag) {
            return;
        }

        if tag == "iframe" {
            // Opaque: the content is one chunk that was copied verbatim.
            let mut inner = 0isize;
            dom.serialize_children(node, &mut |piece| inner += piece.char_len() as isize);
            self.cursor += inner;
        } else {
            self.process_children(node, &[]);
        }

        let closing_len = tag_len + 3;
        let tail = self.assigned_from(self.assigned_pos());
        let closing_confidence = if starts_with_closing_tag(tail, &tag) {
            let assigned_len = tail.iter().position(|ch| *ch == '>').map_or(0, |end| end + 1);
            let origin = Origin::Html(self.origin(None, Confidence::Exact));
            self.origins.entry(node).closing_tag = Some(origin);
            // `</div >` loses its whitespace on output.
            self.extra -= assigned_len as isize - closing_len;
            Confidence::Exact
        } else {
            let origin = Origin::Html(self.origin(None, Confidence::Coarse));
            self.origins.entry(node).closing_tag = Some(origin);
            self.extra += closing_len;
            Confidence::Coarse
        };
        if closing_confidence == Confidence::Coarse {
            self.report.coarse_origins += 1;
        }
        self.cursor += closing_len;
    }

    fn process_attribute(&mut self, node: NodeId, name: &str, value: &str, present: bool) {
        let escaped: Vec<char> = escape_attr_value(value).chars().collect();
        let name_len = name.chars().count();
        let piece_len = (1 + name_len + 3 + escaped.len()) as isize;

        if !present {
            let origin = self.origin(None, Confidence::Coarse);
            self.origins
                .entry(node)
                .attributes
                .insert(name.to_string(), AttributeOrigin::Html(origin));
            self.extra += piece_len;
            self.cursor += piece_len;
            return;
        }

        let mut confidence = Confidence::Exact;
        let mut offsets = Vec::with_capacity(piece_len as usize);
        let mut extra_here = 0isize;

        let attr_start = self.assigned_pos();
        let whitespace = leading_whitespace(self.assigned_from(attr_start));
        if whitespace == 0 {
            confidence = Confidence::Coarse;
        }
        extra_here -= whitespace as isize - 1;
        offsets.push(-extra_here);

        let mut in_assigned = attr_start + whitespace as isize;
        offsets.extend(std::iter::repeat_n(-extra_here, name_len));
        in_assigned += name_len as isize;

        let next = self.assigned_from(in_assigned);
        let before_equals = leading_whitespace(next);
        if next.get(before_equals) != Some(&'=') {
            // Bare attribute: `=""` is synthesized.
            for _ in 0..3 {
                extra_here += 1;
                offsets.push(-extra_here);
            }
        } else {
            extra_here -= before_equals as isize;
            in_assigned += before_equals as isize;
            offsets.push(-extra_here);
            in_assigned += 1;

            let after_equals = leading_whitespace(self.assigned_from(in_assigned));
            extra_here -= after_equals as isize;
            in_assigned += after_equals as isize;

            let quoted = matches!(
                self.assigned.get(in_assigned.max(0) as usize),
                Some('"' | '\'')
            );
            if quoted {
                offsets.push(-extra_here);
                in_assigned += 1;
            } else {
                extra_here += 1;
                offsets.push(-extra_here);
            }

            let adjustment = in_assigned - self.assigned_pos();
            let (value_offsets, value_extra) =
                self.char_mapping_offsets(&escaped, adjustment, EscapeContext::Attribute);
            if value_offsets.is_empty() && !escaped.is_empty() {
                confidence = Confidence::Coarse;
                offsets.extend(std::iter::repeat_n(-extra_here, escaped.len()));
            } else {
                offsets.extend(value_offsets.iter().map(|offset| offset - extra_here));
                extra_here += value_extra;
            }

            let last = offsets.last().copied().unwrap_or(0);
            offsets.push(last);
            if !quoted {
                extra_here += 1;
            }
        }

        let origin = self.origin(Some(offsets), confidence);
        if self.validate && confidence == Confidence::Exact {
            let first = name.chars().next();
            let assigned = self
                .assigned
                .get(origin.assigned_index(1).max(0) as usize)
                .map(char::to_ascii_lowercase);
            if first.is_some() && assigned != first {
                confidence = Confidence::Coarse;
            }
        }
        let origin = HtmlOrigin {
            confidence,
            ..origin
        };
        self.note(confidence, || {
            format!("attribute {name} at assigned offset {attr_start} does not line up")
        });
        self.origins
            .entry(node)
            .attributes
            .insert(name.to_string(), AttributeOrigin::Html(origin));
        self.extra += extra_here;
        self.cursor += piece_len;
    }

    /// Drops whatever the assigned tag has between its last attribute and `>`
    /// (whitespace, a self-closing slash, duplicate attributes) plus an
    /// explicit end tag on a void element.
    fn account_tag_end(&mut self, tag: &str) {
        let tail = self.assigned_from(self.assigned_pos());
        let Some(gap) = tag_end_gap(tail) else {
            return;
        };
        self.extra -= gap as isize;
        if is_void_tag(tag) {
            let tail = self.assigned_from(self.assigned_pos());
            if tail.first() == Some(&'>') && starts_with_closing_tag(&tail[1..], tag) {
                let closing = tail[1..].iter().position(|ch| *ch == '>').map_or(0, |end| end + 1);
                self.extra -= closing as isize;
            }
        }
    }
}

/// Length of an entity like `&amp;` or `&#39;` starting at `at`.
fn entity_len(chars: &[char], at: usize) -> Option<usize> {
    if chars.get(at) != Some(&'&') {
        return None;
    }
    let mut end = at + 1;
    while end < chars.len() && end - at < MAX_ENTITY_LEN {
        let ch = chars[end];
        if ch == ';' {
            return (end > at + 1).then_some(end + 1 - at);
        }
        if !(ch.is_ascii_alphanumeric() || ch == '#') {
            return None;
        }
        end += 1;
    }
    None
}

fn chars_correspond(serialized: &[char], assigned: &[char]) -> bool {
    match (serialized.first(), assigned.first()) {
        (Some(a), Some(b)) if a == b => true,
        (Some('\n'), Some('\r')) => true,
        (Some(_), Some(_)) => entity_len(serialized, 0).is_some() || entity_len(assigned, 0).is_some(),
        _ => false,
    }
}

fn leading_whitespace(chars: &[char]) -> usize {
    chars.iter().take_while(|ch| ch.is_ascii_whitespace()).count()
}

fn tag_name_matches(chars: &[char], tag: &str) -> bool {
    let len = tag.chars().count();
    let Some(candidate) = chars.get(..len) else {
        return false;
    };
    let name_ends = chars
        .get(len)
        .is_none_or(|ch| !(ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_'));
    name_ends
        && candidate
            .iter()
            .zip(tag.chars())
            .all(|(a, b)| a.eq_ignore_ascii_case(&b))
}

fn starts_with_tag(chars: &[char], tag: &str) -> bool {
    chars.first() == Some(&'<') && tag_name_matches(&chars[1..], tag)
}

fn starts_with_closing_tag(chars: &[char], tag: &str) -> bool {
    chars.starts_with(&['<', '/']) && tag_name_matches(&chars[2..], tag)
}

/// Chars before the `>` that ends a start tag, skipping quoted values.
fn tag_end_gap(chars: &[char]) -> Option<usize> {
    let mut quote = None;
    for (index, ch) in chars.iter().enumerate() {
        match (quote, ch) {
            (Some(open), _) if *ch == open => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(*ch),
            (None, '>') => return Some(index),
            _ => {}
        }
    }
    None
}
