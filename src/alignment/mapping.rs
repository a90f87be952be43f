use serde::{Deserialize, Serialize};

use super::{
    AttributeOrigin, Confidence, HtmlOrigin, NodeOrigin, Origin, OriginTable, ValueOrigin,
};
use crate::dom::{
    Dom, EscapeContext, NodeId, NodeKind, PieceKind, SerializedPiece, escape_context,
    escape_sources,
};
use crate::operation_log::LogId;

/// A run of output characters that all come from one origin. Output char
/// `start + k` maps to `base + k + offsets[k]` in the origin's value; chars
/// past the end of `offsets` reuse its last entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedSegment {
    pub start: usize,
    pub len: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking: Option<LogId>,
    pub base: isize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offsets: Option<Vec<isize>>,
    pub confidence: Confidence,
}

impl MappedSegment {
    pub fn contains(&self, char_index: usize) -> bool {
        char_index >= self.start && char_index < self.start + self.len
    }

    /// Index in the origin's value, or `None` when the correction lands
    /// before its start.
    pub fn target(&self, char_index: usize) -> Option<usize> {
        let k = char_index.checked_sub(self.start)?;
        let correction = self
            .offsets
            .as_ref()
            .and_then(|offsets| offsets.get(k).or(offsets.last()))
            .copied()
            .unwrap_or(0);
        usize::try_from(self.base + k as isize + correction).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OriginHit {
    pub tracking: Option<LogId>,
    pub char_index: usize,
    pub confidence: Confidence,
}

/// Serialized HTML (or text content) of a subtree with the origin of every
/// character that has one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlMapping {
    text: String,
    char_len: usize,
    segments: Vec<MappedSegment>,
}

impl HtmlMapping {
    /// Maps `node`'s `innerHTML`, or its `outerHTML` when `outer` is set.
    pub fn build(dom: &Dom, origins: &OriginTable, node: NodeId, outer: bool) -> Self {
        let mut mapping = Self::default();
        let mut sink = |piece: SerializedPiece| mapping.push_piece(dom, origins, piece);
        if outer {
            dom.serialize_node(node, &mut sink);
        } else {
            dom.serialize_children(node, &mut sink);
        }
        mapping
    }

    fn push_piece(&mut self, dom: &Dom, origins: &OriginTable, piece: SerializedPiece) {
        let position = self.char_len;
        let len = piece.char_len();
        let node_origin = origins.get(piece.node);
        match &piece.kind {
            PieceKind::Attribute {
                name,
                value_start,
                value_len,
            } => match node_origin.and_then(|origin| origin.attributes.get(name)) {
                Some(AttributeOrigin::Html(origin)) => self.push_html(position, len, origin),
                Some(AttributeOrigin::Parts {
                    name: name_origin,
                    value,
                }) => {
                    if let Some(name_origin) = name_origin {
                        self.push_value(position + 1, name.chars().count(), name_origin, None);
                    }
                    if let Some(value) = value {
                        let raw = dom
                            .element(piece.node)
                            .and_then(|element| element.attr(name))
                            .unwrap_or_default();
                        let sources = escape_sources(raw, EscapeContext::Attribute);
                        self.push_value(position + value_start, *value_len, value, Some(sources));
                    }
                }
                None => {}
            },
            kind => {
                let origin = node_origin.and_then(|origin| piece_origin(origin, kind));
                let tag_len = dom.tag_name(piece.node).map_or(0, |tag| tag.chars().count());
                match (origin, kind) {
                    (None, _) => {}
                    (Some(Origin::Html(origin)), _) => self.push_html(position, len, origin),
                    (Some(Origin::Value(value)), PieceKind::OpeningTagStart) => {
                        self.push_value(position, len, value, Some(tag_sources(1, tag_len)));
                    }
                    (Some(Origin::Value(value)), PieceKind::ClosingTag) => {
                        self.push_value(position, len, value, Some(tag_sources(2, tag_len)));
                    }
                    (Some(Origin::Value(value)), PieceKind::Text(context)) => {
                        let raw = match dom.kind(piece.node) {
                            Some(NodeKind::Text(text)) => text.as_str(),
                            _ => "",
                        };
                        let sources = escape_sources(raw, *context);
                        self.push_value(position, len, value, Some(sources));
                    }
                    (Some(Origin::Value(value)), _) => self.push_value(position, len, value, None),
                }
            }
        }
        self.text.push_str(&piece.text);
        self.char_len += len;
    }

    /// Maps `node`'s `textContent`: raw text, comments excluded unless `node`
    /// is itself a comment (its `data`).
    pub fn text_content(dom: &Dom, origins: &OriginTable, node: NodeId) -> Self {
        let mut mapping = Self::default();
        let text_nodes: Vec<NodeId> = match dom.kind(node) {
            Some(NodeKind::Text(_) | NodeKind::Comment(_)) => vec![node],
            _ => dom
                .descendants(node)
                .into_iter()
                .filter(|id| matches!(dom.kind(*id), Some(NodeKind::Text(_))))
                .collect(),
        };
        for text_node in text_nodes {
            let (raw, context) = match dom.kind(text_node) {
                Some(NodeKind::Text(raw)) => {
                    let parent_tag = dom.parent(text_node).and_then(|p| dom.tag_name(p));
                    (raw, escape_context(parent_tag))
                }
                Some(NodeKind::Comment(raw)) => (raw, EscapeContext::Raw),
                _ => continue,
            };
            let len = raw.chars().count();
            let position = mapping.char_len;
            let origin = origins
                .get(text_node)
                .and_then(|origin| origin.text_value.as_ref());
            match origin {
                Some(Origin::Value(value)) => mapping.push_value(position, len, value, None),
                Some(Origin::Html(html)) => {
                    let first_escaped = first_escaped_chars(&escape_sources(raw, context), len);
                    mapping.push_raw_html(position, html, &first_escaped, 0);
                }
                None => {}
            }
            mapping.text.push_str(raw);
            mapping.char_len += len;
        }
        mapping
    }

    /// Maps the raw value of attribute `name` on `node`, as `getAttribute`
    /// returns it.
    pub fn attribute_value(dom: &Dom, origins: &OriginTable, node: NodeId, name: &str) -> Self {
        let mut mapping = Self::default();
        let name = name.to_ascii_lowercase();
        let Some(raw) = dom.get_attribute(node, &name) else {
            return mapping;
        };
        let len = raw.chars().count();
        match origins.get(node).and_then(|origin| origin.attributes.get(&name)) {
            Some(AttributeOrigin::Parts {
                value: Some(value), ..
            }) => mapping.push_value(0, len, value, None),
            Some(AttributeOrigin::Html(html)) => {
                let escaped = escape_sources(raw, EscapeContext::Attribute);
                let first_escaped = first_escaped_chars(&escaped, len);
                // ` name="` precedes the value inside the attribute piece.
                mapping.push_raw_html(0, html, &first_escaped, name.chars().count() + 3);
            }
            _ => {}
        }
        mapping.text.push_str(raw);
        mapping.char_len = len;
        mapping
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn char_len(&self) -> usize {
        self.char_len
    }

    pub fn segments(&self) -> &[MappedSegment] {
        &self.segments
    }

    pub(crate) fn into_parts(self) -> (String, Vec<MappedSegment>) {
        (self.text, self.segments)
    }

    /// Which origin wrote output char `char_index`, and where in its value.
    pub fn origin_at_char_index(&self, char_index: usize) -> Option<OriginHit> {
        let segment = self
            .segments
            .iter()
            .find(|segment| segment.contains(char_index))?;
        Some(OriginHit {
            tracking: segment.tracking,
            char_index: segment.target(char_index)?,
            confidence: segment.confidence,
        })
    }

    /// Raw char `k` starts at serialized char `piece_offset + first_escaped[k]`
    /// of the piece `html` describes.
    fn push_raw_html(
        &mut self,
        start: usize,
        html: &HtmlOrigin,
        first_escaped: &[usize],
        piece_offset: usize,
    ) {
        let offsets = first_escaped
            .iter()
            .enumerate()
            .map(|(k, escaped)| html.assigned_index(piece_offset + *escaped) - k as isize)
            .collect();
        self.segments.push(MappedSegment {
            start,
            len: first_escaped.len(),
            tracking: html.tracking,
            base: 0,
            offsets: Some(offsets),
            confidence: html.confidence,
        });
    }

    fn push_html(&mut self, start: usize, len: usize, html: &HtmlOrigin) {
        self.segments.push(MappedSegment {
            start,
            len,
            tracking: html.tracking,
            base: html.input_index - html.extra_chars_added,
            offsets: html.offsets.clone(),
            confidence: html.confidence,
        });
    }

    /// `sources[k]` is the value index output char `k` came from.
    fn push_value(
        &mut self,
        start: usize,
        len: usize,
        origin: &ValueOrigin,
        sources: Option<Vec<usize>>,
    ) {
        let offsets = sources.map(|sources| {
            sources
                .iter()
                .enumerate()
                .map(|(k, source)| *source as isize - k as isize)
                .collect()
        });
        self.segments.push(MappedSegment {
            start,
            len,
            tracking: origin.tracking,
            base: 0,
            offsets,
            confidence: Confidence::Exact,
        });
    }
}

fn piece_origin<'a>(origin: &'a NodeOrigin, kind: &PieceKind) -> Option<&'a Origin> {
    match kind {
        PieceKind::OpeningTagStart => origin.opening_tag_start.as_ref(),
        PieceKind::OpeningTagEnd => origin.opening_tag_end.as_ref(),
        PieceKind::ClosingTag => origin.closing_tag.as_ref(),
        PieceKind::Text(_) | PieceKind::CommentText => origin.text_value.as_ref(),
        PieceKind::CommentStart => origin.comment_start.as_ref(),
        PieceKind::CommentEnd => origin.comment_end.as_ref(),
        PieceKind::Attribute { .. } => None,
    }
}

/// Index of the first escaped char produced by each of `len` raw chars.
fn first_escaped_chars(sources: &[usize], len: usize) -> Vec<usize> {
    let mut first = vec![0usize; len];
    for (escaped_index, raw_index) in sources.iter().enumerate().rev() {
        if let Some(slot) = first.get_mut(*raw_index) {
            *slot = escaped_index;
        }
    }
    first
}

/// `<div` or `</div>`: delimiters map to the nearest tag name char.
fn tag_sources(prefix: usize, tag_len: usize) -> Vec<usize> {
    let last = tag_len.saturating_sub(1);
    let mut sources = vec![0; prefix];
    sources.extend(0..tag_len);
    if prefix == 2 {
        sources.push(last);
    }
    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::{HtmlAssignment, map_inner_html_assignment};

    fn assigned_through(html: &str) -> crate::Result<(Dom, OriginTable, NodeId)> {
        let mut dom = Dom::new();
        let div = dom.create_element("div");
        dom.append_child(dom.root(), div)?;
        dom.set_inner_html(div, html)?;
        let mut origins = OriginTable::new();
        map_inner_html_assignment(
            &dom,
            &mut origins,
            div,
            &HtmlAssignment {
                assigned: html,
                tracking: Some(LogId(4)),
                action: "assignInnerHTML",
                initial_extra: 0,
                nodes_to_ignore: &[],
                validate: true,
            },
        );
        Ok((dom, origins, div))
    }

    #[test]
    fn every_char_of_a_clean_assignment_maps_to_itself() -> crate::Result<()> {
        let html = "<b class=\"x\">hi</b><!--c-->";
        let (dom, origins, div) = assigned_through(html)?;
        let mapping = HtmlMapping::build(&dom, &origins, div, false);
        assert_eq!(mapping.text(), html);
        for index in 0..html.len() {
            let hit = mapping.origin_at_char_index(index);
            assert_eq!(hit.map(|hit| (hit.tracking, hit.char_index)), Some((Some(LogId(4)), index)));
        }
        Ok(())
    }

    #[test]
    fn normalized_quotes_still_map_onto_the_assignment() -> crate::Result<()> {
        let html = "<a  href='u'>x</a >";
        let (dom, origins, div) = assigned_through(html)?;
        let mapping = HtmlMapping::build(&dom, &origins, div, false);
        assert_eq!(mapping.text(), "<a href=\"u\">x</a>");
        let at = |index: usize| mapping.origin_at_char_index(index).map(|hit| hit.char_index);
        assert_eq!(at(3), Some(4));
        assert_eq!(at(9), Some(10));
        assert_eq!(at(12), Some(13));
        Ok(())
    }

    #[test]
    fn value_origins_translate_escapes() -> crate::Result<()> {
        let mut dom = Dom::new();
        let p = dom.create_element("p");
        let text = dom.create_text("a<b");
        dom.append_child(p, text)?;
        let mut origins = OriginTable::new();
        origins.set_text_value(text, ValueOrigin::new(Some(LogId(2)), "createTextNode"));
        origins.set_tag_name(p, ValueOrigin::new(Some(LogId(1)), "createElement"));

        let mapping = HtmlMapping::build(&dom, &origins, p, true);
        assert_eq!(mapping.text(), "<p>a&lt;b</p>");
        let hit = |index: usize| {
            mapping
                .origin_at_char_index(index)
                .map(|hit| (hit.tracking, hit.char_index))
        };
        assert_eq!(hit(1), Some((Some(LogId(1)), 0)));
        assert_eq!(hit(2), None);
        assert_eq!(hit(5), Some((Some(LogId(2)), 1)));
        assert_eq!(hit(8), Some((Some(LogId(2)), 2)));
        assert_eq!(hit(11), Some((Some(LogId(1)), 0)));

        let text_mapping = HtmlMapping::text_content(&dom, &origins, p);
        assert_eq!(text_mapping.text(), "a<b");
        assert_eq!(
            text_mapping.origin_at_char_index(2).map(|hit| hit.char_index),
            Some(2)
        );
        Ok(())
    }

    #[test]
    fn text_content_maps_through_entities() -> crate::Result<()> {
        let html = "<i>a&amp;b</i>";
        let (dom, origins, div) = assigned_through(html)?;
        let mapping = HtmlMapping::text_content(&dom, &origins, div);
        assert_eq!(mapping.text(), "a&b");
        let at = |index: usize| mapping.origin_at_char_index(index).map(|hit| hit.char_index);
        assert_eq!(at(0), Some(3));
        assert_eq!(at(1), Some(4));
        assert_eq!(at(2), Some(9));
        Ok(())
    }

    #[test]
    fn attribute_values_map_to_their_assigned_chars() -> crate::Result<()> {
        let html = "<a title='x&amp;y'>t</a>";
        let (dom, origins, div) = assigned_through(html)?;
        let anchor = dom.children(div)[0];
        let mapping = HtmlMapping::attribute_value(&dom, &origins, anchor, "title");
        assert_eq!(mapping.text(), "x&y");
        let at = |index: usize| mapping.origin_at_char_index(index).map(|hit| hit.char_index);
        assert_eq!(at(0), Some(10));
        assert_eq!(at(1), Some(11));
        assert_eq!(at(2), Some(16));
        assert!(HtmlMapping::attribute_value(&dom, &origins, anchor, "href").segments().is_empty());
        Ok(())
    }

    #[test]
    fn comment_data_maps_through_its_origin() -> crate::Result<()> {
        let html = "ab<!--note-->";
        let (dom, origins, div) = assigned_through(html)?;
        let comment = dom.children(div)[1];
        let mapping = HtmlMapping::text_content(&dom, &origins, comment);
        assert_eq!(mapping.text(), "note");
        assert_eq!(mapping.origin_at_char_index(0).map(|hit| hit.char_index), Some(6));
        Ok(())
    }
}
