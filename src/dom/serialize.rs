use super::{Dom, NodeId, NodeKind, is_void_tag};

/// How text is escaped when it is written back out as HTML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EscapeContext {
    /// `script`, `style`, `iframe` and friends: written verbatim.
    Raw,
    /// Content of `noscript`: `&`, `<` and `>` are always escaped.
    Noscript,
    Text,
    Attribute,
}

pub(crate) fn escape_context(parent_tag: Option<&str>) -> EscapeContext {
    match parent_tag {
        Some("script" | "style" | "iframe" | "xmp" | "noembed" | "noframes") => EscapeContext::Raw,
        Some("noscript") => EscapeContext::Noscript,
        _ => EscapeContext::Text,
    }
}

fn escaped_char(ch: char, context: EscapeContext) -> Option<&'static str> {
    match (context, ch) {
        (EscapeContext::Raw, _) => None,
        (_, '&') => Some("&amp;"),
        (EscapeContext::Text | EscapeContext::Attribute, '\u{00A0}') => Some("&nbsp;"),
        (EscapeContext::Text | EscapeContext::Noscript, '<') => Some("&lt;"),
        (EscapeContext::Text | EscapeContext::Noscript, '>') => Some("&gt;"),
        (EscapeContext::Attribute, '"') => Some("&quot;"),
        _ => None,
    }
}

pub(crate) fn escape_text(raw: &str, context: EscapeContext) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match escaped_char(ch, context) {
            Some(entity) => out.push_str(entity),
            None => out.push(ch),
        }
    }
    out
}

pub(crate) fn escape_attr_value(raw: &str) -> String {
    escape_text(raw, EscapeContext::Attribute)
}

/// For every char of the escaped form of `raw`, the index of the raw char that
/// produced it.
pub(crate) fn escape_sources(raw: &str, context: EscapeContext) -> Vec<usize> {
    let mut sources = Vec::with_capacity(raw.len());
    for (index, ch) in raw.chars().enumerate() {
        let width = escaped_char(ch, context).map_or(1, |entity| entity.len());
        sources.extend(std::iter::repeat_n(index, width));
    }
    sources
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PieceKind {
    /// `<tag`
    OpeningTagStart,
    /// ` name="value"`; `value_start` is the char offset of the value inside
    /// the piece.
    Attribute {
        name: String,
        value_start: usize,
        value_len: usize,
    },
    /// `>`
    OpeningTagEnd,
    Text(EscapeContext),
    CommentStart,
    CommentText,
    CommentEnd,
    /// `</tag>`
    ClosingTag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SerializedPiece {
    pub(crate) node: NodeId,
    pub(crate) kind: PieceKind,
    pub(crate) text: String,
}

impl SerializedPiece {
    fn new(node: NodeId, kind: PieceKind, text: String) -> Self {
        Self { node, kind, text }
    }

    pub(crate) fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

impl Dom {
    /// Streams the serialization of `node_id`'s children, piece by piece.
    pub(crate) fn serialize_children(
        &self,
        node_id: NodeId,
        sink: &mut dyn FnMut(SerializedPiece),
    ) {
        let context = escape_context(self.tag_name(node_id));
        for child in self.children(node_id) {
            self.serialize_in_context(*child, context, sink);
        }
    }

    pub(crate) fn serialize_node(&self, node_id: NodeId, sink: &mut dyn FnMut(SerializedPiece)) {
        let parent_tag = self.parent(node_id).and_then(|parent| self.tag_name(parent));
        self.serialize_in_context(node_id, escape_context(parent_tag), sink);
    }

    fn serialize_in_context(
        &self,
        node_id: NodeId,
        context: EscapeContext,
        sink: &mut dyn FnMut(SerializedPiece),
    ) {
        stacker::maybe_grow(32 * 1024, 1024 * 1024, || match self.kind(node_id) {
            Some(NodeKind::Document) => self.serialize_children(node_id, sink),
            Some(NodeKind::Text(text)) => sink(SerializedPiece::new(
                node_id,
                PieceKind::Text(context),
                escape_text(text, context),
            )),
            Some(NodeKind::Comment(text)) => {
                sink(SerializedPiece::new(node_id, PieceKind::CommentStart, "<!--".into()));
                sink(SerializedPiece::new(node_id, PieceKind::CommentText, text.clone()));
                sink(SerializedPiece::new(node_id, PieceKind::CommentEnd, "-->".into()));
            }
            Some(NodeKind::Element(element)) => {
                let tag = element.tag_name();
                sink(SerializedPiece::new(
                    node_id,
                    PieceKind::OpeningTagStart,
                    format!("<{tag}"),
                ));
                for (name, value) in element.attrs() {
                    let escaped = escape_attr_value(value);
                    let value_len = escaped.chars().count();
                    sink(SerializedPiece::new(
                        node_id,
                        PieceKind::Attribute {
                            name: name.clone(),
                            value_start: name.chars().count() + 3,
                            value_len,
                        },
                        format!(" {name}=\"{escaped}\""),
                    ));
                }
                sink(SerializedPiece::new(node_id, PieceKind::OpeningTagEnd, ">".into()));
                if is_void_tag(tag) {
                    return;
                }
                self.serialize_children(node_id, sink);
                sink(SerializedPiece::new(
                    node_id,
                    PieceKind::ClosingTag,
                    format!("</{tag}>"),
                ));
            }
            None => {}
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;

    #[test]
    fn escaping_depends_on_context() {
        assert_eq!(escape_text("a<b>&\u{a0}", EscapeContext::Text), "a&lt;b&gt;&amp;&nbsp;");
        assert_eq!(escape_text("a<b>&", EscapeContext::Raw), "a<b>&");
        assert_eq!(escape_text("\u{a0}&<", EscapeContext::Noscript), "\u{a0}&amp;&lt;");
        assert_eq!(escape_attr_value("say \"hi\" & <go>"), "say &quot;hi&quot; &amp; <go>");
    }

    #[test]
    fn escape_sources_point_back_to_raw_chars() {
        assert_eq!(
            escape_sources("a&b", EscapeContext::Text),
            vec![0, 1, 1, 1, 1, 1, 2]
        );
    }

    #[test]
    fn pieces_cover_the_serialized_output() -> Result<()> {
        let mut dom = Dom::new();
        let div = dom.create_element("div");
        dom.set_inner_html(div, "<p class=x>a&amp;b</p><br><!--c-->")?;
        let mut pieces = Vec::new();
        dom.serialize_children(div, &mut |piece| pieces.push(piece));
        let joined: String = pieces.iter().map(|piece| piece.text.as_str()).collect();
        assert_eq!(joined, dom.inner_html(div)?);
        assert_eq!(joined, "<p class=\"x\">a&amp;b</p><br><!--c-->");
        assert_eq!(
            pieces[1].kind,
            PieceKind::Attribute {
                name: "class".into(),
                value_start: 8,
                value_len: 1
            }
        );
        Ok(())
    }
}
