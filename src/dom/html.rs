use super::{Dom, Element, NodeId, NodeKind};
use crate::{Error, Result};

/// Content of these elements is kept verbatim up to the matching end tag.
const RAW_TEXT_TAGS: &[&str] = &[
    "script", "style", "iframe", "noscript", "xmp", "noembed", "noframes",
];
/// Like raw text, but character references are decoded.
const ESCAPABLE_RAW_TEXT_TAGS: &[&str] = &["textarea", "title"];

fn decode_named(value: &str) -> Option<char> {
    match value {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{00A0}'),
        "divide" => Some('÷'),
        "times" => Some('×'),
        "ensp" => Some('\u{2002}'),
        "emsp" => Some('\u{2003}'),
        "thinsp" => Some('\u{2009}'),
        "copy" => Some('©'),
        "reg" => Some('®'),
        "trade" => Some('™'),
        "euro" => Some('€'),
        "pound" => Some('£'),
        "yen" => Some('¥'),
        "laquo" => Some('«'),
        "raquo" => Some('»'),
        "ldquo" => Some('“'),
        "rdquo" => Some('”'),
        "lsquo" => Some('‘'),
        "rsquo" => Some('’'),
        "hellip" => Some('…'),
        "middot" => Some('·'),
        "mdash" => Some('—'),
        "ndash" => Some('–'),
        "bull" => Some('•'),
        "frac12" => Some('½'),
        "frac14" => Some('¼'),
        "frac34" => Some('¾'),
        "not" => Some('¬'),
        "deg" => Some('°'),
        "plusmn" => Some('±'),
        "larr" => Some('←'),
        "rarr" => Some('→'),
        _ => None,
    }
}

fn decode_numeric(value: &str) -> Option<char> {
    let codepoint = if let Some(hex) = value.strip_prefix('x').or_else(|| value.strip_prefix('X'))
    {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        value.parse::<u32>().ok()?
    };
    if codepoint == 0 {
        return Some('\u{FFFD}');
    }
    char::from_u32(codepoint)
}

/// Decodes the character reference starting at byte `at` (which must be `&`).
/// Returns the decoded char and the number of bytes consumed.
fn decode_entity_at(src: &str, at: usize) -> Option<(char, usize)> {
    let tail = src.get(at + 1..)?;
    let token_end = tail
        .char_indices()
        .find(|(_, ch)| !(ch.is_ascii_alphanumeric() || *ch == '#'))
        .map(|(idx, _)| idx)
        .unwrap_or(tail.len());
    if token_end == 0 {
        return None;
    }
    let raw = &tail[..token_end];
    let decoded = if let Some(rest) = raw.strip_prefix('#') {
        decode_numeric(rest)
    } else {
        decode_named(raw)
    }?;
    let terminated = tail[token_end..].starts_with(';');
    Some((decoded, 1 + token_end + usize::from(terminated)))
}

fn decode_html_character_references(src: &str) -> String {
    if !src.contains('&') {
        return src.to_string();
    }
    let mut out = String::with_capacity(src.len());
    let mut i = 0usize;
    while let Some(ch) = src.get(i..).and_then(|rest| rest.chars().next()) {
        if ch == '&' {
            if let Some((decoded, consumed)) = decode_entity_at(src, i) {
                out.push(decoded);
                i += consumed;
                continue;
            }
        }
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn normalize_newlines(src: &str) -> String {
    if !src.contains('\r') {
        return src.to_string();
    }
    src.replace("\r\n", "\n").replace('\r', "\n")
}

/// Parses an HTML fragment the way `innerHTML` assignment does, with `context`
/// as the tag name of the element receiving it.
pub(crate) fn parse_fragment(html: &str, context: Option<&str>) -> Result<Dom> {
    stacker::maybe_grow(64 * 1024, 1024 * 1024, || parse_fragment_inner(html, context))
}

fn parse_fragment_inner(html: &str, context: Option<&str>) -> Result<Dom> {
    let mut dom = Dom::new();
    let mut stack = vec![dom.root];
    let bytes = html.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        if starts_with_at(bytes, i, b"<!--") {
            let (body, next) = match find_subslice(bytes, i + 4, b"-->") {
                Some(end) => (&html[i + 4..end], end + 3),
                None => (&html[i + 4..], bytes.len()),
            };
            let parent = current(&stack)?;
            dom.create_node(Some(parent), NodeKind::Comment(normalize_newlines(body)));
            i = next;
            continue;
        }

        if bytes[i] == b'<' && bytes.get(i + 1) == Some(&b'/') {
            if bytes.get(i + 2).is_some_and(u8::is_ascii_alphabetic) {
                let (tag, next) = parse_end_tag(html, i)?;
                i = next;
                close_element(&dom, &mut stack, &tag);
                continue;
            }
        } else if bytes[i] == b'<' && bytes.get(i + 1) == Some(&b'!') {
            i = parse_declaration_tag(html, i)?;
            continue;
        } else if bytes[i] == b'<' && bytes.get(i + 1).is_some_and(u8::is_ascii_alphabetic) {
            let (tag, attrs, self_closing, next) = parse_start_tag(html, i)?;
            i = next;

            close_optional_start_tags(&dom, &mut stack, &tag);
            insert_implied_table_wrappers(&mut dom, &mut stack, &tag, context)?;

            let parent = current(&stack)?;
            let mut element = Element::new(&tag);
            element.attrs = attrs;
            let node = dom.create_node(Some(parent), NodeKind::Element(element));

            let raw = RAW_TEXT_TAGS.contains(&tag.as_str());
            let escapable = ESCAPABLE_RAW_TEXT_TAGS.contains(&tag.as_str());
            if raw || escapable {
                let close = find_case_insensitive_raw_end_tag(bytes, i, tag.as_bytes())
                    .unwrap_or(bytes.len());
                let body = html.get(i..close).unwrap_or_default();
                if !body.is_empty() {
                    let body = normalize_newlines(body);
                    let body = if escapable {
                        decode_html_character_references(&body)
                    } else {
                        body
                    };
                    dom.create_node(Some(node), NodeKind::Text(body));
                }
                i = close;
                if i < bytes.len() {
                    let (_, after_end) = parse_end_tag(html, i)?;
                    i = after_end;
                }
                continue;
            }

            if !self_closing && !is_void_tag(&tag) {
                stack.push(node);
            }
            continue;
        }

        let text_start = i;
        i += 1;
        while i < bytes.len() && !starts_markup(bytes, i) {
            i += 1;
        }

        if let Some(text) = html.get(text_start..i) {
            let parent = current(&stack)?;
            let decoded = decode_html_character_references(&normalize_newlines(text));
            if !decoded.is_empty() {
                append_text(&mut dom, parent, decoded);
            }
        }
    }

    Ok(dom)
}

fn current(stack: &[NodeId]) -> Result<NodeId> {
    stack
        .last()
        .copied()
        .ok_or_else(|| Error::HtmlParse("missing parent element".into()))
}

/// Adjacent text runs (split around a stray `<`) merge into one node.
fn append_text(dom: &mut Dom, parent: NodeId, text: String) {
    if let Some(last) = dom.children(parent).last().copied() {
        if let NodeKind::Text(existing) = &mut dom.nodes[last.0].kind {
            existing.push_str(&text);
            return;
        }
    }
    dom.create_node(Some(parent), NodeKind::Text(text));
}

fn starts_markup(bytes: &[u8], i: usize) -> bool {
    if bytes[i] != b'<' {
        return false;
    }
    match bytes.get(i + 1) {
        Some(b'!') => true,
        Some(b'/') => bytes.get(i + 2).is_some_and(u8::is_ascii_alphabetic),
        Some(next) => next.is_ascii_alphabetic(),
        None => false,
    }
}

/// Pops the nearest open element named `tag`; unmatched end tags are ignored.
fn close_element(dom: &Dom, stack: &mut Vec<NodeId>, tag: &str) {
    let found = (1..stack.len())
        .rev()
        .find(|index| dom.tag_name(stack[*index]) == Some(tag));
    if let Some(index) = found {
        stack.truncate(index);
    }
}

/// Closes an open element matching `targets` that `tag` implicitly ends, unless
/// a `boundaries` element is reached first.
fn close_implied(dom: &Dom, stack: &mut Vec<NodeId>, targets: &[&str], boundaries: &[&str]) {
    for index in (1..stack.len()).rev() {
        let Some(open_tag) = dom.tag_name(stack[index]) else {
            continue;
        };
        if targets.contains(&open_tag) {
            stack.truncate(index);
            return;
        }
        if boundaries.contains(&open_tag) {
            return;
        }
    }
}

fn close_optional_start_tags(dom: &Dom, stack: &mut Vec<NodeId>, tag: &str) {
    match tag {
        "li" => close_implied(dom, stack, &["li"], &["ol", "ul", "menu"]),
        "dt" | "dd" => close_implied(dom, stack, &["dt", "dd"], &["dl"]),
        "option" => close_implied(dom, stack, &["option"], &["select", "datalist", "optgroup"]),
        "tr" => close_implied(dom, stack, &["tr"], &["table", "tbody", "thead", "tfoot"]),
        "td" | "th" => close_implied(dom, stack, &["td", "th"], &["tr", "table"]),
        _ => {}
    }
    if is_optional_paragraph_terminator_tag(tag) {
        close_implied(dom, stack, &["p"], &["button", "table"]);
    }
}

fn is_optional_paragraph_terminator_tag(tag: &str) -> bool {
    matches!(
        tag,
        "address"
            | "article"
            | "aside"
            | "blockquote"
            | "details"
            | "div"
            | "dl"
            | "fieldset"
            | "figcaption"
            | "figure"
            | "footer"
            | "form"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "header"
            | "hr"
            | "main"
            | "nav"
            | "ol"
            | "p"
            | "pre"
            | "section"
            | "table"
            | "ul"
    )
}

/// Rows always live in a row group and cells in a row; missing wrappers are
/// synthesized the way browsers do.
fn insert_implied_table_wrappers(
    dom: &mut Dom,
    stack: &mut Vec<NodeId>,
    tag: &str,
    context: Option<&str>,
) -> Result<()> {
    if !matches!(tag, "tr" | "td" | "th") {
        return Ok(());
    }
    let open_tag = |dom: &Dom, stack: &[NodeId]| -> Option<String> {
        let top = *stack.last()?;
        if top == dom.root {
            context.map(str::to_string)
        } else {
            dom.tag_name(top).map(str::to_string)
        }
    };

    if open_tag(dom, stack).as_deref() == Some("table") {
        let parent = current(stack)?;
        let tbody = dom.create_node(Some(parent), NodeKind::Element(Element::new("tbody")));
        stack.push(tbody);
    }
    if matches!(tag, "td" | "th")
        && matches!(
            open_tag(dom, stack).as_deref(),
            Some("tbody") | Some("thead") | Some("tfoot")
        )
    {
        let parent = current(stack)?;
        let row = dom.create_node(Some(parent), NodeKind::Element(Element::new("tr")));
        stack.push(row);
    }
    Ok(())
}

fn parse_start_tag(html: &str, at: usize) -> Result<(String, Vec<(String, String)>, bool, usize)> {
    let bytes = html.as_bytes();
    let mut i = at;
    if bytes.get(i) != Some(&b'<') {
        return Err(Error::HtmlParse("expected '<'".into()));
    }
    i += 1;

    let tag_start = i;
    while i < bytes.len() && is_tag_char(bytes[i]) {
        i += 1;
    }

    let tag = html
        .get(tag_start..i)
        .ok_or_else(|| Error::HtmlParse("invalid tag name".into()))?
        .to_ascii_lowercase();

    if tag.is_empty() {
        return Err(Error::HtmlParse("empty tag name".into()));
    }

    let mut attrs: Vec<(String, String)> = Vec::new();
    let mut self_closing = false;

    loop {
        skip_ws(bytes, &mut i);
        if i >= bytes.len() {
            return Err(Error::HtmlParse(format!("unclosed start tag <{tag}>")));
        }

        if bytes[i] == b'>' {
            i += 1;
            break;
        }

        if bytes[i] == b'/' {
            i += 1;
            if bytes.get(i) == Some(&b'>') {
                self_closing = true;
                i += 1;
                break;
            }
            continue;
        }

        let name_start = i;
        while i < bytes.len() && is_attr_name_char(bytes[i]) {
            i += 1;
        }
        if i == name_start {
            // Stray quote or '=' where a name was expected: skip it.
            i += 1;
            continue;
        }

        let name = html
            .get(name_start..i)
            .ok_or_else(|| Error::HtmlParse("invalid attribute name".into()))?
            .to_ascii_lowercase();

        let mut lookahead = i;
        skip_ws(bytes, &mut lookahead);
        let value = if bytes.get(lookahead) == Some(&b'=') {
            i = lookahead + 1;
            skip_ws(bytes, &mut i);
            parse_attr_value(html, bytes, &mut i)?
        } else {
            String::new()
        };

        // First occurrence wins.
        if !attrs.iter().any(|(existing, _)| *existing == name) {
            attrs.push((name, value));
        }
    }

    Ok((tag, attrs, self_closing, i))
}

fn parse_declaration_tag(html: &str, at: usize) -> Result<usize> {
    let bytes = html.as_bytes();
    if !(bytes.get(at) == Some(&b'<') && bytes.get(at + 1) == Some(&b'!')) {
        return Err(Error::HtmlParse("expected declaration tag".into()));
    }
    match find_subslice(bytes, at + 2, b">") {
        Some(end) => Ok(end + 1),
        None => Err(Error::HtmlParse("unclosed declaration tag".into())),
    }
}

fn parse_end_tag(html: &str, at: usize) -> Result<(String, usize)> {
    let bytes = html.as_bytes();
    let mut i = at;

    if !(bytes.get(i) == Some(&b'<') && bytes.get(i + 1) == Some(&b'/')) {
        return Err(Error::HtmlParse("expected end tag".into()));
    }
    i += 2;

    let tag_start = i;
    while i < bytes.len() && is_tag_char(bytes[i]) {
        i += 1;
    }

    let tag = html
        .get(tag_start..i)
        .ok_or_else(|| Error::HtmlParse("invalid end tag".into()))?
        .to_ascii_lowercase();

    while i < bytes.len() && bytes[i] != b'>' {
        i += 1;
    }
    if i >= bytes.len() {
        return Err(Error::HtmlParse("unclosed end tag".into()));
    }

    Ok((tag, i + 1))
}

fn parse_attr_value(html: &str, bytes: &[u8], i: &mut usize) -> Result<String> {
    if *i >= bytes.len() {
        return Err(Error::HtmlParse("missing attribute value".into()));
    }

    if bytes[*i] == b'\'' || bytes[*i] == b'"' {
        let quote = bytes[*i];
        *i += 1;
        let start = *i;
        while *i < bytes.len() && bytes[*i] != quote {
            *i += 1;
        }
        if *i >= bytes.len() {
            return Err(Error::HtmlParse("unclosed quoted attribute value".into()));
        }
        let value = html
            .get(start..*i)
            .ok_or_else(|| Error::HtmlParse("invalid attribute value".into()))?;
        *i += 1;
        return Ok(decode_html_character_references(&normalize_newlines(value)));
    }

    let start = *i;
    while *i < bytes.len() && !bytes[*i].is_ascii_whitespace() && bytes[*i] != b'>' {
        *i += 1;
    }

    let value = html
        .get(start..*i)
        .ok_or_else(|| Error::HtmlParse("invalid attribute value".into()))?;
    Ok(decode_html_character_references(value))
}

fn skip_ws(bytes: &[u8], i: &mut usize) {
    while *i < bytes.len() && bytes[*i].is_ascii_whitespace() {
        *i += 1;
    }
}

fn is_tag_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

fn is_attr_name_char(b: u8) -> bool {
    !(b.is_ascii_whitespace() || matches!(b, b'/' | b'>' | b'=' | b'"' | b'\''))
}

pub(crate) fn is_void_tag(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

fn starts_with_at(bytes: &[u8], at: usize, needle: &[u8]) -> bool {
    bytes.get(at..at + needle.len()) == Some(needle)
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || from > bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| from + pos)
}

fn find_case_insensitive_raw_end_tag(bytes: &[u8], from: usize, tag: &[u8]) -> Option<usize> {
    let mut i = from;
    while i < bytes.len() {
        if bytes[i] == b'<' && bytes.get(i + 1) == Some(&b'/') {
            let tag_end = i + 2 + tag.len();
            if tag_end <= bytes.len() && bytes[i + 2..tag_end].eq_ignore_ascii_case(tag) {
                let separated = bytes
                    .get(tag_end)
                    .is_none_or(|byte| !byte.is_ascii_alphanumeric());
                if separated {
                    return Some(i);
                }
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serialized(html: &str, context: Option<&str>) -> Result<String> {
        let dom = parse_fragment(html, context)?;
        dom.inner_html(dom.root())
    }

    #[test]
    fn bare_and_duplicate_attributes() -> Result<()> {
        assert_eq!(
            serialized("<a href=x hidden href='y'>t</a>", None)?,
            "<a href=\"x\" hidden=\"\">t</a>"
        );
        Ok(())
    }

    #[test]
    fn stray_end_tags_and_void_end_tags_are_ignored() -> Result<()> {
        assert_eq!(serialized("<b>x</i>y</b></br>", None)?, "<b>xy</b>");
        Ok(())
    }

    #[test]
    fn implied_table_body_is_inserted() -> Result<()> {
        assert_eq!(
            serialized("<table><tr><td>1</td></tr></table>", None)?,
            "<table><tbody><tr><td>1</td></tr></tbody></table>"
        );
        assert_eq!(
            serialized("<tr><td>1</td></tr>", Some("table"))?,
            "<tbody><tr><td>1</td></tr></tbody>"
        );
        Ok(())
    }

    #[test]
    fn entities_and_newlines_are_decoded() -> Result<()> {
        let dom = parse_fragment("a&raquo;b\r\nc &amp d &bogus; <", None)?;
        assert_eq!(dom.text_content(dom.root()), "a»b\nc & d &bogus; <");
        Ok(())
    }

    #[test]
    fn raw_text_elements_keep_markup() -> Result<()> {
        let dom = parse_fragment("<script>if (a < b) { x = '</p>'; }</script>", None)?;
        assert_eq!(dom.text_content(dom.root()), "if (a < b) { x = '</p>'; }");
        Ok(())
    }

    #[test]
    fn optional_end_tags_close_implicitly() -> Result<()> {
        assert_eq!(
            serialized("<ul><li>a<li>b</ul><p>x<div>y</div>", None)?,
            "<ul><li>a</li><li>b</li></ul><p>x</p><div>y</div>"
        );
        Ok(())
    }

    #[test]
    fn entity_decoding_reports_consumed_bytes() {
        assert_eq!(decode_entity_at("&amp;x", 0), Some(('&', 5)));
        assert_eq!(decode_entity_at("&#62;", 0), Some(('>', 5)));
        assert_eq!(decode_entity_at("&ampx", 0), None);
        assert_eq!(decode_entity_at("& ", 0), None);
    }
}
