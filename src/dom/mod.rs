//! Arena DOM with an HTML fragment parser and a serializer whose output is
//! what the alignment engine maps against.

mod html;
mod serialize;

pub(crate) use html::{is_void_tag, parse_fragment};
pub(crate) use serialize::{
    EscapeContext, PieceKind, SerializedPiece, escape_attr_value, escape_context, escape_sources,
    escape_text,
};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub(crate) tag_name: String,
    /// Attributes in source order; names are unique.
    pub(crate) attrs: Vec<(String, String)>,
}

impl Element {
    pub(crate) fn new(tag_name: &str) -> Self {
        Self {
            tag_name: tag_name.to_ascii_lowercase(),
            attrs: Vec::new(),
        }
    }

    pub fn tag_name(&self) -> &str {
        &self.tag_name
    }

    pub fn attrs(&self) -> &[(String, String)] {
        &self.attrs
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) kind: NodeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjacentPosition {
    BeforeBegin,
    AfterBegin,
    BeforeEnd,
    AfterEnd,
}

impl AdjacentPosition {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "beforebegin" => Ok(Self::BeforeBegin),
            "afterbegin" => Ok(Self::AfterBegin),
            "beforeend" => Ok(Self::BeforeEnd),
            "afterend" => Ok(Self::AfterEnd),
            other => Err(Error::ScriptRuntime(format!(
                "insertAdjacentHTML: unsupported position '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dom {
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: NodeId,
}

impl Default for Dom {
    fn default() -> Self {
        Self::new()
    }
}

impl Dom {
    pub fn new() -> Self {
        let root = Node {
            parent: None,
            children: Vec::new(),
            kind: NodeKind::Document,
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub(crate) fn create_node(&mut self, parent: Option<NodeId>, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent,
            children: Vec::new(),
            kind,
        });
        if let Some(parent_id) = parent {
            self.nodes[parent_id.0].children.push(id);
        }
        id
    }

    pub fn create_element(&mut self, tag_name: &str) -> NodeId {
        self.create_node(None, NodeKind::Element(Element::new(tag_name)))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.create_node(None, NodeKind::Text(text.to_string()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.create_node(None, NodeKind::Comment(text.to_string()))
    }

    /// A detached document, as `DOMParser` returns.
    pub fn create_document(&mut self) -> NodeId {
        self.create_node(None, NodeKind::Document)
    }

    fn node(&self, node_id: NodeId) -> Result<&Node> {
        self.nodes
            .get(node_id.0)
            .ok_or_else(|| Error::ScriptRuntime(format!("unknown node {}", node_id.0)))
    }

    pub fn kind(&self, node_id: NodeId) -> Option<&NodeKind> {
        self.nodes.get(node_id.0).map(|node| &node.kind)
    }

    pub fn element(&self, node_id: NodeId) -> Option<&Element> {
        match self.kind(node_id) {
            Some(NodeKind::Element(element)) => Some(element),
            _ => None,
        }
    }

    pub(crate) fn element_mut(&mut self, node_id: NodeId) -> Option<&mut Element> {
        match self.nodes.get_mut(node_id.0).map(|node| &mut node.kind) {
            Some(NodeKind::Element(element)) => Some(element),
            _ => None,
        }
    }

    pub fn tag_name(&self, node_id: NodeId) -> Option<&str> {
        self.element(node_id).map(Element::tag_name)
    }

    pub fn parent(&self, node_id: NodeId) -> Option<NodeId> {
        self.nodes.get(node_id.0).and_then(|node| node.parent)
    }

    pub fn children(&self, node_id: NodeId) -> &[NodeId] {
        self.nodes
            .get(node_id.0)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_descendant_of(&self, node_id: NodeId, ancestor: NodeId) -> bool {
        let mut cursor = self.parent(node_id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    /// The document at the top of `node_id`'s tree, or `None` for a node that
    /// is not in any document.
    pub fn owner_document(&self, node_id: NodeId) -> Option<NodeId> {
        let mut top = node_id;
        while let Some(parent) = self.parent(top) {
            top = parent;
        }
        matches!(self.kind(top), Some(NodeKind::Document)).then_some(top)
    }

    fn detach(&mut self, node_id: NodeId) {
        if let Some(parent) = self.nodes[node_id.0].parent.take() {
            self.nodes[parent.0].children.retain(|child| *child != node_id);
        }
    }

    fn insert_child_at(&mut self, parent: NodeId, index: usize, child: NodeId) -> Result<()> {
        if parent == child || self.is_descendant_of(parent, child) {
            return Err(Error::ScriptRuntime(
                "HierarchyRequestError: cannot insert a node into itself".into(),
            ));
        }
        self.node(parent)?;
        self.node(child)?;
        self.detach(child);
        let index = index.min(self.nodes[parent.0].children.len());
        self.nodes[parent.0].children.insert(index, child);
        self.nodes[child.0].parent = Some(parent);
        Ok(())
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let index = self.children(parent).len();
        self.insert_child_at(parent, index, child)
    }

    pub fn get_attribute(&self, node_id: NodeId, name: &str) -> Option<&str> {
        self.element(node_id)?.attr(&name.to_ascii_lowercase())
    }

    pub fn set_attribute(&mut self, node_id: NodeId, name: &str, value: &str) -> Result<()> {
        let name = name.to_ascii_lowercase();
        let element = self.element_mut(node_id).ok_or_else(|| {
            Error::ScriptRuntime("setAttribute target is not an element".into())
        })?;
        if let Some((_, existing)) = element.attrs.iter_mut().find(|(key, _)| *key == name) {
            *existing = value.to_string();
        } else {
            element.attrs.push((name, value.to_string()));
        }
        Ok(())
    }

    pub fn text_content(&self, node_id: NodeId) -> String {
        match self.kind(node_id) {
            Some(NodeKind::Document) | Some(NodeKind::Element(_)) => {
                let mut out = String::new();
                for child in self.children(node_id) {
                    if matches!(self.kind(*child), Some(NodeKind::Comment(_))) {
                        continue;
                    }
                    out.push_str(&self.text_content(*child));
                }
                out
            }
            Some(NodeKind::Text(text)) | Some(NodeKind::Comment(text)) => text.clone(),
            None => String::new(),
        }
    }

    /// Replaces the children with a single text node (or none for an empty
    /// value) and returns the new text node.
    pub fn set_text_content(&mut self, node_id: NodeId, value: &str) -> Result<Option<NodeId>> {
        match self.kind(node_id) {
            Some(NodeKind::Element(_)) => {}
            Some(NodeKind::Text(_)) | Some(NodeKind::Comment(_)) => {
                if let Some(node) = self.nodes.get_mut(node_id.0) {
                    match &mut node.kind {
                        NodeKind::Text(text) | NodeKind::Comment(text) => *text = value.to_string(),
                        _ => {}
                    }
                }
                return Ok(None);
            }
            _ => {
                return Err(Error::ScriptRuntime(
                    "textContent target is not an element".into(),
                ));
            }
        }
        self.remove_children(node_id);
        if value.is_empty() {
            return Ok(None);
        }
        let text = self.create_node(Some(node_id), NodeKind::Text(value.to_string()));
        Ok(Some(text))
    }

    pub(crate) fn remove_children(&mut self, node_id: NodeId) -> Vec<NodeId> {
        let old_children = std::mem::take(&mut self.nodes[node_id.0].children);
        for child in &old_children {
            self.nodes[child.0].parent = None;
        }
        old_children
    }

    pub fn inner_html(&self, node_id: NodeId) -> Result<String> {
        if !matches!(
            self.kind(node_id),
            Some(NodeKind::Element(_)) | Some(NodeKind::Document)
        ) {
            return Err(Error::ScriptRuntime(
                "innerHTML target is not an element".into(),
            ));
        }
        let mut out = String::new();
        self.serialize_children(node_id, &mut |piece| out.push_str(&piece.text));
        Ok(out)
    }

    pub fn outer_html(&self, node_id: NodeId) -> Result<String> {
        if self.element(node_id).is_none() {
            return Err(Error::ScriptRuntime(
                "outerHTML target is not an element".into(),
            ));
        }
        let mut out = String::new();
        self.serialize_node(node_id, &mut |piece| out.push_str(&piece.text));
        Ok(out)
    }

    /// Parses `html` in the context of `node_id`, replaces its children with the
    /// result and returns the new children.
    pub fn set_inner_html(&mut self, node_id: NodeId, html: &str) -> Result<Vec<NodeId>> {
        let Some(context) = self.tag_name(node_id).map(str::to_string) else {
            if matches!(self.kind(node_id), Some(NodeKind::Document)) {
                return self.replace_children_from_html(node_id, html, None);
            }
            return Err(Error::ScriptRuntime(
                "innerHTML target is not an element".into(),
            ));
        };
        self.replace_children_from_html(node_id, html, Some(&context))
    }

    fn replace_children_from_html(
        &mut self,
        node_id: NodeId,
        html: &str,
        context: Option<&str>,
    ) -> Result<Vec<NodeId>> {
        let fragment = parse_fragment(html, context)?;
        self.remove_children(node_id);
        let mut inserted = Vec::new();
        for child in fragment.children(fragment.root).to_vec() {
            inserted.push(self.clone_subtree_from_dom(&fragment, child, Some(node_id)));
        }
        Ok(inserted)
    }

    /// Inserts parsed nodes relative to `target` and returns them in document
    /// order.
    pub fn insert_adjacent_html(
        &mut self,
        target: NodeId,
        position: AdjacentPosition,
        html: &str,
    ) -> Result<Vec<NodeId>> {
        let (parent, mut index) = match position {
            AdjacentPosition::AfterBegin => (target, 0),
            AdjacentPosition::BeforeEnd => (target, self.children(target).len()),
            AdjacentPosition::BeforeBegin | AdjacentPosition::AfterEnd => {
                let parent = self.parent(target).ok_or_else(|| {
                    Error::ScriptRuntime("insertAdjacentHTML target has no parent".into())
                })?;
                let at = self
                    .children(parent)
                    .iter()
                    .position(|child| *child == target)
                    .ok_or_else(|| Error::ScriptRuntime("detached node".into()))?;
                let at = if position == AdjacentPosition::AfterEnd {
                    at + 1
                } else {
                    at
                };
                (parent, at)
            }
        };
        if self.element(parent).is_none() && parent != self.root {
            return Err(Error::ScriptRuntime(
                "insertAdjacentHTML target is not an element".into(),
            ));
        }

        let context = self.tag_name(parent).map(str::to_string);
        let fragment = parse_fragment(html, context.as_deref())?;
        let mut inserted = Vec::new();
        for child in fragment.children(fragment.root).to_vec() {
            let node = self.clone_subtree_from_dom(&fragment, child, None);
            self.insert_child_at(parent, index, node)?;
            index += 1;
            inserted.push(node);
        }
        Ok(inserted)
    }

    /// Copies a subtree and returns the detached copy.
    pub fn clone_node(&mut self, node_id: NodeId, deep: bool) -> Result<NodeId> {
        let kind = self.node(node_id)?.kind.clone();
        if matches!(kind, NodeKind::Document) {
            return Err(Error::ScriptRuntime("cannot clone the document".into()));
        }
        let copy = self.create_node(None, kind);
        if deep {
            for child in self.children(node_id).to_vec() {
                let child_copy = self.clone_node(child, true)?;
                self.nodes[child_copy.0].parent = Some(copy);
                self.nodes[copy.0].children.push(child_copy);
            }
        }
        Ok(copy)
    }

    fn clone_subtree_from_dom(
        &mut self,
        source: &Dom,
        source_node: NodeId,
        parent: Option<NodeId>,
    ) -> NodeId {
        let node = self.create_node(parent, source.nodes[source_node.0].kind.clone());
        for child in source.children(source_node) {
            self.clone_subtree_from_dom(source, *child, Some(node));
        }
        node
    }

    /// Pre-order list of `node_id` and all its descendants.
    pub fn descendants(&self, node_id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![node_id];
        while let Some(current) = stack.pop() {
            out.push(current);
            for child in self.children(current).iter().rev() {
                stack.push(*child);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_html_round_trips_with_normalized_attributes() -> Result<()> {
        let mut dom = Dom::new();
        let div = dom.create_element("div");
        dom.append_child(dom.root(), div)?;
        dom.set_inner_html(div, "<input type='checkbox' checked ><b>a &amp; b</b>")?;
        assert_eq!(
            dom.inner_html(div)?,
            "<input type=\"checkbox\" checked=\"\"><b>a &amp; b</b>"
        );
        Ok(())
    }

    #[test]
    fn detached_documents_take_inner_html_without_a_context() -> Result<()> {
        let mut dom = Dom::new();
        let document = dom.create_document();
        let inserted = dom.set_inner_html(document, "<p>x</p><!--c-->")?;
        assert_eq!(inserted.len(), 2);
        assert_eq!(dom.parent(inserted[0]), Some(document));
        assert_eq!(dom.inner_html(document)?, "<p>x</p><!--c-->");
        assert!(dom.children(dom.root()).is_empty());
        Ok(())
    }

    #[test]
    fn insert_adjacent_html_respects_positions() -> Result<()> {
        let mut dom = Dom::new();
        let list = dom.create_element("ul");
        dom.append_child(dom.root(), list)?;
        dom.set_inner_html(list, "<li>b</li>")?;
        let item = dom.children(list)[0];
        dom.insert_adjacent_html(list, AdjacentPosition::AfterBegin, "<li>a</li>")?;
        dom.insert_adjacent_html(list, AdjacentPosition::BeforeEnd, "<li>d</li>")?;
        dom.insert_adjacent_html(item, AdjacentPosition::AfterEnd, "<li>c</li>")?;
        assert_eq!(
            dom.inner_html(list)?,
            "<li>a</li><li>b</li><li>c</li><li>d</li>"
        );
        Ok(())
    }

    #[test]
    fn clone_and_text_content() -> Result<()> {
        let mut dom = Dom::new();
        let div = dom.create_element("div");
        dom.set_inner_html(div, "x<!--note--><span>y</span>")?;
        let copy = dom.clone_node(div, true)?;
        assert_eq!(dom.text_content(copy), "xy");
        assert_eq!(dom.inner_html(copy)?, "x<!--note--><span>y</span>");
        let shallow = dom.clone_node(div, false)?;
        assert!(dom.children(shallow).is_empty());
        Ok(())
    }

    #[test]
    fn append_child_rejects_cycles() -> Result<()> {
        let mut dom = Dom::new();
        let outer = dom.create_element("div");
        let inner = dom.create_element("div");
        dom.append_child(outer, inner)?;
        assert!(dom.append_child(inner, outer).is_err());
        Ok(())
    }
}
