//! Maps HTML assigned into the document onto the document's own serialized
//! output, and back.
//!
//! Assignment ([`map_inner_html_assignment`]) walks the nodes the parser built
//! and records, per node and per attribute, where each serialized piece came
//! from in the assigned string. Reading ([`HtmlMapping`]) re-serializes a
//! subtree and turns those origins into [`MappedSegment`]s that a read record
//! can embed.

mod assign;
mod mapping;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::dom::{Dom, NodeId};
use crate::operation_log::LogId;

pub use assign::{AlignmentReport, HtmlAssignment, map_inner_html_assignment};
pub use mapping::{HtmlMapping, MappedSegment, OriginHit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Confidence {
    Exact,
    /// Fallback mapping; positions are approximate.
    Coarse,
}

/// Origin of a piece of serialized HTML in an assigned HTML string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlOrigin {
    pub tracking: Option<LogId>,
    pub action: String,
    /// Serialized offset of the piece at assignment time.
    pub input_index: isize,
    /// Drift between serialized and assigned offsets before this piece.
    pub extra_chars_added: isize,
    /// Per-char correction; chars past the end reuse the last entry.
    pub offsets: Option<Vec<isize>>,
    pub confidence: Confidence,
}

impl HtmlOrigin {
    /// Offset in the assigned string of char `index` of the piece.
    pub fn assigned_index(&self, index: usize) -> isize {
        let correction = self
            .offsets
            .as_ref()
            .and_then(|offsets| offsets.get(index).or(offsets.last()))
            .copied()
            .unwrap_or(0);
        self.input_index + index as isize - self.extra_chars_added + correction
    }
}

/// Origin of a piece whose characters are a plain value, one to one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueOrigin {
    pub tracking: Option<LogId>,
    pub action: String,
}

impl ValueOrigin {
    pub fn new(tracking: Option<LogId>, action: impl Into<String>) -> Self {
        Self {
            tracking,
            action: action.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Html(HtmlOrigin),
    Value(ValueOrigin),
}

impl Origin {
    pub fn tracking(&self) -> Option<LogId> {
        match self {
            Self::Html(origin) => origin.tracking,
            Self::Value(origin) => origin.tracking,
        }
    }

    pub fn confidence(&self) -> Confidence {
        match self {
            Self::Html(origin) => origin.confidence,
            Self::Value(_) => Confidence::Exact,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeOrigin {
    /// The whole ` name="value"` piece came from assigned HTML.
    Html(HtmlOrigin),
    /// Name and value were set separately, e.g. by `setAttribute`.
    Parts {
        name: Option<ValueOrigin>,
        value: Option<ValueOrigin>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeOrigin {
    pub opening_tag_start: Option<Origin>,
    pub opening_tag_end: Option<Origin>,
    pub closing_tag: Option<Origin>,
    pub text_value: Option<Origin>,
    pub comment_start: Option<Origin>,
    pub comment_end: Option<Origin>,
    pub attributes: BTreeMap<String, AttributeOrigin>,
    /// Children produced by the last content assignment.
    pub contents: Vec<NodeId>,
}

/// Origin metadata for DOM nodes, kept beside the arena instead of on it.
///
/// Entries outlive content replacement: a node detached by an `innerHTML` or
/// `textContent` write keeps its origins while the script may still hold it.
/// [`OriginTable::retain`] drops them once the caller knows it cannot.
#[derive(Debug, Clone, Default)]
pub struct OriginTable {
    nodes: HashMap<NodeId, NodeOrigin>,
}

impl OriginTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node: NodeId) -> Option<&NodeOrigin> {
        self.nodes.get(&node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn entry(&mut self, node: NodeId) -> &mut NodeOrigin {
        self.nodes.entry(node).or_default()
    }

    /// Keeps only the nodes `keep` accepts and returns how many were dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(NodeId) -> bool) -> usize {
        let before = self.nodes.len();
        self.nodes.retain(|node, _| keep(*node));
        before - self.nodes.len()
    }

    pub(crate) fn set_text_value(&mut self, node: NodeId, origin: ValueOrigin) {
        self.entry(node).text_value = Some(Origin::Value(origin));
    }

    /// `createElement`: the tag name chars of both tags come from `origin`.
    pub(crate) fn set_tag_name(&mut self, node: NodeId, origin: ValueOrigin) {
        let entry = self.entry(node);
        entry.opening_tag_start = Some(Origin::Value(origin.clone()));
        entry.closing_tag = Some(Origin::Value(origin));
    }

    pub(crate) fn set_attribute_parts(
        &mut self,
        node: NodeId,
        attr: &str,
        name: Option<ValueOrigin>,
        value: Option<ValueOrigin>,
    ) {
        self.entry(node)
            .attributes
            .insert(attr.to_ascii_lowercase(), AttributeOrigin::Parts { name, value });
    }

    pub(crate) fn set_contents(&mut self, node: NodeId, contents: Vec<NodeId>) {
        self.entry(node).contents = contents;
    }

    /// Copies origins from `source` onto the parallel subtree `copy` produced
    /// by a clone.
    pub(crate) fn copy_subtree(&mut self, dom: &Dom, source: NodeId, copy: NodeId) {
        let pairs: Vec<(NodeId, NodeId)> = dom
            .descendants(source)
            .into_iter()
            .zip(dom.descendants(copy))
            .collect();
        for (from, to) in pairs {
            if let Some(origin) = self.nodes.get(&from).cloned() {
                self.nodes.insert(to, origin);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigned_index_reuses_last_offset_past_the_end() {
        let origin = HtmlOrigin {
            tracking: Some(LogId(3)),
            action: "assignInnerHTML".into(),
            input_index: 10,
            extra_chars_added: 4,
            offsets: Some(vec![0, 0, -2]),
            confidence: Confidence::Exact,
        };
        assert_eq!(origin.assigned_index(0), 6);
        assert_eq!(origin.assigned_index(2), 6);
        assert_eq!(origin.assigned_index(5), 9);
    }

    #[test]
    fn clone_copies_origins_to_the_parallel_subtree() -> crate::Result<()> {
        let mut dom = Dom::new();
        let div = dom.create_element("div");
        dom.set_inner_html(div, "<b>x</b>")?;
        let mut origins = OriginTable::new();
        let text = dom.children(dom.children(div)[0])[0];
        origins.set_text_value(text, ValueOrigin::new(Some(LogId(9)), "createTextNode"));

        let copy = dom.clone_node(div, true)?;
        origins.copy_subtree(&dom, div, copy);
        let copied_text = dom.children(dom.children(copy)[0])[0];
        assert_eq!(
            origins
                .get(copied_text)
                .and_then(|origin| origin.text_value.as_ref())
                .and_then(Origin::tracking),
            Some(LogId(9))
        );
        Ok(())
    }
}
