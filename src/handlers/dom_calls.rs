use crate::alignment::{HtmlMapping, ValueOrigin};
use crate::dom::{AdjacentPosition, NodeId};
use crate::handlers::{HandlerOutcome, KnownFunction, NativeCall};
use crate::operation_log::Operation;
use crate::runtime::{Tracked, TrackingRuntime};
use crate::values::Value;
use crate::{Error, Result};

fn node_of(known: KnownFunction, tracked: &Tracked) -> Result<NodeId> {
    match tracked.value {
        Value::Node(node) => Ok(node),
        ref other => Err(Error::ScriptRuntime(format!(
            "{}: {} is not a node",
            known.name(),
            other.to_display_string()
        ))),
    }
}

fn receiver_node(known: KnownFunction, call: &NativeCall<'_>) -> Result<NodeId> {
    node_of(known, call.receiver(known)?)
}

pub(super) fn create_element(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let tag = call.arg(0);
    let name = tag.value.to_display_string().to_ascii_lowercase();
    let node = rt.dom_mut().create_element(&name);
    rt.origins_mut()
        .set_tag_name(node, ValueOrigin::new(tag.tracking, "createElement"));
    Ok(HandlerOutcome::new(Value::Node(node)))
}

/// `createTextNode` or `createComment`: the node's data is the argument.
pub(super) fn create_character_data(
    rt: &mut TrackingRuntime,
    call: &NativeCall<'_>,
    comment: bool,
) -> Result<HandlerOutcome> {
    let data = call.arg(0);
    let text = data.value.to_display_string();
    let (node, action) = if comment {
        (rt.dom_mut().create_comment(&text), "createComment")
    } else {
        (rt.dom_mut().create_text(&text), "createTextNode")
    };
    rt.origins_mut()
        .set_text_value(node, ValueOrigin::new(data.tracking, action));
    Ok(HandlerOutcome::new(Value::Node(node)))
}

pub(super) fn clone_node(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let node = receiver_node(KnownFunction::CloneNode, call)?;
    let deep = call.arg(0).value.truthy();
    let (dom, origins) = rt.dom_and_origins_mut();
    let copy = dom.clone_node(node, deep)?;
    origins.copy_subtree(dom, node, copy);
    Ok(HandlerOutcome::new(Value::Node(copy)))
}

pub(super) fn set_attribute(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let node = receiver_node(KnownFunction::SetAttribute, call)?;
    let name = call.arg(0);
    let value = call.arg(1);
    let attr = name.value.to_display_string();
    rt.dom_mut()
        .set_attribute(node, &attr, &value.value.to_display_string())?;
    rt.origins_mut().set_attribute_parts(
        node,
        &attr,
        Some(ValueOrigin::new(name.tracking, "setAttribute")),
        Some(ValueOrigin::new(value.tracking, "setAttribute")),
    );
    Ok(HandlerOutcome::new(Value::Undefined))
}

pub(super) fn get_attribute(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let element = call.receiver(KnownFunction::GetAttribute)?;
    let node = node_of(KnownFunction::GetAttribute, element)?;
    let attr = call.arg(0).value.to_display_string();
    if rt.dom().get_attribute(node, &attr).is_none() {
        return Ok(HandlerOutcome::new(Value::Null));
    }
    let mapping = HtmlMapping::attribute_value(rt.dom(), rt.origins(), node, &attr);
    let value = Value::String(mapping.text().to_string());
    let record = rt.read_record(Operation::ReadAttribute, element, mapping, call.loc());
    Ok(HandlerOutcome::new(value).returning(record))
}

pub(super) fn append_child(rt: &mut TrackingRuntime, call: &NativeCall<'_>) -> Result<HandlerOutcome> {
    let parent = receiver_node(KnownFunction::AppendChild, call)?;
    let child = call.arg(0);
    let child_node = node_of(KnownFunction::AppendChild, &child)?;
    rt.dom_mut().append_child(parent, child_node)?;
    Ok(HandlerOutcome::new(child.value.clone()).returning(child.tracking))
}

/// The parsed nodes are aligned against the argument; existing siblings are
/// skipped.
pub(super) fn insert_adjacent_html(
    rt: &mut TrackingRuntime,
    call: &NativeCall<'_>,
) -> Result<HandlerOutcome> {
    let target = receiver_node(KnownFunction::InsertAdjacentHtml, call)?;
    let position = AdjacentPosition::parse(&call.arg(0).value.to_display_string())?;
    let html = call.arg(1);
    let text = html.value.to_display_string();
    let inserted = rt.dom_mut().insert_adjacent_html(target, position, &text)?;
    let parent = match position {
        AdjacentPosition::AfterBegin | AdjacentPosition::BeforeEnd => Some(target),
        AdjacentPosition::BeforeBegin | AdjacentPosition::AfterEnd => rt.dom().parent(target),
    };
    if let Some(parent) = parent {
        let ignore: Vec<NodeId> = rt
            .dom()
            .children(parent)
            .iter()
            .copied()
            .filter(|child| !inserted.contains(child))
            .collect();
        rt.align(parent, &text, html.tracking, "insertAdjacentHTML", &ignore);
    }
    Ok(HandlerOutcome::new(Value::Undefined))
}

/// `new DOMParser().parseFromString(html, type)`: the parsed document is
/// aligned against `html` the way the initial page is. Every type is parsed
/// as HTML.
pub(super) fn parse_from_string(
    rt: &mut TrackingRuntime,
    call: &NativeCall<'_>,
) -> Result<HandlerOutcome> {
    let html = call.arg(0);
    let text = html.value.to_display_string();
    let document = rt.dom_mut().create_document();
    rt.dom_mut().set_inner_html(document, &text)?;
    rt.align(document, &text, html.tracking, "parseFromString", &[]);
    Ok(HandlerOutcome::new(Value::Node(document)))
}
