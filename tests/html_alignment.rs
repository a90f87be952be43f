use dataflow_tracer::{
    Loc, LogId, MemoryLogStore, NodeId, Operation, Result, Termination, Tracked, TrackingRuntime,
    Value, traverse,
};

fn call_method(
    rt: &mut TrackingRuntime,
    receiver: &Tracked,
    name: &str,
    args: &[Tracked],
) -> Result<Tracked> {
    let method = rt.member_expression(receiver, name, None)?;
    rt.call_expression(&method, Some(receiver), args, None)
}

fn id_of(tracked: &Tracked) -> LogId {
    match tracked.tracking {
        Some(id) => id,
        None => panic!("value {:?} is untracked", tracked.value),
    }
}

fn assert_origin(rt: &TrackingRuntime, value: &Tracked, index: usize, origin: LogId, char_index: usize) {
    let outcome = traverse(rt.store(), id_of(value), index);
    assert_eq!(outcome.termination, Termination::Leaf, "{outcome:#?}");
    let Some(last) = outcome.last() else {
        panic!("traversal visited no records");
    };
    assert_eq!(last.record.id, origin, "{outcome:#?}");
    assert_eq!(last.char_index, char_index, "{outcome:#?}");
}

fn mount(rt: &mut TrackingRuntime) -> Result<Tracked> {
    rt.load_document("<div id=\"app\"></div>", None)?;
    let root = rt.dom().root();
    let app: NodeId = rt.dom().children(root)[0];
    Ok(Tracked::untracked(Value::Node(app)))
}

#[test]
fn inner_html_reads_trace_back_to_the_assigned_literal() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let app = mount(&mut rt)?;
    let markup = rt.string_literal(
        "<p class=\"x\">Tom &amp; Jerry</p>",
        Some(Loc::new("app.js", 3, 17)),
    );
    rt.assign_member(&app, "innerHTML", "=", &markup, None)?;

    let html = rt.member_expression(&app, "innerHTML", None)?;
    assert_eq!(html.value.as_str(), Some("<p class=\"x\">Tom &amp; Jerry</p>"));
    let outcome = traverse(rt.store(), id_of(&html), 23);
    assert_eq!(outcome.termination, Termination::Leaf);
    assert_eq!(outcome.origin_loc().map(|loc| loc.line), Some(3));
    assert_eq!(outcome.last().map(|step| step.char_index), Some(23));
    assert!(
        outcome
            .steps
            .iter()
            .any(|step| step.record.operation == Operation::AssignmentExpression)
    );
    assert_origin(&rt, &html, 10, id_of(&markup), 10);
    Ok(())
}

#[test]
fn text_content_maps_decoded_entities_onto_their_source() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let app = mount(&mut rt)?;
    let markup = rt.string_literal("<p class=\"x\">Tom &amp; Jerry</p>", None);
    rt.assign_member(&app, "innerHTML", "=", &markup, None)?;

    let text = rt.member_expression(&app, "textContent", None)?;
    assert_eq!(text.value.as_str(), Some("Tom & Jerry"));
    assert_origin(&rt, &text, 4, id_of(&markup), 17);
    assert_origin(&rt, &text, 6, id_of(&markup), 23);
    Ok(())
}

#[test]
fn implied_tbody_keeps_cell_text_exact() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let app = mount(&mut rt)?;
    let markup = rt.string_literal("<table><tr><td>x</td></tr></table>", None);
    rt.assign_member(&app, "innerHTML", "=", &markup, None)?;

    let html = rt.member_expression(&app, "innerHTML", None)?;
    assert_eq!(
        html.value.as_str(),
        Some("<table><tbody><tr><td>x</td></tr></tbody></table>")
    );
    assert_origin(&rt, &html, 22, id_of(&markup), 15);
    Ok(())
}

#[test]
fn initial_page_attributes_map_through_get_attribute() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let page = rt.load_document("<a title='x&amp;y'>t</a>", None)?;
    let link = Tracked::untracked(Value::Node(rt.dom().children(rt.dom().root())[0]));
    let name = rt.string_literal("title", None);
    let title = call_method(&mut rt, &link, "getAttribute", &[name])?;
    assert_eq!(title.value.as_str(), Some("x&y"));
    assert_origin(&rt, &title, 1, id_of(&page), 11);
    assert_origin(&rt, &title, 2, id_of(&page), 16);

    let missing = rt.string_literal("href", None);
    let href = call_method(&mut rt, &link, "getAttribute", &[missing])?;
    assert!(matches!(href.value, Value::Null));
    Ok(())
}

#[test]
fn created_elements_map_tag_and_attribute_values() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let app = mount(&mut rt)?;
    let document = rt.global("document")?;
    let tag = rt.string_literal("span", None);
    let span = call_method(&mut rt, &document, "createElement", &[tag.clone()])?;
    let attr = rt.string_literal("title", None);
    let value = rt.string_literal("hey", None);
    call_method(&mut rt, &span, "setAttribute", &[attr, value.clone()])?;
    call_method(&mut rt, &app, "appendChild", &[span])?;

    let html = rt.member_expression(&app, "innerHTML", None)?;
    assert_eq!(html.value.as_str(), Some("<span title=\"hey\"></span>"));
    assert_origin(&rt, &html, 1, id_of(&tag), 0);
    assert_origin(&rt, &html, 14, id_of(&value), 1);
    Ok(())
}

#[test]
fn insert_adjacent_html_maps_only_the_inserted_nodes() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let app = mount(&mut rt)?;
    let first = rt.string_literal("<b>a</b>", None);
    rt.assign_member(&app, "innerHTML", "=", &first, None)?;
    let position = rt.string_literal("beforeend", None);
    let extra = rt.string_literal("<i>z</i>", None);
    call_method(&mut rt, &app, "insertAdjacentHTML", &[position, extra.clone()])?;

    let html = rt.member_expression(&app, "innerHTML", None)?;
    assert_eq!(html.value.as_str(), Some("<b>a</b><i>z</i>"));
    assert_origin(&rt, &html, 3, id_of(&first), 3);
    assert_origin(&rt, &html, 11, id_of(&extra), 3);
    Ok(())
}

#[test]
fn text_nodes_and_comments_created_by_script() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let app = mount(&mut rt)?;
    let document = rt.global("document")?;
    let words = rt.string_literal("a<b", None);
    let text = call_method(&mut rt, &document, "createTextNode", &[words.clone()])?;
    call_method(&mut rt, &app, "appendChild", &[text])?;
    let note = rt.string_literal("hi", None);
    let comment = call_method(&mut rt, &document, "createComment", &[note.clone()])?;
    call_method(&mut rt, &app, "appendChild", &[comment])?;

    let html = rt.member_expression(&app, "innerHTML", None)?;
    assert_eq!(html.value.as_str(), Some("a&lt;b<!--hi-->"));
    assert_origin(&rt, &html, 5, id_of(&words), 2);
    let escaped = traverse(rt.store(), id_of(&html), 2);
    assert_eq!(escaped.last().map(|step| step.char_index), Some(1));
    assert_origin(&rt, &html, 11, id_of(&note), 1);
    Ok(())
}

#[test]
fn outer_html_assignment_is_rejected() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let app = mount(&mut rt)?;
    let markup = rt.string_literal("<p></p>", None);
    assert!(rt.assign_member(&app, "outerHTML", "=", &markup, None).is_err());
    Ok(())
}

#[test]
fn parsed_documents_map_back_to_the_parsed_string() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    mount(&mut rt)?;
    let constructor = rt.global("DOMParser")?;
    let parser = rt.new_expression(&constructor, &[], None)?;
    let markup = rt.string_literal("<p id=\"msg\">Hello</p>", Some(Loc::new("app.js", 9, 30)));
    let kind = rt.string_literal("text/html", None);
    let parsed = call_method(&mut rt, &parser, "parseFromString", &[markup.clone(), kind])?;
    let Value::Node(document) = parsed.value else {
        panic!("parseFromString returned {:?}", parsed.value);
    };
    assert_eq!(rt.dom().children(rt.dom().root()).len(), 1);
    assert_eq!(rt.dom().owner_document(document), Some(document));

    let paragraph = rt.member_expression(&parsed, "firstChild", None)?;
    let text = rt.member_expression(&paragraph, "textContent", None)?;
    assert_eq!(text.value.as_str(), Some("Hello"));
    assert_origin(&rt, &text, 0, id_of(&markup), 12);
    let outcome = traverse(rt.store(), id_of(&text), 4);
    assert_eq!(outcome.origin_loc().map(|loc| loc.line), Some(9));

    let name = rt.string_literal("id", None);
    let id = call_method(&mut rt, &paragraph, "getAttribute", &[name])?;
    assert_eq!(id.value.as_str(), Some("msg"));
    assert_origin(&rt, &id, 1, id_of(&markup), 8);

    let page = rt.string_literal("<html><body><b>x</b></body></html>", None);
    let full = call_method(&mut rt, &parser, "parseFromString", &[page])?;
    let body = rt.member_expression(&full, "body", None)?;
    assert!(matches!(body.value, Value::Node(_)));
    Ok(())
}
