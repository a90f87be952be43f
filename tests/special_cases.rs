use dataflow_tracer::{
    Loc, LogId, MemoryLogStore, Operation, Result, Termination, Tracked, TrackingRuntime,
    TraversalOutcome, Value, traverse,
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

/// Traverses and asserts the walk ended on `origin` at `char_index`.
fn assert_origin(rt: &TrackingRuntime, value: &Tracked, index: usize, origin: &Tracked, char_index: usize) {
    let outcome = traverse(rt.store(), id_of(value), index);
    assert_eq!(outcome.termination, Termination::Leaf, "{outcome:#?}");
    assert_ends_at(&outcome, id_of(origin), char_index);
}

fn assert_ends_at(outcome: &TraversalOutcome, id: LogId, char_index: usize) {
    let Some(last) = outcome.last() else {
        panic!("traversal visited no records");
    };
    assert_eq!(last.record.id, id, "{outcome:#?}");
    assert_eq!(last.char_index, char_index, "{outcome:#?}");
}

#[test]
fn global_regex_replace_maps_inserted_and_kept_chars() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let subject = rt.string_literal("aba", Some(Loc::new("app.js", 1, 1)));
    let pattern = rt.regex_literal("a", "g", None)?;
    let replacement = rt.string_literal("X", Some(Loc::new("app.js", 1, 20)));
    let result = call_method(&mut rt, &subject, "replace", &[pattern, replacement.clone()])?;
    assert_eq!(result.value.as_str(), Some("XbX"));

    assert_origin(&rt, &result, 0, &replacement, 0);
    assert_origin(&rt, &result, 1, &subject, 1);
    assert_origin(&rt, &result, 2, &replacement, 0);
    Ok(())
}

#[test]
fn replace_template_copies_subject_chars() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let subject = rt.string_literal("key=value", None);
    let pattern = rt.regex_literal("(\\w+)=(\\w+)", "", None)?;
    let replacement = rt.string_literal("$2:$1", None);
    let result = call_method(&mut rt, &subject, "replace", &[pattern, replacement.clone()])?;
    assert_eq!(result.value.as_str(), Some("value:key"));

    assert_origin(&rt, &result, 0, &subject, 4);
    assert_origin(&rt, &result, 5, &replacement, 2);
    assert_origin(&rt, &result, 8, &subject, 2);
    Ok(())
}

#[test]
fn replacer_function_result_is_followed_into_the_callback() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let subject = rt.string_literal("ab", None);
    let needle = rt.string_literal("b", None);
    let replacer = Tracked::untracked(Value::script_function("upper", |rt, frame| {
        let z = rt.string_literal("Z", Some(Loc::new("app.js", 4, 12)));
        Ok(rt.return_statement(frame, &z, None))
    }));
    let result = call_method(&mut rt, &subject, "replace", &[needle, replacer])?;
    assert_eq!(result.value.as_str(), Some("aZ"));

    let outcome = traverse(rt.store(), id_of(&result), 1);
    assert_eq!(outcome.termination, Termination::Leaf);
    assert_eq!(outcome.origin_loc().map(|loc| loc.line), Some(4));
    assert!(
        outcome
            .steps
            .iter()
            .any(|step| step.record.operation == Operation::StringReplacement)
    );
    Ok(())
}

#[test]
fn json_parse_values_point_into_the_source_text() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let json = rt.global("JSON")?;
    let source = rt.string_literal(r#"{"a":1,"name":"ann"}"#, None);
    let parsed = call_method(&mut rt, &json, "parse", &[source.clone()])?;

    let a = rt.member_expression(&parsed, "a", None)?;
    assert!(matches!(a.value, Value::Number(n) if n == 1.0));
    assert_origin(&rt, &a, 0, &source, 5);

    let name = rt.member_expression(&parsed, "name", None)?;
    assert_eq!(name.value.as_str(), Some("ann"));
    assert_origin(&rt, &name, 2, &source, 17);
    Ok(())
}

#[test]
fn json_stringify_maps_keys_values_and_punctuation() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let key = rt.string_literal("a", None);
    let value = rt.string_literal("hi", None);
    let object = rt.object_expression(vec![(key.clone(), value.clone())], None);
    let json = rt.global("JSON")?;
    let text = call_method(&mut rt, &json, "stringify", &[object])?;
    assert_eq!(text.value.as_str(), Some(r#"{"a":"hi"}"#));

    assert_origin(&rt, &text, 2, &key, 0);
    assert_origin(&rt, &text, 7, &value, 1);
    let brace = traverse(rt.store(), id_of(&text), 0);
    assert_eq!(brace.termination, Termination::BoundaryReached);
    Ok(())
}

#[test]
fn join_walks_elements_and_separators() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let first = rt.string_literal("ab", None);
    let second = rt.string_literal("c", None);
    let array = rt.array_expression(vec![first.clone(), second.clone()], None);
    let separator = rt.string_literal(" - ", None);
    let joined = call_method(&mut rt, &array, "join", &[separator.clone()])?;
    assert_eq!(joined.value.as_str(), Some("ab - c"));

    assert_origin(&rt, &joined, 1, &first, 1);
    assert_origin(&rt, &joined, 3, &separator, 1);
    assert_origin(&rt, &joined, 5, &second, 0);

    let default = call_method(&mut rt, &array, "join", &[])?;
    assert_eq!(default.value.as_str(), Some("ab,c"));
    let comma = traverse(rt.store(), id_of(&default), 2);
    assert_eq!(comma.termination, Termination::Leaf);
    let Some(last) = comma.last() else {
        panic!("walk visited records");
    };
    assert_eq!(last.record.operation, Operation::DefaultArrayJoinSeparator);
    Ok(())
}

#[test]
fn slice_and_case_changes_keep_positions() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let greeting = rt.string_literal("Hello World", None);
    let six = rt.number_literal(6.0, None);
    let world = call_method(&mut rt, &greeting, "slice", &[six])?;
    assert_eq!(world.value.as_str(), Some("World"));
    assert_origin(&rt, &world, 0, &greeting, 6);

    let loud = call_method(&mut rt, &world, "toUpperCase", &[])?;
    assert_eq!(loud.value.as_str(), Some("WORLD"));
    assert_origin(&rt, &loud, 4, &greeting, 10);
    Ok(())
}

#[test]
fn match_and_split_results_point_into_the_input() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let input = rt.string_literal("a1b22", None);
    let digits = rt.regex_literal("\\d+", "g", None)?;
    let found = call_method(&mut rt, &input, "match", &[digits])?;
    let second = rt.member_expression(&found, "1", None)?;
    assert_eq!(second.value.as_str(), Some("22"));
    assert_origin(&rt, &second, 1, &input, 4);

    let csv = rt.string_literal("x,yz", None);
    let comma = rt.string_literal(",", None);
    let parts = call_method(&mut rt, &csv, "split", &[comma])?;
    let yz = rt.member_expression(&parts, "1", None)?;
    assert_eq!(yz.value.as_str(), Some("yz"));
    assert_origin(&rt, &yz, 1, &csv, 3);
    Ok(())
}

#[test]
fn template_literal_and_string_index_reads() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let name = rt.string_literal("Ann", None);
    let bang = rt.string_literal("!", None);
    let hello = rt.string_literal("Hi ", None);
    let text = rt.template_literal(&[hello, name.clone(), bang.clone()], None);
    assert_eq!(text.value.as_str(), Some("Hi Ann!"));
    assert_origin(&rt, &text, 4, &name, 1);
    assert_origin(&rt, &text, 6, &bang, 0);

    let ch = rt.member_expression(&text, "5", None)?;
    assert_eq!(ch.value.as_str(), Some("n"));
    assert_origin(&rt, &ch, 0, &name, 2);
    Ok(())
}

#[test]
fn popped_and_mapped_elements_keep_provenance() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let a = rt.string_literal("a", None);
    let b = rt.string_literal("b", None);
    let array = rt.array_expression(vec![a.clone(), b.clone()], None);
    let popped = call_method(&mut rt, &array, "pop", &[])?;
    assert_eq!(popped.value.as_str(), Some("b"));
    assert_origin(&rt, &popped, 0, &b, 0);

    let exclaim = Tracked::untracked(Value::script_function("exclaim", |rt, frame| {
        let item = frame.arg(0);
        let mark = rt.string_literal("!", None);
        let out = rt.binary_expression("+", &item, &mark, None)?;
        Ok(rt.return_statement(frame, &out, None))
    }));
    let mapped = call_method(&mut rt, &array, "map", &[exclaim])?;
    let first = rt.member_expression(&mapped, "0", None)?;
    assert_eq!(first.value.as_str(), Some("a!"));
    assert_origin(&rt, &first, 0, &a, 0);
    Ok(())
}

#[test]
fn split_keeps_regex_capture_groups() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let input = rt.string_literal("a1b", None);
    let digit = rt.regex_literal("(\\d)", "", None)?;
    let parts = call_method(&mut rt, &input, "split", &[digit.clone()])?;
    assert_eq!(parts.value.to_display_string(), "a,1,b");
    let captured = rt.member_expression(&parts, "1", None)?;
    assert_eq!(captured.value.as_str(), Some("1"));
    assert_origin(&rt, &captured, 0, &input, 1);
    let last = rt.member_expression(&parts, "2", None)?;
    assert_origin(&rt, &last, 0, &input, 2);

    let two = rt.number_literal(2.0, None);
    let limited = call_method(&mut rt, &input, "split", &[digit, two])?;
    assert_eq!(limited.value.to_display_string(), "a,1");

    let optional = rt.regex_literal("-(x)?", "", None)?;
    let dashed = rt.string_literal("a-b", None);
    let holes = call_method(&mut rt, &dashed, "split", &[optional])?;
    let missing = rt.member_expression(&holes, "1", None)?;
    assert!(matches!(missing.value, Value::Undefined));
    Ok(())
}

#[test]
fn unshift_slice_and_concat_carry_element_provenance() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let b = rt.string_literal("bee", None);
    let array = rt.array_expression(vec![b.clone()], None);
    let a = rt.string_literal("ay", None);
    call_method(&mut rt, &array, "unshift", &[a.clone()])?;
    let front = rt.member_expression(&array, "0", None)?;
    assert_eq!(front.value.as_str(), Some("ay"));
    assert_origin(&rt, &front, 1, &a, 1);
    let moved = rt.member_expression(&array, "1", None)?;
    assert_origin(&rt, &moved, 2, &b, 2);

    let one = rt.number_literal(1.0, None);
    let tail = call_method(&mut rt, &array, "slice", &[one])?;
    let sliced = rt.member_expression(&tail, "0", None)?;
    assert_eq!(sliced.value.as_str(), Some("bee"));
    assert_origin(&rt, &sliced, 0, &b, 0);

    let c = rt.string_literal("sea", None);
    let inner = rt.array_expression(vec![c.clone()], None);
    let d = rt.string_literal("dee", None);
    let joined = call_method(&mut rt, &array, "concat", &[inner, d.clone()])?;
    assert_eq!(joined.value.to_display_string(), "ay,bee,sea,dee");
    let from_array = rt.member_expression(&joined, "2", None)?;
    assert_origin(&rt, &from_array, 1, &c, 1);
    let from_value = rt.member_expression(&joined, "3", None)?;
    assert_origin(&rt, &from_value, 2, &d, 2);
    Ok(())
}

#[test]
fn filter_and_reduce_walk_through_callbacks() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let x = rt.string_literal("x", None);
    let skip = rt.string_literal("-", None);
    let y = rt.string_literal("y", None);
    let array = rt.array_expression(vec![x.clone(), skip, y.clone()], None);

    let not_dash = Tracked::untracked(Value::script_function("notDash", |rt, frame| {
        let keep = rt.boolean_literal(frame.arg(0).value.as_str() != Some("-"), None);
        Ok(rt.return_statement(frame, &keep, None))
    }));
    let kept = call_method(&mut rt, &array, "filter", &[not_dash])?;
    assert_eq!(kept.value.to_display_string(), "x,y");
    let second = rt.member_expression(&kept, "1", None)?;
    assert_origin(&rt, &second, 0, &y, 0);

    let concat = Tracked::untracked(Value::script_function("concat", |rt, frame| {
        let sum = rt.binary_expression("+", &frame.arg(0), &frame.arg(1), None)?;
        Ok(rt.return_statement(frame, &sum, None))
    }));
    let total = call_method(&mut rt, &kept, "reduce", &[concat])?;
    assert_eq!(total.value.as_str(), Some("xy"));
    assert_origin(&rt, &total, 0, &x, 0);
    assert_origin(&rt, &total, 1, &y, 0);
    Ok(())
}

#[test]
fn object_keys_entries_and_assign() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let key = rt.string_literal("title", None);
    let value = rt.string_literal("Hi there", None);
    let source = rt.object_expression(vec![(key.clone(), value.clone())], None);
    let object = rt.global("Object")?;

    let keys = call_method(&mut rt, &object, "keys", &[source.clone()])?;
    let first_key = rt.member_expression(&keys, "0", None)?;
    assert_eq!(first_key.value.as_str(), Some("title"));
    assert_origin(&rt, &first_key, 3, &key, 3);

    let entries = call_method(&mut rt, &object, "entries", &[source.clone()])?;
    let pair = rt.member_expression(&entries, "0", None)?;
    let entry_key = rt.member_expression(&pair, "0", None)?;
    assert_origin(&rt, &entry_key, 0, &key, 0);
    let entry_value = rt.member_expression(&pair, "1", None)?;
    assert_eq!(entry_value.value.as_str(), Some("Hi there"));
    assert_origin(&rt, &entry_value, 3, &value, 3);

    let target = rt.object_expression(Vec::new(), None);
    let merged = call_method(&mut rt, &object, "assign", &[target, source])?;
    let copied = rt.member_expression(&merged, "title", None)?;
    assert_eq!(copied.value.as_str(), Some("Hi there"));
    assert_origin(&rt, &copied, 7, &value, 7);
    Ok(())
}

#[test]
fn cloned_nodes_keep_assigned_text_origins() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    rt.load_document("<p>old</p>", None)?;
    let paragraph = Tracked::untracked(Value::Node(rt.dom().children(rt.dom().root())[0]));
    let words = rt.string_literal("fresh", None);
    rt.assign_member(&paragraph, "textContent", "=", &words, None)?;

    let deep = rt.boolean_literal(true, None);
    let copy = call_method(&mut rt, &paragraph, "cloneNode", &[deep])?;
    let text = rt.member_expression(&copy, "textContent", None)?;
    assert_eq!(text.value.as_str(), Some("fresh"));
    assert_origin(&rt, &text, 4, &words, 4);
    Ok(())
}

#[test]
fn constructed_values_stop_at_the_new_expression() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let widget = Tracked::untracked(Value::script_function("Widget", |rt, frame| {
        let label = rt.string_literal("w", None);
        Ok(rt.return_statement(frame, &label, None))
    }));
    let made = rt.new_expression(&widget, &[], None)?;
    let outcome = traverse(rt.store(), id_of(&made), 0);
    assert!(
        matches!(outcome.termination, Termination::Unsupported(_)),
        "{outcome:#?}"
    );
    assert!(
        outcome
            .steps
            .iter()
            .any(|step| step.record.operation == Operation::NewExpressionResult)
    );
    Ok(())
}

#[test]
fn destructuring_and_for_of_follow_their_source() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let key = rt.string_literal("name", None);
    let value = rt.string_literal("Ann", None);
    let person = rt.object_expression(vec![(key, value.clone())], None);
    let name = rt.destructure_property(&person, "name", None)?;
    assert_eq!(name.value.as_str(), Some("Ann"));
    assert_origin(&rt, &name, 2, &value, 2);

    let code = rt.string_literal("xyz", None);
    let second = rt.destructure_index(&code, 1, None)?;
    assert_eq!(second.value.as_str(), Some("y"));
    assert_origin(&rt, &second, 0, &code, 1);

    let ch = rt.for_of_element(&code, 2, None)?;
    assert_eq!(ch.value.as_str(), Some("z"));
    assert_origin(&rt, &ch, 0, &code, 2);

    let word = rt.string_literal("hey", None);
    let words = rt.array_expression(vec![word.clone()], None);
    let item = rt.for_of_element(&words, 0, None)?;
    assert_origin(&rt, &item, 1, &word, 1);
    Ok(())
}

#[test]
fn replace_all_maps_every_substitution() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let subject = rt.string_literal("a-b-c", None);
    let dash = rt.string_literal("-", None);
    let plus = rt.string_literal("+", None);
    let result = call_method(&mut rt, &subject, "replaceAll", &[dash, plus.clone()])?;
    assert_eq!(result.value.as_str(), Some("a+b+c"));
    assert_origin(&rt, &result, 1, &plus, 0);
    assert_origin(&rt, &result, 3, &plus, 0);
    assert_origin(&rt, &result, 4, &subject, 4);

    let global = rt.regex_literal("[ab]", "g", None)?;
    let star = rt.string_literal("*", None);
    let starred = call_method(&mut rt, &subject, "replaceAll", &[global, star.clone()])?;
    assert_eq!(starred.value.as_str(), Some("*-*-c"));
    assert_origin(&rt, &starred, 2, &star, 0);

    let single = rt.regex_literal("-", "", None)?;
    let err = match call_method(&mut rt, &subject, "replaceAll", &[single, star]) {
        Ok(value) => panic!("non-global regex was accepted: {:?}", value.value),
        Err(err) => err,
    };
    assert!(err.to_string().contains("TypeError"), "{err}");
    Ok(())
}

#[test]
fn non_global_match_locates_nested_groups() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    let input = rt.string_literal("xab", None);
    let pattern = rt.regex_literal("((a)b)", "", None)?;
    let found = call_method(&mut rt, &input, "match", &[pattern])?;
    assert_eq!(found.value.to_display_string(), "ab,ab,a");

    let outer = rt.member_expression(&found, "1", None)?;
    assert_origin(&rt, &outer, 1, &input, 2);
    let inner = rt.member_expression(&found, "2", None)?;
    assert_eq!(inner.value.as_str(), Some("a"));
    assert_origin(&rt, &inner, 0, &input, 1);
    Ok(())
}

#[test]
fn local_storage_reads_are_leaves() -> Result<()> {
    let mut rt = TrackingRuntime::new(MemoryLogStore::new());
    rt.set_local_storage_item("user", "ann");
    let storage = rt.global("localStorage")?;

    let user = rt.member_expression(&storage, "user", None)?;
    assert_eq!(user.value.as_str(), Some("ann"));
    let outcome = traverse(rt.store(), id_of(&user), 1);
    assert_eq!(outcome.termination, Termination::Leaf);
    let Some(last) = outcome.last() else {
        panic!("walk visited records");
    };
    assert_eq!(last.record.operation, Operation::LocalStorageValue);
    assert_eq!(last.char_index, 1);

    let key = rt.string_literal("user", None);
    let item = call_method(&mut rt, &storage, "getItem", &[key])?;
    let outcome = traverse(rt.store(), id_of(&item), 2);
    assert_eq!(
        outcome.last().map(|step| step.record.operation),
        Some(Operation::LocalStorageValue)
    );

    let theme = rt.string_literal("dark", None);
    rt.assign_member(&storage, "theme", "=", &theme, None)?;
    assert_eq!(rt.local_storage_item("theme"), Some("dark"));
    let missing = rt.string_literal("nope", None);
    let absent = call_method(&mut rt, &storage, "getItem", &[missing])?;
    assert!(matches!(absent.value, Value::Null));
    let unset = rt.member_expression(&storage, "nope", None)?;
    assert!(matches!(unset.value, Value::Undefined));
    Ok(())
}
