use std::thread;
use std::time::Duration;

use dataflow_tracer::{
    Error, LogId, LogStore, Operation, OperationRecord, Result, ResultValue, RetryPolicy,
    SharedLogStore, Termination, Tracked, TrackingRuntime, TraversalService, Value,
    get_origin_at_character_index,
};

fn quick_policy(timeout_ms: u64) -> RetryPolicy {
    RetryPolicy::default()
        .with_initial_interval(Duration::from_millis(5))
        .with_max_interval(Duration::from_millis(20))
        .with_timeout(Duration::from_millis(timeout_ms))
}

fn literal(id: u64, text: &str) -> OperationRecord {
    OperationRecord {
        id: LogId(id),
        operation: Operation::Literal,
        args: Default::default(),
        extra_args: Default::default(),
        ast_args: Default::default(),
        runtime_args: Default::default(),
        result: ResultValue::String(text.to_string()),
        loc: None,
    }
}

#[test]
fn waits_for_a_record_written_by_another_thread() -> Result<()> {
    let store = SharedLogStore::new();
    let service = TraversalService::with_policy(store.clone(), quick_policy(2_000))?;
    let mut writer = store.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(60));
        writer.store_record(literal(1, "late"))
    });

    let outcome = service.traverse(LogId(1), 2)?;
    assert_eq!(outcome.termination, Termination::Leaf);
    assert_eq!(outcome.last().map(|step| step.char_index), Some(2));
    match handle.join() {
        Ok(stored) => stored?,
        Err(_) => panic!("writer thread panicked"),
    }
    Ok(())
}

#[test]
fn gives_up_after_the_timeout() -> Result<()> {
    let service = TraversalService::with_policy(SharedLogStore::new(), quick_policy(40))?;
    match service.traverse(LogId(7), 0) {
        Err(Error::RecordNotFound { id, waited_ms }) => {
            assert_eq!(id, LogId(7));
            assert!(waited_ms >= 40, "waited only {waited_ms}ms");
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    Ok(())
}

#[test]
fn document_chars_are_traversed_through_the_service() -> Result<()> {
    let store = SharedLogStore::new();
    let mut rt = TrackingRuntime::new(store.clone());
    rt.load_document("<ul><li>one</li></ul>", None)?;
    let list = rt.dom().children(rt.dom().root())[0];
    let item = rt.dom().children(list)[0];
    let text = rt.string_literal("two", None);
    let item_value = Tracked::untracked(Value::Node(item));
    rt.assign_member(&item_value, "textContent", "=", &text, None)?;

    let mapping = rt.html_mapping(rt.dom().root(), false);
    assert_eq!(mapping.text(), "<ul><li>two</li></ul>");
    let Some(hit) = get_origin_at_character_index(&mapping, 9) else {
        panic!("assigned text is mapped");
    };
    assert_eq!(hit.char_index, 1);

    let service = TraversalService::with_policy(store, quick_policy(100))?;
    let Some(outcome) = service.traverse_document_char(&mapping, 9)? else {
        panic!("char has an origin");
    };
    assert_eq!(outcome.termination, Termination::Leaf);
    assert_eq!(outcome.last().map(|step| step.record.id), text.tracking);

    let Some(tag) = service.traverse_document_char(&mapping, 1)? else {
        panic!("initial markup is mapped");
    };
    assert_eq!(
        tag.last().map(|step| step.record.operation),
        Some(Operation::InitialPageHtml)
    );
    Ok(())
}
