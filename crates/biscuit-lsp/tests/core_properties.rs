//! Behaviour of the LSP core driven through full event sequences.

use biscuit_lsp::lsp_types::{GotoDefinitionResponse, InitializeParams};
use biscuit_lsp::{
    build_diagnostic_set, decode_hover_content, decode_locations, to_protocol, to_text,
    ConnectionState, Document, DocumentUpdate, EventDispatcher, HoverContent, LspError, Outgoing,
    PendingRequests, RequestKind, ServerEvent, Severity, TextPosition,
};
use biscuit_test_utils::builders::{self, full_capabilities, response};
use biscuit_test_utils::{DiagnosticBuilder, RecordingDocument};
use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver};

fn dispatcher() -> (EventDispatcher, UnboundedReceiver<Outgoing>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventDispatcher::new("python", tx), rx)
}

fn sent_methods(rx: &mut UnboundedReceiver<Outgoing>) -> Vec<String> {
    let mut methods = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let Some(method) = message.method() {
            methods.push(method.to_string());
        }
    }
    methods
}

fn make_ready(dispatcher: &mut EventDispatcher, rx: &mut UnboundedReceiver<Outgoing>) {
    let id = dispatcher
        .begin_initialize(&InitializeParams::default())
        .unwrap();
    dispatcher.handle_message(response(id, full_capabilities()));
    assert_eq!(dispatcher.state(), ConnectionState::Ready);
    sent_methods(rx);
}

fn pos(line: u32, column: u32) -> TextPosition {
    TextPosition { line, column }
}

#[test]
fn test_position_round_trip() {
    for line in [1, 2, 17, 4096, u32::MAX] {
        for column in [0, 1, 80, u32::MAX] {
            let p = pos(line, column);
            assert_eq!(to_text(to_protocol(p).unwrap()), p);
        }
    }
    assert!(matches!(
        to_protocol(pos(0, 3)),
        Err(LspError::InvalidPosition(_))
    ));
}

#[test]
fn test_resolve_at_most_once() {
    let mut pending = PendingRequests::new();
    let doc = RecordingDocument::new("/w/a.py", "");
    pending
        .register(RequestKind::Definition, 11, doc.id(), pos(1, 0))
        .unwrap();
    assert!(pending.resolve_and_remove(RequestKind::Definition, 11).is_ok());
    assert!(matches!(
        pending.resolve_and_remove(RequestKind::Definition, 11),
        Err(LspError::UnknownRequestId { id: 11, .. })
    ));
}

#[test]
fn test_diagnostics_errors_first_stable() {
    let diagnostics = [
        DiagnosticBuilder::warning("w1").build(),
        DiagnosticBuilder::error("e1").build(),
        DiagnosticBuilder::error("e2").build(),
        DiagnosticBuilder::warning("w2").build(),
    ];
    let set = build_diagnostic_set(&diagnostics);
    let order: Vec<_> = set.markers.iter().map(|m| m.tooltip.as_str()).collect();
    assert_eq!(order, vec!["e1", "e2", "w1", "w2"]);
    assert_eq!(set.markers[0].severity, Severity::Error);
    assert_eq!(set.markers[3].color, "orange");
}

#[test]
fn test_completion_prefix_and_range() {
    let (mut dispatcher, mut rx) = dispatcher();
    make_ready(&mut dispatcher, &mut rx);
    let doc = RecordingDocument::new("/w/main.py", "pri");
    dispatcher.open_document(doc.handle()).unwrap();

    let id = dispatcher
        .request_completion(doc.id(), pos(1, 3))
        .unwrap();
    dispatcher.handle_message(response(
        id,
        json!({"isIncomplete": false, "items": [
            builders::CompletionItemBuilder::new("print").build(),
            builders::CompletionItemBuilder::new("private").sort_text("zz").build()
        ]}),
    ));

    let completions = doc.completions();
    assert_eq!(completions.len(), 1);
    let first = &completions[0].items[0];
    assert_eq!(first.display_text, "print");
    assert_eq!(first.replace_start, pos(1, 0));
    assert_eq!(first.replace_end, pos(1, 3));
    assert_eq!(first.filter_text, "nt");
    assert_eq!(completions[0].items[1].display_text, "private");
}

#[test]
fn test_empty_definition_result() {
    assert!(decode_locations(None).unwrap().is_empty());
    assert!(decode_locations(Some(&GotoDefinitionResponse::Array(vec![])))
        .unwrap()
        .is_empty());
}

#[test]
fn test_hover_normalization() {
    let content = HoverContent::from_value(&json!(["# Title", {"value": "body"}]))
        .unwrap()
        .unwrap();
    assert_eq!(decode_hover_content(Some(&content), None), "# Title\n\nbody");
}

#[test]
fn test_stale_document_purge() {
    let (mut dispatcher, mut rx) = dispatcher();
    make_ready(&mut dispatcher, &mut rx);
    let closing = RecordingDocument::new("/w/closing.py", "x = 1");
    let staying = RecordingDocument::new("/w/staying.py", "y = 2");
    dispatcher.open_document(closing.handle()).unwrap();
    dispatcher.open_document(staying.handle()).unwrap();

    let id = dispatcher
        .request_hover(closing.id(), pos(1, 0))
        .unwrap();
    assert_eq!(dispatcher.close_document(closing.id()), 1);

    dispatcher.handle_message(response(id, json!({"contents": "int"})));
    assert!(closing.updates().is_empty());
    assert!(staying.updates().is_empty());
    assert_eq!(dispatcher.state(), ConnectionState::Ready);
    assert!(dispatcher.pending().is_empty());
}

#[test]
fn test_uninitialized_ignores_events_and_replays_once() {
    let (mut dispatcher, mut rx) = dispatcher();
    let a = RecordingDocument::new("/w/a.py", "a");
    let b = RecordingDocument::new("/w/b.py", "b");
    dispatcher.open_document(a.handle()).unwrap();
    dispatcher.open_document(b.handle()).unwrap();

    dispatcher.handle_message(builders::publish_diagnostics(
        "file:///w/a.py",
        &[DiagnosticBuilder::error("early").build()],
    ));
    dispatcher.process(ServerEvent::Shutdown);
    dispatcher.process(ServerEvent::Hover {
        id: 1,
        contents: Some(json!("x")),
    });
    assert_eq!(dispatcher.state(), ConnectionState::Uninitialized);
    assert!(sent_methods(&mut rx).is_empty());
    assert!(a.updates().is_empty());

    let id = dispatcher
        .begin_initialize(&InitializeParams::default())
        .unwrap();
    dispatcher.handle_message(response(id, full_capabilities()));
    assert_eq!(
        sent_methods(&mut rx),
        vec![
            "initialize",
            "initialized",
            "textDocument/didOpen",
            "textDocument/didOpen"
        ]
    );

    // A second acknowledgement does not replay again.
    dispatcher.handle_message(response(id, full_capabilities()));
    dispatcher.process(ServerEvent::Initialized {
        capabilities: Box::default(),
    });
    assert!(sent_methods(&mut rx).is_empty());

    // Documents opened once ready are announced immediately.
    let c = RecordingDocument::new("/w/c.py", "c");
    dispatcher.open_document(c.handle()).unwrap();
    assert_eq!(sent_methods(&mut rx), vec!["textDocument/didOpen"]);
}

#[test]
fn test_diagnostics_after_ready_reach_document() {
    let (mut dispatcher, mut rx) = dispatcher();
    make_ready(&mut dispatcher, &mut rx);
    let doc = RecordingDocument::new("/w/a.py", "import os");
    dispatcher.open_document(doc.handle()).unwrap();

    dispatcher.handle_message(builders::publish_diagnostics(
        "file:///w/a.py",
        &[DiagnosticBuilder::warning("unused import")
            .source("pyright")
            .on_line(0, 7, 9)
            .build()],
    ));
    let sets = doc.diagnostics();
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].markers[0].tooltip, "pyright: unused import");
    assert_eq!(sets[0].markers[0].start, pos(1, 7));
    assert_eq!(sets[0].markers[0].end, pos(1, 9));
}

#[test]
fn test_server_request_gets_null_reply() {
    let (mut dispatcher, mut rx) = dispatcher();
    make_ready(&mut dispatcher, &mut rx);
    dispatcher.handle_message(builders::server_request(
        json!(5),
        "client/registerCapability",
        json!({"registrations": []}),
    ));
    match rx.try_recv().unwrap() {
        Outgoing::Reply { id, result } => {
            assert_eq!(id, json!(5));
            assert!(result.is_null());
        }
        other => panic!("unexpected message: {other:?}"),
    }
}

#[test]
fn test_error_response_drops_pending() {
    let (mut dispatcher, mut rx) = dispatcher();
    make_ready(&mut dispatcher, &mut rx);
    let doc = RecordingDocument::new("/w/a.py", "");
    dispatcher.open_document(doc.handle()).unwrap();
    let id = dispatcher
        .request_definition(doc.id(), pos(1, 0))
        .unwrap();
    dispatcher.handle_message(builders::error_response(id, -32800, "cancelled"));
    assert!(dispatcher.pending().is_empty());
    assert!(doc.updates().is_empty());
}

#[test]
fn test_connection_lost_reports_unavailable() {
    let (mut dispatcher, mut rx) = dispatcher();
    make_ready(&mut dispatcher, &mut rx);
    let doc = RecordingDocument::new("/w/a.py", "");
    dispatcher.open_document(doc.handle()).unwrap();
    dispatcher.process(ServerEvent::ConnectionLost {
        reason: "broken pipe".to_string(),
    });
    assert_eq!(
        doc.updates(),
        vec![DocumentUpdate::Unavailable {
            language: "python".to_string()
        }]
    );
    assert_eq!(dispatcher.state(), ConnectionState::Closed);
}
