//! Builders for protocol payloads and JSON-RPC frames used in tests.

use biscuit_lsp::{IncomingMessage, RequestId};
use lsp_types::{
    CompletionItem, Diagnostic, DiagnosticSeverity, Documentation, Location, Position, Range, Uri,
};
use serde_json::{json, Value};

/// Builder for completion items.
///
/// # Example
///
/// ```rust
/// use biscuit_test_utils::CompletionItemBuilder;
///
/// let item = CompletionItemBuilder::new("println!")
///     .insert_text("println!(")
///     .sort_text("0001")
///     .build();
/// assert_eq!(item.label, "println!");
/// ```
pub struct CompletionItemBuilder {
    item: CompletionItem,
}

impl CompletionItemBuilder {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            item: CompletionItem {
                label: label.into(),
                ..Default::default()
            },
        }
    }

    pub fn insert_text(mut self, text: impl Into<String>) -> Self {
        self.item.insert_text = Some(text.into());
        self
    }

    pub fn filter_text(mut self, text: impl Into<String>) -> Self {
        self.item.filter_text = Some(text.into());
        self
    }

    pub fn sort_text(mut self, text: impl Into<String>) -> Self {
        self.item.sort_text = Some(text.into());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.item.detail = Some(detail.into());
        self
    }

    pub fn documentation(mut self, doc: impl Into<String>) -> Self {
        self.item.documentation = Some(Documentation::String(doc.into()));
        self
    }

    pub fn build(self) -> CompletionItem {
        self.item
    }
}

/// Builder for diagnostics. Lines and characters are protocol (0-based).
pub struct DiagnosticBuilder {
    diagnostic: Diagnostic,
}

impl DiagnosticBuilder {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            diagnostic: Diagnostic {
                message: message.into(),
                ..Default::default()
            },
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(message).severity(DiagnosticSeverity::ERROR)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(message).severity(DiagnosticSeverity::WARNING)
    }

    pub fn severity(mut self, severity: DiagnosticSeverity) -> Self {
        self.diagnostic.severity = Some(severity);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.diagnostic.source = Some(source.into());
        self
    }

    /// Span `start..end` on a single line.
    pub fn on_line(mut self, line: u32, start: u32, end: u32) -> Self {
        self.diagnostic.range = range(line, start, line, end);
        self
    }

    pub fn build(self) -> Diagnostic {
        self.diagnostic
    }
}

pub fn range(start_line: u32, start_char: u32, end_line: u32, end_char: u32) -> Range {
    Range {
        start: Position::new(start_line, start_char),
        end: Position::new(end_line, end_char),
    }
}

pub fn location(uri: &str, range: Range) -> Location {
    Location {
        uri: uri.parse::<Uri>().unwrap(),
        range,
    }
}

fn parse(frame: Value) -> IncomingMessage {
    IncomingMessage::parse(&frame.to_string()).unwrap()
}

/// A successful response frame.
pub fn response(id: RequestId, result: Value) -> IncomingMessage {
    parse(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}

/// An error response frame.
pub fn error_response(id: RequestId, code: i64, message: &str) -> IncomingMessage {
    parse(json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message}
    }))
}

/// A notification frame.
pub fn notification(method: &str, params: Value) -> IncomingMessage {
    parse(json!({"jsonrpc": "2.0", "method": method, "params": params}))
}

/// A server-to-client request frame.
pub fn server_request(id: Value, method: &str, params: Value) -> IncomingMessage {
    parse(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
}

/// An `initialize` result advertising completion, hover and definition.
pub fn full_capabilities() -> Value {
    json!({"capabilities": {
        "completionProvider": {"triggerCharacters": ["."]},
        "hoverProvider": true,
        "definitionProvider": true
    }})
}

/// A `publishDiagnostics` notification frame.
pub fn publish_diagnostics(uri: &str, diagnostics: &[Diagnostic]) -> IncomingMessage {
    notification(
        "textDocument/publishDiagnostics",
        json!({"uri": uri, "diagnostics": diagnostics}),
    )
}
