//! Server events and their classification from raw JSON-RPC messages.

use crate::pending::{RequestId, RequestKind};
use crate::transport::{IncomingMessage, JsonRpcNotification, JsonRpcResponse};
use lsp_types::notification::{LogMessage, Notification, PublishDiagnostics, ShowMessage};
use lsp_types::{
    CompletionItem, CompletionResponse, Diagnostic, GotoDefinitionResponse, InitializeResult,
    LogMessageParams, MessageType, PublishDiagnosticsParams, ServerCapabilities,
    ShowMessageParams, Uri,
};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// One event from a language server connection, in arrival order.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// The server answered `initialize`.
    Initialized {
        capabilities: Box<ServerCapabilities>,
    },
    /// The server answered `shutdown`.
    Shutdown,
    /// `window/logMessage` or `window/showMessage`.
    LogMessage { level: MessageType, message: String },
    Completion {
        id: RequestId,
        items: Vec<CompletionItem>,
    },
    PublishDiagnostics {
        uri: Uri,
        diagnostics: Vec<Diagnostic>,
    },
    Definition {
        id: RequestId,
        result: Option<GotoDefinitionResponse>,
    },
    /// Raw `contents` of a hover result, `None` when the server had nothing.
    Hover {
        id: RequestId,
        contents: Option<Value>,
    },
    /// The server answered a routed request with an error or a payload we
    /// could not parse.
    RequestFailed {
        id: RequestId,
        kind: RequestKind,
        message: String,
    },
    /// A request the server expects an answer to.
    ServerRequest { id: Value, method: String },
    /// The process died or the stream broke.
    ConnectionLost { reason: String },
    /// Anything else; ignored.
    Other { method: String },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialized { .. } => "initialized",
            Self::Shutdown => "shutdown",
            Self::LogMessage { .. } => "log_message",
            Self::Completion { .. } => "completion",
            Self::PublishDiagnostics { .. } => "publish_diagnostics",
            Self::Definition { .. } => "definition",
            Self::Hover { .. } => "hover",
            Self::RequestFailed { .. } => "request_failed",
            Self::ServerRequest { .. } => "server_request",
            Self::ConnectionLost { .. } => "connection_lost",
            Self::Other { .. } => "other",
        }
    }
}

/// What an in-flight request id answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Initialize,
    Shutdown,
    Routed(RequestKind),
}

/// Turns incoming messages into [`ServerEvent`]s.
///
/// Responses don't say which method they answer, so every request we send is
/// tracked here until its response arrives. This table is separate from the
/// per-document pending maps: a response whose document was closed still
/// classifies as its kind and is dropped later, at resolution.
#[derive(Debug, Default)]
pub struct EventDecoder {
    in_flight: HashMap<RequestId, ResponseKind>,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, id: RequestId, kind: ResponseKind) {
        self.in_flight.insert(id, kind);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn clear(&mut self) {
        self.in_flight.clear();
    }

    /// Classify a message. `None` means there is nothing to dispatch.
    pub fn decode(&mut self, message: IncomingMessage) -> Option<ServerEvent> {
        match message {
            IncomingMessage::Response(response) => self.decode_response(response),
            IncomingMessage::Notification(notification) => Some(decode_notification(notification)),
            IncomingMessage::Request(request) => Some(ServerEvent::ServerRequest {
                id: request.id,
                method: request.method,
            }),
        }
    }

    fn decode_response(&mut self, response: JsonRpcResponse) -> Option<ServerEvent> {
        let Some(id) = response.id.as_u64() else {
            warn!(id = %response.id, error = ?response.error, "Response without a usable id");
            return None;
        };
        let Some(kind) = self.in_flight.remove(&id) else {
            debug!(id, "Response to untracked request");
            return None;
        };

        if let Some(error) = response.error {
            return Some(match kind {
                ResponseKind::Initialize => ServerEvent::ConnectionLost {
                    reason: format!("initialize failed: {}", error.message),
                },
                // The server is going away either way.
                ResponseKind::Shutdown => ServerEvent::Shutdown,
                ResponseKind::Routed(kind) => ServerEvent::RequestFailed {
                    id,
                    kind,
                    message: error.message,
                },
            });
        }

        let result = response.result.unwrap_or(Value::Null);
        let event = match kind {
            ResponseKind::Initialize => match serde_json::from_value::<InitializeResult>(result) {
                Ok(init) => ServerEvent::Initialized {
                    capabilities: Box::new(init.capabilities),
                },
                Err(e) => ServerEvent::ConnectionLost {
                    reason: format!("invalid initialize result: {e}"),
                },
            },
            ResponseKind::Shutdown => ServerEvent::Shutdown,
            ResponseKind::Routed(RequestKind::Completion) => {
                match serde_json::from_value::<Option<CompletionResponse>>(result) {
                    Ok(response) => ServerEvent::Completion {
                        id,
                        items: match response {
                            None => Vec::new(),
                            Some(CompletionResponse::Array(items)) => items,
                            Some(CompletionResponse::List(list)) => list.items,
                        },
                    },
                    Err(e) => failed(id, RequestKind::Completion, e),
                }
            }
            ResponseKind::Routed(RequestKind::Definition) => {
                match serde_json::from_value::<Option<GotoDefinitionResponse>>(result) {
                    Ok(result) => ServerEvent::Definition { id, result },
                    Err(e) => failed(id, RequestKind::Definition, e),
                }
            }
            ResponseKind::Routed(RequestKind::Hover) => {
                let contents = match result {
                    Value::Null => None,
                    mut hover => hover.get_mut("contents").map(Value::take),
                };
                ServerEvent::Hover { id, contents }
            }
        };
        Some(event)
    }
}

fn failed(id: RequestId, kind: RequestKind, error: serde_json::Error) -> ServerEvent {
    ServerEvent::RequestFailed {
        id,
        kind,
        message: format!("invalid {kind} result: {error}"),
    }
}

fn decode_notification(notification: JsonRpcNotification) -> ServerEvent {
    let params = notification.params.unwrap_or(Value::Null);
    let method = notification.method;

    let decoded = match method.as_str() {
        m if m == PublishDiagnostics::METHOD => serde_json::from_value::<PublishDiagnosticsParams>(params)
            .map(|p| ServerEvent::PublishDiagnostics {
                uri: p.uri,
                diagnostics: p.diagnostics,
            }),
        m if m == LogMessage::METHOD => {
            serde_json::from_value::<LogMessageParams>(params).map(|p| ServerEvent::LogMessage {
                level: p.typ,
                message: p.message,
            })
        }
        m if m == ShowMessage::METHOD => {
            serde_json::from_value::<ShowMessageParams>(params).map(|p| ServerEvent::LogMessage {
                level: p.typ,
                message: p.message,
            })
        }
        _ => return ServerEvent::Other { method },
    };

    decoded.unwrap_or_else(|e| {
        warn!(method = %method, error = %e, "Malformed notification params");
        ServerEvent::Other { method }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(body: Value) -> IncomingMessage {
        IncomingMessage::Response(serde_json::from_value(body).unwrap())
    }

    fn notification(method: &str, params: Value) -> IncomingMessage {
        IncomingMessage::Notification(JsonRpcNotification::new(method, Some(params)))
    }

    #[test]
    fn test_untracked_response_is_dropped() {
        let mut decoder = EventDecoder::new();
        let msg = response(json!({"jsonrpc": "2.0", "id": 9, "result": null}));
        assert!(decoder.decode(msg).is_none());
    }

    #[test]
    fn test_initialize_response() {
        let mut decoder = EventDecoder::new();
        decoder.track(1, ResponseKind::Initialize);
        let msg = response(json!({
            "jsonrpc": "2.0", "id": 1,
            "result": {"capabilities": {"hoverProvider": true}}
        }));
        match decoder.decode(msg) {
            Some(ServerEvent::Initialized { capabilities }) => {
                assert!(capabilities.hover_provider.is_some());
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(decoder.in_flight(), 0);
    }

    #[test]
    fn test_initialize_error_loses_connection() {
        let mut decoder = EventDecoder::new();
        decoder.track(1, ResponseKind::Initialize);
        let msg = response(json!({
            "jsonrpc": "2.0", "id": 1,
            "error": {"code": -32603, "message": "boom"}
        }));
        assert!(matches!(
            decoder.decode(msg),
            Some(ServerEvent::ConnectionLost { reason }) if reason.contains("boom")
        ));
    }

    #[test]
    fn test_completion_list_and_array() {
        let mut decoder = EventDecoder::new();
        decoder.track(2, ResponseKind::Routed(RequestKind::Completion));
        decoder.track(3, ResponseKind::Routed(RequestKind::Completion));

        let list = response(json!({
            "jsonrpc": "2.0", "id": 2,
            "result": {"isIncomplete": false, "items": [{"label": "print"}]}
        }));
        assert!(matches!(
            decoder.decode(list),
            Some(ServerEvent::Completion { id: 2, items }) if items.len() == 1
        ));

        let array = response(json!({
            "jsonrpc": "2.0", "id": 3,
            "result": [{"label": "a"}, {"label": "b"}]
        }));
        assert!(matches!(
            decoder.decode(array),
            Some(ServerEvent::Completion { id: 3, items }) if items.len() == 2
        ));
    }

    #[test]
    fn test_null_completion_is_empty() {
        let mut decoder = EventDecoder::new();
        decoder.track(4, ResponseKind::Routed(RequestKind::Completion));
        let msg = response(json!({"jsonrpc": "2.0", "id": 4, "result": null}));
        assert!(matches!(
            decoder.decode(msg),
            Some(ServerEvent::Completion { id: 4, items }) if items.is_empty()
        ));
    }

    #[test]
    fn test_definition_shapes() {
        let mut decoder = EventDecoder::new();
        decoder.track(5, ResponseKind::Routed(RequestKind::Definition));
        decoder.track(6, ResponseKind::Routed(RequestKind::Definition));

        let none = response(json!({"jsonrpc": "2.0", "id": 5, "result": null}));
        assert!(matches!(
            decoder.decode(none),
            Some(ServerEvent::Definition { id: 5, result: None })
        ));

        let single = response(json!({
            "jsonrpc": "2.0", "id": 6,
            "result": {
                "uri": "file:///tmp/a.rs",
                "range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 3}}
            }
        }));
        assert!(matches!(
            decoder.decode(single),
            Some(ServerEvent::Definition {
                id: 6,
                result: Some(GotoDefinitionResponse::Scalar(_))
            })
        ));
    }

    #[test]
    fn test_hover_contents_extracted() {
        let mut decoder = EventDecoder::new();
        decoder.track(7, ResponseKind::Routed(RequestKind::Hover));
        decoder.track(8, ResponseKind::Routed(RequestKind::Hover));

        let msg = response(json!({
            "jsonrpc": "2.0", "id": 7,
            "result": {"contents": ["# Title", {"value": "body"}]}
        }));
        match decoder.decode(msg) {
            Some(ServerEvent::Hover { id: 7, contents }) => {
                assert_eq!(contents, Some(json!(["# Title", {"value": "body"}])));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let empty = response(json!({"jsonrpc": "2.0", "id": 8, "result": null}));
        assert!(matches!(
            decoder.decode(empty),
            Some(ServerEvent::Hover { id: 8, contents: None })
        ));
    }

    #[test]
    fn test_error_response_fails_request() {
        let mut decoder = EventDecoder::new();
        decoder.track(10, ResponseKind::Routed(RequestKind::Hover));
        let msg = response(json!({
            "jsonrpc": "2.0", "id": 10,
            "error": {"code": -32801, "message": "content modified"}
        }));
        assert!(matches!(
            decoder.decode(msg),
            Some(ServerEvent::RequestFailed { id: 10, kind: RequestKind::Hover, .. })
        ));
    }

    #[test]
    fn test_malformed_definition_fails_request() {
        let mut decoder = EventDecoder::new();
        decoder.track(11, ResponseKind::Routed(RequestKind::Definition));
        let msg = response(json!({"jsonrpc": "2.0", "id": 11, "result": 42}));
        assert!(matches!(
            decoder.decode(msg),
            Some(ServerEvent::RequestFailed { id: 11, kind: RequestKind::Definition, .. })
        ));
    }

    #[test]
    fn test_notifications() {
        let mut decoder = EventDecoder::new();

        let diagnostics = notification(
            "textDocument/publishDiagnostics",
            json!({"uri": "file:///tmp/a.rs", "diagnostics": []}),
        );
        assert!(matches!(
            decoder.decode(diagnostics),
            Some(ServerEvent::PublishDiagnostics { diagnostics, .. }) if diagnostics.is_empty()
        ));

        let log = notification("window/logMessage", json!({"type": 1, "message": "bad"}));
        assert!(matches!(
            decoder.decode(log),
            Some(ServerEvent::LogMessage { level, .. }) if level == MessageType::ERROR
        ));

        let unknown = notification("$/progress", json!({"token": 1, "value": {}}));
        assert!(matches!(
            decoder.decode(unknown),
            Some(ServerEvent::Other { method }) if method == "$/progress"
        ));

        let malformed = notification("textDocument/publishDiagnostics", json!({"uri": 3}));
        assert!(matches!(decoder.decode(malformed), Some(ServerEvent::Other { .. })));
    }

    #[test]
    fn test_server_request() {
        let mut decoder = EventDecoder::new();
        let msg = IncomingMessage::parse(
            r#"{"jsonrpc":"2.0","id":0,"method":"client/registerCapability","params":{}}"#,
        )
        .unwrap();
        assert!(matches!(
            decoder.decode(msg),
            Some(ServerEvent::ServerRequest { method, .. }) if method == "client/registerCapability"
        ));
    }
}
