//! The per-connection event dispatcher and lifecycle state machine.
//!
//! One dispatcher exists per language server connection. It owns the
//! connection's pending requests and open-document set exclusively; callers
//! serialize access to it (the [`Connection`](crate::Connection) keeps it
//! behind a mutex) and feed it server events strictly in arrival order.
//!
//! ```text
//! Uninitialized ──open──▶ Initializing ──initialized──▶ Ready
//!                                                         │ shutdown
//!                              Closed ◀── ShuttingDown ◀──┘
//! ```
//!
//! A lost connection moves any state straight to `Closed`.

use crate::decode::{
    build_completion_set, build_diagnostic_set, build_jump_target, decode_hover_content,
    decode_locations, path_to_uri, prefix_len, uri_matches_path, HoverContent,
};
use crate::document::{Document, DocumentId};
use crate::error::{LspError, LspResult};
use crate::event::{EventDecoder, ResponseKind, ServerEvent};
use crate::model::HoverInfo;
use crate::pending::{PendingRequest, PendingRequests, RequestId, RequestKind};
use crate::position::{to_protocol, TextPosition};
use crate::transport::{IncomingMessage, Outgoing};
use lsp_types::notification::{
    DidCloseTextDocument, DidOpenTextDocument, Exit, Initialized, Notification,
};
use lsp_types::request::{Initialize, Request, Shutdown};
use lsp_types::{
    CompletionItem, CompletionParams, Diagnostic, DidCloseTextDocumentParams,
    DidOpenTextDocumentParams, GotoDefinitionParams, GotoDefinitionResponse, HoverParams,
    HoverProviderCapability, InitializeParams, InitializedParams, MessageType, OneOf,
    PartialResultParams, ServerCapabilities,
    TextDocumentIdentifier, TextDocumentItem, TextDocumentPositionParams, Uri,
    WorkDoneProgressParams,
};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

/// Lifecycle of a language server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    Ready,
    ShuttingDown,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::ShuttingDown => "shutting down",
            Self::Closed => "closed",
        })
    }
}

/// Consumes server events for one connection and routes results to
/// documents.
pub struct EventDispatcher {
    language: String,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    pending: PendingRequests,
    decoder: EventDecoder,
    /// Open documents, in the order they were opened.
    documents: Vec<Arc<dyn Document>>,
    capabilities: Option<ServerCapabilities>,
    outbox: mpsc::UnboundedSender<Outgoing>,
    next_id: RequestId,
}

impl EventDispatcher {
    /// Create a dispatcher whose outgoing messages go to `outbox`.
    pub fn new(language: impl Into<String>, outbox: mpsc::UnboundedSender<Outgoing>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Uninitialized);
        Self {
            language: language.into(),
            state: ConnectionState::Uninitialized,
            state_tx,
            pending: PendingRequests::new(),
            decoder: EventDecoder::new(),
            documents: Vec::new(),
            capabilities: None,
            outbox,
            next_id: 1,
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    pub fn capabilities(&self) -> Option<&ServerCapabilities> {
        self.capabilities.as_ref()
    }

    pub fn is_open(&self, document: DocumentId) -> bool {
        self.document(document).is_some()
    }

    pub fn open_documents(&self) -> impl Iterator<Item = DocumentId> + '_ {
        self.documents.iter().map(|doc| doc.id())
    }

    fn document(&self, id: DocumentId) -> Option<&Arc<dyn Document>> {
        self.documents.iter().find(|doc| doc.id() == id)
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!(language = %self.language, from = %self.state, to = %state, "Connection state change");
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn next_request_id(&mut self) -> RequestId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn send(&self, message: Outgoing) {
        if self.outbox.send(message).is_err() {
            debug!(language = %self.language, "Outbox closed, dropping message");
        }
    }

    fn notify<N: Notification>(&self, params: N::Params) {
        match serde_json::to_value(params) {
            Ok(params) => self.send(Outgoing::notification(N::METHOD, params)),
            Err(e) => error!(method = N::METHOD, error = %e, "Failed to encode notification"),
        }
    }

    /// Open the connection: send `initialize` and enter `Initializing`.
    pub fn begin_initialize(&mut self, params: &InitializeParams) -> LspResult<RequestId> {
        if self.state != ConnectionState::Uninitialized {
            return Err(LspError::NotReady(self.state));
        }
        let params = serde_json::to_value(params)?;
        let id = self.next_request_id();
        self.decoder.track(id, ResponseKind::Initialize);
        self.send(Outgoing::request(id, Initialize::METHOD, params));
        self.set_state(ConnectionState::Initializing);
        Ok(id)
    }

    /// Ask the server to shut down. The connection closes once it answers.
    pub fn begin_shutdown(&mut self) -> LspResult<RequestId> {
        match self.state {
            ConnectionState::Initializing | ConnectionState::Ready => {}
            state => return Err(LspError::NotReady(state)),
        }
        let id = self.next_request_id();
        self.decoder.track(id, ResponseKind::Shutdown);
        self.send(Outgoing::request(id, Shutdown::METHOD, Value::Null));
        self.set_state(ConnectionState::ShuttingDown);
        Ok(id)
    }

    /// Track a document. It is announced now if the server is ready, or on
    /// the `Ready` transition otherwise.
    pub fn open_document(&mut self, document: Arc<dyn Document>) -> LspResult<()> {
        match self.state {
            ConnectionState::ShuttingDown | ConnectionState::Closed => {
                return Err(LspError::NotReady(self.state))
            }
            _ => {}
        }
        if self.is_open(document.id()) {
            return Ok(());
        }
        if self.state == ConnectionState::Ready {
            self.announce(document.as_ref());
        }
        self.documents.push(document);
        Ok(())
    }

    /// Stop tracking a document and forget its pending requests. Responses
    /// that still arrive for them are dropped.
    pub fn close_document(&mut self, id: DocumentId) -> usize {
        let Some(index) = self.documents.iter().position(|doc| doc.id() == id) else {
            return 0;
        };
        let document = self.documents.remove(index);
        if self.state == ConnectionState::Ready {
            if let Some(uri) = document_uri(document.as_ref()) {
                self.notify::<DidCloseTextDocument>(DidCloseTextDocumentParams {
                    text_document: TextDocumentIdentifier { uri },
                });
            }
        }
        let purged = self.pending.purge_document(id);
        debug!(language = %self.language, document = %id, purged, "Document closed");
        purged
    }

    fn announce(&self, document: &dyn Document) {
        let Some(path) = document.path() else {
            trace!(document = %document.id(), "Unsaved buffer, not announced");
            return;
        };
        let uri = match path_to_uri(&path) {
            Ok(uri) => uri,
            Err(e) => {
                warn!(document = %document.id(), error = %e, "Cannot announce document");
                return;
            }
        };
        let language_id = crate::config::language_id_for_path(&path)
            .unwrap_or(self.language.as_str())
            .to_string();
        self.notify::<DidOpenTextDocument>(DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri,
                language_id,
                version: 1,
                text: document.text(),
            },
        });
    }

    pub fn request_completion(
        &mut self,
        document: DocumentId,
        cursor: TextPosition,
    ) -> LspResult<RequestId> {
        self.issue(RequestKind::Completion, document, cursor)
    }

    pub fn request_definition(
        &mut self,
        document: DocumentId,
        position: TextPosition,
    ) -> LspResult<RequestId> {
        self.issue(RequestKind::Definition, document, position)
    }

    pub fn request_hover(
        &mut self,
        document: DocumentId,
        position: TextPosition,
    ) -> LspResult<RequestId> {
        self.issue(RequestKind::Hover, document, position)
    }

    fn supports(&self, kind: RequestKind) -> bool {
        // Before we know the capabilities, let the server decide.
        let Some(caps) = &self.capabilities else {
            return true;
        };
        match kind {
            RequestKind::Completion => caps.completion_provider.is_some(),
            RequestKind::Definition => !matches!(
                caps.definition_provider,
                None | Some(OneOf::Left(false))
            ),
            RequestKind::Hover => !matches!(
                caps.hover_provider,
                None | Some(HoverProviderCapability::Simple(false))
            ),
        }
    }

    /// Register a pending entry, then send the request.
    fn issue(
        &mut self,
        kind: RequestKind,
        document: DocumentId,
        position: TextPosition,
    ) -> LspResult<RequestId> {
        if self.state != ConnectionState::Ready {
            return Err(LspError::NotReady(self.state));
        }
        if !self.supports(kind) {
            return Err(LspError::Unsupported(kind.method()));
        }
        let doc = self
            .document(document)
            .ok_or(LspError::DocumentNotOpen(document))?;
        let uri = document_uri(doc.as_ref()).ok_or(LspError::DocumentNotOpen(document))?;

        let position_params = TextDocumentPositionParams {
            text_document: TextDocumentIdentifier { uri },
            position: to_protocol(position)?,
        };
        let params = match kind {
            RequestKind::Completion => serde_json::to_value(CompletionParams {
                text_document_position: position_params,
                work_done_progress_params: WorkDoneProgressParams::default(),
                partial_result_params: PartialResultParams::default(),
                context: None,
            })?,
            RequestKind::Definition => serde_json::to_value(GotoDefinitionParams {
                text_document_position_params: position_params,
                work_done_progress_params: WorkDoneProgressParams::default(),
                partial_result_params: PartialResultParams::default(),
            })?,
            RequestKind::Hover => serde_json::to_value(HoverParams {
                text_document_position_params: position_params,
                work_done_progress_params: WorkDoneProgressParams::default(),
            })?,
        };

        let id = self.next_request_id();
        self.pending.register(kind, id, document, position)?;
        self.decoder.track(id, ResponseKind::Routed(kind));
        self.send(Outgoing::request(id, kind.method(), params));
        debug!(language = %self.language, id, kind = %kind, document = %document, "Request sent");
        Ok(id)
    }

    /// Classify a raw message and process the resulting event.
    pub fn handle_message(&mut self, message: IncomingMessage) {
        if let Some(event) = self.decoder.decode(message) {
            self.process(event);
        }
    }

    /// Process one server event.
    pub fn process(&mut self, event: ServerEvent) {
        trace!(language = %self.language, state = %self.state, event = event.name(), "Server event");

        if self.state == ConnectionState::Uninitialized
            && !matches!(
                event,
                ServerEvent::Initialized { .. } | ServerEvent::LogMessage { .. }
            )
        {
            debug!(language = %self.language, event = event.name(), "Ignoring event before the connection opened");
            return;
        }

        match event {
            ServerEvent::Initialized { capabilities } => self.on_initialized(*capabilities),
            ServerEvent::Shutdown => self.on_shutdown(),
            ServerEvent::ConnectionLost { reason } => self.on_connection_lost(&reason),
            ServerEvent::LogMessage { level, message } => {
                if self.state != ConnectionState::Closed {
                    self.log_server_message(level, &message);
                }
            }
            ServerEvent::ServerRequest { id, method } => {
                if self.state != ConnectionState::Closed {
                    debug!(language = %self.language, method = %method, "Answering server request with null");
                    self.send(Outgoing::Reply {
                        id,
                        result: Value::Null,
                    });
                }
            }
            event if self.state != ConnectionState::Ready => {
                debug!(
                    language = %self.language,
                    state = %self.state,
                    event = event.name(),
                    "Ignoring event outside the ready state"
                );
            }
            ServerEvent::Completion { id, items } => self.on_completion(id, items),
            ServerEvent::PublishDiagnostics { uri, diagnostics } => {
                self.on_diagnostics(&uri, &diagnostics)
            }
            ServerEvent::Definition { id, result } => self.on_definition(id, result),
            ServerEvent::Hover { id, contents } => self.on_hover(id, contents),
            ServerEvent::RequestFailed { id, kind, message } => {
                let _ = self.pending.resolve_and_remove(kind, id);
                warn!(language = %self.language, id, kind = %kind, message = %message, "Request failed");
            }
            ServerEvent::Other { method } => {
                trace!(language = %self.language, method = %method, "Unhandled notification");
            }
        }
    }

    fn on_initialized(&mut self, capabilities: ServerCapabilities) {
        match self.state {
            ConnectionState::Uninitialized | ConnectionState::Initializing => {}
            state => {
                warn!(language = %self.language, state = %state, "Unexpected initialize response ignored");
                return;
            }
        }
        self.capabilities = Some(capabilities);
        self.notify::<Initialized>(InitializedParams {});
        self.set_state(ConnectionState::Ready);

        for document in &self.documents {
            self.announce(document.as_ref());
        }
        info!(language = %self.language, replayed = self.documents.len(), "Language server ready");
    }

    fn on_shutdown(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.set_state(ConnectionState::ShuttingDown);
        self.send(Outgoing::notification(Exit::METHOD, Value::Null));
        let discarded = self.pending.clear();
        self.decoder.clear();
        self.set_state(ConnectionState::Closed);
        info!(language = %self.language, discarded, "Language server shut down");
    }

    fn on_connection_lost(&mut self, reason: &str) {
        if self.state == ConnectionState::Closed {
            return;
        }
        let discarded = self.pending.clear();
        self.decoder.clear();
        self.set_state(ConnectionState::Closed);
        warn!(language = %self.language, reason = %reason, discarded, "Language server connection lost");

        for document in &self.documents {
            document.lsp_unavailable(&self.language);
        }
    }

    fn log_server_message(&self, level: MessageType, message: &str) {
        let language = self.language.as_str();
        match level {
            l if l == MessageType::ERROR => error!(language, "{}", message),
            l if l == MessageType::WARNING => warn!(language, "{}", message),
            l if l == MessageType::INFO => info!(language, "{}", message),
            _ => debug!(language, "{}", message),
        }
    }

    fn resolve(
        &mut self,
        kind: RequestKind,
        id: RequestId,
    ) -> Option<(PendingRequest, Arc<dyn Document>)> {
        let pending = match self.pending.resolve_and_remove(kind, id) {
            Ok(pending) => pending,
            Err(e) => {
                debug!(language = %self.language, error = %e, "Dropping response");
                return None;
            }
        };
        match self.document(pending.document) {
            Some(document) => Some((pending, Arc::clone(document))),
            None => {
                debug!(language = %self.language, id, document = %pending.document, "Response for a closed document dropped");
                None
            }
        }
    }

    fn on_completion(&mut self, id: RequestId, items: Vec<CompletionItem>) {
        let Some((pending, document)) = self.resolve(RequestKind::Completion, id) else {
            return;
        };
        let cursor = pending.position;
        let before_cursor = document.get_text(cursor.line_start(), cursor);
        let set = build_completion_set(id, items, cursor, prefix_len(&before_cursor));
        document.receive_completions(set);
    }

    fn on_diagnostics(&self, uri: &Uri, diagnostics: &[Diagnostic]) {
        let document = self.documents.iter().find(|doc| {
            doc.path()
                .map(|path| uri_matches_path(uri, &path))
                .unwrap_or(false)
        });
        let Some(document) = document else {
            trace!(language = %self.language, uri = uri.as_str(), "Diagnostics for a file that is not open");
            return;
        };
        document.receive_diagnostics(build_diagnostic_set(diagnostics));
    }

    fn on_definition(&mut self, id: RequestId, result: Option<GotoDefinitionResponse>) {
        let Some((_, document)) = self.resolve(RequestKind::Definition, id) else {
            return;
        };
        match decode_locations(result.as_ref()) {
            Ok(locations) => document.receive_jump(build_jump_target(locations)),
            Err(e) => {
                warn!(language = %self.language, id, error = %e, "Definition result not delivered");
            }
        }
    }

    fn on_hover(&mut self, id: RequestId, contents: Option<Value>) {
        let Some((pending, document)) = self.resolve(RequestKind::Hover, id) else {
            return;
        };
        let content = match contents.as_ref().map(HoverContent::from_value).transpose() {
            Ok(content) => content.flatten(),
            Err(e) => {
                warn!(language = %self.language, id, error = %e, "Hover result not delivered");
                return;
            }
        };
        document.receive_hover(HoverInfo {
            position: pending.position,
            text: decode_hover_content(content.as_ref(), None),
        });
    }
}

fn document_uri(document: &dyn Document) -> Option<Uri> {
    let path = document.path()?;
    match path_to_uri(&path) {
        Ok(uri) => Some(uri),
        Err(e) => {
            warn!(document = %document.id(), error = %e, "Document has no usable URI");
            None
        }
    }
}
