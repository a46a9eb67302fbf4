//! A live connection to one language server process.
//!
//! The connection owns two tasks. The writer drains the dispatcher's outbox
//! onto the server's stdin. The reader parses frames from stdout and feeds
//! them to the dispatcher one at a time, so events are processed in arrival
//! order and never concurrently.

use crate::config::LspConfig;
use crate::decode::path_to_uri;
use crate::dispatcher::{ConnectionState, EventDispatcher};
use crate::document::{Document, DocumentId};
use crate::error::{LspError, LspResult};
use crate::event::ServerEvent;
use crate::pending::RequestId;
use crate::position::TextPosition;
use crate::transport::{IncomingMessage, MessageReader, MessageWriter, Outgoing, ServerProcess};
use lsp_types::{
    ClientCapabilities, ClientInfo, CompletionClientCapabilities, CompletionItemCapability,
    GotoCapability, HoverClientCapabilities, InitializeParams, MarkupKind,
    PublishDiagnosticsClientCapabilities, TextDocumentClientCapabilities, WorkspaceFolder,
};
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long a server gets to exit on its own after `exit`.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Parameters for the `initialize` request.
pub fn initialize_params(root: &Path) -> LspResult<InitializeParams> {
    let root_uri = path_to_uri(root)?;
    let workspace_folder = WorkspaceFolder {
        uri: root_uri.clone(),
        name: root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("workspace")
            .to_string(),
    };

    let text_document = TextDocumentClientCapabilities {
        completion: Some(CompletionClientCapabilities {
            completion_item: Some(CompletionItemCapability {
                snippet_support: Some(false),
                documentation_format: Some(vec![MarkupKind::PlainText, MarkupKind::Markdown]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        hover: Some(HoverClientCapabilities {
            content_format: Some(vec![MarkupKind::PlainText, MarkupKind::Markdown]),
            ..Default::default()
        }),
        definition: Some(GotoCapability {
            link_support: Some(false),
            ..Default::default()
        }),
        publish_diagnostics: Some(PublishDiagnosticsClientCapabilities::default()),
        ..Default::default()
    };

    #[allow(deprecated)]
    let params = InitializeParams {
        process_id: Some(std::process::id()),
        root_uri: Some(root_uri),
        workspace_folders: Some(vec![workspace_folder]),
        capabilities: ClientCapabilities {
            text_document: Some(text_document),
            ..Default::default()
        },
        client_info: Some(ClientInfo {
            name: "biscuit".to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }),
        ..Default::default()
    };
    Ok(params)
}

/// A language server connection.
pub struct Connection {
    language: String,
    dispatcher: Arc<Mutex<EventDispatcher>>,
    state_rx: watch::Receiver<ConnectionState>,
    child: Mutex<Option<Child>>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl Connection {
    /// Spawn the server described by `config` and begin initializing it.
    pub fn start(config: &LspConfig, root: &Path) -> LspResult<Self> {
        let params = initialize_params(root)?;
        let process = ServerProcess::spawn(&config.command, &config.args, &config.env, Some(root))?;
        info!(language = %config.language, command = %config.command, root = %root.display(), "Language server started");
        Self::with_io(
            &config.language,
            process.reader,
            process.writer,
            Some(process.child),
            &params,
        )
    }

    /// Run a connection over arbitrary pipes.
    pub fn with_io<R, W>(
        language: &str,
        reader: MessageReader<R>,
        writer: MessageWriter<W>,
        child: Option<Child>,
        params: &InitializeParams,
    ) -> LspResult<Self>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbox, inbox) = mpsc::unbounded_channel();
        let mut dispatcher = EventDispatcher::new(language, outbox);
        let state_rx = dispatcher.subscribe_state();
        dispatcher.begin_initialize(params)?;

        let dispatcher = Arc::new(Mutex::new(dispatcher));
        let writer_task = tokio::spawn(write_loop(
            language.to_string(),
            writer,
            inbox,
            Arc::downgrade(&dispatcher),
        ));
        let reader_task = tokio::spawn(read_loop(reader, Arc::downgrade(&dispatcher)));

        Ok(Self {
            language: language.to_string(),
            dispatcher,
            state_rx,
            child: Mutex::new(child),
            reader_task,
            writer_task,
        })
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Wait until the server has answered `initialize`.
    pub async fn wait_ready(&self, timeout: Duration) -> LspResult<()> {
        let state = self
            .wait_for(timeout, |state| state != ConnectionState::Initializing)
            .await;
        match state {
            ConnectionState::Ready => Ok(()),
            state => Err(LspError::NotReady(state)),
        }
    }

    async fn wait_for(
        &self,
        timeout: Duration,
        done: impl FnMut(ConnectionState) -> bool,
    ) -> ConnectionState {
        let mut done = done;
        let mut rx = self.state_rx.clone();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|state| done(*state))).await;
        match waited {
            Ok(Ok(state)) => *state,
            _ => self.state(),
        }
    }

    pub async fn open_document(&self, document: Arc<dyn Document>) -> LspResult<()> {
        self.dispatcher.lock().await.open_document(document)
    }

    /// Stop tracking a document. Returns how many pending requests were
    /// dropped.
    pub async fn close_document(&self, document: DocumentId) -> usize {
        self.dispatcher.lock().await.close_document(document)
    }

    pub async fn is_open(&self, document: DocumentId) -> bool {
        self.dispatcher.lock().await.is_open(document)
    }

    pub async fn request_completion(
        &self,
        document: DocumentId,
        cursor: TextPosition,
    ) -> LspResult<RequestId> {
        self.dispatcher
            .lock()
            .await
            .request_completion(document, cursor)
    }

    pub async fn request_definition(
        &self,
        document: DocumentId,
        position: TextPosition,
    ) -> LspResult<RequestId> {
        self.dispatcher
            .lock()
            .await
            .request_definition(document, position)
    }

    pub async fn request_hover(
        &self,
        document: DocumentId,
        position: TextPosition,
    ) -> LspResult<RequestId> {
        self.dispatcher
            .lock()
            .await
            .request_hover(document, position)
    }

    /// Number of requests still waiting for a response.
    pub async fn pending_count(&self) -> usize {
        self.dispatcher.lock().await.pending().len()
    }

    /// Shut the server down and wait for it to close. A server that does not
    /// answer within `timeout` is treated as lost and killed.
    pub async fn shutdown(&self, timeout: Duration) -> LspResult<()> {
        {
            let mut dispatcher = self.dispatcher.lock().await;
            match dispatcher.begin_shutdown() {
                Ok(_) => {}
                Err(LspError::NotReady(ConnectionState::Closed)) => return Ok(()),
                Err(e) => return Err(e),
            }
        }

        let state = self
            .wait_for(timeout, |state| state == ConnectionState::Closed)
            .await;
        if state != ConnectionState::Closed {
            warn!(language = %self.language, "Server did not answer shutdown");
            self.dispatcher.lock().await.process(ServerEvent::ConnectionLost {
                reason: "shutdown timed out".to_string(),
            });
        }

        let mut child = self.child.lock().await;
        if let Some(child) = child.as_mut() {
            if tokio::time::timeout(EXIT_GRACE, child.wait()).await.is_err() {
                debug!(language = %self.language, "Killing language server");
                child.start_kill()?;
            }
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

async fn read_loop<R>(mut reader: MessageReader<R>, dispatcher: Weak<Mutex<EventDispatcher>>)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let event = match reader.read_message().await {
            Ok(Some(body)) => match IncomingMessage::parse(&body) {
                Ok(message) => Ok(message),
                Err(e) => {
                    warn!(error = %e, "Skipping unparseable message");
                    continue;
                }
            },
            Ok(None) => Err("server closed its output".to_string()),
            Err(e) => Err(e.to_string()),
        };

        let Some(dispatcher) = dispatcher.upgrade() else {
            return;
        };
        let mut dispatcher = dispatcher.lock().await;
        match event {
            Ok(message) => dispatcher.handle_message(message),
            Err(reason) => {
                dispatcher.process(ServerEvent::ConnectionLost { reason });
                return;
            }
        }
        if dispatcher.state() == ConnectionState::Closed {
            return;
        }
    }
}

async fn write_loop<W>(
    language: String,
    mut writer: MessageWriter<W>,
    mut inbox: mpsc::UnboundedReceiver<Outgoing>,
    dispatcher: Weak<Mutex<EventDispatcher>>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = inbox.recv().await {
        if let Err(e) = writer.send(&message).await {
            warn!(language = %language, method = ?message.method(), error = %e, "Failed to write to server");
            if e.is_fatal_to_connection() {
                if let Some(dispatcher) = dispatcher.upgrade() {
                    dispatcher.lock().await.process(ServerEvent::ConnectionLost {
                        reason: e.to_string(),
                    });
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ChannelDocument, DocumentUpdate};
    use serde_json::{json, Value};
    use tokio::io::{BufReader, DuplexStream};

    struct FakeServer {
        reader: MessageReader<BufReader<DuplexStream>>,
        writer: MessageWriter<DuplexStream>,
    }

    impl FakeServer {
        async fn recv(&mut self) -> Value {
            let body = self.reader.read_message().await.unwrap().unwrap();
            serde_json::from_str(&body).unwrap()
        }

        async fn reply(&mut self, id: Value, result: Value) {
            self.writer
                .send(&Outgoing::Reply { id, result })
                .await
                .unwrap();
        }

        async fn notify(&mut self, method: &str, params: Value) {
            self.writer
                .send(&Outgoing::notification(method, params))
                .await
                .unwrap();
        }
    }

    fn connect() -> (Connection, FakeServer) {
        let (client_out, server_in) = tokio::io::duplex(64 * 1024);
        let (server_out, client_in) = tokio::io::duplex(64 * 1024);
        let root = std::env::temp_dir();
        let connection = Connection::with_io(
            "rust",
            MessageReader::new(BufReader::new(client_in)),
            MessageWriter::new(client_out),
            None,
            &initialize_params(&root).unwrap(),
        )
        .unwrap();
        let server = FakeServer {
            reader: MessageReader::new(BufReader::new(server_in)),
            writer: MessageWriter::new(server_out),
        };
        (connection, server)
    }

    async fn handshake(connection: &Connection, server: &mut FakeServer) {
        let init = server.recv().await;
        assert_eq!(init["method"], "initialize");
        assert_eq!(init["params"]["capabilities"]["textDocument"]["definition"]["linkSupport"], false);
        server
            .reply(
                init["id"].clone(),
                json!({"capabilities": {"hoverProvider": true, "completionProvider": {}}}),
            )
            .await;
        connection.wait_ready(Duration::from_secs(5)).await.unwrap();
        assert_eq!(server.recv().await["method"], "initialized");
    }

    #[tokio::test]
    async fn test_hover_round_trip() {
        let (connection, mut server) = connect();
        handshake(&connection, &mut server).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let path = std::env::temp_dir().join("hover_round_trip.rs");
        let doc = Arc::new(ChannelDocument::new(Some(path), "let x = 1;", tx));
        connection.open_document(doc.clone()).await.unwrap();

        let did_open = server.recv().await;
        assert_eq!(did_open["method"], "textDocument/didOpen");
        assert_eq!(did_open["params"]["textDocument"]["languageId"], "rust");
        assert_eq!(did_open["params"]["textDocument"]["text"], "let x = 1;");

        let id = connection
            .request_hover(doc.id(), TextPosition { line: 1, column: 4 })
            .await
            .unwrap();
        let request = server.recv().await;
        assert_eq!(request["id"], id);
        assert_eq!(request["params"]["position"], json!({"line": 0, "character": 4}));

        server
            .reply(request["id"].clone(), json!({"contents": "x: i32"}))
            .await;
        let (_, update) = rx.recv().await.unwrap();
        match update {
            DocumentUpdate::Hover(hover) => {
                assert_eq!(hover.text, "x: i32");
                assert_eq!(hover.position, TextPosition { line: 1, column: 4 });
            }
            other => panic!("unexpected update: {other:?}"),
        }
        assert_eq!(connection.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_unsupported_request_not_sent() {
        let (connection, mut server) = connect();
        handshake(&connection, &mut server).await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let doc = Arc::new(ChannelDocument::new(
            Some(std::env::temp_dir().join("unsupported.rs")),
            "",
            tx,
        ));
        connection.open_document(doc.clone()).await.unwrap();
        let result = connection
            .request_definition(doc.id(), TextPosition { line: 1, column: 0 })
            .await;
        assert!(matches!(result, Err(LspError::Unsupported(_))));
        assert_eq!(connection.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_server_request_answered_with_null() {
        let (connection, mut server) = connect();
        handshake(&connection, &mut server).await;

        server
            .writer
            .send(&Outgoing::request(99, "workspace/configuration", json!({"items": []})))
            .await
            .unwrap();
        let reply = server.recv().await;
        assert_eq!(reply["id"], 99);
        assert!(reply["result"].is_null());
        assert_eq!(connection.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_connection_lost_notifies_documents() {
        let (connection, mut server) = connect();
        handshake(&connection, &mut server).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let doc = Arc::new(ChannelDocument::new(
            Some(std::env::temp_dir().join("lost.rs")),
            "fn",
            tx,
        ));
        connection.open_document(doc.clone()).await.unwrap();
        let _ = server.recv().await;
        connection
            .request_completion(doc.id(), TextPosition { line: 1, column: 2 })
            .await
            .unwrap();

        server.notify("window/logMessage", json!({"type": 3, "message": "bye"})).await;
        drop(server);

        let (_, update) = rx.recv().await.unwrap();
        assert_eq!(
            update,
            DocumentUpdate::Unavailable {
                language: "rust".to_string()
            }
        );
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert_eq!(connection.pending_count().await, 0);
        assert!(matches!(
            connection
                .request_hover(doc.id(), TextPosition { line: 1, column: 0 })
                .await,
            Err(LspError::NotReady(ConnectionState::Closed))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_sends_exit() {
        let (connection, mut server) = connect();
        handshake(&connection, &mut server).await;

        let server_task = tokio::spawn(async move {
            let shutdown = server.recv().await;
            assert_eq!(shutdown["method"], "shutdown");
            server.reply(shutdown["id"].clone(), Value::Null).await;
            let exit = server.recv().await;
            assert_eq!(exit["method"], "exit");
        });

        connection.shutdown(Duration::from_secs(5)).await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Closed);
        server_task.await.unwrap();

        // A second shutdown is a no-op.
        connection.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_ready_times_out() {
        let (connection, _server) = connect();
        assert!(matches!(
            connection.wait_ready(Duration::from_millis(50)).await,
            Err(LspError::NotReady(ConnectionState::Initializing))
        ));
    }

    #[test]
    fn test_initialize_params() {
        let root = std::env::temp_dir();
        let params = initialize_params(&root).unwrap();
        assert_eq!(params.process_id, Some(std::process::id()));
        let folders = params.workspace_folders.unwrap();
        assert_eq!(folders.len(), 1);
        assert!(folders[0].uri.as_str().starts_with("file://"));
    }
}
