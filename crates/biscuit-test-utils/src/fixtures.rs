//! Test fixtures: temporary workspaces and an in-memory language server.

use biscuit_lsp::{
    initialize_params, Connection, MessageReader, MessageWriter, Outgoing, RequestId,
};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::io::{BufReader, DuplexStream};

/// A temporary project directory, removed on drop.
///
/// # Example
///
/// ```rust
/// use biscuit_test_utils::TestProject;
///
/// let project = TestProject::new()
///     .with_file("Cargo.toml", "[package]\nname = \"demo\"")
///     .with_file("src/main.rs", "fn main() {}");
///
/// assert!(project.path().join("src/main.rs").exists());
/// ```
pub struct TestProject {
    temp_dir: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Write a file, creating parent directories.
    pub fn with_file(self, path: impl AsRef<Path>, contents: &str) -> Self {
        let full_path = self.temp_dir.path().join(path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).unwrap_or_else(|e| {
                panic!("Failed to create {}: {}", parent.display(), e)
            });
        }
        fs::write(&full_path, contents)
            .unwrap_or_else(|e| panic!("Failed to write {}: {}", full_path.display(), e));
        self
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Absolute path of a project file.
    pub fn file(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.temp_dir.path().join(relative)
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// The server end of an in-memory connection. Tests drive it by hand.
pub struct FakeServer {
    reader: MessageReader<BufReader<DuplexStream>>,
    writer: MessageWriter<DuplexStream>,
}

impl FakeServer {
    /// Start a [`Connection`] for `language` whose server is this fake.
    pub fn connect(language: &str, root: &Path) -> (Connection, FakeServer) {
        let (client_out, server_in) = tokio::io::duplex(64 * 1024);
        let (server_out, client_in) = tokio::io::duplex(64 * 1024);
        let connection = Connection::with_io(
            language,
            MessageReader::new(BufReader::new(client_in)),
            MessageWriter::new(client_out),
            None,
            &initialize_params(root).expect("initialize params"),
        )
        .expect("connection");
        let server = FakeServer {
            reader: MessageReader::new(BufReader::new(server_in)),
            writer: MessageWriter::new(server_out),
        };
        (connection, server)
    }

    /// Next message from the client.
    pub async fn recv(&mut self) -> Value {
        let body = self
            .reader
            .read_message()
            .await
            .expect("read from client")
            .expect("client closed the connection");
        serde_json::from_str(&body).expect("client sent invalid JSON")
    }

    /// Next message, asserting its method.
    pub async fn expect(&mut self, method: &str) -> Value {
        let message = self.recv().await;
        assert_eq!(message["method"], method, "unexpected message: {message}");
        message
    }

    pub async fn reply(&mut self, request: &Value, result: Value) {
        self.send(&Outgoing::Reply {
            id: request["id"].clone(),
            result,
        })
        .await;
    }

    pub async fn reply_error(&mut self, request: &Value, code: i64, message: &str) {
        self.send_raw(json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": {"code": code, "message": message}
        }))
        .await;
    }

    pub async fn notify(&mut self, method: &str, params: Value) {
        self.send(&Outgoing::notification(method, params)).await;
    }

    /// Send a server-to-client request.
    pub async fn request(&mut self, id: RequestId, method: &str, params: Value) {
        self.send(&Outgoing::request(id, method, params)).await;
    }

    async fn send(&mut self, message: &Outgoing) {
        self.writer.send(message).await.expect("write to client");
    }

    async fn send_raw(&mut self, frame: Value) {
        self.writer
            .write_frame(&frame.to_string())
            .await
            .expect("write to client");
    }

    /// Answer `initialize` with `result` and consume `initialized`.
    pub async fn handshake(&mut self, result: Value) {
        let init = self.expect("initialize").await;
        self.reply(&init, result).await;
        self.expect("initialized").await;
    }
}
