//! LSP transport implementation (JSON-RPC over stdio).
//!
//! Reading and writing are split so the event reader and the outgoing writer
//! can run as independent tasks.

use crate::error::{LspError, LspResult};
use crate::pending::RequestId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, trace};

/// JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC response.
///
/// `id` is kept raw: servers answer parse errors with `null`, and requests
/// they send us may use string ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A request the server sends to us.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcServerRequest {
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// A message read from the server.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
    Request(JsonRpcServerRequest),
}

impl IncomingMessage {
    /// Classify a JSON-RPC frame by which of `id`/`method` it carries.
    pub fn parse(content: &str) -> LspResult<Self> {
        let value: Value = serde_json::from_str(content)?;
        let has_method = value.get("method").is_some();
        let has_id = value.get("id").is_some();
        match (has_method, has_id) {
            (true, true) => Ok(Self::Request(serde_json::from_value(value)?)),
            (true, false) => Ok(Self::Notification(serde_json::from_value(value)?)),
            (false, true) => Ok(Self::Response(serde_json::from_value(value)?)),
            (false, false) => Err(LspError::protocol_error(
                "message has neither `id` nor `method`",
            )),
        }
    }
}

/// A message the core wants sent to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    /// Reply to a server-initiated request.
    Reply { id: Value, result: Value },
}

impl Outgoing {
    pub fn request(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self::Request {
            id,
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self::Notification {
            method: method.into(),
            params,
        }
    }

    /// Method name, or `None` for replies.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request { method, .. } | Self::Notification { method, .. } => Some(method),
            Self::Reply { .. } => None,
        }
    }

    /// Serialize to a JSON-RPC body.
    pub fn to_json(&self) -> LspResult<String> {
        let body = match self {
            Self::Request { id, method, params } => serde_json::to_string(&JsonRpcRequest::new(
                *id,
                method.as_str(),
                Some(params.clone()),
            ))?,
            Self::Notification { method, params } => serde_json::to_string(
                &JsonRpcNotification::new(method.as_str(), Some(params.clone())),
            )?,
            // `result` must be present even when null, so build it by hand.
            Self::Reply { id, result } => serde_json::to_string(&serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": result,
            }))?,
        };
        Ok(body)
    }
}

/// Reads Content-Length framed messages.
pub struct MessageReader<R> {
    inner: R,
}

impl<R: AsyncBufRead + Unpin> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read one message body. `Ok(None)` means the server closed its output
    /// between messages.
    pub async fn read_message(&mut self) -> LspResult<Option<String>> {
        // Read headers
        let mut content_length: Option<usize> = None;
        let mut saw_header = false;
        loop {
            let mut line = String::new();
            let bytes = self.inner.read_line(&mut line).await?;
            if bytes == 0 {
                if saw_header {
                    return Err(LspError::connection_closed(
                        "server closed connection mid-message",
                    ));
                }
                return Ok(None);
            }

            let line = line.trim();
            if line.is_empty() {
                if saw_header {
                    break;
                }
                continue;
            }
            saw_header = true;

            if let Some((name, value)) = line.split_once(':') {
                if name.trim().eq_ignore_ascii_case("content-length") {
                    content_length = Some(
                        value
                            .trim()
                            .parse()
                            .map_err(|_| LspError::protocol_error("Invalid Content-Length"))?,
                    );
                }
            }
        }

        let content_length = content_length
            .ok_or_else(|| LspError::protocol_error("Missing Content-Length header"))?;

        // Read content
        let mut content = vec![0u8; content_length];
        self.inner.read_exact(&mut content).await?;

        let content = String::from_utf8(content)
            .map_err(|e| LspError::protocol_error(format!("Invalid UTF-8: {e}")))?;

        trace!(content = %content, "Received LSP message");

        Ok(Some(content))
    }
}

/// Writes Content-Length framed messages.
pub struct MessageWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn send(&mut self, message: &Outgoing) -> LspResult<()> {
        self.write_frame(&message.to_json()?).await
    }

    /// Write one already-serialized body.
    pub async fn write_frame(&mut self, content: &str) -> LspResult<()> {
        let message = format!("Content-Length: {}\r\n\r\n{}", content.len(), content);
        trace!(message = %content, "Sending LSP message");

        self.inner.write_all(message.as_bytes()).await?;
        self.inner.flush().await?;

        Ok(())
    }
}

/// A spawned language server and its stdio pipes.
pub struct ServerProcess {
    pub child: Child,
    pub reader: MessageReader<BufReader<ChildStdout>>,
    pub writer: MessageWriter<ChildStdin>,
}

impl ServerProcess {
    /// Spawn the server process. It is killed if the handle is dropped.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: Option<&Path>,
    ) -> LspResult<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .envs(env)
            .kill_on_drop(true);

        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        debug!(command = command, args = ?args, "Starting LSP server");

        let mut child = cmd
            .spawn()
            .map_err(|e| LspError::ProcessError(format!("Failed to start {command}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LspError::ProcessError("Failed to get stdin".to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LspError::ProcessError("Failed to get stdout".to_string()))?;

        Ok(Self {
            child,
            reader: MessageReader::new(BufReader::new(stdout)),
            writer: MessageWriter::new(stdin),
        })
    }
}
