//! LSP error types.

use crate::dispatcher::ConnectionState;
use crate::document::DocumentId;
use crate::pending::{RequestId, RequestKind};
use thiserror::Error;

/// Result type for LSP operations.
pub type LspResult<T> = Result<T, LspError>;

/// Errors that can occur during LSP operations.
#[derive(Debug, Error)]
pub enum LspError {
    /// An editor position that cannot be mapped onto the protocol.
    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    /// A hover or documentation payload of a shape we don't understand.
    #[error("Unsupported content shape: {0}")]
    UnsupportedContentShape(String),

    /// A definition result we refuse to decode (location links).
    #[error("Unsupported location variant: {0}")]
    UnsupportedLocationVariant(String),

    /// A URI that is not a usable `file:` URI.
    #[error("Malformed URI: {0}")]
    MalformedUri(String),

    /// A request id registered twice for the same kind.
    #[error("Duplicate {kind} request id: {id}")]
    DuplicateRequestId { kind: RequestKind, id: RequestId },

    /// A response for a request that is no longer pending.
    #[error("Unknown {kind} request id: {id}")]
    UnknownRequestId { kind: RequestKind, id: RequestId },

    /// The connection is not in a state that accepts the operation.
    #[error("Connection not ready (state: {0})")]
    NotReady(ConnectionState),

    /// The document is not tracked by the connection.
    #[error("Document not open: {0}")]
    DocumentNotOpen(DocumentId),

    /// Server not configured.
    #[error("No server configured for file: {0}")]
    NoServerForFile(String),

    /// The server did not advertise the capability.
    #[error("Server does not support {0}")]
    Unsupported(&'static str),

    /// Server process failed.
    #[error("Server process error: {0}")]
    ProcessError(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The connection to the server is gone.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LspError {
    /// Create a protocol error.
    pub fn protocol_error(message: impl Into<String>) -> Self {
        Self::ProtocolError(message.into())
    }

    /// Create a connection closed error.
    pub fn connection_closed(message: impl Into<String>) -> Self {
        Self::ConnectionClosed(message.into())
    }

    /// Whether the error takes the whole connection down rather than a
    /// single request.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ConnectionClosed(_) | Self::ProcessError(_)
        )
    }
}
