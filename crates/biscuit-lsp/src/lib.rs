//! Language Server Protocol (LSP) client core for the biscuit editor.
//!
//! The core sits between open documents and language server processes:
//! - Converts editor positions (1-based lines) to protocol positions
//! - Correlates responses with the document and position that asked
//! - Decodes completions, hover text, definitions and diagnostics into
//!   editor-ready values and pushes them into the document's sinks
//! - Drives the connection lifecycle, replaying open documents once the
//!   server is ready
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐ request_* ┌────────────┐ Outgoing ┌────────┐  stdin  ┌──────────────┐
//! │ Document │──────────▶│ Dispatcher │─────────▶│ writer │────────▶│ Lang Server  │
//! │  sinks   │◀──────────│            │◀─────────│ reader │◀────────│ (rust-analyzer)
//! └──────────┘  receive_*└────────────┘  events  └────────┘  stdout └──────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use biscuit_lsp::{ChannelDocument, Document, LspManager, TextPosition};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> biscuit_lsp::LspResult<()> {
//! let manager = LspManager::with_defaults(PathBuf::from("."));
//! let (tx, mut updates) = tokio::sync::mpsc::unbounded_channel();
//! let doc = Arc::new(ChannelDocument::new(
//!     Some(PathBuf::from("src/main.rs")),
//!     std::fs::read_to_string("src/main.rs")?,
//!     tx,
//! ));
//!
//! manager.open_document(doc.clone()).await?;
//! manager.wait_ready(doc.id(), Duration::from_secs(30)).await?;
//! manager.request_hover(doc.id(), "3.8".parse::<TextPosition>()?).await?;
//!
//! if let Some((_, update)) = updates.recv().await {
//!     println!("{update:?}");
//! }
//! manager.shutdown_all(Duration::from_secs(5)).await;
//! # Ok(())
//! # }
//! ```

mod config;
mod connection;
mod decode;
mod dispatcher;
mod document;
mod error;
mod event;
mod manager;
mod model;
mod pending;
mod position;
mod transport;

pub use config::{default_configs, language_id_for_path, load_configs, LspConfig};
pub use connection::{initialize_params, Connection};
pub use decode::{
    build_completion_set, build_diagnostic_set, build_jump_target, decode_documentation,
    decode_hover_content, decode_locations, decode_path_uri, path_to_uri, prefix_len,
    uri_matches_path, HoverContent,
};
pub use dispatcher::{ConnectionState, EventDispatcher};
pub use document::{slice_text, ChannelDocument, Document, DocumentId, DocumentUpdate};
pub use error::{LspError, LspResult};
pub use event::{EventDecoder, ResponseKind, ServerEvent};
pub use manager::{LspManager, LspServerStatus, LspStatus};
pub use model::{
    CompletionEntry, CompletionSet, DiagnosticMarker, DiagnosticSet, HoverInfo, JumpLocation,
    JumpTarget, Severity,
};
pub use pending::{PendingRequest, PendingRequests, RequestId, RequestKind};
pub use position::{range_to_text, to_protocol, to_text, TextPosition, TextRange};
pub use transport::{
    IncomingMessage, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    JsonRpcServerRequest, MessageReader, MessageWriter, Outgoing, ServerProcess,
};

/// Re-export lsp-types for convenience.
pub use lsp_types;
