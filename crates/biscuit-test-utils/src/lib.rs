//! Testing utilities, fixtures, and mocks for biscuit.
//!
//! - **Mocks**: a [`RecordingDocument`] that remembers everything delivered to it
//! - **Builders**: completion items, diagnostics and JSON-RPC frames
//! - **Fixtures**: temporary workspaces and a scripted in-memory language server
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use biscuit_test_utils::{builders, RecordingDocument};
//!
//! let doc = RecordingDocument::new("/work/main.rs", "fn main() {}");
//! dispatcher.open_document(doc.handle())?;
//! dispatcher.handle_message(builders::response(1, serde_json::json!({"capabilities": {}})));
//! assert!(doc.updates().is_empty());
//! ```

pub mod builders;
pub mod fixtures;
pub mod mocks;

// Re-export commonly used items
pub use builders::{CompletionItemBuilder, DiagnosticBuilder};
pub use fixtures::{FakeServer, TestProject};
pub use mocks::RecordingDocument;
