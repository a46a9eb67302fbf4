//! The open-document collaborator.
//!
//! The core never owns documents. It holds them behind [`Document`], reads
//! their text when it needs to, and pushes decoded results into their sinks.
//! Sinks run on whatever task processes server events; a document backed by
//! a UI must hand results over to the UI thread itself. [`ChannelDocument`]
//! does that by posting [`DocumentUpdate`]s onto a channel.

use crate::model::{CompletionSet, DiagnosticSet, HoverInfo, JumpTarget};
use crate::position::TextPosition;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::mpsc;

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an open document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(u64);

impl DocumentId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Allocate a process-unique id.
    pub fn next() -> Self {
        Self(NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc#{}", self.0)
    }
}

/// An open document as seen by the LSP core.
pub trait Document: Send + Sync {
    fn id(&self) -> DocumentId;

    /// File path, or `None` for an unsaved buffer.
    fn path(&self) -> Option<PathBuf>;

    /// Full text, sent when the document is announced to the server.
    fn text(&self) -> String;

    /// Text between two positions.
    fn get_text(&self, start: TextPosition, end: TextPosition) -> String;

    fn receive_completions(&self, completions: CompletionSet);

    fn receive_diagnostics(&self, diagnostics: DiagnosticSet);

    fn receive_jump(&self, jump: JumpTarget);

    fn receive_hover(&self, hover: HoverInfo);

    /// The language server for this document is gone.
    fn lsp_unavailable(&self, _language: &str) {}
}

/// A result posted to the thread that owns a document's view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentUpdate {
    Completions(CompletionSet),
    Diagnostics(DiagnosticSet),
    Jump(JumpTarget),
    Hover(HoverInfo),
    Unavailable { language: String },
}

/// A text buffer whose sinks forward results over a channel.
pub struct ChannelDocument {
    id: DocumentId,
    path: Option<PathBuf>,
    text: RwLock<String>,
    updates: mpsc::UnboundedSender<(DocumentId, DocumentUpdate)>,
}

impl ChannelDocument {
    pub fn new(
        path: Option<PathBuf>,
        text: impl Into<String>,
        updates: mpsc::UnboundedSender<(DocumentId, DocumentUpdate)>,
    ) -> Self {
        Self {
            id: DocumentId::next(),
            path,
            text: RwLock::new(text.into()),
            updates,
        }
    }

    /// Replace the buffer contents.
    pub fn set_text(&self, text: impl Into<String>) {
        if let Ok(mut guard) = self.text.write() {
            *guard = text.into();
        }
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn post(&self, update: DocumentUpdate) {
        if self.updates.send((self.id, update)).is_err() {
            tracing::debug!(document = %self.id, "update receiver dropped");
        }
    }
}

impl Document for ChannelDocument {
    fn id(&self) -> DocumentId {
        self.id
    }

    fn path(&self) -> Option<PathBuf> {
        self.path.clone()
    }

    fn text(&self) -> String {
        self.text.read().map(|t| t.clone()).unwrap_or_default()
    }

    fn get_text(&self, start: TextPosition, end: TextPosition) -> String {
        self.text
            .read()
            .map(|t| slice_text(&t, start, end))
            .unwrap_or_default()
    }

    fn receive_completions(&self, completions: CompletionSet) {
        self.post(DocumentUpdate::Completions(completions));
    }

    fn receive_diagnostics(&self, diagnostics: DiagnosticSet) {
        self.post(DocumentUpdate::Diagnostics(diagnostics));
    }

    fn receive_jump(&self, jump: JumpTarget) {
        self.post(DocumentUpdate::Jump(jump));
    }

    fn receive_hover(&self, hover: HoverInfo) {
        self.post(DocumentUpdate::Hover(hover));
    }

    fn lsp_unavailable(&self, language: &str) {
        self.post(DocumentUpdate::Unavailable {
            language: language.to_string(),
        });
    }
}

/// Byte offset of `position` in `text`, clamped to the line and text ends.
fn byte_offset(text: &str, position: TextPosition) -> usize {
    let mut offset = 0;
    for (index, line) in text.split_inclusive('\n').enumerate() {
        if index + 1 == position.line as usize {
            let content = line.strip_suffix('\n').unwrap_or(line);
            let content = content.strip_suffix('\r').unwrap_or(content);
            let column = content
                .char_indices()
                .nth(position.column as usize)
                .map(|(i, _)| i)
                .unwrap_or(content.len());
            return offset + column;
        }
        offset += line.len();
    }
    text.len()
}

/// Text between two editor positions.
pub fn slice_text(text: &str, start: TextPosition, end: TextPosition) -> String {
    let from = byte_offset(text, start);
    let to = byte_offset(text, end).max(from);
    text[from..to].to_string()
}
