//! Mock implementations for testing.

use biscuit_lsp::{
    slice_text, CompletionSet, DiagnosticSet, Document, DocumentId, DocumentUpdate, HoverInfo,
    JumpTarget, TextPosition,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// A document that records every result delivered to it.
///
/// # Example
///
/// ```rust
/// use biscuit_lsp::Document;
/// use biscuit_test_utils::RecordingDocument;
///
/// let doc = RecordingDocument::new("/work/lib.rs", "pub fn f() {}");
/// doc.lsp_unavailable("rust");
/// assert_eq!(doc.unavailable(), vec!["rust".to_string()]);
/// ```
#[derive(Clone)]
pub struct RecordingDocument {
    id: DocumentId,
    path: Option<PathBuf>,
    text: Arc<Mutex<String>>,
    updates: Arc<Mutex<Vec<DocumentUpdate>>>,
}

impl RecordingDocument {
    /// Create a document backed by `path`. The file need not exist.
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            id: DocumentId::next(),
            path: Some(path.into()),
            text: Arc::new(Mutex::new(text.into())),
            updates: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create an unsaved buffer.
    pub fn unsaved(text: impl Into<String>) -> Self {
        Self {
            path: None,
            ..Self::new(PathBuf::new(), text)
        }
    }

    /// A shared handle to hand to the LSP core. Updates delivered through it
    /// are visible on `self`.
    pub fn handle(&self) -> Arc<dyn Document> {
        Arc::new(self.clone())
    }

    pub fn set_text(&self, text: impl Into<String>) {
        *self.text.lock().unwrap() = text.into();
    }

    /// Everything delivered so far, in order.
    pub fn updates(&self) -> Vec<DocumentUpdate> {
        self.updates.lock().unwrap().clone()
    }

    /// Take and clear the recorded updates.
    pub fn take_updates(&self) -> Vec<DocumentUpdate> {
        std::mem::take(&mut *self.updates.lock().unwrap())
    }

    pub fn completions(&self) -> Vec<CompletionSet> {
        self.collect(|update| match update {
            DocumentUpdate::Completions(set) => Some(set.clone()),
            _ => None,
        })
    }

    pub fn diagnostics(&self) -> Vec<DiagnosticSet> {
        self.collect(|update| match update {
            DocumentUpdate::Diagnostics(set) => Some(set.clone()),
            _ => None,
        })
    }

    pub fn jumps(&self) -> Vec<JumpTarget> {
        self.collect(|update| match update {
            DocumentUpdate::Jump(jump) => Some(jump.clone()),
            _ => None,
        })
    }

    pub fn hovers(&self) -> Vec<HoverInfo> {
        self.collect(|update| match update {
            DocumentUpdate::Hover(hover) => Some(hover.clone()),
            _ => None,
        })
    }

    /// Languages reported unavailable.
    pub fn unavailable(&self) -> Vec<String> {
        self.collect(|update| match update {
            DocumentUpdate::Unavailable { language } => Some(language.clone()),
            _ => None,
        })
    }

    fn collect<T>(&self, pick: impl Fn(&DocumentUpdate) -> Option<T>) -> Vec<T> {
        self.updates.lock().unwrap().iter().filter_map(pick).collect()
    }

    fn record(&self, update: DocumentUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

impl Document for RecordingDocument {
    fn id(&self) -> DocumentId {
        self.id
    }

    fn path(&self) -> Option<PathBuf> {
        self.path.clone()
    }

    fn text(&self) -> String {
        self.text.lock().unwrap().clone()
    }

    fn get_text(&self, start: TextPosition, end: TextPosition) -> String {
        slice_text(&self.text.lock().unwrap(), start, end)
    }

    fn receive_completions(&self, completions: CompletionSet) {
        self.record(DocumentUpdate::Completions(completions));
    }

    fn receive_diagnostics(&self, diagnostics: DiagnosticSet) {
        self.record(DocumentUpdate::Diagnostics(diagnostics));
    }

    fn receive_jump(&self, jump: JumpTarget) {
        self.record(DocumentUpdate::Jump(jump));
    }

    fn receive_hover(&self, hover: HoverInfo) {
        self.record(DocumentUpdate::Hover(hover));
    }

    fn lsp_unavailable(&self, language: &str) {
        self.record(DocumentUpdate::Unavailable {
            language: language.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_shares_updates() {
        let doc = RecordingDocument::new("/work/a.rs", "let a = 1;");
        let handle = doc.handle();
        assert_eq!(handle.id(), doc.id());

        handle.receive_hover(HoverInfo {
            position: TextPosition { line: 1, column: 4 },
            text: "i32".to_string(),
        });
        assert_eq!(doc.hovers().len(), 1);
        assert_eq!(doc.take_updates().len(), 1);
        assert!(doc.updates().is_empty());
    }

    #[test]
    fn test_text_access() {
        let doc = RecordingDocument::new("/work/a.rs", "one\ntwo");
        assert_eq!(
            doc.get_text(
                TextPosition { line: 2, column: 0 },
                TextPosition { line: 2, column: 2 }
            ),
            "tw"
        );
        doc.set_text("three");
        assert_eq!(doc.text(), "three");
        assert!(RecordingDocument::unsaved("x").path().is_none());
    }
}
