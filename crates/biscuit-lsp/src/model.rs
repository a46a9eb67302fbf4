//! Normalized results handed to documents.
//!
//! These are the decoded, editor-coordinate forms of server responses. They
//! carry no protocol types so the document layer never has to know about
//! `lsp-types`.

use crate::pending::RequestId;
use crate::position::TextPosition;
use std::path::PathBuf;

/// One completion candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEntry {
    /// Text shown in the completion popup.
    pub display_text: String,
    /// Start of the text the entry replaces.
    pub replace_start: TextPosition,
    /// End of the text the entry replaces (the query cursor).
    pub replace_end: TextPosition,
    /// Text inserted when the entry is accepted.
    pub replace_text: String,
    /// Text matched against further typing, with the typed prefix removed.
    pub filter_text: String,
    /// Label plus documentation, if any.
    pub documentation: String,
}

/// Completion candidates for one request, sorted by the server's sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionSet {
    pub request_id: RequestId,
    pub items: Vec<CompletionEntry>,
}

/// Diagnostic severity, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Error,
    Warning,
    Information,
    Hint,
}

impl Severity {
    /// Map the protocol severity. Servers may omit it; we treat that as a
    /// warning.
    pub fn from_lsp(severity: Option<lsp_types::DiagnosticSeverity>) -> Self {
        match severity {
            Some(lsp_types::DiagnosticSeverity::ERROR) => Self::Error,
            Some(lsp_types::DiagnosticSeverity::INFORMATION) => Self::Information,
            Some(lsp_types::DiagnosticSeverity::HINT) => Self::Hint,
            _ => Self::Warning,
        }
    }

    /// Underline colour used by the editor.
    pub fn color(self) -> &'static str {
        match self {
            Self::Error => "red",
            _ => "orange",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warning => "WARN",
            Self::Information => "INFO",
            Self::Hint => "HINT",
        }
    }
}

/// One underlined range in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticMarker {
    pub start: TextPosition,
    pub end: TextPosition,
    pub severity: Severity,
    pub tooltip: String,
    pub color: &'static str,
}

impl DiagnosticMarker {
    /// One-line rendering, e.g. `ERROR [3.4] rustc: mismatched types`.
    pub fn pretty(&self) -> String {
        format!("{} [{}] {}", self.severity.label(), self.start, self.tooltip)
    }
}

/// All diagnostics for a document, errors first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticSet {
    pub markers: Vec<DiagnosticMarker>,
}

/// A single go-to-definition destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpLocation {
    pub path: PathBuf,
    pub start: TextPosition,
    pub end: TextPosition,
}

/// Go-to-definition results. Empty means nothing was found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JumpTarget {
    pub locations: Vec<JumpLocation>,
}

/// Decoded hover text for the position it was requested at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoverInfo {
    pub position: TextPosition,
    pub text: String,
}
