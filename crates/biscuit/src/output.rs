//! Plain-text rendering of decoded results.

use biscuit_lsp::{CompletionSet, DiagnosticSet, HoverInfo, JumpTarget};
use std::fmt::Write;

/// Completion entries, one per line: label, then the inserted text when it
/// differs.
pub fn completions(set: &CompletionSet, limit: usize) -> String {
    if set.items.is_empty() {
        return "No completions".to_string();
    }
    let mut out = String::new();
    for item in set.items.iter().take(limit) {
        if item.replace_text == item.display_text {
            let _ = writeln!(out, "{}", item.display_text);
        } else {
            let _ = writeln!(out, "{}  ->  {}", item.display_text, item.replace_text);
        }
    }
    if set.items.len() > limit {
        let _ = writeln!(out, "... {} more", set.items.len() - limit);
    }
    out
}

pub fn hover(info: &HoverInfo) -> String {
    if info.text.trim().is_empty() {
        format!("No hover information at {}", info.position)
    } else {
        info.text.clone()
    }
}

/// Locations as `path:line.column`.
pub fn jump(target: &JumpTarget) -> String {
    if target.locations.is_empty() {
        return "No definition found".to_string();
    }
    target
        .locations
        .iter()
        .map(|location| format!("{}:{}", location.path.display(), location.start))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn diagnostics(set: &DiagnosticSet) -> String {
    if set.markers.is_empty() {
        return "No diagnostics".to_string();
    }
    set.markers
        .iter()
        .map(|marker| marker.pretty())
        .collect::<Vec<_>>()
        .join("\n")
}
