//! Normalization of server payloads.
//!
//! Servers answer the same request with several payload shapes (a single
//! location or a list, a plain string or a markup object). Each shape is
//! modelled as an enum variant and decoded explicitly here.

use crate::error::{LspError, LspResult};
use crate::model::{
    CompletionEntry, CompletionSet, DiagnosticMarker, DiagnosticSet, JumpLocation, JumpTarget,
    Severity,
};
use crate::pending::RequestId;
use crate::position::{to_text, TextPosition};
use lsp_types::{
    CompletionItem, Diagnostic, Documentation, GotoDefinitionResponse, HoverContents, Location,
    MarkedString, Uri,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use url::Url;

/// Separator placed between hover fragments.
const FRAGMENT_SEPARATOR: &str = "\n\n";

/// Hover content as sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoverContent {
    /// A bare string.
    Text(String),
    /// A `MarkedString`/`MarkupContent` style object carrying a `value`.
    Fragment {
        language: Option<String>,
        value: String,
    },
    /// A list of fragments, possibly nested.
    List(Vec<HoverContent>),
}

impl HoverContent {
    /// Classify a raw `contents` value. `null` means the server had nothing.
    pub fn from_value(value: &Value) -> LspResult<Option<Self>> {
        if value.is_null() {
            return Ok(None);
        }
        Self::parse(value).map(Some)
    }

    fn parse(value: &Value) -> LspResult<Self> {
        match value {
            Value::String(text) => Ok(Self::Text(text.clone())),
            Value::Object(map) => match map.get("value") {
                Some(Value::String(text)) => Ok(Self::Fragment {
                    language: map
                        .get("language")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    value: text.clone(),
                }),
                _ => Err(LspError::UnsupportedContentShape(
                    "object without a string `value` field".to_string(),
                )),
            },
            Value::Array(items) => items
                .iter()
                .map(Self::parse)
                .collect::<LspResult<Vec<_>>>()
                .map(Self::List),
            other => Err(LspError::UnsupportedContentShape(format!(
                "{} in hover contents",
                shape_name(other)
            ))),
        }
    }

    /// Flatten to plain text, joining list items with a blank line.
    pub fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Fragment { value, .. } => value.clone(),
            Self::List(items) => items
                .iter()
                .map(Self::render)
                .collect::<Vec<_>>()
                .join(FRAGMENT_SEPARATOR),
        }
    }
}

impl From<MarkedString> for HoverContent {
    fn from(marked: MarkedString) -> Self {
        match marked {
            MarkedString::String(text) => Self::Text(text),
            MarkedString::LanguageString(ls) => Self::Fragment {
                language: Some(ls.language),
                value: ls.value,
            },
        }
    }
}

impl From<HoverContents> for HoverContent {
    fn from(contents: HoverContents) -> Self {
        match contents {
            HoverContents::Scalar(marked) => marked.into(),
            HoverContents::Array(items) => Self::List(items.into_iter().map(Into::into).collect()),
            HoverContents::Markup(markup) => Self::Fragment {
                language: None,
                value: markup.value,
            },
        }
    }
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Decode hover content to plain text, using `fallback` when the server sent
/// nothing useful.
pub fn decode_hover_content(payload: Option<&HoverContent>, fallback: Option<&str>) -> String {
    let text = payload.map(HoverContent::render).unwrap_or_default();
    if text.is_empty() {
        fallback.unwrap_or_default().to_string()
    } else {
        text
    }
}

/// Label plus optional documentation, newline-joined.
pub fn decode_documentation(item: &CompletionItem) -> String {
    let doc = match &item.documentation {
        Some(Documentation::String(text)) => text.as_str(),
        Some(Documentation::MarkupContent(markup)) => markup.value.as_str(),
        None => "",
    };
    if doc.is_empty() {
        item.label.clone()
    } else {
        format!("{}\n{}", item.label, doc)
    }
}

/// Normalize a definition result into `(path, range)` pairs.
///
/// Location links are refused rather than approximated.
pub fn decode_locations(
    payload: Option<&GotoDefinitionResponse>,
) -> LspResult<Vec<(PathBuf, lsp_types::Range)>> {
    let locations: &[Location] = match payload {
        None => return Ok(Vec::new()),
        Some(GotoDefinitionResponse::Scalar(location)) => std::slice::from_ref(location),
        Some(GotoDefinitionResponse::Array(locations)) => locations,
        Some(GotoDefinitionResponse::Link(links)) if links.is_empty() => return Ok(Vec::new()),
        Some(GotoDefinitionResponse::Link(links)) => {
            return Err(LspError::UnsupportedLocationVariant(format!(
                "{} location link(s)",
                links.len()
            )))
        }
    };

    locations
        .iter()
        .map(|location| Ok((decode_path_uri(location.uri.as_str())?, location.range)))
        .collect()
}

/// Turn decoded locations into a jump target in editor coordinates.
pub fn build_jump_target(locations: Vec<(PathBuf, lsp_types::Range)>) -> JumpTarget {
    JumpTarget {
        locations: locations
            .into_iter()
            .map(|(path, range)| JumpLocation {
                path,
                start: to_text(range.start),
                end: to_text(range.end),
            })
            .collect(),
    }
}

/// Parse a `file:` URI into a native path.
///
/// Drive-letter URIs (`file:///C:/x`) and UNC hosts (`file://server/share`)
/// resolve to native paths on Windows; elsewhere a non-local host is refused.
pub fn decode_path_uri(file_uri: &str) -> LspResult<PathBuf> {
    let url = Url::parse(file_uri).map_err(|e| LspError::MalformedUri(format!("{file_uri}: {e}")))?;
    if url.scheme() != "file" {
        return Err(LspError::MalformedUri(format!(
            "{file_uri}: scheme `{}` is not `file`",
            url.scheme()
        )));
    }
    url.to_file_path()
        .map_err(|_| LspError::MalformedUri(format!("{file_uri}: not a local file path")))
}

fn absolute(path: &Path) -> LspResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

fn file_url(path: &Path) -> LspResult<Url> {
    let abs_path = absolute(path)?;
    Url::from_file_path(&abs_path)
        .map_err(|_| LspError::MalformedUri(format!("cannot express {} as a URI", abs_path.display())))
}

/// Convert a file path to a protocol URI.
pub fn path_to_uri(path: &Path) -> LspResult<Uri> {
    let url = file_url(path)?;
    let mut uri = format!("file://{}", url.host_str().unwrap_or_default());
    // `url` leaves `[`, `]`, `|` and `^` raw in paths; RFC 3986 does not.
    for byte in url.path().bytes() {
        if is_uri_path_byte(byte) {
            uri.push(char::from(byte));
        } else {
            uri.push_str(&format!("%{byte:02X}"));
        }
    }
    uri.parse()
        .map_err(|e| LspError::MalformedUri(format!("{uri}: {e}")))
}

fn is_uri_path_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || b"/%-._~!$&'()*+,;=:@".contains(&byte)
}

/// Whether `uri` names the file at `path`.
///
/// Compared as decoded paths: servers differ in which characters they
/// percent-encode (`[`, `(`, `+` and so on).
pub fn uri_matches_path(uri: &Uri, path: &Path) -> bool {
    let Ok(remote) = decode_path_uri(uri.as_str()) else {
        return false;
    };
    absolute(path).map(|local| local == remote).unwrap_or(false)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Number of word characters immediately before the cursor.
pub fn prefix_len(line_before_cursor: &str) -> usize {
    line_before_cursor
        .chars()
        .rev()
        .take_while(|c| is_word_char(*c))
        .count()
}

fn non_empty(text: Option<&String>) -> Option<&str> {
    text.map(String::as_str).filter(|s| !s.is_empty())
}

fn sort_key(item: &CompletionItem) -> &str {
    non_empty(item.sort_text.as_ref()).unwrap_or(item.label.as_str())
}

/// Build the completion set for a request made at `cursor`, where the typed
/// word before the cursor is `prefix_len` characters long.
pub fn build_completion_set(
    request_id: RequestId,
    mut items: Vec<CompletionItem>,
    cursor: TextPosition,
    prefix_len: usize,
) -> CompletionSet {
    items.sort_by(|a, b| sort_key(a).cmp(sort_key(b)));

    let replace_start = cursor.back(u32::try_from(prefix_len).unwrap_or(u32::MAX));
    let items = items
        .iter()
        .map(|item| {
            let insert = non_empty(item.insert_text.as_ref());
            let filter_source = non_empty(item.filter_text.as_ref())
                .or(insert)
                .unwrap_or(item.label.as_str());
            CompletionEntry {
                display_text: item.label.clone(),
                replace_start,
                replace_end: cursor,
                replace_text: insert.unwrap_or(item.label.as_str()).to_string(),
                filter_text: filter_source.chars().skip(prefix_len).collect(),
                documentation: decode_documentation(item),
            }
        })
        .collect();

    CompletionSet { request_id, items }
}

fn diagnostic_marker(diagnostic: &Diagnostic) -> DiagnosticMarker {
    let severity = Severity::from_lsp(diagnostic.severity);
    let tooltip = match non_empty(diagnostic.source.as_ref()) {
        Some(source) => format!("{source}: {}", diagnostic.message),
        None => diagnostic.message.clone(),
    };
    DiagnosticMarker {
        start: to_text(diagnostic.range.start),
        end: to_text(diagnostic.range.end),
        severity,
        tooltip,
        color: severity.color(),
    }
}

/// Build the diagnostic set, errors first, keeping server order within a
/// severity.
pub fn build_diagnostic_set(diagnostics: &[Diagnostic]) -> DiagnosticSet {
    let mut markers: Vec<_> = diagnostics.iter().map(diagnostic_marker).collect();
    markers.sort_by_key(|marker| marker.severity);
    DiagnosticSet { markers }
}
