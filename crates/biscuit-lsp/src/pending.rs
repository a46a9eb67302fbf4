//! Correlation of outstanding requests with the documents that issued them.

use crate::document::DocumentId;
use crate::error::{LspError, LspResult};
use crate::position::TextPosition;
use std::collections::HashMap;
use std::fmt;

/// Request identifier, issued by the connection and unique per connection.
pub type RequestId = u64;

/// Requests whose responses are routed back to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Completion,
    Definition,
    Hover,
}

impl RequestKind {
    /// Protocol method name for this request.
    pub fn method(self) -> &'static str {
        match self {
            Self::Completion => "textDocument/completion",
            Self::Definition => "textDocument/definition",
            Self::Hover => "textDocument/hover",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Completion => "completion",
            Self::Definition => "definition",
            Self::Hover => "hover",
        })
    }
}

/// What we need to know when the response to a request arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    /// Document that issued the request.
    pub document: DocumentId,
    /// Cursor (completion) or queried position (definition, hover).
    pub position: TextPosition,
}

/// Outstanding requests, one map per request kind.
#[derive(Debug, Default)]
pub struct PendingRequests {
    completion: HashMap<RequestId, PendingRequest>,
    definition: HashMap<RequestId, PendingRequest>,
    hover: HashMap<RequestId, PendingRequest>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, kind: RequestKind) -> &HashMap<RequestId, PendingRequest> {
        match kind {
            RequestKind::Completion => &self.completion,
            RequestKind::Definition => &self.definition,
            RequestKind::Hover => &self.hover,
        }
    }

    fn map_mut(&mut self, kind: RequestKind) -> &mut HashMap<RequestId, PendingRequest> {
        match kind {
            RequestKind::Completion => &mut self.completion,
            RequestKind::Definition => &mut self.definition,
            RequestKind::Hover => &mut self.hover,
        }
    }

    fn maps_mut(&mut self) -> [&mut HashMap<RequestId, PendingRequest>; 3] {
        [&mut self.completion, &mut self.definition, &mut self.hover]
    }

    /// Record an outgoing request.
    pub fn register(
        &mut self,
        kind: RequestKind,
        id: RequestId,
        document: DocumentId,
        position: TextPosition,
    ) -> LspResult<()> {
        let map = self.map_mut(kind);
        if map.contains_key(&id) {
            return Err(LspError::DuplicateRequestId { kind, id });
        }
        map.insert(id, PendingRequest { document, position });
        Ok(())
    }

    /// Take the entry for a response. Succeeds at most once per id.
    pub fn resolve_and_remove(
        &mut self,
        kind: RequestKind,
        id: RequestId,
    ) -> LspResult<PendingRequest> {
        self.map_mut(kind)
            .remove(&id)
            .ok_or(LspError::UnknownRequestId { kind, id })
    }

    /// Drop every entry issued by `document`. Returns how many were dropped.
    pub fn purge_document(&mut self, document: DocumentId) -> usize {
        self.maps_mut()
            .into_iter()
            .map(|map| {
                let before = map.len();
                map.retain(|_, pending| pending.document != document);
                before - map.len()
            })
            .sum()
    }

    /// Drop everything. Returns how many entries were dropped.
    pub fn clear(&mut self) -> usize {
        self.maps_mut()
            .into_iter()
            .map(|map| {
                let dropped = map.len();
                map.clear();
                dropped
            })
            .sum()
    }

    pub fn contains(&self, kind: RequestKind, id: RequestId) -> bool {
        self.map(kind).contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.completion.len() + self.definition.len() + self.hover.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
