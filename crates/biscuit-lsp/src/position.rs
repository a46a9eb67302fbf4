//! Conversion between editor and protocol coordinates.
//!
//! The editor addresses text as `line.column` with 1-based lines and 0-based
//! columns. The protocol uses 0-based lines and characters. Columns are passed
//! through untouched.

use crate::error::{LspError, LspResult};
use lsp_types::Position;
use std::fmt;
use std::str::FromStr;

/// A position in the editor's coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TextPosition {
    /// 1-based line number.
    pub line: u32,
    /// 0-based character offset within the line.
    pub column: u32,
}

impl TextPosition {
    /// Create a position, rejecting line 0.
    pub fn new(line: u32, column: u32) -> LspResult<Self> {
        if line < 1 {
            return Err(LspError::InvalidPosition(format!(
                "line {line} (lines start at 1)"
            )));
        }
        Ok(Self { line, column })
    }

    /// The first column of this position's line.
    pub fn line_start(self) -> Self {
        Self {
            line: self.line,
            column: 0,
        }
    }

    /// Move left by `chars` characters, stopping at the start of the line.
    pub fn back(self, chars: u32) -> Self {
        Self {
            line: self.line,
            column: self.column.saturating_sub(chars),
        }
    }
}

impl fmt::Display for TextPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.line, self.column)
    }
}

impl FromStr for TextPosition {
    type Err = LspError;

    /// Parse the editor's `line.column` notation, e.g. `"12.4"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (line, column) = s
            .split_once('.')
            .ok_or_else(|| LspError::InvalidPosition(format!("expected line.column, got {s:?}")))?;
        let line = line
            .trim()
            .parse()
            .map_err(|_| LspError::InvalidPosition(format!("bad line in {s:?}")))?;
        let column = column
            .trim()
            .parse()
            .map_err(|_| LspError::InvalidPosition(format!("bad column in {s:?}")))?;
        Self::new(line, column)
    }
}

/// A start/end pair of editor positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextRange {
    pub start: TextPosition,
    pub end: TextPosition,
}

/// Convert an editor position to a protocol position.
pub fn to_protocol(position: TextPosition) -> LspResult<Position> {
    if position.line < 1 {
        return Err(LspError::InvalidPosition(format!(
            "line {} (lines start at 1)",
            position.line
        )));
    }
    Ok(Position {
        line: position.line - 1,
        character: position.column,
    })
}

/// Convert a protocol position to an editor position.
pub fn to_text(position: Position) -> TextPosition {
    TextPosition {
        line: position.line.saturating_add(1),
        column: position.character,
    }
}

/// Convert a protocol range to an editor range.
pub fn range_to_text(range: lsp_types::Range) -> TextRange {
    TextRange {
        start: to_text(range.start),
        end: to_text(range.end),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_protocol_shifts_line() {
        let pos = TextPosition::new(1, 3).unwrap();
        assert_eq!(
            to_protocol(pos).unwrap(),
            Position {
                line: 0,
                character: 3
            }
        );
    }

    #[test]
    fn test_to_protocol_rejects_line_zero() {
        let pos = TextPosition { line: 0, column: 2 };
        assert!(matches!(
            to_protocol(pos),
            Err(LspError::InvalidPosition(_))
        ));
    }

    #[test]
    fn test_round_trip() {
        for line in [1, 2, 17, 4096] {
            for column in [0, 1, 80, 999] {
                let pos = TextPosition::new(line, column).unwrap();
                assert_eq!(to_text(to_protocol(pos).unwrap()), pos);
            }
        }
    }

    #[test]
    fn test_range_to_text() {
        let range = lsp_types::Range {
            start: Position {
                line: 4,
                character: 0,
            },
            end: Position {
                line: 4,
                character: 9,
            },
        };
        let text = range_to_text(range);
        assert_eq!(text.start.to_string(), "5.0");
        assert_eq!(text.end.to_string(), "5.9");
    }

    #[test]
    fn test_parse_editor_notation() {
        let pos: TextPosition = "12.4".parse().unwrap();
        assert_eq!(pos, TextPosition { line: 12, column: 4 });
        assert!("0.4".parse::<TextPosition>().is_err());
        assert!("12".parse::<TextPosition>().is_err());
        assert!("a.b".parse::<TextPosition>().is_err());
    }

    #[test]
    fn test_back_saturates() {
        let pos = TextPosition { line: 3, column: 2 };
        assert_eq!(pos.back(5), TextPosition { line: 3, column: 0 });
        assert_eq!(pos.back(1).column, 1);
        assert_eq!(pos.line_start().column, 0);
    }
}
