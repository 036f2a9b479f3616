//! Source spans for error reporting and tooling
//!
//! A [`Span`] pins a region of a source file down to line, column, and byte
//! offset. Lines and columns are 1-based for user display; offsets are
//! 0-based byte indices into the file text.

use serde::Serialize;
use std::path::PathBuf;

/// A contiguous region of a source file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    pub file: PathBuf,
    /// Start line (1-based)
    pub start_line: usize,
    /// Start column (1-based)
    pub start_column: usize,
    /// Start byte offset (0-based, inclusive)
    pub start_offset: usize,
    /// End line (1-based)
    pub end_line: usize,
    /// End column (1-based, exclusive)
    pub end_column: usize,
    /// End byte offset (0-based, exclusive)
    pub end_offset: usize,
}

impl Span {
    /// Create a zero-width span at a single position.
    pub fn point(file: impl Into<PathBuf>, line: usize, column: usize, offset: usize) -> Self {
        Span {
            file: file.into(),
            start_line: line,
            start_column: column,
            start_offset: offset,
            end_line: line,
            end_column: column,
            end_offset: offset,
        }
    }

    /// Create a span covering `[start, end)`.
    #[allow(clippy::too_many_arguments)]
    pub fn range(
        file: impl Into<PathBuf>,
        start_line: usize,
        start_column: usize,
        start_offset: usize,
        end_line: usize,
        end_column: usize,
        end_offset: usize,
    ) -> Self {
        debug_assert!(
            start_offset <= end_offset,
            "Span: start_offset ({}) must be <= end_offset ({})",
            start_offset,
            end_offset
        );
        Span {
            file: file.into(),
            start_line,
            start_column,
            start_offset,
            end_line,
            end_column,
            end_offset,
        }
    }

    /// Outer hull of two spans over the same file.
    pub fn merge(&self, other: &Span) -> Span {
        debug_assert_eq!(self.file, other.file, "Span::merge: spans from different files");
        let (start_line, start_column, start_offset) = if self.start_offset <= other.start_offset {
            (self.start_line, self.start_column, self.start_offset)
        } else {
            (other.start_line, other.start_column, other.start_offset)
        };
        let (end_line, end_column, end_offset) = if self.end_offset >= other.end_offset {
            (self.end_line, self.end_column, self.end_offset)
        } else {
            (other.end_line, other.end_column, other.end_offset)
        };
        Span {
            file: self.file.clone(),
            start_line,
            start_column,
            start_offset,
            end_line,
            end_column,
            end_offset,
        }
    }

    /// True when `other` lies entirely inside this span (same file).
    pub fn contains(&self, other: &Span) -> bool {
        self.file == other.file
            && self.start_offset <= other.start_offset
            && other.end_offset <= self.end_offset
    }

    /// Length of the region in bytes.
    pub fn len(&self) -> usize {
        self.end_offset - self.start_offset
    }

    pub fn is_empty(&self) -> bool {
        self.start_offset == self.end_offset
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.file.display(),
            self.start_line,
            self.start_column
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_span() {
        let span = Span::point("main.rf", 3, 7, 42);
        assert_eq!(span.start_line, 3);
        assert_eq!(span.end_line, 3);
        assert_eq!(span.start_offset, span.end_offset);
        assert!(span.is_empty());
    }

    #[test]
    fn test_merge_is_outer_hull() {
        let a = Span::range("main.rf", 1, 5, 4, 1, 10, 9);
        let b = Span::range("main.rf", 2, 1, 12, 2, 4, 15);
        let merged = a.merge(&b);
        assert_eq!(merged.start_offset, 4);
        assert_eq!(merged.end_offset, 15);
        assert_eq!(merged.start_line, 1);
        assert_eq!(merged.end_line, 2);
        // Merge is order-independent
        assert_eq!(b.merge(&a), merged);
    }

    #[test]
    fn test_contains() {
        let outer = Span::range("main.rf", 1, 1, 0, 5, 1, 100);
        let inner = Span::range("main.rf", 2, 3, 20, 2, 8, 25);
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
    }

    #[test]
    fn test_display() {
        let span = Span::point("src/main.rf", 12, 8, 240);
        assert_eq!(span.to_string(), "src/main.rf:12:8");
    }
}
