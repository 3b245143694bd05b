//! Source spans for formula text.
//!
//! Spans are byte ranges into the original formula. Editors want
//! character columns, so [`line_col`] converts an offset into a 1-based
//! `(line, column)` pair counted in `char`s.

/// A byte range in the source formula.
pub type Span = std::ops::Range<usize>;

/// Convert a byte offset into a 1-based `(line, column)` pair.
///
/// Columns count Unicode scalar values, so `[Product → Price]` reports the
/// same column an editor cursor would show. Offsets past the end of the
/// source clamp to the position just after the last character.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut column = 1;
    for (idx, ch) in source.char_indices() {
        if idx >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}

/// Join two spans into the smallest span covering both.
pub fn join(a: &Span, b: &Span) -> Span {
    a.start.min(b.start)..a.end.max(b.end)
}
