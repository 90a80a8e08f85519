//! Text geometry: points, lengths, and input edits.
//!
//! Every position in this crate is a [`Length`] triple — bytes, characters,
//! and a row/column [`Point`] — so that error-recovery costs can be charged
//! per character and per line without re-scanning the input.

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// A row/column position. Columns count characters, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct Point {
    pub row: u32,
    pub column: u32,
}

impl Point {
    #[must_use]
    pub const fn new(row: u32, column: u32) -> Self {
        Self { row, column }
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self { row: 0, column: 0 }
    }

    /// Concatenate two extents: if `rhs` spans rows, its column restarts.
    #[must_use]
    pub const fn add(self, rhs: Self) -> Self {
        if rhs.row > 0 {
            Self {
                row: self.row + rhs.row,
                column: rhs.column,
            }
        } else {
            Self {
                row: self.row,
                column: self.column + rhs.column,
            }
        }
    }

    /// Relative extent from `rhs` to `self`. `self` must not precede `rhs`.
    #[must_use]
    pub const fn sub(self, rhs: Self) -> Self {
        if self.row > rhs.row {
            Self {
                row: self.row - rhs.row,
                column: self.column,
            }
        } else {
            Self {
                row: 0,
                column: self.column.saturating_sub(rhs.column),
            }
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.row, self.column)
    }
}

/// A distance through the text: bytes, characters, and row/column extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct Length {
    pub bytes: u32,
    pub chars: u32,
    pub extent: Point,
}

impl Length {
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            bytes: 0,
            chars: 0,
            extent: Point::zero(),
        }
    }

    #[must_use]
    pub const fn add(self, rhs: Self) -> Self {
        Self {
            bytes: self.bytes + rhs.bytes,
            chars: self.chars + rhs.chars,
            extent: self.extent.add(rhs.extent),
        }
    }

    /// Saturating difference; positions that precede `rhs` collapse to zero.
    #[must_use]
    pub const fn sub(self, rhs: Self) -> Self {
        Self {
            bytes: self.bytes.saturating_sub(rhs.bytes),
            chars: self.chars.saturating_sub(rhs.chars),
            extent: self.extent.sub(rhs.extent),
        }
    }

    #[must_use]
    pub fn min(self, rhs: Self) -> Self {
        if self.bytes <= rhs.bytes {
            self
        } else {
            rhs
        }
    }
}

/// An edit applied to the source text before re-parsing.
///
/// All three fields are absolute positions: `start` is where the edit
/// begins, `old_end` is where the replaced range used to end, and
/// `new_end` is where the inserted text ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct InputEdit {
    pub start: Length,
    pub old_end: Length,
    pub new_end: Length,
}

impl InputEdit {
    /// Build an edit from byte offsets by measuring the relevant slices of
    /// the old and new source texts.
    #[must_use]
    pub fn from_texts(old_text: &str, new_text: &str, start_byte: usize, old_end_byte: usize, new_end_byte: usize) -> Self {
        Self {
            start: measure(&old_text[..start_byte]),
            old_end: measure(&old_text[..old_end_byte]),
            new_end: measure(&new_text[..new_end_byte]),
        }
    }
}

/// Measure the length triple of a string.
#[must_use]
pub fn measure(text: &str) -> Length {
    let mut length = Length::zero();
    for ch in text.chars() {
        length.bytes += ch.len_utf8() as u32;
        length.chars += 1;
        if ch == '\n' {
            length.extent.row += 1;
            length.extent.column = 0;
        } else {
            length.extent.column += 1;
        }
    }
    length
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_add_spans_rows() {
        let a = Point::new(1, 7);
        assert_eq!(a.add(Point::new(0, 3)), Point::new(1, 10));
        assert_eq!(a.add(Point::new(2, 3)), Point::new(3, 3));
    }

    #[test]
    fn length_add_sub_round_trip() {
        let a = measure("fn main() {\n    body\n");
        let b = measure("}\n");
        let sum = a.add(b);
        assert_eq!(sum.sub(a), b);
        assert_eq!(sum.bytes, a.bytes + b.bytes);
    }

    #[test]
    fn measure_counts_multibyte_chars_once() {
        let l = measure("λx→x\n");
        assert_eq!(l.chars, 5);
        assert_eq!(l.bytes, 9);
        assert_eq!(l.extent, Point::new(1, 0));
    }

    #[test]
    fn edit_from_texts() {
        let old = "int x;\nint y;";
        let new = "int xyz;\nint y;";
        let edit = InputEdit::from_texts(old, new, 5, 5, 7);
        assert_eq!(edit.start.bytes, 5);
        assert_eq!(edit.old_end.bytes, 5);
        assert_eq!(edit.new_end.bytes, 7);
        assert_eq!(edit.new_end.extent, Point::new(0, 7));
    }
}
