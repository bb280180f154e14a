//! A1 coordinate helpers.
//!
//! Rows and columns are 1-based throughout the workspace, matching the way
//! references are written in formulas (`C2` is row 2, column 3). The `$`
//! anchors of an A1 token are preserved as fixed flags so that drag/fill
//! semantics can be reasoned about later.

use core::fmt;

use once_cell::sync::Lazy;

/// Largest column Excel accepts (`XFD`).
pub const MAX_COL: u32 = 16_384;
/// Largest row Excel accepts.
pub const MAX_ROW: u32 = 1_048_576;

// Column lookup table for common columns (A-ZZ = 702 columns)
static COLUMN_LOOKUP: Lazy<Vec<String>> = Lazy::new(|| {
    let mut cols = Vec::with_capacity(702);
    for c in b'A'..=b'Z' {
        cols.push(String::from(c as char));
    }
    for c1 in b'A'..=b'Z' {
        for c2 in b'A'..=b'Z' {
            cols.push(format!("{}{}", c1 as char, c2 as char));
        }
    }
    cols
});

/// Errors returned while decoding an A1 token.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum A1ParseError {
    Empty,
    MissingColumn(String),
    MissingRow(String),
    ColumnOutOfRange(String),
    RowOutOfRange(String),
    TrailingInput(String),
}

impl fmt::Display for A1ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            A1ParseError::Empty => write!(f, "empty cell reference"),
            A1ParseError::MissingColumn(s) => write!(f, "missing column letters in '{s}'"),
            A1ParseError::MissingRow(s) => write!(f, "missing row number in '{s}'"),
            A1ParseError::ColumnOutOfRange(s) => {
                write!(f, "column in '{s}' exceeds {MAX_COL}")
            }
            A1ParseError::RowOutOfRange(s) => write!(f, "row in '{s}' is 0 or exceeds {MAX_ROW}"),
            A1ParseError::TrailingInput(s) => write!(f, "unexpected characters in '{s}'"),
        }
    }
}

impl std::error::Error for A1ParseError {}

/// Decoded pieces of an A1 token such as `$B7`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct A1Parts {
    pub row: u32,
    pub col: u32,
    pub row_fixed: bool,
    pub col_fixed: bool,
}

impl fmt::Display for A1Parts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.col_fixed {
            write!(f, "$")?;
        }
        write!(f, "{}", column_to_letters(self.col))?;
        if self.row_fixed {
            write!(f, "$")?;
        }
        write!(f, "{}", self.row)
    }
}

/// Parse an A1 cell token (`A1`, `$A1`, `A$1`, `$A$1`) using byte-based scanning.
///
/// Lower-case column letters are accepted, as Excel does.
pub fn parse_a1(reference: &str) -> Result<A1Parts, A1ParseError> {
    let bytes = reference.as_bytes();
    if bytes.is_empty() {
        return Err(A1ParseError::Empty);
    }
    let mut i = 0;

    let col_fixed = bytes[i] == b'$';
    if col_fixed {
        i += 1;
    }

    let col_start = i;
    while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
        i += 1;
    }
    if i == col_start {
        return Err(A1ParseError::MissingColumn(reference.to_string()));
    }
    let col = letters_to_column(&reference[col_start..i])
        .ok_or_else(|| A1ParseError::ColumnOutOfRange(reference.to_string()))?;

    let row_fixed = i < bytes.len() && bytes[i] == b'$';
    if row_fixed {
        i += 1;
    }

    let row_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i == row_start {
        return Err(A1ParseError::MissingRow(reference.to_string()));
    }
    if i != bytes.len() {
        return Err(A1ParseError::TrailingInput(reference.to_string()));
    }
    let row = reference[row_start..i]
        .parse::<u32>()
        .ok()
        .filter(|r| (1..=MAX_ROW).contains(r))
        .ok_or_else(|| A1ParseError::RowOutOfRange(reference.to_string()))?;

    Ok(A1Parts {
        row,
        col,
        row_fixed,
        col_fixed,
    })
}

/// Convert 1-based column letters (`A`, `BC`, case-insensitive) into a column number.
pub fn letters_to_column(letters: &str) -> Option<u32> {
    // XFD is the widest column, anything longer cannot be a column.
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let mut col = 0u32;
    for b in letters.bytes() {
        if !b.is_ascii_alphabetic() {
            return None;
        }
        col = col * 26 + (b.to_ascii_uppercase() - b'A' + 1) as u32;
    }
    (col <= MAX_COL).then_some(col)
}

/// Convert a 1-based column number to letters using the lookup table for common values.
pub fn column_to_letters(mut col: u32) -> String {
    if col > 0 && col <= 702 {
        return COLUMN_LOOKUP[(col - 1) as usize].clone();
    }

    let mut result = String::with_capacity(3);
    while col > 0 {
        col -= 1;
        result.insert(0, ((col % 26) as u8 + b'A') as char);
        col /= 26;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_anchor_flags() {
        let parts = parse_a1("$B7").unwrap();
        assert_eq!(
            parts,
            A1Parts {
                row: 7,
                col: 2,
                row_fixed: false,
                col_fixed: true
            }
        );
        let parts = parse_a1("aa$10").unwrap();
        assert_eq!((parts.col, parts.row), (27, 10));
        assert!(parts.row_fixed);
        assert!(!parts.col_fixed);
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert_eq!(parse_a1(""), Err(A1ParseError::Empty));
        assert!(matches!(parse_a1("12"), Err(A1ParseError::MissingColumn(_))));
        assert!(matches!(parse_a1("AB"), Err(A1ParseError::MissingRow(_))));
        assert!(matches!(parse_a1("A0"), Err(A1ParseError::RowOutOfRange(_))));
        assert!(matches!(parse_a1("XFE1"), Err(A1ParseError::ColumnOutOfRange(_))));
        assert!(matches!(parse_a1("A1B"), Err(A1ParseError::TrailingInput(_))));
    }

    #[test]
    fn column_letter_roundtrip() {
        for col in [1, 26, 27, 52, 702, 703, 16_384] {
            let letters = column_to_letters(col);
            assert_eq!(letters_to_column(&letters), Some(col), "{letters}");
        }
        assert_eq!(column_to_letters(28), "AB");
        assert_eq!(column_to_letters(16_384), "XFD");
    }

    #[test]
    fn display_restores_dollars() {
        assert_eq!(parse_a1("$c$3").unwrap().to_string(), "$C$3");
        assert_eq!(parse_a1("D$12").unwrap().to_string(), "D$12");
    }
}
