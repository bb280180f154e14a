//! Excel error values such as `#DIV/0!`. These are cell results, not
//! failures of the pattern engine.

use std::{error::Error, fmt};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::LiteralValue;

/// Error codes the formula grammar recognises. `Display` gives the Excel
/// spelling.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExcelErrorKind {
    Null,
    Ref,
    Name,
    Value,
    Div,
    Na,
    Num,
    Circ,
}

impl fmt::Display for ExcelErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Null => "#NULL!",
            Self::Ref => "#REF!",
            Self::Name => "#NAME?",
            Self::Value => "#VALUE!",
            Self::Div => "#DIV/0!",
            Self::Na => "#N/A",
            Self::Num => "#NUM!",
            Self::Circ => "#CIRC!",
        })
    }
}

impl ExcelErrorKind {
    /// Recognise an error literal as written in a formula, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.trim().to_ascii_lowercase().as_str() {
            "#null!" => Self::Null,
            "#ref!" => Self::Ref,
            "#name?" => Self::Name,
            "#value!" => Self::Value,
            "#div/0!" => Self::Div,
            "#n/a" => Self::Na,
            "#num!" => Self::Num,
            "#circ!" => Self::Circ,
            _ => return None,
        })
    }
}

/// An error value with an optional explanation.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExcelError {
    pub kind: ExcelErrorKind,
    pub message: Option<String>,
}

impl From<ExcelErrorKind> for ExcelError {
    fn from(kind: ExcelErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }
}

impl ExcelError {
    pub fn new(kind: ExcelErrorKind) -> Self {
        kind.into()
    }

    pub fn with_message<S: Into<String>>(mut self, msg: S) -> Self {
        self.message = Some(msg.into());
        self
    }
}

impl fmt::Display for ExcelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {msg}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl Error for ExcelError {}

impl From<ExcelError> for LiteralValue {
    fn from(error: ExcelError) -> Self {
        LiteralValue::Error(error)
    }
}

impl PartialEq<str> for ExcelError {
    fn eq(&self, other: &str) -> bool {
        self.kind.to_string() == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_render_like_excel() {
        for kind in [
            ExcelErrorKind::Null,
            ExcelErrorKind::Ref,
            ExcelErrorKind::Name,
            ExcelErrorKind::Value,
            ExcelErrorKind::Div,
            ExcelErrorKind::Na,
            ExcelErrorKind::Num,
            ExcelErrorKind::Circ,
        ] {
            assert_eq!(ExcelErrorKind::parse(&kind.to_string()), Some(kind));
        }
        assert_eq!(ExcelErrorKind::parse("#bogus"), None);
    }

    #[test]
    fn message_is_appended() {
        let err = ExcelError::new(ExcelErrorKind::Div).with_message("x / 0");
        assert_eq!(err.to_string(), "#DIV/0!: x / 0");
        assert_eq!(err, *"#DIV/0!");
    }
}
