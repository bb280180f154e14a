use std::fmt::{self, Display};

use crate::ExcelError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Content of a cell as handed over by a data source, and the result type of
/// evaluating an expression.
///
/// A formula cell is a `Text` value whose first character is `=`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Int(i64),
    Number(f64),
    Text(String),
    Boolean(bool),
    Array(Vec<Vec<LiteralValue>>),
    Empty,
    Error(ExcelError),
}

impl Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Int(i) => write!(f, "{i}"),
            LiteralValue::Number(n) => write!(f, "{n}"),
            LiteralValue::Text(s) => write!(f, "{s}"),
            LiteralValue::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            LiteralValue::Error(e) => write!(f, "{e}"),
            LiteralValue::Array(rows) => {
                f.write_str("{")?;
                for (r, row) in rows.iter().enumerate() {
                    if r > 0 {
                        f.write_str(";")?;
                    }
                    for (c, item) in row.iter().enumerate() {
                        if c > 0 {
                            f.write_str(",")?;
                        }
                        write!(f, "{item}")?;
                    }
                }
                f.write_str("}")
            }
            LiteralValue::Empty => Ok(()),
        }
    }
}

impl LiteralValue {
    /// The formula text if this value is one (`=` included).
    pub fn as_formula(&self) -> Option<&str> {
        match self {
            LiteralValue::Text(s) if s.starts_with('=') => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_formula(&self) -> bool {
        self.as_formula().is_some()
    }

    pub fn is_empty(&self) -> bool {
        match self {
            LiteralValue::Empty => true,
            LiteralValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            LiteralValue::Int(i) => Some(*i as f64),
            LiteralValue::Number(n) => Some(*n),
            LiteralValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            LiteralValue::Boolean(b) => *b,
            LiteralValue::Int(i) => *i != 0,
            LiteralValue::Number(n) => *n != 0.0,
            LiteralValue::Text(s) => !s.is_empty(),
            LiteralValue::Array(arr) => !arr.is_empty(),
            LiteralValue::Error(_) => false,
            LiteralValue::Empty => false,
        }
    }
}

impl From<f64> for LiteralValue {
    fn from(n: f64) -> Self {
        LiteralValue::Number(n)
    }
}

impl From<i64> for LiteralValue {
    fn from(i: i64) -> Self {
        LiteralValue::Int(i)
    }
}

impl From<bool> for LiteralValue {
    fn from(b: bool) -> Self {
        LiteralValue::Boolean(b)
    }
}

impl From<&str> for LiteralValue {
    fn from(s: &str) -> Self {
        LiteralValue::Text(s.to_string())
    }
}

impl From<String> for LiteralValue {
    fn from(s: String) -> Self {
        LiteralValue::Text(s)
    }
}
