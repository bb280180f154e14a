//! Engine error types.
//!
//! Incompatibility between two formulas is never an error; it is a
//! [`Compatibility`](crate::Compatibility) value. Errors here are hard failures
//! for a single cell or a misuse of the API.

use sheetfold_common::{CellAddress, CellReference};
use sheetfold_parse::{ParserError, Rule};
use thiserror::Error;

use crate::ParsePath;

#[derive(Debug, Error)]
pub enum PatternError {
    /// A formula cell could not be parsed.
    #[error("cannot parse formula in {cell}: {source}")]
    Parse {
        cell: CellAddress,
        #[source]
        source: ParserError,
    },
    /// A cell expected to hold a formula does not.
    #[error("{cell} holds no formula")]
    NoFormula { cell: CellAddress },
    /// The candidate tree cannot host the variability pattern.
    #[error("variability pattern does not fit the parse tree at path {path:?}")]
    Binding { path: ParsePath },
    /// A bound reference has no parameter assigned.
    #[error("no parameter assigned to {reference}")]
    UnknownParameter { reference: CellReference },
    /// A nonterminal lacks a child its rule requires, or that child is not
    /// what the rule expects (an unknown operator, say).
    #[error("malformed {rule} node at child {child}")]
    MalformedTree { rule: Rule, child: usize },
    /// Configuration validation failure.
    #[error("invalid scan config: {0}")]
    Config(String),
}

impl PatternError {
    pub fn parse(cell: &CellAddress, source: ParserError) -> Self {
        Self::Parse {
            cell: cell.clone(),
            source,
        }
    }
}

pub type Result<T, E = PatternError> = std::result::Result<T, E>;
