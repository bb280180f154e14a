pub mod parser;
pub mod tokenizer;

pub use parser::{
    MAX_NESTING, NodeId, NodeKind, NodeRef, ParseTree, Parser, ParserError, Rule, parse,
    unquote_sheet_name, unquote_text,
};
pub use tokenizer::{Associativity, Token, TokenKind, Tokenizer, TokenizerError};
