use std::convert::TryFrom;
use std::error::Error;
use std::fmt::{self, Display};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use sheetfold_common::parse_a1;

const TOKEN_ENDERS: &str = ",;}) +-*/^&=><%:!({\n";

const fn build_token_enders() -> [bool; 256] {
    let mut tbl = [false; 256];
    let bytes = TOKEN_ENDERS.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        tbl[bytes[i] as usize] = true;
        i += 1;
    }
    tbl
}
static TOKEN_ENDERS_TABLE: [bool; 256] = build_token_enders();

#[inline(always)]
fn is_token_ender(c: u8) -> bool {
    TOKEN_ENDERS_TABLE[c as usize]
}

static ERROR_CODES: &[&str] = &[
    "#DIV/0!", "#VALUE!", "#NULL!", "#NAME?", "#CIRC!", "#REF!", "#NUM!", "#N/A",
];

/// Represents operator associativity.
#[derive(Debug, PartialEq, Eq)]
pub enum Associativity {
    Left,
    Right,
}

/// A custom error type for the tokenizer.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizerError {
    pub message: String,
    pub pos: usize,
}

impl fmt::Display for TokenizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenizerError at {}: {}", self.pos, self.message)
    }
}

impl Error for TokenizerError {}

/// The kind of a token.
///
/// Cell references, sheet prefixes and the `:` range operator are separate
/// tokens so that every reference occurrence ends up as its own terminal.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Leading `=` of a formula.
    Equals,
    CellRef,
    Number,
    Text,
    Logical,
    Error,
    /// Identifier that is not a cell reference (defined name, whole column, …).
    Name,
    /// Function name; the following `(` is a separate token.
    Function,
    /// Sheet prefix, possibly quoted; the following `!` is a separate token.
    SheetName,
    Bang,
    Colon,
    OpPrefix,
    OpInfix,
    OpPostfix,
    OpenParen,
    CloseParen,
    OpenBrace,
    CloseBrace,
    ArgSep,
    RowSep,
    Whitespace,
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl TokenKind {
    /// Kinds after which a `+`/`-` is an infix operator.
    fn ends_operand(self) -> bool {
        matches!(
            self,
            TokenKind::CellRef
                | TokenKind::Number
                | TokenKind::Text
                | TokenKind::Logical
                | TokenKind::Error
                | TokenKind::Name
                | TokenKind::CloseParen
                | TokenKind::CloseBrace
                | TokenKind::OpPostfix
        )
    }
}

/// A token in an Excel formula.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    pub value: String,
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} value: {}>", self.kind, self.value)
    }
}

impl Token {
    pub fn new(value: impl Into<String>, kind: TokenKind, start: usize, end: usize) -> Self {
        Token {
            value: value.into(),
            kind,
            start,
            end,
        }
    }

    fn from_slice(source: &str, kind: TokenKind, start: usize, end: usize) -> Self {
        Token::new(&source[start..end], kind, start, end)
    }

    pub fn is_operator(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::OpPrefix | TokenKind::OpInfix | TokenKind::OpPostfix
        )
    }

    pub fn get_precedence(&self) -> Option<(u8, Associativity)> {
        // For a prefix operator, use the 'u' key.
        let op = if self.kind == TokenKind::OpPrefix {
            "u"
        } else {
            self.value.as_str()
        };

        match op {
            " " | "," => Some((8, Associativity::Left)),
            "u" => Some((7, Associativity::Right)),
            "%" => Some((6, Associativity::Left)),
            "^" => Some((5, Associativity::Left)),
            "*" | "/" => Some((4, Associativity::Left)),
            "+" | "-" => Some((3, Associativity::Left)),
            "&" => Some((2, Associativity::Left)),
            "=" | "<" | ">" | "<=" | ">=" | "<>" => Some((1, Associativity::Left)),
            _ => None,
        }
    }

    /// Classify an accumulated word that is not followed by `(` or `!`.
    fn classify_operand(word: &str) -> TokenKind {
        let first = word.as_bytes()[0];
        if word.eq_ignore_ascii_case("TRUE") || word.eq_ignore_ascii_case("FALSE") {
            TokenKind::Logical
        } else if (first.is_ascii_digit() || first == b'.') && word.parse::<f64>().is_ok() {
            TokenKind::Number
        } else if parse_a1(word).is_ok() {
            TokenKind::CellRef
        } else {
            TokenKind::Name
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Opener {
    Func,
    Paren,
    Brace,
}

/// A tokenizer for Excel worksheet formulas.
pub struct Tokenizer {
    formula: String,
    pub items: Vec<Token>,
    opener_stack: Vec<Opener>,
    offset: usize,      // Byte offset in formula
    token_start: usize, // Start of current word
    token_end: usize,   // End of current word
}

impl Tokenizer {
    /// Create a new tokenizer and immediately tokenize the formula.
    pub fn new(formula: &str) -> Result<Self, TokenizerError> {
        let mut tokenizer = Tokenizer {
            formula: formula.to_string(),
            items: Vec::with_capacity(formula.len() / 2),
            opener_stack: Vec::with_capacity(8),
            offset: 0,
            token_start: 0,
            token_end: 0,
        };
        tokenizer.run()?;
        Ok(tokenizer)
    }

    #[inline]
    fn current_byte(&self) -> Option<u8> {
        self.formula.as_bytes().get(self.offset).copied()
    }

    #[inline]
    fn has_token(&self) -> bool {
        self.token_end > self.token_start
    }

    #[inline]
    fn start_token(&mut self) {
        self.token_start = self.offset;
        self.token_end = self.offset;
    }

    #[inline]
    fn extend_token(&mut self) {
        self.token_end = self.offset;
    }

    fn error(&self, message: impl Into<String>) -> TokenizerError {
        TokenizerError {
            message: message.into(),
            pos: self.offset,
        }
    }

    fn run(&mut self) -> Result<(), TokenizerError> {
        if !self.formula.starts_with('=') {
            return Err(self.error("formula must start with '='"));
        }
        self.items.push(Token::from_slice(&self.formula, TokenKind::Equals, 0, 1));
        self.offset = 1;
        self.start_token();

        while self.offset < self.formula.len() {
            if self.check_scientific_notation() {
                continue;
            }

            let curr_byte = self.formula.as_bytes()[self.offset];

            if is_token_ender(curr_byte) && self.has_token() {
                let kind = match curr_byte {
                    b'(' => TokenKind::Function,
                    b'!' => TokenKind::SheetName,
                    _ => Token::classify_operand(&self.formula[self.token_start..self.token_end]),
                };
                self.save_token(kind);
            }

            match curr_byte {
                b'"' => self.parse_string()?,
                b'\'' => self.parse_quoted_sheet()?,
                b'[' => self.parse_brackets()?,
                b'#' => self.parse_error()?,
                b' ' | b'\n' => self.parse_whitespace(),
                b'+' | b'-' | b'*' | b'/' | b'^' | b'&' | b'=' | b'>' | b'<' | b'%' => {
                    self.parse_operator()
                }
                b'{' | b'(' => self.parse_opener(),
                b')' | b'}' => self.parse_closer()?,
                b';' | b',' => self.parse_separator(),
                b':' => self.push_single(TokenKind::Colon),
                b'!' => self.push_single(TokenKind::Bang),
                _ => {
                    if !self.has_token() {
                        self.start_token();
                    }
                    self.offset += 1;
                    self.extend_token();
                }
            }
        }

        if self.has_token() {
            let kind = Token::classify_operand(&self.formula[self.token_start..self.token_end]);
            self.save_token(kind);
        }

        if !self.opener_stack.is_empty() {
            return Err(self.error("Unmatched opening parenthesis or bracket"));
        }

        Ok(())
    }

    /// Consume the sign of an exponent (`1.5E+3`) as part of the number.
    fn check_scientific_notation(&mut self) -> bool {
        if let Some(curr_byte) = self.current_byte() {
            if (curr_byte == b'+' || curr_byte == b'-')
                && self.has_token()
                && self.is_scientific_notation_base()
            {
                self.offset += 1;
                self.extend_token();
                return true;
            }
        }
        false
    }

    /// Is the current word the base of a number in scientific notation (`1.23E`)?
    fn is_scientific_notation_base(&self) -> bool {
        let token_slice = &self.formula.as_bytes()[self.token_start..self.token_end];
        if token_slice.len() < 2 {
            return false;
        }

        let last = token_slice[token_slice.len() - 1];
        if !(last == b'E' || last == b'e') {
            return false;
        }
        if !token_slice[0].is_ascii_digit() {
            return false;
        }

        let mut dot_seen = false;
        for &ch in &token_slice[1..token_slice.len() - 1] {
            match ch {
                b'0'..=b'9' => {}
                b'.' if !dot_seen => dot_seen = true,
                _ => return false,
            }
        }
        true
    }

    fn save_token(&mut self, kind: TokenKind) {
        if self.has_token() {
            let token = Token::from_slice(&self.formula, kind, self.token_start, self.token_end);
            self.items.push(token);
        }
        self.start_token();
    }

    fn push_single(&mut self, kind: TokenKind) {
        self.items.push(Token::from_slice(
            &self.formula,
            kind,
            self.offset,
            self.offset + 1,
        ));
        self.offset += 1;
        self.start_token();
    }

    /// Scan a delimited run starting at the current offset; doubled delimiters escape.
    fn scan_delimited(&mut self, delim: u8) -> Result<usize, TokenizerError> {
        let start = self.offset;
        self.offset += 1;
        while self.offset < self.formula.len() {
            if self.formula.as_bytes()[self.offset] == delim {
                self.offset += 1;
                if self.current_byte() == Some(delim) {
                    self.offset += 1;
                } else {
                    return Ok(start);
                }
            } else {
                self.offset += 1;
            }
        }
        Err(TokenizerError {
            message: "Reached end of formula while parsing string".to_string(),
            pos: self.offset,
        })
    }

    fn parse_string(&mut self) -> Result<(), TokenizerError> {
        if self.has_token() {
            let kind = Token::classify_operand(&self.formula[self.token_start..self.token_end]);
            self.save_token(kind);
        }
        let start = self.scan_delimited(b'"')?;
        self.items.push(Token::from_slice(
            &self.formula,
            TokenKind::Text,
            start,
            self.offset,
        ));
        self.start_token();
        Ok(())
    }

    /// `'My Sheet'!A1`: a quoted sheet name must be followed by `!`.
    fn parse_quoted_sheet(&mut self) -> Result<(), TokenizerError> {
        if self.has_token() {
            return Err(self.error("Unexpected quote inside identifier"));
        }
        let start = self.scan_delimited(b'\'')?;
        if self.current_byte() != Some(b'!') {
            return Err(self.error("Quoted sheet name must be followed by '!'"));
        }
        self.items.push(Token::from_slice(
            &self.formula,
            TokenKind::SheetName,
            start,
            self.offset,
        ));
        self.start_token();
        Ok(())
    }

    /// Bracketed text stays part of the current word (external books, table specifiers).
    fn parse_brackets(&mut self) -> Result<(), TokenizerError> {
        if !self.has_token() {
            self.start_token();
        }

        let mut open_count = 1;
        self.offset += 1;

        while self.offset < self.formula.len() {
            match self.formula.as_bytes()[self.offset] {
                b'[' => open_count += 1,
                b']' => {
                    open_count -= 1;
                    if open_count == 0 {
                        self.offset += 1;
                        self.extend_token();
                        return Ok(());
                    }
                }
                _ => {}
            }
            self.offset += 1;
        }

        Err(self.error("Encountered unmatched '['"))
    }

    fn parse_error(&mut self) -> Result<(), TokenizerError> {
        if self.has_token() {
            let kind = Token::classify_operand(&self.formula[self.token_start..self.token_end]);
            self.save_token(kind);
        }

        let rest = &self.formula.as_bytes()[self.offset..];
        for &err_code in ERROR_CODES {
            let err_bytes = err_code.as_bytes();
            if rest.len() >= err_bytes.len()
                && rest[..err_bytes.len()].eq_ignore_ascii_case(err_bytes)
            {
                let end = self.offset + err_bytes.len();
                self.items.push(Token::from_slice(
                    &self.formula,
                    TokenKind::Error,
                    self.offset,
                    end,
                ));
                self.offset = end;
                self.start_token();
                return Ok(());
            }
        }

        Err(self.error(format!("Invalid error code at position {}", self.offset)))
    }

    fn parse_whitespace(&mut self) {
        let ws_start = self.offset;
        while let Some(b' ' | b'\n') = self.current_byte() {
            self.offset += 1;
        }
        self.items.push(Token::from_slice(
            &self.formula,
            TokenKind::Whitespace,
            ws_start,
            self.offset,
        ));
        self.start_token();
    }

    fn previous_significant(&self) -> Option<&Token> {
        self.items
            .iter()
            .rev()
            .find(|t| t.kind != TokenKind::Whitespace)
    }

    fn parse_operator(&mut self) {
        if self.offset + 1 < self.formula.len() {
            let two_char = &self.formula.as_bytes()[self.offset..self.offset + 2];
            if two_char == b">=" || two_char == b"<=" || two_char == b"<>" {
                self.items.push(Token::from_slice(
                    &self.formula,
                    TokenKind::OpInfix,
                    self.offset,
                    self.offset + 2,
                ));
                self.offset += 2;
                self.start_token();
                return;
            }
        }

        let kind = match self.formula.as_bytes()[self.offset] {
            b'%' => TokenKind::OpPostfix,
            b'+' | b'-' => match self.previous_significant() {
                Some(prev) if prev.kind.ends_operand() => TokenKind::OpInfix,
                _ => TokenKind::OpPrefix,
            },
            _ => TokenKind::OpInfix,
        };
        self.push_single(kind);
    }

    fn parse_opener(&mut self) {
        let opener = match self.formula.as_bytes()[self.offset] {
            b'{' => Opener::Brace,
            _ => match self.items.last() {
                Some(t) if t.kind == TokenKind::Function => Opener::Func,
                _ => Opener::Paren,
            },
        };
        self.opener_stack.push(opener);
        let kind = if opener == Opener::Brace {
            TokenKind::OpenBrace
        } else {
            TokenKind::OpenParen
        };
        self.push_single(kind);
    }

    fn parse_closer(&mut self) -> Result<(), TokenizerError> {
        let curr_byte = self.formula.as_bytes()[self.offset];
        let Some(opener) = self.opener_stack.pop() else {
            return Err(self.error(format!(
                "No matching opener for closer at position {}",
                self.offset
            )));
        };
        let kind = match (curr_byte, opener) {
            (b'}', Opener::Brace) => TokenKind::CloseBrace,
            (b')', Opener::Func | Opener::Paren) => TokenKind::CloseParen,
            _ => return Err(self.error("Mismatched ( and { pair")),
        };
        self.push_single(kind);
        Ok(())
    }

    fn parse_separator(&mut self) {
        let kind = if self.formula.as_bytes()[self.offset] == b';' {
            TokenKind::RowSep
        } else {
            match self.opener_stack.last() {
                Some(Opener::Func | Opener::Brace) => TokenKind::ArgSep,
                // Outside a call a comma is the union operator.
                _ => TokenKind::OpInfix,
            }
        };
        self.push_single(kind);
    }

    /// Reconstruct the formula from the tokens.
    pub fn render(&self) -> String {
        self.items.iter().map(|t| t.value.as_str()).collect()
    }
}

impl TryFrom<&str> for Tokenizer {
    type Error = TokenizerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Tokenizer::new(value)
    }
}

impl TryFrom<String> for Tokenizer {
    type Error = TokenizerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Tokenizer::new(&value)
    }
}
