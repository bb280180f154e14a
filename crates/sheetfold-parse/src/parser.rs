use std::error::Error;
use std::fmt::{self, Display};

use smallvec::SmallVec;

use crate::tokenizer::{Associativity, Token, TokenKind, Tokenizer, TokenizerError};

/// A custom error type for the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct ParserError {
    pub message: String,
    pub position: Option<usize>,
}

impl Display for ParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(pos) = self.position {
            write!(f, "ParserError at position {}: {}", pos, self.message)
        } else {
            write!(f, "ParserError: {}", self.message)
        }
    }
}

impl Error for ParserError {}

impl From<TokenizerError> for ParserError {
    fn from(err: TokenizerError) -> Self {
        ParserError {
            message: err.message,
            position: Some(err.pos),
        }
    }
}

/// Nonterminal productions of the formula grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    /// `=` expr
    Formula,
    /// left op right
    Binary,
    /// op operand
    Prefix,
    /// operand op
    Postfix,
    /// `(` expr `)`
    Paren,
    /// name `(` args, separators included `)`
    Call,
    /// ref `:` ref
    Range,
    /// sheet `!` (ref | range)
    SheetRef,
    /// `{` items, separators included `}`
    Array,
}

impl Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Identity of a node within one [`ParseTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a node is, without its payload. Two nodes line up structurally only if
/// their kinds are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Terminal(TokenKind),
    Nonterminal(Rule),
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Terminal(Token),
    Nonterminal {
        rule: Rule,
        children: SmallVec<[NodeId; 4]>,
    },
}

/// Concrete syntax tree of one formula.
///
/// Nodes live in an arena; every token of the formula (whitespace aside) is a
/// terminal, so the terminals read left to right reproduce the source.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseTree {
    formula: String,
    nodes: Vec<Node>,
    root: NodeId,
}

impl ParseTree {
    pub fn root(&self) -> NodeRef<'_> {
        NodeRef {
            tree: self,
            id: self.root,
        }
    }

    /// Look up a node by id. Ids from another tree give unspecified nodes.
    pub fn node(&self, id: NodeId) -> Option<NodeRef<'_>> {
        (id.index() < self.nodes.len()).then_some(NodeRef { tree: self, id })
    }

    /// Follow a child-index path from the root.
    pub fn node_at(&self, path: &[u32]) -> Option<NodeRef<'_>> {
        path.iter()
            .try_fold(self.root(), |node, &i| node.child(i as usize))
    }

    /// The source text this tree was parsed from.
    pub fn formula(&self) -> &str {
        &self.formula
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Terminal ids in source order.
    pub fn terminals(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        collect_terminals(self.root(), &mut out);
        out
    }

    /// Formula text without whitespace.
    pub fn render(&self) -> String {
        self.root().render()
    }
}

fn collect_terminals(node: NodeRef<'_>, out: &mut Vec<NodeId>) {
    if node.is_terminal() {
        out.push(node.id);
    } else {
        for child in node.children() {
            collect_terminals(child, out);
        }
    }
}

/// Read-only view of one node.
#[derive(Clone, Copy)]
pub struct NodeRef<'t> {
    tree: &'t ParseTree,
    id: NodeId,
}

impl<'t> NodeRef<'t> {
    fn node(&self) -> &'t Node {
        &self.tree.nodes[self.id.index()]
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn tree(&self) -> &'t ParseTree {
        self.tree
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.node(), Node::Terminal(_))
    }

    pub fn rule(&self) -> Option<Rule> {
        match self.node() {
            Node::Nonterminal { rule, .. } => Some(*rule),
            Node::Terminal(_) => None,
        }
    }

    pub fn token(&self) -> Option<&'t Token> {
        match self.node() {
            Node::Terminal(token) => Some(token),
            Node::Nonterminal { .. } => None,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self.node() {
            Node::Terminal(token) => NodeKind::Terminal(token.kind),
            Node::Nonterminal { rule, .. } => NodeKind::Nonterminal(*rule),
        }
    }

    /// Raw token text; empty for nonterminals.
    pub fn text(&self) -> &'t str {
        self.token().map_or("", |t| t.value.as_str())
    }

    pub fn is_cell_ref(&self) -> bool {
        self.token().is_some_and(|t| t.kind == TokenKind::CellRef)
    }

    pub fn child_count(&self) -> usize {
        match self.node() {
            Node::Nonterminal { children, .. } => children.len(),
            Node::Terminal(_) => 0,
        }
    }

    pub fn child(&self, i: usize) -> Option<NodeRef<'t>> {
        match self.node() {
            Node::Nonterminal { children, .. } => children.get(i).map(|&id| NodeRef {
                tree: self.tree,
                id,
            }),
            Node::Terminal(_) => None,
        }
    }

    pub fn children(self) -> impl Iterator<Item = NodeRef<'t>> + 't {
        let tree = self.tree;
        let ids: &'t [NodeId] = match self.node() {
            Node::Nonterminal { children, .. } => children.as_slice(),
            Node::Terminal(_) => &[],
        };
        ids.iter().map(move |&id| NodeRef { tree, id })
    }

    /// Source text of this subtree, whitespace dropped.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) {
        match self.node() {
            Node::Terminal(token) => out.push_str(&token.value),
            Node::Nonterminal { .. } => {
                for child in self.children() {
                    child.render_into(out);
                }
            }
        }
    }
}

impl fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("text", &self.render())
            .finish()
    }
}

/// Deepest expression nesting accepted. Each parenthesis, argument list,
/// array or prefix operator opens one level, and so does every link of an
/// infix chain such as `A1+A2+A3`.
pub const MAX_NESTING: usize = 512;

/// A parser for converting tokens into a [`ParseTree`].
pub struct Parser {
    formula: String,
    tokens: Vec<Token>,
    position: usize,
    nodes: Vec<Node>,
    depth: usize,
}

impl TryFrom<&str> for Parser {
    type Error = ParserError;

    fn try_from(formula: &str) -> Result<Self, Self::Error> {
        let tokens = Tokenizer::new(formula)?.items;
        Ok(Parser::new(formula, tokens))
    }
}

impl Parser {
    /// Whitespace tokens are dropped here.
    pub fn new(formula: impl Into<String>, tokens: Vec<Token>) -> Self {
        let tokens: Vec<Token> = tokens
            .into_iter()
            .filter(|t| t.kind != TokenKind::Whitespace)
            .collect();
        Parser {
            formula: formula.into(),
            nodes: Vec::with_capacity(tokens.len() * 2),
            tokens,
            position: 0,
            depth: 0,
        }
    }

    /// Parse the tokens into a tree.
    pub fn parse(&mut self) -> Result<ParseTree, ParserError> {
        if self.tokens.is_empty() {
            return Err(ParserError {
                message: "No tokens to parse".to_string(),
                position: None,
            });
        }
        let equals = self.expect(TokenKind::Equals, "Formula must start with '='")?;
        let expr = self.parse_expression()?;
        if self.position < self.tokens.len() {
            return Err(ParserError {
                message: format!(
                    "Unexpected token at position {}: {}",
                    self.position, self.tokens[self.position]
                ),
                position: Some(self.position),
            });
        }
        let root = self.nonterminal(Rule::Formula, [equals, expr]);
        Ok(ParseTree {
            formula: std::mem::take(&mut self.formula),
            nodes: std::mem::take(&mut self.nodes),
            root,
        })
    }

    fn peek(&self) -> Option<TokenKind> {
        self.tokens.get(self.position).map(|t| t.kind)
    }

    fn terminal(&mut self) -> NodeId {
        let token = self.tokens[self.position].clone();
        self.position += 1;
        self.push(Node::Terminal(token))
    }

    fn nonterminal(&mut self, rule: Rule, children: impl IntoIterator<Item = NodeId>) -> NodeId {
        self.push(Node::Nonterminal {
            rule,
            children: children.into_iter().collect(),
        })
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> Result<NodeId, ParserError> {
        if self.peek() == Some(kind) {
            Ok(self.terminal())
        } else {
            Err(ParserError {
                message: message.to_string(),
                position: Some(self.position),
            })
        }
    }

    fn parse_expression(&mut self) -> Result<NodeId, ParserError> {
        self.parse_binary_op(0)
    }

    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ParserError>,
    ) -> Result<T, ParserError> {
        if self.depth >= MAX_NESTING {
            return Err(self.too_deep());
        }
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        out
    }

    fn too_deep(&self) -> ParserError {
        ParserError {
            message: format!("Formula nests deeper than {MAX_NESTING} levels"),
            position: Some(self.position),
        }
    }

    fn parse_binary_op(&mut self, min_precedence: u8) -> Result<NodeId, ParserError> {
        let mut left = self.parse_unary_op()?;
        let mut links = 0usize;

        while self.position < self.tokens.len() {
            let token = &self.tokens[self.position];
            if token.kind != TokenKind::OpInfix {
                break;
            }

            let (precedence, associativity) =
                token.get_precedence().unwrap_or((0, Associativity::Left));
            if precedence < min_precedence {
                break;
            }

            links += 1;
            if self.depth + links > MAX_NESTING {
                return Err(self.too_deep());
            }
            let op = self.terminal();

            let next_min_precedence = if associativity == Associativity::Left {
                precedence + 1
            } else {
                precedence
            };

            let right = self.nested(|p| p.parse_binary_op(next_min_precedence))?;
            left = self.nonterminal(Rule::Binary, [left, op, right]);
        }

        Ok(left)
    }

    fn parse_unary_op(&mut self) -> Result<NodeId, ParserError> {
        if self.peek() == Some(TokenKind::OpPrefix) {
            let op = self.terminal();
            let operand = self.nested(Self::parse_unary_op)?;
            return Ok(self.nonterminal(Rule::Prefix, [op, operand]));
        }
        self.parse_postfix_op()
    }

    fn parse_postfix_op(&mut self) -> Result<NodeId, ParserError> {
        let mut expr = self.parse_primary()?;

        while self.peek() == Some(TokenKind::OpPostfix) {
            let op = self.terminal();
            expr = self.nonterminal(Rule::Postfix, [expr, op]);
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<NodeId, ParserError> {
        let Some(kind) = self.peek() else {
            return Err(ParserError {
                message: "Unexpected end of tokens".to_string(),
                position: Some(self.position),
            });
        };

        match kind {
            TokenKind::CellRef | TokenKind::Name | TokenKind::Number => {
                let atom = self.terminal();
                self.parse_range_tail(atom)
            }
            TokenKind::Text | TokenKind::Logical | TokenKind::Error => Ok(self.terminal()),
            TokenKind::SheetName => self.parse_sheet_ref(true),
            TokenKind::Function => self.nested(Self::parse_function),
            TokenKind::OpenParen => {
                let open = self.terminal();
                let expr = self.nested(Self::parse_expression)?;
                let close = self.expect(TokenKind::CloseParen, "Expected closing parenthesis")?;
                Ok(self.nonterminal(Rule::Paren, [open, expr, close]))
            }
            TokenKind::OpenBrace => self.nested(Self::parse_array),
            _ => Err(ParserError {
                message: format!("Unexpected token: {}", self.tokens[self.position]),
                position: Some(self.position),
            }),
        }
    }

    /// `left` followed by an optional `:` end point.
    fn parse_range_tail(&mut self, left: NodeId) -> Result<NodeId, ParserError> {
        if self.peek() != Some(TokenKind::Colon) {
            return Ok(left);
        }
        let colon = self.terminal();
        let right = match self.peek() {
            Some(TokenKind::CellRef | TokenKind::Name | TokenKind::Number) => self.terminal(),
            Some(TokenKind::SheetName) => self.parse_sheet_ref(false)?,
            _ => {
                return Err(ParserError {
                    message: "Expected reference after ':'".to_string(),
                    position: Some(self.position),
                });
            }
        };
        Ok(self.nonterminal(Rule::Range, [left, colon, right]))
    }

    /// `sheet ! target`; the target is a reference, or a range when `allow_range`.
    fn parse_sheet_ref(&mut self, allow_range: bool) -> Result<NodeId, ParserError> {
        let sheet = self.terminal();
        let bang = self.expect(TokenKind::Bang, "Expected '!' after sheet name")?;
        let target = match self.peek() {
            Some(TokenKind::CellRef | TokenKind::Name | TokenKind::Number) => self.terminal(),
            _ => {
                return Err(ParserError {
                    message: "Expected reference after sheet prefix".to_string(),
                    position: Some(self.position),
                });
            }
        };
        let target = if allow_range {
            self.parse_range_tail(target)?
        } else {
            target
        };
        Ok(self.nonterminal(Rule::SheetRef, [sheet, bang, target]))
    }

    fn parse_function(&mut self) -> Result<NodeId, ParserError> {
        let name = self.terminal();
        let open = self.expect(TokenKind::OpenParen, "Expected '(' after function name")?;
        let mut children: SmallVec<[NodeId; 4]> = SmallVec::new();
        children.push(name);
        children.push(open);

        if self.peek() == Some(TokenKind::CloseParen) {
            children.push(self.terminal());
            return Ok(self.nonterminal(Rule::Call, children));
        }

        loop {
            children.push(self.parse_expression()?);
            match self.peek() {
                Some(TokenKind::ArgSep) => children.push(self.terminal()),
                Some(TokenKind::CloseParen) => {
                    children.push(self.terminal());
                    break;
                }
                _ => {
                    return Err(ParserError {
                        message: "Expected ',' or ')' in function arguments".to_string(),
                        position: Some(self.position),
                    });
                }
            }
        }

        Ok(self.nonterminal(Rule::Call, children))
    }

    fn parse_array(&mut self) -> Result<NodeId, ParserError> {
        let mut children: SmallVec<[NodeId; 4]> = SmallVec::new();
        children.push(self.terminal());

        loop {
            children.push(self.parse_expression()?);
            match self.peek() {
                Some(TokenKind::ArgSep | TokenKind::RowSep) => children.push(self.terminal()),
                Some(TokenKind::CloseBrace) => {
                    children.push(self.terminal());
                    break;
                }
                _ => {
                    return Err(ParserError {
                        message: "Expected ',', ';' or '}' in array".to_string(),
                        position: Some(self.position),
                    });
                }
            }
        }

        Ok(self.nonterminal(Rule::Array, children))
    }
}

/// Parse a formula (leading `=` required) into a concrete syntax tree.
pub fn parse<T: AsRef<str>>(formula: T) -> Result<ParseTree, ParserError> {
    Parser::try_from(formula.as_ref())?.parse()
}

/// Strip the quotes of a text literal and collapse `""` escapes.
pub fn unquote_text(raw: &str) -> String {
    strip_delimiters(raw, '"')
}

/// Strip the quotes of a sheet prefix (`'My Sheet'`) and collapse `''` escapes.
/// Unquoted names are returned as is.
pub fn unquote_sheet_name(raw: &str) -> String {
    strip_delimiters(raw, '\'')
}

fn strip_delimiters(raw: &str, delim: char) -> String {
    if raw.len() >= 2 && raw.starts_with(delim) && raw.ends_with(delim) {
        let inner = &raw[1..raw.len() - 1];
        let doubled: String = [delim, delim].iter().collect();
        inner.replace(&doubled, &delim.to_string())
    } else {
        raw.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(node: NodeRef<'_>) -> String {
        match node.rule() {
            None => node.text().to_string(),
            Some(rule) => {
                let inner: Vec<String> = node.children().map(shape).collect();
                format!("{rule}[{}]", inner.join(" "))
            }
        }
    }

    fn shape_of(formula: &str) -> String {
        shape(parse(formula).unwrap().root())
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(
            shape_of("=1+2*3"),
            "Formula[= Binary[1 + Binary[2 * 3]]]"
        );
        assert_eq!(
            shape_of("=1-2-3"),
            "Formula[= Binary[Binary[1 - 2] - 3]]"
        );
        assert_eq!(shape_of("=-A1^2"), "Formula[= Binary[Prefix[- A1] ^ 2]]");
        assert_eq!(shape_of("=A1%"), "Formula[= Postfix[A1 %]]");
        assert_eq!(shape_of("=A1&\"x\"=B1"), "Formula[= Binary[Binary[A1 & \"x\"] = B1]]");
    }

    #[test]
    fn if_formula_shape() {
        assert_eq!(
            shape_of("=IF(C2<E2,E2-C2,0)"),
            "Formula[= Call[IF ( Binary[C2 < E2] , Binary[E2 - C2] , 0 )]]"
        );
    }

    #[test]
    fn ranges_and_sheet_prefixes() {
        assert_eq!(
            shape_of("=SUM(H2:I2)"),
            "Formula[= Call[SUM ( Range[H2 : I2] )]]"
        );
        assert_eq!(
            shape_of("=loc!$B$2*2"),
            "Formula[= Binary[SheetRef[loc ! $B$2] * 2]]"
        );
        assert_eq!(
            shape_of("='My Sheet'!A1:B3"),
            "Formula[= SheetRef['My Sheet' ! Range[A1 : B3]]]"
        );
        assert_eq!(
            shape_of("=A1:Other!B2"),
            "Formula[= Range[A1 : SheetRef[Other ! B2]]]"
        );
    }

    #[test]
    fn arrays_and_empty_calls() {
        assert_eq!(
            shape_of("={1,2;3,4}"),
            "Formula[= Array[{ 1 , 2 ; 3 , 4 }]]"
        );
        assert_eq!(shape_of("=PI()"), "Formula[= Call[PI ( )]]");
        assert_eq!(shape_of("=(1)"), "Formula[= Paren[( 1 )]]");
    }

    #[test]
    fn navigation_by_path() {
        let tree = parse("=IF(C2<E2, E2-C2, 0)").unwrap();
        let c2 = tree.node_at(&[1, 2, 0]).unwrap();
        assert!(c2.is_cell_ref());
        assert_eq!(c2.text(), "C2");
        assert!(tree.node_at(&[1, 2, 0, 0]).is_none());
        assert_eq!(tree.root().id(), NodeId((tree.len() - 1) as u32));
        assert_eq!(tree.render(), "=IF(C2<E2,E2-C2,0)");
        assert_eq!(tree.formula(), "=IF(C2<E2, E2-C2, 0)");
        let cells: Vec<&str> = tree
            .terminals()
            .into_iter()
            .filter_map(|id| tree.node(id))
            .filter(|n| n.is_cell_ref())
            .map(|n| n.text())
            .collect();
        assert_eq!(cells, vec!["C2", "E2", "E2", "C2"]);
    }

    #[test]
    fn parse_errors() {
        for bad in ["=", "=1+", "=SUM(1 2)", "=A1:", "=Sheet!", "={1,}", "=1)"] {
            assert!(parse(bad).is_err(), "{bad} should not parse");
        }
        let err = parse("=SUM(A1").unwrap_err();
        assert!(err.to_string().contains("Unmatched"));
    }

    #[test]
    fn nesting_is_bounded() {
        let parens = |n: usize| format!("={}A1{}", "(".repeat(n), ")".repeat(n));
        assert!(parse(&parens(200)).is_ok());
        let long_sum: Vec<String> = (1..=300).map(|r| format!("A{r}")).collect();
        assert!(parse(&format!("={}", long_sum.join("+"))).is_ok());

        let deep = [
            parens(3000),
            format!("={}1", "-".repeat(3000)),
            format!("={}2", "2^".repeat(3000)),
            format!("={}1{}", "SUM(".repeat(MAX_NESTING + 1), ")".repeat(MAX_NESTING + 1)),
            format!("={}1{}", "{".repeat(MAX_NESTING + 1), "}".repeat(MAX_NESTING + 1)),
        ];
        for formula in &deep {
            let err = parse(formula).unwrap_err();
            assert!(err.message.contains("nests deeper"), "{}", err.message);
        }
    }

    #[test]
    fn unquoting() {
        assert_eq!(unquote_text("\"a\"\"b\""), "a\"b");
        assert_eq!(unquote_sheet_name("'O''Neil'"), "O'Neil");
        assert_eq!(unquote_sheet_name("loc"), "loc");
    }
}
