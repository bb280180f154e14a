//! Translation of parse trees into the expression IR, folding bound reference
//! occurrences into lambda parameters.

use sheetfold_common::{CellReference, ExcelErrorKind};
use sheetfold_parse::{NodeRef, ParseTree, Rule, TokenKind, unquote_text};

use crate::error::{PatternError, Result};
use crate::expr::{BinaryOp, Expr, Param, UnaryOp};
use crate::resolve::{child_scope, decode_reference};
use crate::variability::NodeBinding;

/// Canonical parameter assignment: the i-th reference in sorted order is
/// `v{i+1}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterTable {
    references: Vec<CellReference>,
}

impl ParameterTable {
    /// Sorts and deduplicates `references`.
    pub fn new(mut references: Vec<CellReference>) -> Self {
        references.sort();
        references.dedup();
        ParameterTable { references }
    }

    pub fn from_binding(binding: &NodeBinding) -> Self {
        Self::new(binding.values().cloned().collect())
    }

    pub fn param_for(&self, reference: &CellReference) -> Option<Param> {
        self.references
            .binary_search(reference)
            .ok()
            .map(|i| Param(i as u32 + 1))
    }

    pub fn params(&self) -> Vec<Param> {
        (1..=self.references.len() as u32).map(Param).collect()
    }

    pub fn references(&self) -> &[CellReference] {
        &self.references
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}

/// Translate `tree` read on `sheet`.
///
/// Without a binding, or with an empty one, the plain expression comes back.
/// Otherwise the result is a lambda over the binding's distinct references in
/// canonical order.
pub fn extract(tree: &ParseTree, sheet: &str, binding: Option<&NodeBinding>) -> Result<Expr> {
    match binding {
        Some(binding) if !binding.is_empty() => {
            let table = ParameterTable::from_binding(binding);
            extract_with_table(tree, sheet, binding, &table)
        }
        _ => Translator {
            binding: None,
            table: None,
        }
        .translate(tree.root(), sheet),
    }
}

/// Like [`extract`] with a caller-supplied parameter table, typically a
/// cluster's sorted reference list.
pub fn extract_with_table(
    tree: &ParseTree,
    sheet: &str,
    binding: &NodeBinding,
    table: &ParameterTable,
) -> Result<Expr> {
    let body = Translator {
        binding: Some(binding),
        table: Some(table),
    }
    .translate(tree.root(), sheet)?;
    if table.is_empty() {
        return Ok(body);
    }
    Ok(Expr::Lambda {
        params: table.params(),
        body: Box::new(body),
    })
}

struct Translator<'b> {
    binding: Option<&'b NodeBinding>,
    table: Option<&'b ParameterTable>,
}

impl Translator<'_> {
    fn translate(&self, node: NodeRef<'_>, sheet: &str) -> Result<Expr> {
        match node.rule() {
            None => self.terminal(node, sheet),
            Some(rule) => self.nonterminal(rule, node, sheet),
        }
    }

    fn terminal(&self, node: NodeRef<'_>, sheet: &str) -> Result<Expr> {
        let Some(token) = node.token() else {
            return Ok(Expr::Error(ExcelErrorKind::Value));
        };
        let text = token.value.as_str();
        Ok(match token.kind {
            TokenKind::CellRef => {
                if let Some(bound) = self.binding.and_then(|b| b.get(&node.id())) {
                    let param = self
                        .table
                        .and_then(|t| t.param_for(bound))
                        .ok_or_else(|| PatternError::UnknownParameter {
                            reference: bound.clone(),
                        })?;
                    Expr::Param(param)
                } else {
                    match decode_reference(node, sheet) {
                        Some(reference) => Expr::Cell(reference),
                        None => Expr::Error(ExcelErrorKind::Ref),
                    }
                }
            }
            TokenKind::Number => text
                .parse::<f64>()
                .map_or(Expr::Error(ExcelErrorKind::Num), Expr::Number),
            TokenKind::Text => Expr::Text(unquote_text(text)),
            TokenKind::Logical => Expr::Bool(text.eq_ignore_ascii_case("TRUE")),
            TokenKind::Error => {
                Expr::Error(ExcelErrorKind::parse(text).unwrap_or(ExcelErrorKind::Value))
            }
            _ => Expr::Name(text.to_string()),
        })
    }

    fn nonterminal(&self, rule: Rule, node: NodeRef<'_>, sheet: &str) -> Result<Expr> {
        let child = |i: usize| {
            node.child(i)
                .ok_or(PatternError::MalformedTree { rule, child: i })
        };
        match rule {
            Rule::Formula => self.translate(child(1)?, sheet),
            Rule::Paren => self.translate(child(1)?, sheet),
            Rule::SheetRef => {
                let scope = child_scope(node, sheet);
                self.translate(child(2)?, &scope)
            }
            Rule::Range => Ok(Expr::Range(
                Box::new(self.translate(child(0)?, sheet)?),
                Box::new(self.translate(child(2)?, sheet)?),
            )),
            Rule::Prefix => Ok(Expr::Unary {
                op: UnaryOp::from_token(child(0)?.text())
                    .ok_or(PatternError::MalformedTree { rule, child: 0 })?,
                operand: Box::new(self.translate(child(1)?, sheet)?),
            }),
            Rule::Postfix => Ok(Expr::Unary {
                op: UnaryOp::Percent,
                operand: Box::new(self.translate(child(0)?, sheet)?),
            }),
            Rule::Binary => {
                let op = BinaryOp::from_token(child(1)?.text())
                    .ok_or(PatternError::MalformedTree { rule, child: 1 })?;
                Ok(Expr::Binary {
                    op,
                    left: Box::new(self.translate(child(0)?, sheet)?),
                    right: Box::new(self.translate(child(2)?, sheet)?),
                })
            }
            Rule::Call => {
                let name = child(0)?.text().to_ascii_uppercase();
                let args = node
                    .children()
                    .skip(2)
                    .filter(|c| !is_punctuation(c))
                    .map(|c| self.translate(c, sheet))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expr::Call { name, args })
            }
            Rule::Array => {
                let mut rows = vec![Vec::new()];
                for c in node.children() {
                    match c.token().map(|t| t.kind) {
                        Some(TokenKind::RowSep) => rows.push(Vec::new()),
                        Some(
                            TokenKind::OpenBrace | TokenKind::CloseBrace | TokenKind::ArgSep,
                        ) => {}
                        _ => {
                            let item = self.translate(c, sheet)?;
                            if let Some(row) = rows.last_mut() {
                                row.push(item);
                            }
                        }
                    }
                }
                Ok(Expr::Array(rows))
            }
        }
    }
}

fn is_punctuation(node: &NodeRef<'_>) -> bool {
    matches!(
        node.token().map(|t| t.kind),
        Some(TokenKind::ArgSep | TokenKind::CloseParen | TokenKind::OpenParen)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetfold_parse::{Parser, Token, parse};

    fn plain(formula: &str) -> String {
        extract(&parse(formula).unwrap(), "S", None).unwrap().to_string()
    }

    #[test]
    fn plain_translation() {
        assert_eq!(plain("=IF(C2<E2,(E2-C2),0)"), "IF(S!C2<S!E2, S!E2-S!C2, 0)");
        assert_eq!(plain("=sum(loc!B2:B3)*-1"), "SUM(loc!B2:loc!B3)*-1");
        assert_eq!(plain("={1,\"a\"\"b\";TRUE,#N/A}"), "{1, \"a\"\"b\"; TRUE, #N/A}");
        assert_eq!(plain("=rate*50%"), "rate*50%");
    }

    #[test]
    fn empty_binding_is_not_wrapped() {
        let tree = parse("=SUM($H$2+$I$2)").unwrap();
        let expr = extract(&tree, "inventory", Some(&NodeBinding::default())).unwrap();
        assert!(!expr.is_lambda());
    }

    #[test]
    fn parameter_table_is_sorted_and_deduplicated() {
        let e2 = CellReference::from_a1("P", "E2").unwrap();
        let c2 = CellReference::from_a1("P", "C2").unwrap();
        let table = ParameterTable::new(vec![e2.clone(), c2.clone(), e2.clone()]);
        assert_eq!(table.references(), &[c2.clone(), e2.clone()]);
        assert_eq!(table.param_for(&c2), Some(Param(1)));
        assert_eq!(table.param_for(&e2), Some(Param(2)));
        assert_eq!(table.params(), vec![Param(1), Param(2)]);
    }

    #[test]
    fn binding_outside_table_is_an_error() {
        let tree = parse("=A1").unwrap();
        let id = tree.node_at(&[1]).unwrap().id();
        let mut binding = NodeBinding::default();
        binding.insert(id, CellReference::from_a1("S", "A1").unwrap());
        let table = ParameterTable::new(vec![CellReference::from_a1("S", "B1").unwrap()]);
        let err = extract_with_table(&tree, "S", &binding, &table).unwrap_err();
        assert!(matches!(err, PatternError::UnknownParameter { .. }));
    }

    #[test]
    fn unknown_operators_are_malformed() {
        let tree = |formula: &str, kinds: &[TokenKind]| {
            let tokens = formula
                .char_indices()
                .zip(kinds)
                .map(|((i, c), kind)| Token::new(c.to_string(), *kind, i, i + 1))
                .collect();
            Parser::new(formula, tokens).parse().unwrap()
        };

        let prefix = tree("=~1", &[TokenKind::Equals, TokenKind::OpPrefix, TokenKind::Number]);
        assert!(matches!(
            extract(&prefix, "S", None),
            Err(PatternError::MalformedTree { rule: Rule::Prefix, child: 0 })
        ));

        let infix = tree(
            "=1~2",
            &[TokenKind::Equals, TokenKind::Number, TokenKind::OpInfix, TokenKind::Number],
        );
        assert!(matches!(
            extract(&infix, "S", None),
            Err(PatternError::MalformedTree { rule: Rule::Binary, child: 1 })
        ));
    }
}
