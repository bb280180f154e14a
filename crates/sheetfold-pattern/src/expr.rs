//! Expression IR handed to downstream rewriting and code generation.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use sheetfold_common::{CellReference, ExcelErrorKind};

/// Synthetic parameter `v{n}`, numbered from 1.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Param(pub u32);

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Plus,
    Percent,
}

impl UnaryOp {
    pub fn from_token(text: &str) -> Option<Self> {
        Some(match text {
            "-" => UnaryOp::Neg,
            "+" => UnaryOp::Plus,
            "%" => UnaryOp::Percent,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Plus => "+",
            UnaryOp::Percent => "%",
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Union,
}

impl BinaryOp {
    pub fn from_token(text: &str) -> Option<Self> {
        Some(match text {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "^" => BinaryOp::Pow,
            "&" => BinaryOp::Concat,
            "=" => BinaryOp::Eq,
            "<>" => BinaryOp::Ne,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Le,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::Ge,
            "," => BinaryOp::Union,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
            BinaryOp::Concat => "&",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Union => ",",
        }
    }

    /// Binding strength, matching the parser's table.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Union => 8,
            BinaryOp::Pow => 5,
            BinaryOp::Mul | BinaryOp::Div => 4,
            BinaryOp::Add | BinaryOp::Sub => 3,
            BinaryOp::Concat => 2,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => 1,
        }
    }

    pub fn is_comparison(self) -> bool {
        self.precedence() == 1
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Bool(bool),
    Error(ExcelErrorKind),
    /// A concrete cell access.
    Cell(CellReference),
    Param(Param),
    /// Defined name, whole-column or other non-cell identifier.
    Name(String),
    Range(Box<Expr>, Box<Expr>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Array(Vec<Vec<Expr>>),
    Lambda {
        params: Vec<Param>,
        body: Box<Expr>,
    },
}

impl Expr {
    pub fn is_lambda(&self) -> bool {
        matches!(self, Expr::Lambda { .. })
    }

    /// Parameters of a lambda, empty otherwise.
    pub fn params(&self) -> &[Param] {
        match self {
            Expr::Lambda { params, .. } => params,
            _ => &[],
        }
    }

    /// Visit this expression and all subexpressions, parents first.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Range(a, b) => {
                a.walk(f);
                b.walk(f);
            }
            Expr::Unary { operand, .. } => operand.walk(f),
            Expr::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Expr::Call { args, .. } => args.iter().for_each(|a| a.walk(f)),
            Expr::Array(rows) => rows.iter().flatten().for_each(|a| a.walk(f)),
            Expr::Lambda { body, .. } => body.walk(f),
            _ => {}
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Unary { op: UnaryOp::Percent, .. } => 6,
            Expr::Unary { .. } => 7,
            Expr::Lambda { .. } => 0,
            _ => u8::MAX,
        }
    }

    fn fmt_child(&self, f: &mut fmt::Formatter<'_>, min: u8) -> fmt::Result {
        if self.precedence() < min {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{n}"),
            Expr::Text(s) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
            Expr::Bool(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            Expr::Error(kind) => write!(f, "{kind}"),
            Expr::Cell(r) => write!(f, "{r}"),
            Expr::Param(p) => write!(f, "{p}"),
            Expr::Name(n) => f.write_str(n),
            Expr::Range(a, b) => write!(f, "{a}:{b}"),
            Expr::Unary { op: UnaryOp::Percent, operand } => {
                operand.fmt_child(f, 6)?;
                f.write_str("%")
            }
            Expr::Unary { op, operand } => {
                f.write_str(op.symbol())?;
                operand.fmt_child(f, 7)
            }
            Expr::Binary { op, left, right } => {
                let p = op.precedence();
                left.fmt_child(f, p)?;
                f.write_str(op.symbol())?;
                right.fmt_child(f, p + 1)
            }
            Expr::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Expr::Array(rows) => {
                f.write_str("{")?;
                for (r, row) in rows.iter().enumerate() {
                    if r > 0 {
                        f.write_str("; ")?;
                    }
                    for (c, item) in row.iter().enumerate() {
                        if c > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{item}")?;
                    }
                }
                f.write_str("}")
            }
            Expr::Lambda { params, body } => {
                f.write_str("(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ") -> {body}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[test]
    fn display_adds_needed_parentheses_only() {
        let sum = binary(BinaryOp::Sub, Expr::Param(Param(2)), Expr::Param(Param(1)));
        let product = binary(BinaryOp::Mul, sum, Expr::Number(2.0));
        assert_eq!(product.to_string(), "(v2-v1)*2");

        let chain = binary(
            BinaryOp::Sub,
            Expr::Number(1.0),
            binary(BinaryOp::Sub, Expr::Number(2.0), Expr::Number(3.0)),
        );
        assert_eq!(chain.to_string(), "1-(2-3)");
    }

    #[test]
    fn lambda_display_and_walk() {
        let lambda = Expr::Lambda {
            params: vec![Param(1), Param(2)],
            body: Box::new(Expr::Call {
                name: "SUM".into(),
                args: vec![Expr::Range(
                    Box::new(Expr::Param(Param(1))),
                    Box::new(Expr::Param(Param(2))),
                )],
            }),
        };
        assert_eq!(lambda.to_string(), "(v1, v2) -> SUM(v1:v2)");
        assert_eq!(lambda.params(), &[Param(1), Param(2)]);

        let mut seen = Vec::new();
        lambda.walk(&mut |e| {
            if let Expr::Param(p) = e {
                seen.push(*p);
            }
        });
        assert_eq!(seen, vec![Param(1), Param(2)]);
    }

    #[test]
    fn operators_roundtrip_through_symbols() {
        for sym in ["+", "-", "*", "/", "^", "&", "=", "<>", "<", "<=", ">", ">=", ","] {
            assert_eq!(BinaryOp::from_token(sym).unwrap().symbol(), sym);
        }
        assert_eq!(UnaryOp::from_token("%"), Some(UnaryOp::Percent));
        assert!(BinaryOp::Ge.is_comparison());
    }
}
