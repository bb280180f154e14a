//! Small reference evaluator over the expression IR.
//!
//! It exists to check extracted rules against the formulas they replace, so it
//! covers scalar arithmetic, comparisons, ranges and a handful of common
//! functions rather than the full Excel library.

use rustc_hash::FxHashMap;
use sheetfold_common::{CellAddress, CellReference, ExcelError, ExcelErrorKind, LiteralValue};
use sheetfold_parse::parse;

use crate::error::{PatternError, Result};
use crate::expr::{BinaryOp, Expr, Param, UnaryOp};
use crate::extract::extract;
use crate::source::SpreadsheetSource;

const MAX_DEPTH: usize = 64;

pub struct Evaluator<'s, S: SpreadsheetSource + ?Sized> {
    source: &'s S,
    env: FxHashMap<Param, CellReference>,
    depth: usize,
}

impl<'s, S: SpreadsheetSource + ?Sized> Evaluator<'s, S> {
    pub fn new(source: &'s S) -> Self {
        Evaluator {
            source,
            env: FxHashMap::default(),
            depth: 0,
        }
    }

    fn nested(&self, env: FxHashMap<Param, CellReference>) -> Self {
        Evaluator {
            source: self.source,
            env,
            depth: self.depth + 1,
        }
    }

    /// Value of a cell: literal content, or its formula evaluated in place.
    pub fn evaluate_cell(&self, cell: &CellAddress) -> Result<LiteralValue> {
        let value = self.source.cell_value(&cell.sheet, cell.row, cell.col);
        let Some(text) = value.as_formula() else {
            return Ok(value);
        };
        let tree = parse(text).map_err(|e| PatternError::parse(cell, e))?;
        let expr = extract(&tree, &cell.sheet, None)?;
        Ok(self.nested(FxHashMap::default()).evaluate(&expr))
    }

    /// Call a lambda with parameters v1..vn bound to `args`. A non-lambda is
    /// evaluated as is when `args` is empty.
    pub fn apply(&self, function: &Expr, args: &[CellReference]) -> LiteralValue {
        match function {
            Expr::Lambda { params, body } => {
                if params.len() != args.len() {
                    return error(ExcelErrorKind::Value, "wrong number of arguments");
                }
                let env = params.iter().copied().zip(args.iter().cloned()).collect();
                self.nested(env).evaluate(body)
            }
            other if args.is_empty() => self.evaluate(other),
            _ => error(ExcelErrorKind::Value, "not a lambda"),
        }
    }

    pub fn evaluate(&self, expr: &Expr) -> LiteralValue {
        if self.depth > MAX_DEPTH {
            return LiteralValue::Error(ExcelError::new(ExcelErrorKind::Circ));
        }
        match expr {
            Expr::Number(n) => LiteralValue::Number(*n),
            Expr::Text(s) => LiteralValue::Text(s.clone()),
            Expr::Bool(b) => LiteralValue::Boolean(*b),
            Expr::Error(kind) => LiteralValue::Error(ExcelError::new(*kind)),
            Expr::Cell(_) | Expr::Param(_) => match self.reference_of(expr) {
                Some(r) => self.read(&r),
                None => error(ExcelErrorKind::Name, "unbound parameter"),
            },
            Expr::Name(name) => error(ExcelErrorKind::Name, name.clone()),
            Expr::Range(a, b) => self.range(a, b),
            Expr::Unary { op, operand } => {
                let v = self.evaluate(operand);
                self.unary(*op, v)
            }
            Expr::Binary { op, left, right } => {
                let l = self.evaluate(left);
                let r = self.evaluate(right);
                self.binary(*op, l, r)
            }
            Expr::Call { name, args } => self.call(name, args),
            Expr::Array(rows) => LiteralValue::Array(
                rows.iter()
                    .map(|row| row.iter().map(|e| self.evaluate(e)).collect())
                    .collect(),
            ),
            Expr::Lambda { .. } => error(ExcelErrorKind::Value, "lambda used as value"),
        }
    }

    fn reference_of(&self, expr: &Expr) -> Option<CellReference> {
        match expr {
            Expr::Cell(r) => Some(r.clone()),
            Expr::Param(p) => self.env.get(p).cloned(),
            _ => None,
        }
    }

    fn read(&self, reference: &CellReference) -> LiteralValue {
        let cell = reference.address();
        match self.nested(FxHashMap::default()).evaluate_cell(&cell) {
            Ok(v) => v,
            Err(e) => error(ExcelErrorKind::Name, e.to_string()),
        }
    }

    fn range(&self, a: &Expr, b: &Expr) -> LiteralValue {
        let (Some(start), Some(end)) = (self.reference_of(a), self.reference_of(b)) else {
            return error(ExcelErrorKind::Ref, "range endpoints must be cells");
        };
        if start.sheet != end.sheet {
            return error(ExcelErrorKind::Ref, "range spans sheets");
        }
        let (r0, r1) = (start.row.min(end.row), start.row.max(end.row));
        let (c0, c1) = (start.col.min(end.col), start.col.max(end.col));
        let rows = (r0..=r1)
            .map(|row| {
                (c0..=c1)
                    .map(|col| self.read(&CellReference::new(start.sheet.clone(), row, col, false, false)))
                    .collect()
            })
            .collect();
        LiteralValue::Array(rows)
    }

    /* ===================  operators  =================== */

    fn unary(&self, op: UnaryOp, v: LiteralValue) -> LiteralValue {
        let n = match coerce_number(&v) {
            Ok(n) => n,
            Err(e) => return LiteralValue::Error(e),
        };
        LiteralValue::Number(match op {
            UnaryOp::Neg => -n,
            UnaryOp::Plus => n,
            UnaryOp::Percent => n / 100.0,
        })
    }

    fn binary(&self, op: BinaryOp, l: LiteralValue, r: LiteralValue) -> LiteralValue {
        if op.is_comparison() {
            return compare(op, l, r);
        }
        if op == BinaryOp::Concat {
            if let LiteralValue::Error(_) = l {
                return l;
            }
            if let LiteralValue::Error(_) = r {
                return r;
            }
            return LiteralValue::Text(format!("{}{}", coerce_text(&l), coerce_text(&r)));
        }
        let (a, b) = match (coerce_number(&l), coerce_number(&r)) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(e), _) | (_, Err(e)) => return LiteralValue::Error(e),
        };
        let n = match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => {
                if b == 0.0 {
                    return LiteralValue::Error(ExcelError::new(ExcelErrorKind::Div));
                }
                a / b
            }
            BinaryOp::Pow => {
                // negative base with non-integer exponent -> #NUM!
                if a < 0.0 && b.fract() != 0.0 {
                    return LiteralValue::Error(ExcelError::new(ExcelErrorKind::Num));
                }
                a.powf(b)
            }
            _ => return error(ExcelErrorKind::Value, format!("operator {}", op.symbol())),
        };
        if n.is_finite() {
            LiteralValue::Number(n)
        } else {
            LiteralValue::Error(ExcelError::new(ExcelErrorKind::Num))
        }
    }

    /* ===================  function calls  =================== */

    fn call(&self, name: &str, args: &[Expr]) -> LiteralValue {
        match name {
            "IF" => {
                if args.is_empty() || args.len() > 3 {
                    return error(ExcelErrorKind::Value, "IF takes 1 to 3 arguments");
                }
                let cond = self.evaluate(&args[0]);
                if let LiteralValue::Error(_) = cond {
                    return cond;
                }
                let branch = if cond.is_truthy() { args.get(1) } else { args.get(2) };
                match branch {
                    Some(e) => self.evaluate(e),
                    None if cond.is_truthy() => LiteralValue::Number(0.0),
                    None => LiteralValue::Boolean(false),
                }
            }
            "SUM" => self.fold_numbers(args, |ns| Some(ns.iter().sum())),
            "PRODUCT" => self.fold_numbers(args, |ns| Some(ns.iter().product())),
            "MIN" => self.fold_numbers(args, |ns| Some(ns.iter().copied().reduce(f64::min).unwrap_or(0.0))),
            "MAX" => self.fold_numbers(args, |ns| Some(ns.iter().copied().reduce(f64::max).unwrap_or(0.0))),
            "AVERAGE" => self.fold_numbers(args, |ns| {
                (!ns.is_empty()).then(|| ns.iter().sum::<f64>() / ns.len() as f64)
            }),
            "COUNT" => self.fold_numbers(args, |ns| Some(ns.len() as f64)),
            "AND" | "OR" => {
                let mut values = Vec::new();
                for arg in args {
                    match flatten(self.evaluate(arg)) {
                        Ok(vs) => values.extend(vs),
                        Err(e) => return LiteralValue::Error(e),
                    }
                }
                let truths = values
                    .iter()
                    .filter(|v| !matches!(v, LiteralValue::Empty | LiteralValue::Text(_)));
                LiteralValue::Boolean(if name == "AND" {
                    truths.fold(true, |acc, v| acc && v.is_truthy())
                } else {
                    truths.fold(false, |acc, v| acc || v.is_truthy())
                })
            }
            "NOT" => match args {
                [arg] => match self.evaluate(arg) {
                    LiteralValue::Error(e) => LiteralValue::Error(e),
                    v => LiteralValue::Boolean(!v.is_truthy()),
                },
                _ => error(ExcelErrorKind::Value, "NOT takes 1 argument"),
            },
            "ABS" => match args {
                [arg] => match coerce_number(&self.evaluate(arg)) {
                    Ok(n) => LiteralValue::Number(n.abs()),
                    Err(e) => LiteralValue::Error(e),
                },
                _ => error(ExcelErrorKind::Value, "ABS takes 1 argument"),
            },
            "ROUND" => match args {
                [value, digits] => {
                    let (n, d) = match (
                        coerce_number(&self.evaluate(value)),
                        coerce_number(&self.evaluate(digits)),
                    ) {
                        (Ok(n), Ok(d)) => (n, d.trunc() as i32),
                        (Err(e), _) | (_, Err(e)) => return LiteralValue::Error(e),
                    };
                    let factor = 10f64.powi(d);
                    LiteralValue::Number((n * factor).round() / factor)
                }
                _ => error(ExcelErrorKind::Value, "ROUND takes 2 arguments"),
            },
            _ => error(ExcelErrorKind::Name, format!("unknown function {name}")),
        }
    }

    /// Numeric aggregate: scalar arguments are coerced, text and blanks inside
    /// ranges are ignored, errors propagate.
    fn fold_numbers(&self, args: &[Expr], f: impl Fn(&[f64]) -> Option<f64>) -> LiteralValue {
        let mut numbers = Vec::new();
        for arg in args {
            match self.evaluate(arg) {
                LiteralValue::Array(rows) => {
                    for v in rows.into_iter().flatten() {
                        match v {
                            LiteralValue::Number(n) => numbers.push(n),
                            LiteralValue::Int(i) => numbers.push(i as f64),
                            LiteralValue::Error(e) => return LiteralValue::Error(e),
                            _ => {}
                        }
                    }
                }
                scalar => match coerce_number(&scalar) {
                    Ok(n) => numbers.push(n),
                    Err(e) => return LiteralValue::Error(e),
                },
            }
        }
        match f(&numbers) {
            Some(n) => LiteralValue::Number(n),
            None => LiteralValue::Error(ExcelError::new(ExcelErrorKind::Div)),
        }
    }
}

fn error(kind: ExcelErrorKind, message: impl Into<String>) -> LiteralValue {
    LiteralValue::Error(ExcelError::new(kind).with_message(message))
}

fn flatten(v: LiteralValue) -> std::result::Result<Vec<LiteralValue>, ExcelError> {
    match v {
        LiteralValue::Error(e) => Err(e),
        LiteralValue::Array(rows) => Ok(rows.into_iter().flatten().collect()),
        other => Ok(vec![other]),
    }
}

/* ---------- coercion helpers ---------- */

fn coerce_number(v: &LiteralValue) -> std::result::Result<f64, ExcelError> {
    use LiteralValue::*;
    match v {
        Number(n) => Ok(*n),
        Int(i) => Ok(*i as f64),
        Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Text(s) => s.trim().parse::<f64>().map_err(|_| {
            ExcelError::new(ExcelErrorKind::Value)
                .with_message(format!("Cannot convert '{s}' to number"))
        }),
        Empty => Ok(0.0),
        Error(e) => Err(e.clone()),
        Array(_) => Err(ExcelError::new(ExcelErrorKind::Value)),
    }
}

fn coerce_text(v: &LiteralValue) -> String {
    use LiteralValue::*;
    match v {
        Text(s) => s.clone(),
        Number(n) => n.to_string(),
        Int(i) => i.to_string(),
        Boolean(b) => if *b { "TRUE" } else { "FALSE" }.into(),
        Error(e) => e.to_string(),
        Empty => "".into(),
        Array(_) => format!("{v:?}"),
    }
}

/* ---------- comparison ---------- */

fn compare(op: BinaryOp, left: LiteralValue, right: LiteralValue) -> LiteralValue {
    use LiteralValue::*;
    if matches!(left, Error(_)) {
        return left;
    }
    if matches!(right, Error(_)) {
        return right;
    }
    let ordering = match (&left, &right) {
        (Text(a), Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
        (Empty, Text(s)) | (Text(s), Empty) if s.is_empty() => std::cmp::Ordering::Equal,
        // numbers < text < booleans
        (Text(_), Number(_) | Int(_) | Empty) | (Boolean(_), Text(_)) => {
            std::cmp::Ordering::Greater
        }
        (Number(_) | Int(_) | Empty, Text(_)) | (Text(_), Boolean(_)) => std::cmp::Ordering::Less,
        _ => match (coerce_number(&left), coerce_number(&right)) {
            (Ok(a), Ok(b)) => a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal),
            (Err(e), _) | (_, Err(e)) => return Error(e),
        },
    };
    use std::cmp::Ordering::*;
    Boolean(match op {
        BinaryOp::Eq => ordering == Equal,
        BinaryOp::Ne => ordering != Equal,
        BinaryOp::Lt => ordering == Less,
        BinaryOp::Le => ordering != Greater,
        BinaryOp::Gt => ordering == Greater,
        BinaryOp::Ge => ordering != Less,
        _ => return error(ExcelErrorKind::Value, "not a comparison"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemorySource;

    fn eval(src: &InMemorySource, formula: &str) -> LiteralValue {
        let tree = parse(formula).unwrap();
        let expr = extract(&tree, "S", None).unwrap();
        Evaluator::new(src).evaluate(&expr)
    }

    fn src() -> InMemorySource {
        InMemorySource::new()
            .with_value_a1("S", "A1", LiteralValue::Number(4.0))
            .with_value_a1("S", "A2", LiteralValue::Int(6))
            .with_value_a1("S", "A3", LiteralValue::from("skip"))
            .with_formula_a1("S", "B1", "=A1*10")
    }

    #[test]
    fn arithmetic_and_precedence() {
        let s = src();
        assert_eq!(eval(&s, "=1+2*3"), LiteralValue::Number(7.0));
        assert_eq!(eval(&s, "=-A1^2"), LiteralValue::Number(16.0));
        assert_eq!(eval(&s, "=50%*A2"), LiteralValue::Number(3.0));
        assert_eq!(eval(&s, "=B1+1"), LiteralValue::Number(41.0));
        assert_eq!(eval(&s, "=\"n=\"&A2"), LiteralValue::Text("n=6".into()));
    }

    #[test]
    fn errors_propagate() {
        let s = src();
        assert_eq!(eval(&s, "=A1/0"), LiteralValue::Error(ExcelError::new(ExcelErrorKind::Div)));
        assert!(matches!(eval(&s, "=A3+1"), LiteralValue::Error(e) if e.kind == ExcelErrorKind::Value));
        assert!(matches!(eval(&s, "=FOO(1)"), LiteralValue::Error(e) if e.kind == ExcelErrorKind::Name));
    }

    #[test]
    fn functions_over_ranges() {
        let s = src();
        assert_eq!(eval(&s, "=SUM(A1:A3)"), LiteralValue::Number(10.0));
        assert_eq!(eval(&s, "=AVERAGE(A1:A2)"), LiteralValue::Number(5.0));
        assert_eq!(eval(&s, "=MAX(A1:A2,7)"), LiteralValue::Number(7.0));
        assert_eq!(eval(&s, "=IF(A1<A2,A2-A1,0)"), LiteralValue::Number(2.0));
        assert_eq!(eval(&s, "=AND(A1>1,NOT(FALSE))"), LiteralValue::Boolean(true));
        assert_eq!(eval(&s, "=ROUND(2.346,2)"), LiteralValue::Number(2.35));
    }

    #[test]
    fn self_reference_is_circular() {
        let s = InMemorySource::new().with_formula_a1("S", "A1", "=A1+1");
        let v = Evaluator::new(&s)
            .evaluate_cell(&CellAddress::from_a1("S", "A1").unwrap())
            .unwrap();
        assert!(matches!(v, LiteralValue::Error(e) if e.kind == ExcelErrorKind::Circ));
    }

    #[test]
    fn lambda_application_binds_parameters() {
        let s = src();
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
        let args = [
            CellReference::from_a1("S", "A1").unwrap(),
            CellReference::from_a1("S", "A2").unwrap(),
        ];
        assert_eq!(Evaluator::new(&s).apply(&lambda, &args), LiteralValue::Number(10.0));
        assert!(matches!(
            Evaluator::new(&s).apply(&lambda, &args[..1]),
            LiteralValue::Error(_)
        ));
    }
}
