// Formula evaluator - the contract the scheduler calls, plus a small arithmetic implementation

use crate::cell_id::CellId;

use super::parser::{self, Expr, Op};
use super::refs::range_size;

/// Evaluates formula text to a display string.
///
/// `resolve` returns the current display value of a referenced cell (empty for
/// cells that do not exist). `Err` carries an evaluator-defined error code such
/// as `#DIV/0!`, which the scheduler writes into `computed` unchanged.
pub trait Evaluator {
    fn evaluate(&self, formula: &str, resolve: &dyn Fn(CellId) -> String) -> Result<String, String>;
}

/// Error codes produced by [`ArithmeticEvaluator`].
pub mod codes {
    pub const DIV0: &str = "#DIV/0!";
    pub const VALUE: &str = "#VALUE!";
    pub const NAME: &str = "#NAME?";
    pub const NUM: &str = "#NUM!";
    pub const PARSE: &str = "#ERROR!";
    pub const REF: &str = "#REF!";
}

/// Reference evaluator: arithmetic, comparison, concatenation and
/// SUM / MIN / MAX / AVERAGE / COUNT.
///
/// Empty cells are `0` in arithmetic and `""` in concatenation. Error strings
/// read from referenced cells propagate unchanged. A range covering more than
/// `max_range_cells` cells evaluates to `#REF!` without being read.
#[derive(Debug, Clone, Copy)]
pub struct ArithmeticEvaluator {
    max_range_cells: usize,
}

impl Default for ArithmeticEvaluator {
    fn default() -> Self {
        Self::new(100_000)
    }
}

impl ArithmeticEvaluator {
    pub fn new(max_range_cells: usize) -> Self {
        Self { max_range_cells }
    }

    fn range_in_limit(&self, a: CellId, b: CellId) -> bool {
        range_size(a, b) <= self.max_range_cells
    }
}

impl Evaluator for ArithmeticEvaluator {
    fn evaluate(&self, formula: &str, resolve: &dyn Fn(CellId) -> String) -> Result<String, String> {
        let expr = parser::parse(formula).map_err(|_| codes::PARSE.to_string())?;
        match self.eval_expr(&expr, resolve) {
            Value::Number(n) if !n.is_finite() => Err(codes::NUM.to_string()),
            Value::Error(e) => Err(e),
            value => Ok(value.to_text()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(String),
}

impl Value {
    /// Interpret a display string read from the cell store.
    fn from_display(s: String) -> Self {
        if s.is_empty() {
            return Value::Empty;
        }
        if is_error_code(&s) {
            return Value::Error(s);
        }
        if let Ok(n) = s.trim().parse::<f64>() {
            return Value::Number(n);
        }
        match s.as_str() {
            "TRUE" => Value::Boolean(true),
            "FALSE" => Value::Boolean(false),
            _ => Value::Text(s),
        }
    }

    fn to_number(&self) -> Result<f64, String> {
        match self {
            Value::Empty => Ok(0.0),
            Value::Number(n) => Ok(*n),
            Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().parse().map_err(|_| codes::VALUE.to_string()),
            Value::Error(e) => Err(e.clone()),
        }
    }

    fn to_text(&self) -> String {
        match self {
            Value::Empty => String::new(),
            Value::Number(n) => format_number(*n),
            Value::Text(s) => s.clone(),
            Value::Boolean(b) => if *b { "TRUE".to_string() } else { "FALSE".to_string() },
            Value::Error(e) => e.clone(),
        }
    }
}

/// True for strings shaped like a spreadsheet error code (`#DIV/0!`, `#NAME?`).
pub fn is_error_code(s: &str) -> bool {
    s.starts_with('#') && (s.ends_with('!') || s.ends_with('?') || s == "#N/A")
}

/// Integers render without a decimal point, everything else in shortest form.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl ArithmeticEvaluator {
    fn eval_expr(&self, expr: &Expr, resolve: &dyn Fn(CellId) -> String) -> Value {
        match expr {
            Expr::Number(n) => Value::Number(*n),
            Expr::Text(s) => Value::Text(s.clone()),
            Expr::Boolean(b) => Value::Boolean(*b),
            Expr::CellRef(id) => Value::from_display(resolve(*id)),
            Expr::Range(a, b) if !self.range_in_limit(*a, *b) => Value::Error(codes::REF.to_string()),
            // A bare range outside a function only makes sense as its top-left cell
            Expr::Range(a, _) => Value::from_display(resolve(*a)),
            Expr::Neg(inner) => match self.eval_expr(inner, resolve).to_number() {
                Ok(n) => Value::Number(-n),
                Err(e) => Value::Error(e),
            },
            Expr::Function { name, args } => self.eval_function(name, args, resolve),
            Expr::BinaryOp { op, left, right } => {
                let l = self.eval_expr(left, resolve);
                if let Value::Error(_) = l {
                    return l;
                }
                let r = self.eval_expr(right, resolve);
                if let Value::Error(_) = r {
                    return r;
                }
                eval_binary(*op, l, r)
            }
        }
    }

    fn eval_function(&self, name: &str, args: &[Expr], resolve: &dyn Fn(CellId) -> String) -> Value {
        // Collect numeric arguments. Text and blanks inside ranges are skipped;
        // direct scalar arguments must coerce.
        let mut nums = Vec::new();
        for arg in args {
            match arg {
                Expr::Range(a, b) if !self.range_in_limit(*a, *b) => {
                    return Value::Error(codes::REF.to_string());
                }
                Expr::Range(a, b) => {
                    for row in a.row.min(b.row)..=a.row.max(b.row) {
                        for col in a.col.min(b.col)..=a.col.max(b.col) {
                            match Value::from_display(resolve(CellId::new(col, row))) {
                                Value::Number(n) => nums.push(n),
                                Value::Error(e) => return Value::Error(e),
                                _ => {}
                            }
                        }
                    }
                }
                Expr::CellRef(id) => match Value::from_display(resolve(*id)) {
                    Value::Number(n) => nums.push(n),
                    Value::Error(e) => return Value::Error(e),
                    _ => {}
                },
                other => match self.eval_expr(other, resolve).to_number() {
                    Ok(n) => nums.push(n),
                    Err(e) => return Value::Error(e),
                },
            }
        }

        match name {
            "SUM" => Value::Number(nums.iter().sum()),
            "COUNT" => Value::Number(nums.len() as f64),
            "MIN" => Value::Number(nums.iter().copied().reduce(f64::min).unwrap_or(0.0)),
            "MAX" => Value::Number(nums.iter().copied().reduce(f64::max).unwrap_or(0.0)),
            "AVERAGE" => {
                if nums.is_empty() {
                    Value::Error(codes::DIV0.to_string())
                } else {
                    Value::Number(nums.iter().sum::<f64>() / nums.len() as f64)
                }
            }
            _ => Value::Error(codes::NAME.to_string()),
        }
    }
}

fn eval_binary(op: Op, l: Value, r: Value) -> Value {
    match op {
        Op::Concat => Value::Text(format!("{}{}", l.to_text(), r.to_text())),
        Op::Lt | Op::Gt | Op::Eq | Op::LtEq | Op::GtEq | Op::NotEq => {
            let ord = match (l.to_number(), r.to_number()) {
                (Ok(a), Ok(b)) => a.partial_cmp(&b),
                _ => Some(l.to_text().to_lowercase().cmp(&r.to_text().to_lowercase())),
            };
            let Some(ord) = ord else {
                return Value::Error(codes::NUM.to_string());
            };
            use std::cmp::Ordering::*;
            Value::Boolean(match op {
                Op::Lt => ord == Less,
                Op::Gt => ord == Greater,
                Op::Eq => ord == Equal,
                Op::LtEq => ord != Greater,
                Op::GtEq => ord != Less,
                _ => ord != Equal,
            })
        }
        _ => {
            let (a, b) = match (l.to_number(), r.to_number()) {
                (Ok(a), Ok(b)) => (a, b),
                (Err(e), _) | (_, Err(e)) => return Value::Error(e),
            };
            match op {
                Op::Add => Value::Number(a + b),
                Op::Sub => Value::Number(a - b),
                Op::Mul => Value::Number(a * b),
                Op::Div if b == 0.0 => Value::Error(codes::DIV0.to_string()),
                Op::Div => Value::Number(a / b),
                _ => Value::Number(a.powf(b)),
            }
        }
    }
}
