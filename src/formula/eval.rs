//! Expression evaluation over named numeric variables
//!
//! Booleans are represented as 1.0 / 0.0; any non-zero value is true.

use std::collections::HashMap;

use super::ast::{BinOp, Builtin, Expr, UnaryOp};
use crate::error::{RatingError, Result};
use crate::table::Row;

/// Variable environment for one evaluation
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    values: HashMap<String, f64>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind every numeric field of a matched row
    pub fn from_row(row: &Row) -> Self {
        let values = row
            .numeric_fields()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self { values }
    }

    pub fn set(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

pub fn evaluate(expr: &Expr, bindings: &Bindings) -> Result<f64> {
    let value = eval_expr(expr, bindings)?;
    if !value.is_finite() {
        return Err(RatingError::Expression(format!("result is not finite ({})", value)));
    }
    Ok(value)
}

fn eval_expr(expr: &Expr, bindings: &Bindings) -> Result<f64> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Var(name) => bindings
            .get(name)
            .ok_or_else(|| RatingError::Expression(format!("unknown identifier '{}'", name))),
        Expr::Unary { op, operand } => {
            let v = eval_expr(operand, bindings)?;
            Ok(match op {
                UnaryOp::Neg => -v,
                UnaryOp::Not => truth(v == 0.0),
            })
        }
        Expr::Binary { op: BinOp::And, lhs, rhs } => {
            if eval_expr(lhs, bindings)? == 0.0 {
                return Ok(0.0);
            }
            Ok(truth(eval_expr(rhs, bindings)? != 0.0))
        }
        Expr::Binary { op: BinOp::Or, lhs, rhs } => {
            if eval_expr(lhs, bindings)? != 0.0 {
                return Ok(1.0);
            }
            Ok(truth(eval_expr(rhs, bindings)? != 0.0))
        }
        Expr::Binary { op, lhs, rhs } => {
            let l = eval_expr(lhs, bindings)?;
            let r = eval_expr(rhs, bindings)?;
            eval_binop(*op, l, r)
        }
        Expr::Call { func, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval_expr(arg, bindings)?);
            }
            Ok(match func {
                Builtin::Min => values.into_iter().fold(f64::INFINITY, f64::min),
                Builtin::Max => values.into_iter().fold(f64::NEG_INFINITY, f64::max),
            })
        }
        Expr::If { cond, then_branch, else_branch } => {
            if eval_expr(cond, bindings)? != 0.0 {
                eval_expr(then_branch, bindings)
            } else {
                eval_expr(else_branch, bindings)
            }
        }
    }
}

fn eval_binop(op: BinOp, l: f64, r: f64) -> Result<f64> {
    Ok(match op {
        BinOp::Add => l + r,
        BinOp::Sub => l - r,
        BinOp::Mul => l * r,
        BinOp::Div => {
            if r == 0.0 {
                return Err(RatingError::Expression("division by zero".to_string()));
            }
            l / r
        }
        BinOp::Lt => truth(l < r),
        BinOp::Le => truth(l <= r),
        BinOp::Gt => truth(l > r),
        BinOp::Ge => truth(l >= r),
        BinOp::Eq => truth(l == r),
        BinOp::Ne => truth(l != r),
        // Short-circuited in eval_expr
        BinOp::And => truth(l != 0.0 && r != 0.0),
        BinOp::Or => truth(l != 0.0 || r != 0.0),
    })
}

fn truth(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}
