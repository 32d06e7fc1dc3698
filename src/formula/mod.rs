//! Formula grammar: `lookup(<key>){<expr>}` or a bare `<expr>`
//!
//! ```rust,ignore
//! use rating_engine::formula::{Formula, Bindings};
//!
//! let formula = Formula::parse("lookup(range){rate*range}")?;
//! assert_eq!(formula.lookup_key(), Some("range"));
//! let price = formula.evaluate(&Bindings::new().with("rate", 5.0).with("range", 10.0))?;
//! ```

mod ast;
mod eval;
mod lexer;
mod parser;

use std::fmt;
use std::str::FromStr;

pub use ast::{BinOp, Builtin, Expr, UnaryOp};
pub use eval::{evaluate, Bindings};

use crate::error::{RatingError, Result};

/// A parsed formula. Keeps the body text so it can be written back unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    lookup_key: Option<String>,
    body: String,
    expr: Expr,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self> {
        let parsed = parser::parse_formula(source)?;
        Ok(Self {
            lookup_key: parsed.lookup_key,
            body: parsed.body,
            expr: parsed.expr,
        })
    }

    /// Lookup key with sigils stripped, `None` for bare expressions
    pub fn lookup_key(&self) -> Option<&str> {
        self.lookup_key.as_deref()
    }

    /// Raw expression body
    pub fn expression(&self) -> &str {
        &self.body
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Variables the expression reads
    pub fn identifiers(&self) -> Vec<String> {
        self.expr.identifiers()
    }

    pub fn evaluate(&self, bindings: &Bindings) -> Result<f64> {
        evaluate(&self.expr, bindings)
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lookup_key {
            Some(key) => write!(f, "lookup({}){{{}}}", key, self.body),
            None => f.write_str(&self.body),
        }
    }
}

impl FromStr for Formula {
    type Err = RatingError;

    fn from_str(s: &str) -> Result<Self> {
        Formula::parse(s)
    }
}
