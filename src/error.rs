//! Error types for rating calculations
//!
//! Only the range misses, `UnknownTier` and the loader variants normally reach
//! a caller. Formula, script and addon-reference failures are caught by the
//! engine and degraded per output column (see `engine`).

use thiserror::Error;

/// Result type alias using RatingError
pub type Result<T> = std::result::Result<T, RatingError>;

#[derive(Debug, Error)]
pub enum RatingError {
    /// Quantity falls outside the configured domain of the rate table
    #[error("Quantity {quantity} is outside the configured range [{low}, {high}]")]
    RangeExceeded { low: f64, high: f64, quantity: f64 },

    /// Quantity falls between two configured ranges
    #[error("Quantity {quantity} falls in the gap between ranges ending at {below} and starting at {above}")]
    RangeGap { below: f64, above: f64, quantity: f64 },

    /// Malformed formula text
    #[error("Formula parse error at offset {offset}: {message}")]
    Parse { message: String, offset: usize },

    /// Formula failed to evaluate (unknown identifier, division by zero, ...)
    #[error("Expression error: {0}")]
    Expression(String),

    /// An addon or feature referenced by a request no longer exists
    #[error("Missing reference: {0}")]
    MissingReference(String),

    /// A tiered script visited more rows than its step budget allows
    #[error("Script exceeded its step budget of {0}")]
    ScriptBudgetExceeded(usize),

    /// Rate table or pricing model violates a configuration invariant
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request names a tier the pricing model does not define
    #[error("Unknown tier: {0}")]
    UnknownTier(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl RatingError {
    /// No row prices the quantity; surfaced to the caller in exact mode
    pub fn is_range_miss(&self) -> bool {
        matches!(self, RatingError::RangeExceeded { .. } | RatingError::RangeGap { .. })
    }

    /// Configuration defects that degrade a single output to 0 instead of
    /// failing the whole request.
    pub fn is_formula_defect(&self) -> bool {
        matches!(
            self,
            RatingError::Parse { .. }
                | RatingError::Expression(_)
                | RatingError::ScriptBudgetExceeded(_)
        )
    }
}
