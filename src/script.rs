//! Tiered Script Evaluator
//!
//! Multi-branch formulas are a closed set of computation shapes chosen when
//! the rate table is configured. Each evaluation runs under a step budget:
//! every row the script reads costs one step.

use serde::{Deserialize, Serialize};

use crate::error::{RatingError, Result};
use crate::lookup::{resolve, Mode};
use crate::table::{ColumnKind, RateTable, Row};

pub const DEFAULT_STEP_BUDGET: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TieredScript {
    /// Platform fee of the matched tier. In curve mode, capped by the previous
    /// tier's fee plus linear overage:
    /// `min(fee[i], fee[i-1] + overage[i-1] * (q - threshold[i-1]))`
    ThreePartCurve {
        threshold_key: String,
        fee_key: String,
        overage_key: String,
    },
    /// Graduated pricing: every band up to the quantity is charged its own
    /// rate for the units that fall inside it
    Graduated { range_key: String, rate_key: String },
}

/// Rate override applied when re-pricing at a discounted unit price
#[derive(Debug, Clone, Copy, Default)]
pub struct RateOverride(pub Option<f64>);

struct StepBudget {
    limit: usize,
    used: usize,
}

impl StepBudget {
    fn new(limit: usize) -> Self {
        Self { limit, used: 0 }
    }

    fn step(&mut self) -> Result<()> {
        self.used += 1;
        if self.used > self.limit {
            return Err(RatingError::ScriptBudgetExceeded(self.limit));
        }
        Ok(())
    }
}

impl TieredScript {
    /// The lookup column the script resolves against
    pub fn lookup_key(&self) -> &str {
        match self {
            TieredScript::ThreePartCurve { threshold_key, .. } => threshold_key,
            TieredScript::Graduated { range_key, .. } => range_key,
        }
    }

    /// Check that every referenced column exists with a suitable kind
    pub fn validate(&self, table: &RateTable) -> std::result::Result<(), String> {
        let kind_of = |key: &str| table.column(key).map(|c| c.kind);
        let require_value = |key: &str| match kind_of(key) {
            Some(kind) if kind != ColumnKind::Output && !kind.is_lookup() => Ok(()),
            Some(kind) => Err(format!("'{}' is a {:?} column, expected a value column", key, kind)),
            None => Err(format!("unknown column '{}'", key)),
        };

        match self {
            TieredScript::ThreePartCurve { threshold_key, fee_key, overage_key } => {
                if kind_of(threshold_key) != Some(ColumnKind::Threshold) {
                    return Err(format!("'{}' is not a threshold column", threshold_key));
                }
                require_value(fee_key)?;
                require_value(overage_key)
            }
            TieredScript::Graduated { range_key, rate_key } => {
                if !kind_of(range_key).is_some_and(ColumnKind::is_lookup) {
                    return Err(format!("'{}' is not a lookup column", range_key));
                }
                require_value(rate_key)
            }
        }
    }

    pub fn evaluate(&self, table: &RateTable, quantity: f64, mode: Mode, step_budget: usize) -> Result<f64> {
        self.evaluate_with(table, quantity, mode, step_budget, RateOverride::default())
    }

    /// Evaluate with rate columns optionally replaced by a discounted unit price
    pub fn evaluate_with(
        &self,
        table: &RateTable,
        quantity: f64,
        mode: Mode,
        step_budget: usize,
        rate_override: RateOverride,
    ) -> Result<f64> {
        let mut budget = StepBudget::new(step_budget);
        let field = |row: &Row, index: usize, key: &str| -> Result<f64> {
            if let Some(rate) = rate_override.0 {
                if table.column(key).map(|c| c.kind) == Some(ColumnKind::Rate) {
                    return Ok(rate);
                }
            }
            row.number(key).ok_or_else(|| {
                RatingError::Expression(format!("row {} has no numeric '{}'", index, key))
            })
        };

        match self {
            TieredScript::ThreePartCurve { threshold_key, fee_key, overage_key } => {
                let Some(hit) = resolve(table, threshold_key, quantity, mode)? else {
                    return Ok(0.0);
                };
                budget.step()?;
                let fee = field(hit.row, hit.index, fee_key)?;

                if mode == Mode::Exact || hit.index == 0 {
                    return Ok(fee);
                }

                budget.step()?;
                let prev_index = hit.index - 1;
                let prev = &table.rows[prev_index];
                let prev_fee = field(prev, prev_index, fee_key)?;
                let prev_overage = field(prev, prev_index, overage_key)?;
                let prev_threshold = field(prev, prev_index, threshold_key)?;

                Ok(fee.min(prev_fee + prev_overage * (quantity - prev_threshold)))
            }
            TieredScript::Graduated { range_key, rate_key } => {
                let Some(hit) = resolve(table, range_key, quantity, mode)? else {
                    return Ok(0.0);
                };
                let is_range = table.column(range_key).map(|c| c.kind) == Some(ColumnKind::MetricRange);

                let mut total = 0.0;
                let mut band_start: Option<f64> = None;
                for (index, row) in table.rows.iter().enumerate().take(hit.index + 1) {
                    budget.step()?;
                    let (low, high) = if is_range {
                        let range = row.range(range_key).ok_or_else(|| {
                            RatingError::Expression(format!("row {} has no range '{}'", index, range_key))
                        })?;
                        (band_start.unwrap_or(range.low), range.high)
                    } else {
                        (band_start.unwrap_or(0.0), field(row, index, range_key)?)
                    };
                    let units = (quantity.min(high) - low).max(0.0);
                    total += units * field(row, index, rate_key)?;
                    band_start = Some(high);
                }
                Ok(total)
            }
        }
    }
}
