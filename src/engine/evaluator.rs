//! Core output evaluation for one rate table
//!
//! For every output column: resolve the row, bind variables, evaluate the
//! formula or tiered script. Formula defects degrade that column to 0 unless
//! `strict_formulas` is set. Script failures always degrade. Range misses
//! always propagate.

use std::collections::BTreeMap;

use log::{error, warn};
use serde::{Deserialize, Serialize};

use crate::error::{RatingError, Result};
use crate::formula::{Bindings, Formula};
use crate::lookup::{resolve, Mode};
use crate::script::{RateOverride, DEFAULT_STEP_BUDGET};
use crate::table::{Column, OutputRole, RateTable};

/// Metric key → requested quantity
pub type QuantityInput = BTreeMap<String, f64>;

/// Per-column outputs and the table's final total
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceResult {
    pub per_output_column: BTreeMap<String, f64>,
    pub final_total: f64,
}

#[derive(Debug, Clone)]
pub struct TableEvaluator {
    step_budget: usize,
    strict_formulas: bool,
}

impl Default for TableEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_STEP_BUDGET, false)
    }
}

impl TableEvaluator {
    pub fn new(step_budget: usize, strict_formulas: bool) -> Self {
        Self { step_budget, strict_formulas }
    }

    pub fn evaluate(&self, table: &RateTable, quantities: &QuantityInput, mode: Mode) -> Result<PriceResult> {
        self.evaluate_with(table, quantities, mode, RateOverride::default())
    }

    /// Evaluate with every rate column replaced by `rate_override`, if set
    pub fn evaluate_with(
        &self,
        table: &RateTable,
        quantities: &QuantityInput,
        mode: Mode,
        rate_override: RateOverride,
    ) -> Result<PriceResult> {
        let mut per_output_column = BTreeMap::new();

        for column in table.output_columns() {
            let value = match self.evaluate_column(table, column, quantities, mode, rate_override) {
                Ok(v) => v,
                Err(e) if column.script.is_some() && !e.is_range_miss() => {
                    warn!("Script output '{}' degraded to 0: {}", column.key, e);
                    0.0
                }
                Err(e) if e.is_formula_defect() && !self.strict_formulas => {
                    error!("Output '{}' degraded to 0: {}", column.key, e);
                    0.0
                }
                Err(e) => return Err(e),
            };
            per_output_column.insert(column.key.clone(), value);
        }

        let final_total = match table.output_with_role(OutputRole::Total) {
            Some(total) => per_output_column.get(&total.key).copied().unwrap_or(0.0),
            None => per_output_column.values().sum(),
        };

        Ok(PriceResult { per_output_column, final_total })
    }

    /// Unit price for discount reconciliation: the unit-price column when the
    /// table has one, else the final total spread over the primary quantity
    pub fn list_unit_price(&self, table: &RateTable, result: &PriceResult, quantities: &QuantityInput) -> f64 {
        if let Some(unit) = table.output_with_role(OutputRole::UnitPrice) {
            return result.per_output_column.get(&unit.key).copied().unwrap_or(0.0);
        }
        let quantity = table
            .primary_metric_key()
            .and_then(|k| quantities.get(k).copied())
            .unwrap_or(0.0);
        if quantity > 0.0 {
            result.final_total / quantity
        } else {
            result.final_total
        }
    }

    fn evaluate_column(
        &self,
        table: &RateTable,
        column: &Column,
        quantities: &QuantityInput,
        mode: Mode,
        rate_override: RateOverride,
    ) -> Result<f64> {
        if let Some(script) = &column.script {
            let quantity = required_quantity(quantities, script.lookup_key())?;
            return script.evaluate_with(table, quantity, mode, self.step_budget, rate_override);
        }

        let Some(text) = &column.formula else {
            warn!("Output '{}' has neither a formula nor a script", column.key);
            return Ok(0.0);
        };
        let formula = Formula::parse(text)?;

        let mut bindings = match formula.lookup_key() {
            Some(key) => {
                let quantity = required_quantity(quantities, key)?;
                match resolve(table, key, quantity, mode)? {
                    Some(hit) => Bindings::from_row(hit.row),
                    None => return Ok(0.0),
                }
            }
            None => Bindings::new(),
        };

        // Unit inputs never shadow a row field
        for (key, quantity) in quantities {
            if bindings.get(key).is_none() {
                bindings.set(key, *quantity);
            }
        }
        if let Some(key) = formula.lookup_key() {
            bindings.set(key, required_quantity(quantities, key)?);
        }
        if let Some(rate) = rate_override.0 {
            for key in table.rate_keys() {
                bindings.set(key, rate);
            }
        }

        formula.evaluate(&bindings)
    }
}

fn required_quantity(quantities: &QuantityInput, key: &str) -> Result<f64> {
    quantities
        .get(key)
        .copied()
        .ok_or_else(|| RatingError::Expression(format!("no quantity supplied for '{}'", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::TieredScript;
    use crate::table::{ColumnKind, Range, Row};
    use approx::assert_relative_eq;

    fn quantity(key: &str, q: f64) -> QuantityInput {
        QuantityInput::from([(key.to_string(), q)])
    }

    fn scenario_table() -> RateTable {
        RateTable::new(
            vec![
                Column::new("Range", "range", ColumnKind::MetricRange),
                Column::new("Rate", "rate", ColumnKind::Rate),
                Column::output("Price", "price", "lookup(range){rate*range}"),
            ],
            vec![
                Row::new().with("range", Range::new(0.0, 100.0)).with("rate", 5.0),
                Row::new().with("range", Range::new(101.0, 200.0)).with("rate", 3.0),
            ],
        )
    }

    #[test]
    fn test_scenario_a_single_row() {
        let mut table = scenario_table();
        table.rows.truncate(1);
        let result = TableEvaluator::default().evaluate(&table, &quantity("range", 10.0), Mode::Exact).unwrap();
        assert_relative_eq!(result.per_output_column["price"], 50.0);
        assert_relative_eq!(result.final_total, 50.0);
    }

    #[test]
    fn test_scenario_b_second_row() {
        let result = TableEvaluator::default()
            .evaluate(&scenario_table(), &quantity("range", 150.0), Mode::Exact)
            .unwrap();
        assert_relative_eq!(result.final_total, 450.0);
    }

    #[test]
    fn test_range_exceeded_propagates_in_exact_mode() {
        let err = TableEvaluator::default()
            .evaluate(&scenario_table(), &quantity("range", 500.0), Mode::Exact)
            .unwrap_err();
        assert!(matches!(err, RatingError::RangeExceeded { low, high, .. } if low == 0.0 && high == 200.0));
    }

    #[test]
    fn test_curve_mode_miss_is_zero() {
        let result = TableEvaluator::default()
            .evaluate(&scenario_table(), &quantity("range", 500.0), Mode::Curve)
            .unwrap();
        assert_eq!(result.final_total, 0.0);
    }

    #[test]
    fn test_malformed_formula_degrades_or_fails_when_strict() {
        let mut table = scenario_table();
        table.columns.push(Column::output("Broken", "broken", "lookup(range){rate * * 2}"));
        table.columns.push(Column::output("Unknown", "unknown", "lookup(range){seats * rate}"));
        let deep = format!("lookup(range){{{}rate{}}}", "(".repeat(5000), ")".repeat(5000));
        table.columns.push(Column::output("Deep", "deep", &deep));

        let result = TableEvaluator::default().evaluate(&table, &quantity("range", 150.0), Mode::Exact).unwrap();
        assert_eq!(result.per_output_column["broken"], 0.0);
        assert_eq!(result.per_output_column["unknown"], 0.0);
        assert_eq!(result.per_output_column["deep"], 0.0);
        assert_relative_eq!(result.final_total, 450.0);

        let strict = TableEvaluator::new(DEFAULT_STEP_BUDGET, true);
        assert!(strict.evaluate(&table, &quantity("range", 150.0), Mode::Exact).is_err());
    }

    #[test]
    fn test_total_and_unit_price_roles() {
        let mut table = scenario_table();
        table.columns[2] = Column::output("Price", "price", "lookup(range){rate*range}").with_role(OutputRole::Total);
        table.columns.push(Column::output("Unit", "unit", "lookup(range){rate}").with_role(OutputRole::UnitPrice));
        let evaluator = TableEvaluator::default();
        let q = quantity("range", 150.0);

        let result = evaluator.evaluate(&table, &q, Mode::Exact).unwrap();
        assert_relative_eq!(result.final_total, 450.0);
        assert_relative_eq!(evaluator.list_unit_price(&table, &result, &q), 3.0);
    }

    #[test]
    fn test_rate_override_and_extra_quantities() {
        let mut table = scenario_table();
        table.columns[2] = Column::output("Price", "price", "lookup(range){rate*range + seats}");
        let mut q = quantity("range", 10.0);
        q.insert("seats".to_string(), 7.0);

        let evaluator = TableEvaluator::default();
        let listed = evaluator.evaluate(&table, &q, Mode::Exact).unwrap();
        assert_relative_eq!(listed.final_total, 57.0);

        let repriced = evaluator.evaluate_with(&table, &q, Mode::Exact, RateOverride(Some(4.0))).unwrap();
        assert_relative_eq!(repriced.final_total, 47.0);
        assert_relative_eq!(evaluator.list_unit_price(&table, &listed, &q), 5.7);
    }

    #[test]
    fn test_missing_quantity_degrades() {
        let result = TableEvaluator::default().evaluate(&scenario_table(), &QuantityInput::new(), Mode::Exact).unwrap();
        assert_eq!(result.final_total, 0.0);
    }

    #[test]
    fn test_unit_inputs_do_not_shadow_row_fields() {
        let mut q = quantity("range", 10.0);
        q.insert("rate".to_string(), 0.01);

        let evaluator = TableEvaluator::default();
        let listed = evaluator.evaluate(&scenario_table(), &q, Mode::Exact).unwrap();
        assert_relative_eq!(listed.final_total, 50.0);

        // The discount override still reaches the rate column
        let repriced = evaluator
            .evaluate_with(&scenario_table(), &q, Mode::Exact, RateOverride(Some(4.0)))
            .unwrap();
        assert_relative_eq!(repriced.final_total, 40.0);
    }

    #[test]
    fn test_script_failures_degrade_even_when_strict() {
        let mut table = scenario_table();
        table.columns[2] = Column::scripted(
            "Graduated",
            "graduated",
            TieredScript::Graduated { range_key: "range".into(), rate_key: "rate".into() },
        );
        let strict = TableEvaluator::new(1, true);

        let result = strict.evaluate(&table, &quantity("range", 150.0), Mode::Exact).unwrap();
        assert_eq!(result.per_output_column["graduated"], 0.0);

        let result = strict.evaluate(&table, &QuantityInput::new(), Mode::Exact).unwrap();
        assert_eq!(result.final_total, 0.0);

        assert!(matches!(
            strict.evaluate(&table, &quantity("range", 500.0), Mode::Exact),
            Err(RatingError::RangeExceeded { .. })
        ));
    }
}
