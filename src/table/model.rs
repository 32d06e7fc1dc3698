//! In-memory rate table: columns, rows and the configuration invariants

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::addon::Addon;
use crate::error::{RatingError, Result};
use crate::formula::Formula;
use crate::script::TieredScript;

/// What a column holds and how the engine uses it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnKind {
    /// `{low, high}` intervals matched with `low <= q <= high`
    MetricRange,
    /// Ascending "upto" values matched with the first `threshold >= q`
    Threshold,
    /// Per-unit rate; overridden by discounted unit prices
    Rate,
    /// Flat fee
    Fee,
    /// Computed by a formula or tiered script
    Output,
}

impl ColumnKind {
    /// Columns the Lookup Resolver can match a quantity against
    pub fn is_lookup(self) -> bool {
        matches!(self, ColumnKind::MetricRange | ColumnKind::Threshold)
    }
}

/// Which figure an output column represents for discount reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputRole {
    UnitPrice,
    Total,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub key: String,
    pub kind: ColumnKind,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_columns: Vec<Column>,

    /// `lookup(key){expr}` or a bare expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,

    /// Closed multi-branch computation, used instead of `formula`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<TieredScript>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<OutputRole>,
}

impl Column {
    pub fn new(name: &str, key: &str, kind: ColumnKind) -> Self {
        Self {
            name: name.to_string(),
            key: key.to_string(),
            kind,
            sub_columns: Vec::new(),
            formula: None,
            script: None,
            role: None,
        }
    }

    /// Output column computed by a formula
    pub fn output(name: &str, key: &str, formula: &str) -> Self {
        Self {
            formula: Some(formula.to_string()),
            ..Self::new(name, key, ColumnKind::Output)
        }
    }

    /// Output column computed by a tiered script
    pub fn scripted(name: &str, key: &str, script: TieredScript) -> Self {
        Self {
            script: Some(script),
            ..Self::new(name, key, ColumnKind::Output)
        }
    }

    pub fn with_role(mut self, role: OutputRole) -> Self {
        self.role = Some(role);
        self
    }
}

/// Inclusive numeric interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub low: f64,
    pub high: f64,
}

impl Range {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, quantity: f64) -> bool {
        quantity >= self.low && quantity <= self.high
    }
}

/// One cell of a row. Ranges deserialize from `{low, high}` or `[low, high]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Range(Range),
    Text(String),
}

impl CellValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_range(&self) -> Option<Range> {
        match self {
            CellValue::Range(r) => Some(*r),
            _ => None,
        }
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<Range> for CellValue {
    fn from(r: Range) -> Self {
        CellValue::Range(r)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

/// Mapping from column key to cell value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    cells: BTreeMap<String, CellValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: &str, value: impl Into<CellValue>) -> Self {
        self.cells.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<CellValue>) {
        self.cells.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&CellValue> {
        self.cells.get(key)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(CellValue::as_number)
    }

    pub fn range(&self, key: &str) -> Option<Range> {
        self.get(key).and_then(CellValue::as_range)
    }

    /// Numeric cells only; ranges and text never bind as variables
    pub fn numeric_fields(&self) -> impl Iterator<Item = (&str, f64)> {
        self.cells
            .iter()
            .filter_map(|(k, v)| v.as_number().map(|n| (k.as_str(), n)))
    }
}

/// One tier's pricing configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateTable {
    pub columns: Vec<Column>,
    #[serde(rename = "values", alias = "rows")]
    pub rows: Vec<Row>,
}

impl RateTable {
    pub fn new(columns: Vec<Column>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn column(&self, key: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.key == key)
    }

    pub fn lookup_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.kind.is_lookup())
    }

    pub fn output_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.kind == ColumnKind::Output)
    }

    pub fn output_with_role(&self, role: OutputRole) -> Option<&Column> {
        self.output_columns().find(|c| c.role == Some(role))
    }

    /// Keys of the rate columns, overridden when a discounted unit price is supplied
    pub fn rate_keys(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.kind == ColumnKind::Rate)
            .map(|c| c.key.as_str())
            .collect()
    }

    /// Metric key that drives the table's total: the lookup key of the total
    /// column when it has one, otherwise the first lookup column.
    pub fn primary_metric_key(&self) -> Option<&str> {
        let from_total = self
            .output_with_role(OutputRole::Total)
            .and_then(|c| c.formula.as_deref())
            .and_then(|f| Formula::parse(f).ok())
            .and_then(|f| f.lookup_key().map(str::to_string))
            .and_then(|k| self.column(&k).map(|c| c.key.as_str()));

        from_total.or_else(|| self.lookup_columns().next().map(|c| c.key.as_str()))
    }

    /// `[low, high]` covered by one lookup column. Threshold domains start at 0.
    pub fn domain_for(&self, key: &str) -> Option<(f64, f64)> {
        let column = self.column(key)?;
        match column.kind {
            ColumnKind::MetricRange => {
                let ranges: Vec<Range> = self.rows.iter().filter_map(|r| r.range(key)).collect();
                if ranges.is_empty() {
                    return None;
                }
                let low = ranges.iter().map(|r| r.low).fold(f64::INFINITY, f64::min);
                let high = ranges.iter().map(|r| r.high).fold(f64::NEG_INFINITY, f64::max);
                Some((low, high))
            }
            ColumnKind::Threshold => {
                let values: Vec<f64> = self.rows.iter().filter_map(|r| r.number(key)).collect();
                if values.is_empty() {
                    return None;
                }
                // The first band starts at 0, so negative quantities miss
                let low = values.iter().copied().fold(0.0, f64::min);
                let high = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                Some((low, high))
            }
            _ => None,
        }
    }

    /// Domain aggregated across every lookup column
    pub fn domain(&self) -> Option<(f64, f64)> {
        self.lookup_columns()
            .filter_map(|c| self.domain_for(&c.key))
            .reduce(|(l1, h1), (l2, h2)| (l1.min(l2), h1.max(h2)))
    }

    /// Check the row-ordering and reference invariants.
    ///
    /// Formulas that fail to parse are not rejected here; they degrade to 0
    /// at calculation time like any other formula defect.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.key.as_str()) {
                return Err(RatingError::Config(format!("duplicate column key '{}'", column.key)));
            }
        }

        for column in self.lookup_columns() {
            self.validate_lookup_column(column)?;
        }

        for role in [OutputRole::Total, OutputRole::UnitPrice] {
            if self.output_columns().filter(|c| c.role == Some(role)).count() > 1 {
                return Err(RatingError::Config(format!("more than one output column with role {:?}", role)));
            }
        }

        for column in self.output_columns() {
            if let Some(text) = &column.formula {
                if let Ok(formula) = Formula::parse(text) {
                    if let Some(key) = formula.lookup_key() {
                        match self.column(key) {
                            Some(c) if c.kind.is_lookup() => {}
                            _ => {
                                return Err(RatingError::Config(format!(
                                    "output '{}' looks up '{}', which is not a metric-range or threshold column",
                                    column.key, key
                                )))
                            }
                        }
                    }
                }
            }
            if let Some(script) = &column.script {
                script.validate(self).map_err(|msg| {
                    RatingError::Config(format!("output '{}': {}", column.key, msg))
                })?;
            }
        }

        Ok(())
    }

    fn validate_lookup_column(&self, column: &Column) -> Result<()> {
        let key = column.key.as_str();
        match column.kind {
            ColumnKind::MetricRange => {
                let mut previous: Option<Range> = None;
                for (i, row) in self.rows.iter().enumerate() {
                    let range = row.range(key).ok_or_else(|| {
                        RatingError::Config(format!("row {} has no range for '{}'", i, key))
                    })?;
                    if range.low > range.high {
                        return Err(RatingError::Config(format!(
                            "row {} range '{}' has low {} above high {}",
                            i, key, range.low, range.high
                        )));
                    }
                    if let Some(prev) = previous {
                        // A shared boundary (prev.high == low) is allowed
                        if range.low < prev.high {
                            return Err(RatingError::Config(format!(
                                "row {} range '{}' [{}, {}] overlaps or precedes [{}, {}]",
                                i, key, range.low, range.high, prev.low, prev.high
                            )));
                        }
                    }
                    previous = Some(range);
                }
            }
            ColumnKind::Threshold => {
                let mut previous: Option<f64> = None;
                for (i, row) in self.rows.iter().enumerate() {
                    let value = row.number(key).ok_or_else(|| {
                        RatingError::Config(format!("row {} has no threshold for '{}'", i, key))
                    })?;
                    if let Some(prev) = previous {
                        if value <= prev {
                            return Err(RatingError::Config(format!(
                                "row {} threshold '{}' = {} is not above {}",
                                i, key, value, prev
                            )));
                        }
                    }
                    previous = Some(value);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// A named tier and its table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub table: RateTable,
}

impl Tier {
    /// Name shown on curves, falling back to the id
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Full configuration bundle supplied by the pricing-model store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PricingModel {
    pub tiers: Vec<Tier>,
    #[serde(default)]
    pub addons: Vec<Addon>,
}

impl PricingModel {
    pub fn tier(&self, id: &str) -> Option<&Tier> {
        self.tiers.iter().find(|t| t.id == id)
    }

    pub fn addon(&self, id: &str) -> Option<&Addon> {
        self.addons.iter().find(|a| a.id == id)
    }

    /// Tier ids and curve names must be unique; curve prices are keyed by name
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for tier in &self.tiers {
            if !ids.insert(tier.id.as_str()) {
                return Err(RatingError::Config(format!("duplicate tier id '{}'", tier.id)));
            }
            if !names.insert(tier.display_name()) {
                return Err(RatingError::Config(format!(
                    "tier '{}': name '{}' is already used by another tier",
                    tier.id,
                    tier.display_name()
                )));
            }
        }
        for tier in &self.tiers {
            tier.table
                .validate()
                .map_err(|e| RatingError::Config(format!("tier '{}': {}", tier.id, e)))?;
        }
        for addon in &self.addons {
            addon.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range_table() -> RateTable {
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

    fn tier(id: &str, name: &str) -> Tier {
        Tier { id: id.to_string(), name: name.to_string(), table: range_table() }
    }

    #[test]
    fn test_tier_names_must_be_unique() {
        let model = PricingModel { tiers: vec![tier("basic", "Starter"), tier("plus", "")], addons: vec![] };
        assert!(model.validate().is_ok());

        // An unnamed tier falls back to its id
        let clash = PricingModel { tiers: vec![tier("basic", "plus"), tier("plus", "")], addons: vec![] };
        assert!(matches!(clash.validate(), Err(RatingError::Config(_))));

        let same_name = PricingModel { tiers: vec![tier("basic", "Pro"), tier("plus", "Pro")], addons: vec![] };
        assert!(matches!(same_name.validate(), Err(RatingError::Config(_))));

        let same_id = PricingModel { tiers: vec![tier("basic", "A"), tier("basic", "B")], addons: vec![] };
        assert!(matches!(same_id.validate(), Err(RatingError::Config(_))));
    }

    #[test]
    fn test_valid_table() {
        assert!(range_table().validate().is_ok());
    }

    #[test]
    fn test_overlapping_ranges_rejected() {
        let mut table = range_table();
        table.rows[1].insert("range", Range::new(50.0, 200.0));
        assert!(matches!(table.validate(), Err(RatingError::Config(_))));
    }

    #[test]
    fn test_shared_boundary_allowed() {
        let mut table = range_table();
        table.rows[1].insert("range", Range::new(100.0, 200.0));
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_thresholds_must_increase() {
        let table = RateTable::new(
            vec![Column::new("Up to", "upto", ColumnKind::Threshold)],
            vec![Row::new().with("upto", 10.0), Row::new().with("upto", 10.0)],
        );
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_formula_must_look_up_a_lookup_column() {
        let mut table = range_table();
        table.columns[2].formula = Some("lookup(rate){rate*2}".to_string());
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_domain_and_numeric_fields() {
        let table = range_table();
        assert_eq!(table.domain(), Some((0.0, 200.0)));
        assert_eq!(table.primary_metric_key(), Some("range"));

        let row = table.rows[0].clone().with("label", "Starter");
        let fields: Vec<_> = row.numeric_fields().collect();
        assert_eq!(fields, vec![("rate", 5.0)]);
    }

    #[test]
    fn test_deserialize_wire_shape() {
        let json = r#"{
            "columns": [
                {"name": "Range", "key": "range", "kind": "metric-range"},
                {"name": "Rate", "key": "rate", "kind": "rate"},
                {"name": "Price", "key": "price", "kind": "output",
                 "formula": "lookup(range){rate*range}", "role": "total"}
            ],
            "values": [
                {"range": {"low": 0, "high": 100}, "rate": 5},
                {"range": [101, 200], "rate": 3, "label": "Growth"}
            ]
        }"#;
        let table: RateTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1].range("range"), Some(Range::new(101.0, 200.0)));
        assert_eq!(table.rows[1].get("label"), Some(&CellValue::Text("Growth".into())));
        assert_eq!(table.output_with_role(OutputRole::Total).map(|c| c.key.as_str()), Some("price"));
        assert!(table.validate().is_ok());
    }
}
