//! Lookup Resolver: find the rate-table row that prices a quantity
//!
//! Rows are validated sorted and non-overlapping (see `RateTable::validate`),
//! so the first match in storage order is the only match, with one exception:
//! when a quantity sits on a boundary shared by two adjacent ranges
//! (`a.high == b.low`) the upper row `b` wins.

use log::debug;

use crate::error::{RatingError, Result};
use crate::table::{ColumnKind, RateTable, Row};

/// Calculation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Price one exact quantity; out-of-domain quantities are errors
    #[default]
    Exact,
    /// Indicative pricing across a domain; misses degrade instead of failing
    Curve,
}

/// A matched row and its position in the table
#[derive(Debug, Clone, Copy)]
pub struct LookupMatch<'a> {
    pub index: usize,
    pub row: &'a Row,
}

/// Resolve `quantity` against the lookup column `key`.
///
/// Returns `Ok(None)` only in curve mode. In exact mode a miss is
/// `RangeExceeded` carrying the column's domain, or `RangeGap` when the
/// quantity lies inside the domain between two ranges.
pub fn resolve<'a>(
    table: &'a RateTable,
    key: &str,
    quantity: f64,
    mode: Mode,
) -> Result<Option<LookupMatch<'a>>> {
    let column = table
        .column(key)
        .filter(|c| c.kind.is_lookup())
        .ok_or_else(|| RatingError::Expression(format!("'{}' is not a lookup column", key)))?;

    let (low, high) = table.domain_for(key).unwrap_or((0.0, 0.0));

    let index = if quantity.is_nan() || quantity < low {
        None
    } else {
        match column.kind {
            ColumnKind::Threshold => find_threshold(&table.rows, key, quantity),
            ColumnKind::MetricRange => find_range(&table.rows, key, quantity),
            _ => None,
        }
    };

    match index {
        Some(index) => Ok(Some(LookupMatch { index, row: &table.rows[index] })),
        None if mode == Mode::Curve => {
            debug!("No row for {} = {} in curve mode", key, quantity);
            Ok(None)
        }
        None if column.kind == ColumnKind::MetricRange && quantity >= low && quantity <= high => {
            Err(gap_around(&table.rows, key, quantity))
        }
        None => Err(RatingError::RangeExceeded { low, high, quantity }),
    }
}

/// Nearest range edges on either side of a quantity that no range covers
fn gap_around(rows: &[Row], key: &str, quantity: f64) -> RatingError {
    let ranges = || rows.iter().filter_map(|r| r.range(key));
    let below = ranges()
        .filter(|r| r.high < quantity)
        .map(|r| r.high)
        .fold(f64::NEG_INFINITY, f64::max);
    let above = ranges()
        .filter(|r| r.low > quantity)
        .map(|r| r.low)
        .fold(f64::INFINITY, f64::min);
    RatingError::RangeGap { below, above, quantity }
}

fn find_threshold(rows: &[Row], key: &str, quantity: f64) -> Option<usize> {
    rows.iter()
        .position(|r| r.number(key).is_some_and(|upto| upto >= quantity))
}

fn find_range(rows: &[Row], key: &str, quantity: f64) -> Option<usize> {
    let first = rows
        .iter()
        .position(|r| r.range(key).is_some_and(|range| range.contains(quantity)))?;

    match rows.get(first + 1).and_then(|r| r.range(key)) {
        Some(next) if next.contains(quantity) => Some(first + 1),
        _ => Some(first),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Column, Range};

    fn range_table() -> RateTable {
        RateTable::new(
            vec![
                Column::new("Range", "range", ColumnKind::MetricRange),
                Column::new("Rate", "rate", ColumnKind::Rate),
            ],
            vec![
                Row::new().with("range", Range::new(0.0, 100.0)).with("rate", 5.0),
                Row::new().with("range", Range::new(101.0, 200.0)).with("rate", 3.0),
            ],
        )
    }

    fn threshold_table() -> RateTable {
        RateTable::new(
            vec![Column::new("Up to", "upto", ColumnKind::Threshold)],
            vec![
                Row::new().with("upto", 10.0),
                Row::new().with("upto", 20.0),
                Row::new().with("upto", 50.0),
            ],
        )
    }

    #[test]
    fn test_in_domain_returns_containing_row() {
        let table = range_table();
        for q in [0.0, 1.0, 50.0, 100.0, 101.0, 150.0, 200.0] {
            let hit = resolve(&table, "range", q, Mode::Exact).unwrap().unwrap();
            let range = hit.row.range("range").unwrap();
            assert!(range.contains(q), "row {:?} does not contain {}", range, q);
        }
        let hit = resolve(&table, "range", 150.0, Mode::Exact).unwrap().unwrap();
        assert_eq!(hit.index, 1);
    }

    #[test]
    fn test_threshold_first_row_at_or_above() {
        let table = threshold_table();
        let idx = |q| resolve(&table, "upto", q, Mode::Exact).unwrap().unwrap().index;
        assert_eq!(idx(0.0), 0);
        assert_eq!(idx(10.0), 0);
        assert_eq!(idx(10.5), 1);
        assert_eq!(idx(20.0), 1);
        assert_eq!(idx(49.0), 2);
    }

    #[test]
    fn test_out_of_domain_exact_mode() {
        let table = range_table();
        match resolve(&table, "range", 250.0, Mode::Exact) {
            Err(RatingError::RangeExceeded { low, high, quantity }) => {
                assert_eq!((low, high, quantity), (0.0, 200.0, 250.0));
            }
            other => panic!("expected RangeExceeded, got {:?}", other.map(|m| m.map(|m| m.index))),
        }
        assert!(resolve(&threshold_table(), "upto", 51.0, Mode::Exact).is_err());
        assert!(resolve(&threshold_table(), "upto", -1.0, Mode::Exact).is_err());
    }

    #[test]
    fn test_negative_quantity_misses_threshold_table() {
        // The first threshold is >= -5, but the domain starts at 0
        match resolve(&threshold_table(), "upto", -5.0, Mode::Exact) {
            Err(RatingError::RangeExceeded { low, high, quantity }) => {
                assert_eq!((low, high, quantity), (0.0, 50.0, -5.0));
            }
            other => panic!("expected RangeExceeded, got {:?}", other.map(|m| m.map(|m| m.index))),
        }
        assert!(resolve(&threshold_table(), "upto", -5.0, Mode::Curve).unwrap().is_none());
        assert_eq!(resolve(&threshold_table(), "upto", 0.0, Mode::Exact).unwrap().unwrap().index, 0);
    }

    #[test]
    fn test_gap_between_ranges_names_the_gap() {
        match resolve(&range_table(), "range", 100.5, Mode::Exact) {
            Err(RatingError::RangeGap { below, above, quantity }) => {
                assert_eq!((below, above, quantity), (100.0, 101.0, 100.5));
            }
            other => panic!("expected RangeGap, got {:?}", other.map(|m| m.map(|m| m.index))),
        }
    }

    #[test]
    fn test_out_of_domain_curve_mode() {
        assert!(resolve(&range_table(), "range", 250.0, Mode::Curve).unwrap().is_none());
        // Gap between 100 and 101
        assert!(resolve(&range_table(), "range", 100.5, Mode::Curve).unwrap().is_none());
    }

    #[test]
    fn test_shared_boundary_goes_to_upper_row() {
        let mut table = range_table();
        table.rows[1].insert("range", Range::new(100.0, 200.0));
        let hit = resolve(&table, "range", 100.0, Mode::Exact).unwrap().unwrap();
        assert_eq!(hit.index, 1);
        let hit = resolve(&table, "range", 99.0, Mode::Exact).unwrap().unwrap();
        assert_eq!(hit.index, 0);
    }

    #[test]
    fn test_non_lookup_column() {
        assert!(matches!(
            resolve(&range_table(), "rate", 1.0, Mode::Exact),
            Err(RatingError::Expression(_))
        ));
    }
}
