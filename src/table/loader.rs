//! Load pricing models from JSON and rate-table rows from CSV
//!
//! CSV headers are column keys. A metric-range column `k` is read from the
//! pair of headers `k_low` and `k_high`.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::Reader;
use log::debug;

use super::model::{CellValue, Column, ColumnKind, PricingModel, RateTable, Range, Row};
use crate::error::{RatingError, Result};

/// Load and validate a pricing model from a JSON file
pub fn load_pricing_model<P: AsRef<Path>>(path: P) -> Result<PricingModel> {
    let file = File::open(path.as_ref())?;
    let model = load_pricing_model_from_reader(file)?;
    debug!(
        "Loaded pricing model from {} ({} tiers, {} addons)",
        path.as_ref().display(),
        model.tiers.len(),
        model.addons.len()
    );
    Ok(model)
}

/// Load and validate a pricing model from any reader
pub fn load_pricing_model_from_reader<R: Read>(reader: R) -> Result<PricingModel> {
    let model: PricingModel = serde_json::from_reader(reader)?;
    model.validate()?;
    Ok(model)
}

/// Build a validated rate table from column definitions and a CSV file of rows
pub fn load_table_csv<P: AsRef<Path>>(columns: Vec<Column>, path: P) -> Result<RateTable> {
    let file = File::open(path)?;
    load_table_csv_from_reader(columns, file)
}

/// Build a validated rate table from column definitions and CSV rows from any reader
pub fn load_table_csv_from_reader<R: Read>(columns: Vec<Column>, reader: R) -> Result<RateTable> {
    let mut csv_reader = Reader::from_reader(reader);
    let headers = csv_reader.headers()?.clone();

    let index_of = |name: &str| headers.iter().position(|h| h.trim() == name);

    let mut rows = Vec::new();
    for (line, result) in csv_reader.records().enumerate() {
        let record = result?;
        let mut row = Row::new();

        for column in &columns {
            if column.kind == ColumnKind::Output {
                continue;
            }

            if column.kind == ColumnKind::MetricRange {
                let low_key = format!("{}_low", column.key);
                let high_key = format!("{}_high", column.key);
                let (Some(lo), Some(hi)) = (index_of(&low_key), index_of(&high_key)) else {
                    return Err(RatingError::Config(format!(
                        "CSV is missing '{}' or '{}'",
                        low_key, high_key
                    )));
                };
                let low = parse_number(&record[lo], line, &low_key)?;
                let high = parse_number(&record[hi], line, &high_key)?;
                row.insert(&column.key, Range::new(low, high));
                continue;
            }

            if let Some(idx) = index_of(&column.key) {
                let raw = record[idx].trim();
                if raw.is_empty() {
                    continue;
                }
                let cell = match raw.parse::<f64>() {
                    Ok(n) => CellValue::Number(n),
                    Err(_) => CellValue::Text(raw.to_string()),
                };
                row.insert(&column.key, cell);
            }
        }

        rows.push(row);
    }

    let table = RateTable::new(columns, rows);
    table.validate()?;
    Ok(table)
}

fn parse_number(raw: &str, line: usize, header: &str) -> Result<f64> {
    raw.trim().parse::<f64>().map_err(|_| {
        RatingError::Config(format!(
            "CSV row {}: '{}' is not a number in column '{}'",
            line + 1,
            raw,
            header
        ))
    })
}
