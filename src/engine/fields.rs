//! Driving fields: which metric and unit keys feed each output column

use std::collections::HashSet;

use log::warn;

use crate::formula::Formula;
use crate::request::DrivingFields;
use crate::table::{Column, RateTable};

/// Output column key → the lookup key first, then the other quantities the
/// formula reads. Row fields (rate, fee and sub-column values) are excluded.
pub fn driving_fields(table: &RateTable) -> DrivingFields {
    let mut row_fields = HashSet::new();
    for column in &table.columns {
        if !column.kind.is_lookup() {
            collect_keys(column, &mut row_fields);
        }
    }

    table
        .output_columns()
        .map(|column| (column.key.clone(), column_fields(table, column, &row_fields)))
        .collect()
}

fn column_fields(table: &RateTable, column: &Column, row_fields: &HashSet<&str>) -> Vec<String> {
    if let Some(script) = &column.script {
        return vec![script.lookup_key().to_string()];
    }
    let Some(text) = &column.formula else {
        return Vec::new();
    };
    let formula = match Formula::parse(text) {
        Ok(f) => f,
        Err(e) => {
            warn!("No driving fields for '{}': {}", column.key, e);
            return Vec::new();
        }
    };

    let mut fields: Vec<String> = formula.lookup_key().map(str::to_string).into_iter().collect();
    for ident in formula.identifiers() {
        let is_metric = table.column(&ident).is_some_and(|c| c.kind.is_lookup());
        let is_unit_input = !row_fields.contains(ident.as_str()) && table.column(&ident).is_none();
        if (is_metric || is_unit_input) && !fields.contains(&ident) {
            fields.push(ident);
        }
    }
    fields
}

fn collect_keys<'a>(column: &'a Column, keys: &mut HashSet<&'a str>) {
    keys.insert(&column.key);
    for sub in &column.sub_columns {
        collect_keys(sub, keys);
    }
}
