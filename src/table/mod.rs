//! Rate tables: the per-tier configuration the engine prices against

mod model;
pub mod loader;

pub use model::{
    CellValue, Column, ColumnKind, OutputRole, PricingModel, RateTable, Range, Row, Tier,
};
pub use loader::{load_pricing_model, load_pricing_model_from_reader};
