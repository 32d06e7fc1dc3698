//! Rating Engine - tiered rate-table pricing
//!
//! This library provides:
//! - Rate table configuration with range and threshold lookups
//! - A small formula language (`lookup(key){expr}`) and tiered scripts
//! - Addon charges: fixed, percentage and custom-metric
//! - Indicative price curves across a metric domain
//! - List vs. discounted price reconciliation

pub mod addon;
pub mod curve;
pub mod discount;
pub mod engine;
pub mod error;
pub mod formula;
pub mod lookup;
pub mod request;
pub mod script;
pub mod table;

// Re-export commonly used types
pub use addon::{Addon, AddonCharge, AddonPriceModel};
pub use curve::CurvePoint;
pub use discount::{DiscountInput, PriceFigures};
pub use engine::{EngineConfig, PriceResult, PricingEngine, QuantityInput};
pub use error::{RatingError, Result};
pub use formula::Formula;
pub use lookup::Mode;
pub use request::{CalculateRequest, CalculateResponse, CurveRequest, CurveResponse};
pub use table::{Column, ColumnKind, PricingModel, RateTable, Row, Tier};
