//! Request and response shapes exchanged with callers

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::addon::{AddonCharge, AddonQuantity};
use crate::curve::CurvePoint;
use crate::discount::{DiscountInput, PriceFigures};
use crate::engine::QuantityInput;

/// One addon picked for a calculation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonSelection {
    pub addon_id: String,
    #[serde(default)]
    pub units: Option<f64>,
    #[serde(default, alias = "quantityMap")]
    pub quantity_map: Option<QuantityInput>,
    #[serde(default)]
    pub discount: Option<DiscountInput>,
}

impl AddonSelection {
    pub fn units(addon_id: &str, units: f64) -> Self {
        Self { addon_id: addon_id.to_string(), units: Some(units), quantity_map: None, discount: None }
    }

    /// The quantity map wins over plain units
    pub fn quantity(&self) -> Option<AddonQuantity> {
        match (&self.quantity_map, self.units) {
            (Some(map), _) if !map.is_empty() => Some(AddonQuantity::Metrics(map.clone())),
            (_, Some(units)) => Some(AddonQuantity::Units(units)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculateRequest {
    pub tier_id: String,
    pub quantity: QuantityInput,
    #[serde(default)]
    pub addons: Vec<AddonSelection>,
    /// Metric key → discount. Only the table's primary metric key is applied.
    #[serde(default)]
    pub discounts: BTreeMap<String, DiscountInput>,
}

impl CalculateRequest {
    pub fn new(tier_id: &str, quantity: QuantityInput) -> Self {
        Self { tier_id: tier_id.to_string(), quantity, addons: Vec::new(), discounts: BTreeMap::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreOutput {
    pub columns: BTreeMap<String, f64>,
    pub final_total: f64,
    pub pricing: PriceFigures,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculateResponse {
    pub tier_id: String,
    pub core_output: CoreOutput,
    pub addon_output: Vec<AddonCharge>,
    /// Discounted core total plus every discounted addon total
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveAddon {
    pub addon_id: String,
    #[serde(default = "one_unit")]
    pub addon_units: f64,
}

fn one_unit() -> f64 {
    1.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurveRequest {
    pub tier_ids: Vec<String>,
    #[serde(default)]
    pub addons: Vec<CurveAddon>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurveResponse {
    pub points: Vec<CurvePoint>,
}

/// Output column key → metric and unit keys that drive it
pub type DrivingFields = BTreeMap<String, Vec<String>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_calculate_request() {
        let json = r#"{
            "tier_id": "growth",
            "quantity": {"range": 150},
            "addons": [{"addon_id": "support", "units": 2},
                       {"addon_id": "storage", "quantityMap": {"gb": 10}}],
            "discounts": {"range": {"discounted_total": 400}}
        }"#;
        let request: CalculateRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.quantity["range"], 150.0);
        assert_eq!(request.addons[0].quantity(), Some(AddonQuantity::Units(2.0)));
        assert!(matches!(request.addons[1].quantity(), Some(AddonQuantity::Metrics(_))));
        assert_eq!(request.discounts["range"].discounted_total, Some(400.0));
    }

    #[test]
    fn test_selection_without_quantity() {
        let selection = AddonSelection {
            addon_id: "x".into(),
            units: None,
            quantity_map: Some(QuantityInput::new()),
            discount: None,
        };
        assert_eq!(selection.quantity(), None);
    }

    #[test]
    fn test_curve_addon_defaults_to_one_unit() {
        let request: CurveRequest =
            serde_json::from_str(r#"{"tier_ids": ["a"], "addons": [{"addon_id": "support"}]}"#).unwrap();
        assert_eq!(request.addons[0].addon_units, 1.0);
    }
}
