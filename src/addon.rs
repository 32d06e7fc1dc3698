//! Addon Engine: supplementary charges priced alongside the core table
//!
//! Three models: a fixed fee per unit, a percentage of the core price clamped
//! to `[min, max]` per unit, or a custom metric priced by the addon's own
//! rate table. A selection that points at a deleted addon, or at an addon
//! whose pricing configuration is gone, is skipped with a warning.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::discount::{reconcile, PriceFigures, Precision};
use crate::engine::{QuantityInput, TableEvaluator};
use crate::error::{RatingError, Result};
use crate::lookup::Mode;
use crate::request::AddonSelection;
use crate::script::RateOverride;
use crate::table::RateTable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AddonPriceModel {
    /// `fee × units`
    Fixed { fee: f64 },
    /// `clamp(core × pct / 100, min, max) × units`
    Percentage {
        pct: f64,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
}

impl AddonPriceModel {
    /// Per-unit price given the core price
    pub fn unit_price(&self, core_price: f64) -> f64 {
        match *self {
            AddonPriceModel::Fixed { fee } => fee,
            AddonPriceModel::Percentage { pct, min, max } => {
                let mut price = core_price * pct / 100.0;
                if let Some(min) = min {
                    price = price.max(min);
                }
                if let Some(max) = max {
                    price = price.min(max);
                }
                price
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Addon {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "isCustomMetric")]
    pub is_custom_metric: bool,
    #[serde(default, alias = "fixedOrPercentModel")]
    pub model: Option<AddonPriceModel>,
    #[serde(default, alias = "customTable")]
    pub custom_table: Option<RateTable>,
}

impl Addon {
    pub fn fixed(id: &str, fee: f64) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            is_custom_metric: false,
            model: Some(AddonPriceModel::Fixed { fee }),
            custom_table: None,
        }
    }

    pub fn percentage(id: &str, pct: f64, min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            model: Some(AddonPriceModel::Percentage { pct, min, max }),
            ..Self::fixed(id, 0.0)
        }
    }

    pub fn custom_metric(id: &str, table: RateTable) -> Self {
        Self {
            is_custom_metric: true,
            model: None,
            custom_table: Some(table),
            ..Self::fixed(id, 0.0)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(AddonPriceModel::Percentage { pct, min, max }) = &self.model {
            if !pct.is_finite() {
                return Err(RatingError::Config(format!("addon '{}' has a non-finite percentage", self.id)));
            }
            if let (Some(min), Some(max)) = (min, max) {
                if min > max {
                    return Err(RatingError::Config(format!(
                        "addon '{}' has min {} above max {}",
                        self.id, min, max
                    )));
                }
            }
        }
        if let Some(table) = &self.custom_table {
            table
                .validate()
                .map_err(|e| RatingError::Config(format!("addon '{}': {}", self.id, e)))?;
        }
        Ok(())
    }
}

/// Requested quantity for one addon
#[derive(Debug, Clone, PartialEq)]
pub enum AddonQuantity {
    Units(f64),
    Metrics(QuantityInput),
}

/// Priced addon with list and discounted figures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonCharge {
    pub addon_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<f64>,
    #[serde(flatten)]
    pub figures: PriceFigures,
}

pub struct AddonEngine<'a> {
    evaluator: &'a TableEvaluator,
}

impl<'a> AddonEngine<'a> {
    pub fn new(evaluator: &'a TableEvaluator) -> Self {
        Self { evaluator }
    }

    /// Price every selection, skipping deleted or misconfigured addons
    pub fn price_all(
        &self,
        addons: &[Addon],
        selections: &[AddonSelection],
        core_price: f64,
        mode: Mode,
    ) -> Result<Vec<AddonCharge>> {
        let mut charges = Vec::with_capacity(selections.len());

        for selection in selections {
            let Some(addon) = addons.iter().find(|a| a.id == selection.addon_id) else {
                warn!("Skipping addon '{}': it no longer exists", selection.addon_id);
                continue;
            };

            match self.price(addon, selection, core_price, mode) {
                Ok(Some(charge)) => charges.push(charge),
                Ok(None) => debug!("Addon '{}' selected without a quantity", addon.id),
                Err(RatingError::MissingReference(msg)) => {
                    warn!("Skipping addon '{}': {}", addon.id, msg)
                }
                Err(e) => return Err(e),
            }
        }

        Ok(charges)
    }

    /// Price one selection. `None` when no quantity was requested.
    pub fn price(
        &self,
        addon: &Addon,
        selection: &AddonSelection,
        core_price: f64,
        mode: Mode,
    ) -> Result<Option<AddonCharge>> {
        let Some(quantity) = selection.quantity() else {
            return Ok(None);
        };

        let (list_unit, list_total) = self.list_price(addon, &quantity, core_price, mode)?;
        let figures = reconcile(list_unit, list_total, selection.discount.as_ref(), Precision::Addon, |unit| {
            self.reprice(addon, &quantity, unit, mode)
        })?;

        Ok(Some(AddonCharge {
            addon_id: addon.id.clone(),
            name: addon.name.clone(),
            units: match quantity {
                AddonQuantity::Units(u) => Some(u),
                AddonQuantity::Metrics(_) => None,
            },
            figures,
        }))
    }

    /// `(unit price, total)` before any discount
    pub fn list_price(
        &self,
        addon: &Addon,
        quantity: &AddonQuantity,
        core_price: f64,
        mode: Mode,
    ) -> Result<(f64, f64)> {
        if addon.is_custom_metric {
            let (table, quantities) = self.custom_inputs(addon, quantity)?;
            let result = self.evaluator.evaluate(table, &quantities, mode)?;
            let unit = self.evaluator.list_unit_price(table, &result, &quantities);
            return Ok((unit, result.final_total));
        }

        let units = self.units(addon, quantity)?;
        let model = addon.model.as_ref().ok_or_else(|| {
            RatingError::MissingReference(format!("addon '{}' has no price model", addon.id))
        })?;
        let unit = model.unit_price(core_price);
        Ok((unit, unit * units))
    }

    fn reprice(&self, addon: &Addon, quantity: &AddonQuantity, discounted_unit: f64, mode: Mode) -> Result<f64> {
        if addon.is_custom_metric {
            let (table, quantities) = self.custom_inputs(addon, quantity)?;
            let result = self
                .evaluator
                .evaluate_with(table, &quantities, mode, RateOverride(Some(discounted_unit)))?;
            return Ok(result.final_total);
        }
        Ok(discounted_unit * self.units(addon, quantity)?)
    }

    fn custom_inputs<'t>(&self, addon: &'t Addon, quantity: &AddonQuantity) -> Result<(&'t RateTable, QuantityInput)> {
        let table = addon.custom_table.as_ref().ok_or_else(|| {
            RatingError::MissingReference(format!("addon '{}' has no custom metric table", addon.id))
        })?;

        let quantities = match quantity {
            AddonQuantity::Metrics(map) => map.clone(),
            AddonQuantity::Units(units) => {
                let key = table.primary_metric_key().ok_or_else(|| {
                    RatingError::MissingReference(format!("addon '{}' table has no metric column", addon.id))
                })?;
                QuantityInput::from([(key.to_string(), *units)])
            }
        };
        Ok((table, quantities))
    }

    fn units(&self, addon: &Addon, quantity: &AddonQuantity) -> Result<f64> {
        match quantity {
            AddonQuantity::Units(u) => Ok(*u),
            AddonQuantity::Metrics(_) => Err(RatingError::MissingReference(format!(
                "addon '{}' is priced per unit but only a quantity map was supplied",
                addon.id
            ))),
        }
    }
}
