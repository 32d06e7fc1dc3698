//! Discount Reconciler: list price, discounted price and discount percent
//!
//! A discounted total takes precedence over a discounted unit price when a
//! caller supplies both.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Optional discount for one metric key or one addon
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscountInput {
    #[serde(default)]
    pub discounted_total: Option<f64>,
    #[serde(default)]
    pub discounted_unit_price: Option<f64>,
}

impl DiscountInput {
    pub fn total(discounted_total: f64) -> Self {
        Self { discounted_total: Some(discounted_total), discounted_unit_price: None }
    }

    pub fn unit_price(discounted_unit_price: f64) -> Self {
        Self { discounted_total: None, discounted_unit_price: Some(discounted_unit_price) }
    }
}

/// Rounding applied to the discount percent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// 3 decimals
    Core,
    /// 2 decimals
    Addon,
}

impl Precision {
    pub fn decimals(self) -> i32 {
        match self {
            Precision::Core => 3,
            Precision::Addon => 2,
        }
    }
}

/// List and discounted figures, always reported together
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceFigures {
    pub list_unit_price: f64,
    pub list_total: f64,
    pub discounted_unit_price: f64,
    pub discounted_total: f64,
    pub discount_percent: f64,
}

impl PriceFigures {
    /// Figures with no discount applied
    pub fn list_only(list_unit_price: f64, list_total: f64) -> Self {
        Self {
            list_unit_price,
            list_total,
            discounted_unit_price: list_unit_price,
            discounted_total: list_total,
            discount_percent: 0.0,
        }
    }
}

/// Reconcile list and discounted pricing.
///
/// `reprice` maps a discounted unit price to the discounted total by
/// re-running the pricing formula with rate fields overridden; it is only
/// called when the discount is given as a unit price.
pub fn reconcile<F>(
    list_unit_price: f64,
    list_total: f64,
    discount: Option<&DiscountInput>,
    precision: Precision,
    reprice: F,
) -> Result<PriceFigures>
where
    F: FnOnce(f64) -> Result<f64>,
{
    let Some(discount) = discount else {
        return Ok(PriceFigures::list_only(list_unit_price, list_total));
    };

    let (discounted_unit_price, discounted_total) = match (discount.discounted_total, discount.discounted_unit_price) {
        (Some(total), _) => {
            let unit = if list_total != 0.0 {
                list_unit_price * total / list_total
            } else {
                list_unit_price
            };
            (unit, total)
        }
        (None, Some(unit)) => (unit, reprice(unit)?),
        (None, None) => return Ok(PriceFigures::list_only(list_unit_price, list_total)),
    };

    Ok(PriceFigures {
        list_unit_price,
        list_total,
        discounted_unit_price,
        discounted_total,
        discount_percent: round_to(discount_percent(list_total, discounted_total), precision.decimals()),
    })
}

/// `(list - discounted) / list * 100`, clamped to `[0, 100]`; 0 when the list
/// total is 0 or equals the discounted total
pub fn discount_percent(list_total: f64, discounted_total: f64) -> f64 {
    if list_total == 0.0 || list_total == discounted_total {
        return 0.0;
    }
    let pct = (list_total - discounted_total) / list_total * 100.0;
    if pct.is_nan() {
        return 0.0;
    }
    pct.clamp(0.0, 100.0)
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
