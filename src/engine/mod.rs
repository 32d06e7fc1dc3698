//! Pricing engine: request orchestration over a loaded pricing model
//!
//! Holds the read-only model and configuration. `calculate` prices one
//! request exactly; `curve` sweeps the domain in curve mode. The engine is
//! `Send + Sync` and can be shared across threads.

mod evaluator;
mod fields;

pub use evaluator::{PriceResult, QuantityInput, TableEvaluator};
pub use fields::driving_fields;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::addon::{Addon, AddonEngine};
use crate::curve::{CurveSampler, DEFAULT_SAMPLE_COUNT, MAX_SAMPLE_COUNT};
use crate::discount::{reconcile, Precision};
use crate::error::{RatingError, Result};
use crate::lookup::Mode;
use crate::request::{
    CalculateRequest, CalculateResponse, CoreOutput, CurveRequest, CurveResponse, DrivingFields,
};
use crate::script::{RateOverride, DEFAULT_STEP_BUDGET};
use crate::table::{PricingModel, Tier};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of points on a rendered curve, at most `MAX_SAMPLE_COUNT`
    pub sample_count: usize,

    /// Rows a tiered script may read per evaluation
    pub script_step_budget: usize,

    /// Fail the request on a malformed formula instead of degrading it to 0
    pub strict_formulas: bool,

    /// Evaluate curve samples and batches on the rayon pool
    pub parallel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_count: DEFAULT_SAMPLE_COUNT,
            script_step_budget: DEFAULT_STEP_BUDGET,
            strict_formulas: false,
            parallel: true,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_count == 0 || self.sample_count > MAX_SAMPLE_COUNT {
            return Err(RatingError::Config(format!(
                "sample_count must be between 1 and {}, got {}",
                MAX_SAMPLE_COUNT, self.sample_count
            )));
        }
        if self.script_step_budget == 0 {
            return Err(RatingError::Config("script_step_budget must be at least 1".into()));
        }
        Ok(())
    }
}

/// Main pricing engine
#[derive(Debug, Clone)]
pub struct PricingEngine {
    model: PricingModel,
    config: EngineConfig,
    evaluator: TableEvaluator,
}

impl PricingEngine {
    pub fn new(model: PricingModel, config: EngineConfig) -> Result<Self> {
        model.validate()?;
        config.validate()?;
        info!(
            "Pricing engine ready: {} tier(s), {} addon(s)",
            model.tiers.len(),
            model.addons.len()
        );
        let evaluator = TableEvaluator::new(config.script_step_budget, config.strict_formulas);
        Ok(Self { model, config, evaluator })
    }

    pub fn with_defaults(model: PricingModel) -> Result<Self> {
        Self::new(model, EngineConfig::default())
    }

    pub fn model(&self) -> &PricingModel {
        &self.model
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn tier(&self, id: &str) -> Result<&Tier> {
        self.model.tier(id).ok_or_else(|| RatingError::UnknownTier(id.to_string()))
    }

    /// Price one request: core output, addons, discounts and grand total
    pub fn calculate(&self, request: &CalculateRequest) -> Result<CalculateResponse> {
        let table = &self.tier(&request.tier_id)?.table;
        let quantities = &request.quantity;

        let result = self.evaluator.evaluate(table, quantities, Mode::Exact)?;
        let list_unit = self.evaluator.list_unit_price(table, &result, quantities);

        let primary = table.primary_metric_key();
        for key in request.discounts.keys() {
            if Some(key.as_str()) != primary {
                debug!("Ignoring discount on '{}': not the primary metric of '{}'", key, request.tier_id);
            }
        }
        let discount = primary.and_then(|k| request.discounts.get(k));

        let pricing = reconcile(list_unit, result.final_total, discount, Precision::Core, |unit| {
            let repriced = self
                .evaluator
                .evaluate_with(table, quantities, Mode::Exact, RateOverride(Some(unit)))?;
            Ok(repriced.final_total)
        })?;

        let addon_output = AddonEngine::new(&self.evaluator).price_all(
            &self.model.addons,
            &request.addons,
            result.final_total,
            Mode::Exact,
        )?;

        let total = pricing.discounted_total
            + addon_output.iter().map(|c| c.figures.discounted_total).sum::<f64>();

        Ok(CalculateResponse {
            tier_id: request.tier_id.clone(),
            core_output: CoreOutput {
                columns: result.per_output_column,
                final_total: result.final_total,
                pricing,
            },
            addon_output,
            total,
        })
    }

    /// Price many requests, in parallel when configured
    pub fn calculate_batch(&self, requests: &[CalculateRequest]) -> Vec<Result<CalculateResponse>> {
        if self.config.parallel {
            requests.par_iter().map(|r| self.calculate(r)).collect()
        } else {
            requests.iter().map(|r| self.calculate(r)).collect()
        }
    }

    /// Render an indicative curve. An empty `tier_ids` selects every tier.
    pub fn curve(&self, request: &CurveRequest) -> Result<CurveResponse> {
        let tiers: Vec<&Tier> = if request.tier_ids.is_empty() {
            self.model.tiers.iter().collect()
        } else {
            request
                .tier_ids
                .iter()
                .map(|id| self.tier(id))
                .collect::<Result<_>>()?
        };

        let addons: Vec<(&Addon, f64)> = request
            .addons
            .iter()
            .filter_map(|a| match self.model.addon(&a.addon_id) {
                Some(addon) => Some((addon, a.addon_units)),
                None => {
                    warn!("Skipping addon '{}' on curve: it no longer exists", a.addon_id);
                    None
                }
            })
            .collect();

        let sampler = CurveSampler::new(&self.evaluator, self.config.sample_count, self.config.parallel);
        Ok(CurveResponse { points: sampler.render(&tiers, &addons) })
    }

    /// Metric and unit keys each output column of a tier depends on
    pub fn driving_fields(&self, tier_id: &str) -> Result<DrivingFields> {
        Ok(driving_fields(&self.tier(tier_id)?.table))
    }

    /// Driving fields of a custom-metric addon's own table
    pub fn addon_driving_fields(&self, addon_id: &str) -> Result<DrivingFields> {
        let addon = self
            .model
            .addon(addon_id)
            .ok_or_else(|| RatingError::MissingReference(format!("addon '{}' does not exist", addon_id)))?;
        Ok(addon.custom_table.as_ref().map(driving_fields).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discount::DiscountInput;
    use crate::request::{AddonSelection, CurveAddon};
    use crate::script::TieredScript;
    use crate::table::{Column, ColumnKind, Range, RateTable, Row};
    use approx::assert_relative_eq;

    fn growth_table() -> RateTable {
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

    fn platform_table() -> RateTable {
        RateTable::new(
            vec![
                Column::new("Up to", "upto", ColumnKind::Threshold),
                Column::new("Fee", "fee", ColumnKind::Fee),
                Column::new("Overage", "overage", ColumnKind::Rate),
                Column::scripted(
                    "Platform",
                    "platform",
                    TieredScript::ThreePartCurve {
                        threshold_key: "upto".into(),
                        fee_key: "fee".into(),
                        overage_key: "overage".into(),
                    },
                ),
            ],
            vec![
                Row::new().with("upto", 10.0).with("fee", 100.0).with("overage", 2.0),
                Row::new().with("upto", 20.0).with("fee", 150.0).with("overage", 1.0),
            ],
        )
    }

    fn model() -> PricingModel {
        PricingModel {
            tiers: vec![
                Tier { id: "growth".into(), name: "Growth".into(), table: growth_table() },
                Tier { id: "platform".into(), name: "Platform".into(), table: platform_table() },
            ],
            addons: vec![
                Addon::fixed("support", 25.0),
                Addon::percentage("sla", 10.0, Some(20.0), Some(100.0)),
            ],
        }
    }

    fn engine() -> PricingEngine {
        PricingEngine::with_defaults(model()).unwrap()
    }

    fn request(tier: &str, key: &str, q: f64) -> CalculateRequest {
        CalculateRequest::new(tier, QuantityInput::from([(key.to_string(), q)]))
    }

    #[test]
    fn test_engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PricingEngine>();
    }

    #[test]
    fn test_calculate_scenario_b() {
        let response = engine().calculate(&request("growth", "range", 150.0)).unwrap();
        assert_relative_eq!(response.core_output.final_total, 450.0);
        assert_relative_eq!(response.core_output.columns["price"], 450.0);
        assert_relative_eq!(response.core_output.pricing.list_unit_price, 3.0);
        assert_eq!(response.core_output.pricing.discount_percent, 0.0);
        assert_relative_eq!(response.total, 450.0);
        assert!(response.addon_output.is_empty());
    }

    #[test]
    fn test_calculate_with_addons_and_discount() {
        let mut req = request("growth", "range", 150.0);
        req.discounts.insert("range".into(), DiscountInput::total(400.0));
        req.addons = vec![
            AddonSelection::units("support", 2.0),
            AddonSelection::units("sla", 1.0),
            AddonSelection::units("retired", 1.0),
        ];

        let response = engine().calculate(&req).unwrap();
        assert_eq!(response.core_output.pricing.discount_percent, 11.111);
        assert_relative_eq!(response.core_output.pricing.discounted_total, 400.0);

        assert_eq!(response.addon_output.len(), 2);
        assert_relative_eq!(response.addon_output[0].figures.list_total, 50.0);
        // 10% of the list core total, inside [20, 100]
        assert_relative_eq!(response.addon_output[1].figures.list_total, 45.0);
        assert_relative_eq!(response.total, 400.0 + 50.0 + 45.0);
    }

    #[test]
    fn test_discounted_unit_price_reprices_core() {
        let mut req = request("growth", "range", 150.0);
        req.discounts.insert("range".into(), DiscountInput::unit_price(2.5));
        let pricing = engine().calculate(&req).unwrap().core_output.pricing;
        assert_relative_eq!(pricing.discounted_total, 375.0);
        assert_eq!(pricing.discount_percent, 16.667);
    }

    #[test]
    fn test_exact_mode_errors() {
        let engine = engine();
        assert!(matches!(
            engine.calculate(&request("growth", "range", 250.0)),
            Err(RatingError::RangeExceeded { low, high, .. }) if low == 0.0 && high == 200.0
        ));
        assert!(matches!(
            engine.calculate(&request("enterprise", "range", 1.0)),
            Err(RatingError::UnknownTier(_))
        ));
    }

    #[test]
    fn test_three_part_exact_mode_through_engine() {
        let response = engine().calculate(&request("platform", "upto", 15.0)).unwrap();
        assert_relative_eq!(response.core_output.final_total, 150.0);
    }

    #[test]
    fn test_batch_keeps_request_order() {
        let requests = vec![
            request("growth", "range", 10.0),
            request("growth", "range", 999.0),
            request("growth", "range", 150.0),
        ];
        let results = engine().calculate_batch(&requests);
        assert_relative_eq!(results[0].as_ref().unwrap().total, 50.0);
        assert!(results[1].is_err());
        assert_relative_eq!(results[2].as_ref().unwrap().total, 450.0);
    }

    #[test]
    fn test_curve_across_tiers() {
        let curve = engine()
            .curve(&CurveRequest {
                tier_ids: vec!["growth".into(), "platform".into()],
                addons: vec![
                    CurveAddon { addon_id: "support".into(), addon_units: 1.0 },
                    CurveAddon { addon_id: "retired".into(), addon_units: 1.0 },
                ],
            })
            .unwrap();

        assert!(curve.points.len() <= DEFAULT_SAMPLE_COUNT);
        assert_eq!(curve.points.last().unwrap().sample, 200.0);
        assert!(curve.points.windows(2).all(|w| w[0].sample < w[1].sample));

        // Step is 2 over [0, 200]; min(150, 100 + 2 * (16 - 10)) plus the fixed addon
        let at_16 = curve.points.iter().find(|p| p.sample == 16.0).unwrap();
        assert_relative_eq!(at_16.prices["Platform"], 112.0 + 25.0);
        assert_relative_eq!(at_16.prices["Growth"], 80.0 + 25.0);
    }

    #[test]
    fn test_curve_unknown_tier() {
        let request = CurveRequest { tier_ids: vec!["nope".into()], addons: vec![] };
        assert!(matches!(engine().curve(&request), Err(RatingError::UnknownTier(_))));
    }

    #[test]
    fn test_driving_fields() {
        let engine = engine();
        assert_eq!(engine.driving_fields("growth").unwrap()["price"], vec!["range".to_string()]);
        assert_eq!(engine.driving_fields("platform").unwrap()["platform"], vec!["upto".to_string()]);
        assert!(engine.addon_driving_fields("support").unwrap().is_empty());
        assert!(engine.addon_driving_fields("retired").is_err());
    }

    #[test]
    fn test_invalid_model_rejected() {
        let mut model = model();
        model.tiers[0].table.rows.reverse();
        assert!(matches!(PricingEngine::with_defaults(model), Err(RatingError::Config(_))));
    }

    #[test]
    fn test_config_defaults_fill_missing_fields() {
        let config: EngineConfig = serde_json::from_str(r#"{"strict_formulas": true}"#).unwrap();
        assert!(config.strict_formulas);
        assert_eq!(config.sample_count, 100);
        assert_eq!(config.script_step_budget, 10_000);
        assert!(config.parallel);

        let zero = EngineConfig { sample_count: 0, ..EngineConfig::default() };
        assert!(PricingEngine::new(model(), zero).is_err());

        let too_many = EngineConfig { sample_count: 1000, ..EngineConfig::default() };
        assert!(matches!(PricingEngine::new(model(), too_many), Err(RatingError::Config(_))));
    }
}
