//! Curve Sampler: indicative prices across a metric domain
//!
//! Every sample is evaluated in curve mode, so lookups that miss a row and
//! formula failures contribute 0 instead of failing the whole curve.

use std::collections::BTreeMap;

use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::addon::{Addon, AddonEngine, AddonQuantity};
use crate::engine::{QuantityInput, TableEvaluator};
use crate::lookup::Mode;
use crate::table::Tier;

pub const DEFAULT_SAMPLE_COUNT: usize = 100;
pub const MAX_SAMPLE_COUNT: usize = 100;

/// One sample and the price of every tier at it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub sample: f64,
    pub prices: BTreeMap<String, f64>,
}

/// Sample positions over `[min, max]`.
///
/// Step is `ceil(max / sample_count)`, at least 1. Points start at `min`, or at
/// one step when `min` is not positive, and `max` is always the last point.
/// `sample_count` is clamped to `[1, MAX_SAMPLE_COUNT]`.
pub fn sample_points(min: f64, max: f64, sample_count: usize) -> Vec<f64> {
    let sample_count = sample_count.clamp(1, MAX_SAMPLE_COUNT);
    let step = (max / sample_count as f64).ceil().max(1.0);
    let start = if min > 0.0 { min } else { step };

    let mut points = Vec::with_capacity(sample_count);
    while points.len() < sample_count - 1 {
        let value = start + step * points.len() as f64;
        if value >= max {
            break;
        }
        points.push(value);
    }
    points.push(max);
    points
}

pub struct CurveSampler<'a> {
    evaluator: &'a TableEvaluator,
    sample_count: usize,
    parallel: bool,
}

impl<'a> CurveSampler<'a> {
    pub fn new(evaluator: &'a TableEvaluator, sample_count: usize, parallel: bool) -> Self {
        Self { evaluator, sample_count, parallel }
    }

    /// Domain spanning every tier's lookup columns
    pub fn domain(tiers: &[&Tier]) -> Option<(f64, f64)> {
        tiers
            .iter()
            .filter_map(|t| t.table.domain())
            .reduce(|(l1, h1), (l2, h2)| (l1.min(l2), h1.max(h2)))
    }

    /// Render the curve for `tiers`, adding `addons` (addon, units) to every price
    pub fn render(&self, tiers: &[&Tier], addons: &[(&Addon, f64)]) -> Vec<CurvePoint> {
        let Some((min, max)) = Self::domain(tiers) else {
            warn!("No lookup domain across {} tier(s); empty curve", tiers.len());
            return Vec::new();
        };

        let samples = sample_points(min, max, self.sample_count);
        debug!("Rendering {} samples over [{}, {}]", samples.len(), min, max);

        let mut points: Vec<CurvePoint> = if self.parallel {
            samples.par_iter().map(|&s| self.point(s, tiers, addons)).collect()
        } else {
            samples.iter().map(|&s| self.point(s, tiers, addons)).collect()
        };
        points.sort_by(|a, b| a.sample.total_cmp(&b.sample));
        points
    }

    fn point(&self, sample: f64, tiers: &[&Tier], addons: &[(&Addon, f64)]) -> CurvePoint {
        let addon_engine = AddonEngine::new(self.evaluator);
        let mut prices = BTreeMap::new();

        for tier in tiers {
            let quantities: QuantityInput = tier
                .table
                .lookup_columns()
                .map(|c| (c.key.clone(), sample))
                .collect();

            let core = match self.evaluator.evaluate(&tier.table, &quantities, Mode::Curve) {
                Ok(result) => result.final_total,
                Err(e) => {
                    warn!("Tier '{}' at {}: {}", tier.id, sample, e);
                    0.0
                }
            };

            let mut price = core;
            for (addon, units) in addons {
                match addon_engine.list_price(addon, &AddonQuantity::Units(*units), core, Mode::Curve) {
                    Ok((_, total)) => price += total,
                    Err(e) => warn!("Addon '{}' at {}: {}", addon.id, sample, e),
                }
            }

            prices.insert(tier.display_name().to_string(), price);
        }

        CurvePoint { sample, prices }
    }
}
