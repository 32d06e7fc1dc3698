//! Render a price curve for every tier (or the selected ones) to CSV
//!
//! One row per sample, one column per tier name.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use csv::Writer;

use rating_engine::request::CurveAddon;
use rating_engine::table::load_pricing_model;
use rating_engine::{CurveRequest, EngineConfig, PricingEngine};

#[derive(Parser, Debug)]
#[command(name = "render_curve")]
#[command(about = "Write an indicative price curve to CSV")]
struct Args {
    /// Pricing model JSON
    #[arg(short = 'm', long = "model")]
    model: PathBuf,

    /// Output CSV path
    #[arg(short = 'o', long = "output", default_value = "price_curve.csv")]
    output: PathBuf,

    /// Tier ids to include; every tier when omitted
    #[arg(short = 't', long = "tier")]
    tiers: Vec<String>,

    /// Addons to add to every price, as ID or ID=UNITS
    #[arg(short = 'a', long = "addon")]
    addons: Vec<String>,

    /// Maximum number of samples
    #[arg(long = "samples")]
    samples: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let model = load_pricing_model(&args.model)
        .with_context(|| format!("Failed to load pricing model {}", args.model.display()))?;

    let mut config = EngineConfig::default();
    if let Some(samples) = args.samples {
        config.sample_count = samples;
    }
    let engine = PricingEngine::new(model, config).context("Invalid pricing model")?;

    let addons = args
        .addons
        .iter()
        .map(String::as_str)
        .map(parse_addon)
        .collect::<Result<Vec<_>>>()?;

    let start = Instant::now();
    let curve = engine.curve(&CurveRequest { tier_ids: args.tiers.clone(), addons })?;
    println!("Rendered {} samples in {:?}", curve.points.len(), start.elapsed());

    let names: BTreeSet<&String> = curve.points.iter().flat_map(|p| p.prices.keys()).collect();

    let mut writer = Writer::from_path(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;

    let mut header = vec!["Sample".to_string()];
    header.extend(names.iter().map(|n| n.to_string()));
    writer.write_record(&header)?;

    for point in &curve.points {
        let mut record = vec![format!("{}", point.sample)];
        for name in &names {
            let price = point.prices.get(*name).copied().unwrap_or(0.0);
            record.push(format!("{:.2}", price));
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;

    println!("Written {} rows to {}", curve.points.len(), args.output.display());
    Ok(())
}

fn parse_addon(spec: &str) -> Result<CurveAddon> {
    let (addon_id, addon_units) = match spec.split_once('=') {
        Some((id, units)) => {
            let units = units
                .parse::<f64>()
                .with_context(|| format!("Invalid units in --addon '{}'", spec))?;
            (id, units)
        }
        None => (spec, 1.0),
    };
    Ok(CurveAddon { addon_id: addon_id.to_string(), addon_units })
}
