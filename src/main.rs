//! Rating Engine CLI
//!
//! Prices requests against a pricing model read from JSON and prints JSON.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;

use rating_engine::table::loader::{load_pricing_model, load_table_csv};
use rating_engine::{CalculateRequest, CurveRequest, EngineConfig, PricingEngine, PricingModel};

#[derive(Parser, Debug)]
#[command(name = "rating_engine")]
#[command(version, about = "Tiered rate-table pricing engine")]
struct Cli {
    /// Pricing model JSON: tiers and addons
    #[arg(short = 'm', long = "model")]
    model: PathBuf,

    /// Engine configuration JSON; defaults apply when omitted
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Replace a tier's rows from CSV, as TIER=PATH (repeatable)
    #[arg(long = "rows", value_name = "TIER=PATH")]
    rows: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Price one request, or an array of requests
    Calculate {
        /// Request JSON; reads stdin when omitted
        request: Option<PathBuf>,
    },
    /// Render an indicative price curve
    Curve {
        /// Curve request JSON; reads stdin when omitted
        request: Option<PathBuf>,
    },
    /// List the metric and unit keys each output column depends on
    Fields {
        /// Tier id
        #[arg(long, conflicts_with = "addon")]
        tier: Option<String>,

        /// Custom-metric addon id
        #[arg(long)]
        addon: Option<String>,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CalculateInput {
    Batch(Vec<CalculateRequest>),
    Single(CalculateRequest),
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut model = load_pricing_model(&cli.model)
        .with_context(|| format!("Failed to load pricing model {}", cli.model.display()))?;
    for spec in &cli.rows {
        replace_rows(&mut model, spec)?;
    }

    let config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load engine config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let engine = PricingEngine::new(model, config).context("Invalid pricing model")?;

    let output = match &cli.command {
        Command::Calculate { request } => match read_json::<CalculateInput>(request.as_deref())? {
            CalculateInput::Single(request) => {
                let response = engine
                    .calculate(&request)
                    .with_context(|| format!("Calculation failed for tier '{}'", request.tier_id))?;
                serde_json::to_string_pretty(&response)?
            }
            CalculateInput::Batch(requests) => {
                let responses = engine
                    .calculate_batch(&requests)
                    .into_iter()
                    .zip(&requests)
                    .map(|(result, request)| {
                        result.with_context(|| format!("Calculation failed for tier '{}'", request.tier_id))
                    })
                    .collect::<Result<Vec<_>>>()?;
                serde_json::to_string_pretty(&responses)?
            }
        },
        Command::Curve { request } => {
            let request: CurveRequest = read_json(request.as_deref())?;
            serde_json::to_string_pretty(&engine.curve(&request)?)?
        }
        Command::Fields { tier, addon } => {
            let fields = match (tier, addon) {
                (Some(tier), _) => engine.driving_fields(tier)?,
                (None, Some(addon)) => engine.addon_driving_fields(addon)?,
                (None, None) => bail!("Pass --tier or --addon"),
            };
            serde_json::to_string_pretty(&fields)?
        }
    };

    println!("{}", output);
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: Option<&Path>) -> Result<T> {
    let mut text = String::new();
    match path {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
            BufReader::new(file).read_to_string(&mut text)?;
        }
        None => {
            io::stdin().read_to_string(&mut text).context("Failed to read stdin")?;
        }
    }
    serde_json::from_str(&text).context("Malformed request JSON")
}

fn replace_rows(model: &mut PricingModel, spec: &str) -> Result<()> {
    let Some((tier_id, path)) = spec.split_once('=') else {
        bail!("Expected TIER=PATH, got '{}'", spec);
    };
    let Some(tier) = model.tiers.iter_mut().find(|t| t.id == tier_id) else {
        bail!("Unknown tier '{}' in --rows", tier_id);
    };
    tier.table = load_table_csv(tier.table.columns.clone(), path)
        .with_context(|| format!("Failed to load rows for '{}' from {}", tier_id, path))?;
    Ok(())
}
