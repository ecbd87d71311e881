//! `repair-tree`: run one subscription's items through the repair tree.
//!
//! Reads a scenario document (existing items, adjustments, proposed items)
//! from a file or stdin and prints JSON on stdout. Logs go to stderr and
//! follow `RUST_LOG` (default `warn`).

use std::fs;
use std::io::{self, Read};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use repair_tree::{
    Item, RoundingMode, StaleRepairPolicy, SubscriptionItemTree, TreeOptions,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "repair-tree",
    version,
    about = "Reconcile invoiced items against a proposed timeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Merge the proposed items and print the items to invoice
    View(RunArgs),
    /// Print the current-truth timeline of the existing items
    Current(RunArgs),
    /// Print the built current-state tree as nested JSON
    Tree(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Scenario file (`-` for stdin)
    input: String,

    /// Pretty-print the output
    #[arg(long)]
    pretty: bool,

    /// Decimal places of prorated amounts
    #[arg(long)]
    decimals: Option<u32>,

    /// Rounding of prorated amounts
    #[arg(long, value_enum)]
    rounding: Option<Rounding>,

    /// Fail on repairs reaching outside their item instead of dropping them
    #[arg(long)]
    reject_stale_repairs: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Rounding {
    HalfUp,
    HalfEven,
    Down,
}

impl From<Rounding> for RoundingMode {
    fn from(rounding: Rounding) -> Self {
        match rounding {
            Rounding::HalfUp => RoundingMode::HalfUp,
            Rounding::HalfEven => RoundingMode::HalfEven,
            Rounding::Down => RoundingMode::Down,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Scenario {
    #[serde(default)]
    subscription_id: Uuid,
    #[serde(default)]
    invoice_id: Uuid,
    #[serde(default)]
    options: Option<TreeOptions>,
    #[serde(default)]
    existing: Vec<Item>,
    #[serde(default)]
    adjustments: Vec<Adjustment>,
    #[serde(default)]
    proposed: Vec<Item>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Adjustment {
    target_id: Uuid,
    amount: Decimal,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let (args, output) = match &cli.command {
        Command::View(args) => (args, run_view(args)?),
        Command::Current(args) => (args, run_current(args)?),
        Command::Tree(args) => (args, run_tree(args)?),
    };

    let text = if args.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{text}");
    Ok(())
}

fn run_view(args: &RunArgs) -> Result<Value> {
    let (mut tree, proposed) = load(args)?;
    tree.flatten(true).context("Failed to flatten current state")?;
    for item in proposed {
        tree.merge_proposed_item(item)
            .context("Failed to add proposed item")?;
    }
    tree.build_for_merge().context("Failed to merge")?;
    Ok(serde_json::to_value(tree.view()?)?)
}

fn run_current(args: &RunArgs) -> Result<Value> {
    let (mut tree, _) = load(args)?;
    tree.build().context("Failed to build current state")?;
    Ok(serde_json::to_value(tree.view()?)?)
}

fn run_tree(args: &RunArgs) -> Result<Value> {
    let (mut tree, _) = load(args)?;
    tree.build().context("Failed to build current state")?;
    Ok(tree.debug_json())
}

/// Parse the scenario and feed its existing state into a fresh tree.
fn load(args: &RunArgs) -> Result<(SubscriptionItemTree, Vec<Item>)> {
    let input = read_input(&args.input)?;
    let scenario: Scenario =
        serde_json::from_str(&input).context("Failed to parse scenario JSON")?;

    let mut options = scenario.options.unwrap_or_default();
    if let Some(decimals) = args.decimals {
        options.proration.decimals = decimals;
    }
    if let Some(rounding) = args.rounding {
        options.proration.rounding = rounding.into();
    }
    if args.reject_stale_repairs {
        options.stale_repairs = StaleRepairPolicy::Reject;
    }

    tracing::debug!(
        subscription_id = %scenario.subscription_id,
        existing = scenario.existing.len(),
        adjustments = scenario.adjustments.len(),
        proposed = scenario.proposed.len(),
        "loaded scenario"
    );
    let mut tree =
        SubscriptionItemTree::with_options(scenario.subscription_id, scenario.invoice_id, options);
    for item in scenario.existing {
        tree.add_item(item).context("Failed to add existing item")?;
    }
    for adjustment in scenario.adjustments {
        tree.add_adjustment(adjustment.target_id, adjustment.amount)?;
    }
    Ok((tree, scenario.proposed))
}

fn read_input(path: &str) -> Result<String> {
    if path == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        Ok(buf)
    } else {
        fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))
    }
}
