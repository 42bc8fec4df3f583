use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use pagectl_core::{batch_processing, BatchSize, Strategy, AGE_THRESHOLD};
use tracing::info;

use super::connection_scope;

/// How the end of the table is found
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum StrategyArg {
    /// COUNT(*) first, then fetch exactly that many pages
    Count,
    /// Fetch pages until one comes back empty
    Probe,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Count => Strategy::CountThenOffset,
            StrategyArg::Probe => Strategy::ProbeUntilEmpty,
        }
    }
}

#[derive(Parser, Debug)]
pub struct BatchesArgs {
    /// Rows per batch (must be positive)
    #[arg(long, short = 'n', default_value_t = 50, allow_hyphen_values = true)]
    pub batch_size: i64,

    /// End-of-table detection
    #[arg(long, value_enum, default_value_t = StrategyArg::Count)]
    pub strategy: StrategyArg,
}

pub async fn run_batches(args: BatchesArgs, database_url: Option<String>) -> Result<()> {
    // Reject bad sizes before touching configuration or the network
    BatchSize::new(args.batch_size)?;
    let scope = connection_scope(database_url)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let printed = batch_processing(&scope, args.batch_size, args.strategy.into(), &mut out)
        .await
        .context("Batch processing failed")?;
    out.flush()?;

    info!(printed, threshold = AGE_THRESHOLD, "users over age threshold");
    Ok(())
}
