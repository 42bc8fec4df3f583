use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Parser;
use pagectl_core::{paginate_users, print_pages, BatchSize};
use tracing::info;

use super::connection_scope;

#[derive(Parser, Debug)]
pub struct PagesArgs {
    /// Rows per page (must be positive)
    #[arg(long, short = 'n', default_value_t = 100, allow_hyphen_values = true)]
    pub page_size: i64,

    /// Print only the single page starting at this row offset
    #[arg(long)]
    pub offset: Option<u64>,
}

pub async fn run_pages(args: PagesArgs, database_url: Option<String>) -> Result<()> {
    BatchSize::new(args.page_size)?;
    let scope = connection_scope(database_url)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match args.offset {
        Some(offset) => {
            let rows = paginate_users(&scope, args.page_size, offset)
                .await
                .context("Failed to fetch page")?;
            for row in &rows {
                serde_json::to_writer(&mut out, row)?;
                writeln!(out)?;
            }
            info!(offset, rows = rows.len(), "printed page");
        }
        None => {
            let pages = print_pages(&scope, args.page_size, &mut out)
                .await
                .context("Paging failed")?;
            info!(pages, "printed all pages");
        }
    }

    out.flush()?;
    Ok(())
}
