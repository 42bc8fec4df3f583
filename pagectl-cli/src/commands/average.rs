use std::io;

use anyhow::{Context, Result};
use pagectl_core::compute_average_age;
use tracing::debug;

use super::connection_scope;

pub async fn run_average_age(database_url: Option<String>) -> Result<()> {
    let scope = connection_scope(database_url)?;

    let summary = compute_average_age(&scope, &mut io::stdout().lock())
        .await
        .context("Failed to compute average age")?;
    debug!(total = %summary.total, count = summary.count, "age summary");
    Ok(())
}
