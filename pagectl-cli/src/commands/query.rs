use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Parser;
use pagectl_core::{fetch_users_with_cache, QueryCache};
use tracing::info;

use super::connection_scope;

#[derive(Parser, Debug)]
pub struct QueryArgs {
    /// SQL text to run; identical text is served from the cache
    pub sql: String,

    /// Run the query this many times (repeats hit the cache)
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub repeat: u32,
}

pub async fn run_query(args: QueryArgs, database_url: Option<String>) -> Result<()> {
    let scope = connection_scope(database_url)?;
    let cache = QueryCache::new();

    let mut rows = fetch_users_with_cache(&cache, &scope, &args.sql)
        .await
        .context("Query failed")?;
    for _ in 1..args.repeat {
        rows = fetch_users_with_cache(&cache, &scope, &args.sql)
            .await
            .context("Query failed")?;
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for row in rows.iter() {
        serde_json::to_writer(&mut out, row)?;
        writeln!(out)?;
    }
    out.flush()?;

    info!(
        rows = rows.len(),
        hits = cache.hits(),
        misses = cache.misses(),
        "query finished"
    );
    Ok(())
}
