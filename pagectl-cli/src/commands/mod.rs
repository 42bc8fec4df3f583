//! Command implementations for the pagectl CLI

use anyhow::{Context, Result};
use pagectl_core::{ConnectionScope, DbConfig, PgSource};

pub mod average;
pub mod batches;
pub mod pages;
pub mod query;
pub mod user;

pub use average::run_average_age;
pub use batches::run_batches;
pub use pages::run_pages;
pub use query::run_query;
pub use user::run_user;

/// Build a connection scope from the environment, with `--database-url`
/// taking precedence. Nothing connects until a command runs.
pub(crate) fn connection_scope(database_url: Option<String>) -> Result<ConnectionScope<PgSource>> {
    let mut config = DbConfig::from_env().context("Failed to read database settings")?;
    if let Some(url) = database_url {
        config = config.with_url(url).context("Invalid --database-url")?;
    }
    tracing::debug!(?config, "database settings");

    let source = PgSource::from_config(&config).context("Failed to build connection options")?;
    Ok(ConnectionScope::new(source))
}
