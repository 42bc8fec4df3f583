//! pagectl CLI - bounded-memory paging over the `user_data` table
//!
//! - `batches`: stream the table in batches, print users over the age threshold
//! - `pages`: print every page, fetching the next only after the last is written
//! - `average-age`: stream the age column and print its mean
//! - `user`: look up one user by id
//! - `query`: run a query through the memoizing cache

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod tracing_setup;

use tracing_setup::{init_tracing, TracingConfig};

#[derive(Parser, Debug)]
#[command(
    name = "pagectl",
    author,
    version,
    about = "Stream a Postgres table page by page without loading it into memory",
    long_about = "Reads the user_data table of the ALX_prodev database in bounded batches. \
                  Connection settings come from DB_HOST, DB_PORT, DB_USER, DB_PASSWORD \
                  (a .env file is honoured) or a full DATABASE_URL."
)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Database URL (overrides DB_HOST/DB_PORT/DB_USER/DB_PASSWORD)
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print users older than 25, reading the table in batches
    Batches(commands::batches::BatchesArgs),
    /// Print every row, one page at a time
    Pages(commands::pages::PagesArgs),
    /// Print the average user age
    AverageAge,
    /// Look up a user by id
    User(commands::user::UserArgs),
    /// Run a query through the result cache
    Query(commands::query::QueryArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&TracingConfig { debug: cli.debug }).ok();

    let database_url = cli.database_url;
    match cli.command {
        Commands::Batches(args) => commands::run_batches(args, database_url).await?,
        Commands::Pages(args) => commands::run_pages(args, database_url).await?,
        Commands::AverageAge => commands::run_average_age(database_url).await?,
        Commands::User(args) => commands::run_user(args, database_url).await?,
        Commands::Query(args) => commands::run_query(args, database_url).await?,
    }

    Ok(())
}
