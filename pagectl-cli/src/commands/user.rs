use anyhow::{Context, Result};
use clap::Parser;
use pagectl_core::get_user_by_id;

use super::connection_scope;

#[derive(Parser, Debug)]
pub struct UserArgs {
    /// User id to look up
    pub user_id: String,
}

pub async fn run_user(args: UserArgs, database_url: Option<String>) -> Result<()> {
    let scope = connection_scope(database_url)?;

    match get_user_by_id(&scope, &args.user_id)
        .await
        .with_context(|| format!("Failed to look up user {}", args.user_id))?
    {
        Some(row) => println!("{}", serde_json::to_string(&row)?),
        None => println!("No user found with id {}", args.user_id),
    }
    Ok(())
}
