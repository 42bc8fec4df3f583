//! Connection settings read from the environment.
//!
//! | Variable                | Default      |
//! |-------------------------|--------------|
//! | `DATABASE_URL`          | unset; overrides everything below |
//! | `DB_HOST`               | `127.0.0.1`  |
//! | `DB_PORT`               | `5432`       |
//! | `DB_USER`               | `postgres`   |
//! | `DB_PASSWORD`           | empty        |
//! | `DB_QUERY_TIMEOUT_SECS` | unset (no timeout) |
//!
//! The database name is always [`DATABASE_NAME`] unless `DATABASE_URL` names one.

use std::env;
use std::fmt;
use std::time::Duration;

use sqlx::postgres::PgConnectOptions;

use crate::error::{PagectlError, Result};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_USER: &str = "postgres";
pub const DATABASE_NAME: &str = "ALX_prodev";

/// Database connection settings
#[derive(Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Per-query timeout; `None` waits indefinitely
    pub query_timeout: Option<Duration>,
    /// Full connection URL; takes precedence over the discrete fields
    pub url: Option<String>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            user: DEFAULT_USER.to_string(),
            password: String::new(),
            database: DATABASE_NAME.to_string(),
            query_timeout: None,
            url: None,
        }
    }
}

impl DbConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Empty values count as unset, except
    /// `DB_PASSWORD` where empty is the default anyway.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(host) = get("DB_HOST") {
            config.host = host;
        }
        if let Some(port) = get("DB_PORT") {
            config.port = port.trim().parse().map_err(|_| {
                PagectlError::config(format!("DB_PORT must be a port number, got '{}'", port))
            })?;
        }
        if let Some(user) = get("DB_USER") {
            config.user = user;
        }
        if let Some(password) = lookup("DB_PASSWORD") {
            config.password = password;
        }
        if let Some(secs) = get("DB_QUERY_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                PagectlError::config(format!(
                    "DB_QUERY_TIMEOUT_SECS must be a whole number of seconds, got '{}'",
                    secs
                ))
            })?;
            config.query_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(url) = get("DATABASE_URL") {
            config = config.with_url(url)?;
        }

        Ok(config)
    }

    /// Use a full connection URL instead of the discrete fields.
    pub fn with_url(mut self, url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        url.parse::<PgConnectOptions>()
            .map_err(|e| PagectlError::config(format!("invalid DATABASE_URL: {}", e)))?;
        self.url = Some(url);
        Ok(self)
    }

    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Build sqlx connect options. A URL without a database path still
    /// connects to [`DbConfig::database`].
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        if let Some(url) = &self.url {
            let options = url
                .parse::<PgConnectOptions>()
                .map_err(|e| PagectlError::config(format!("invalid DATABASE_URL: {}", e)))?;
            return Ok(match options.get_database() {
                Some(_) => options,
                None => options.database(&self.database),
            });
        }

        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.database);
        if !self.password.is_empty() {
            options = options.password(&self.password);
        }
        Ok(options)
    }
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("database", &self.database)
            .field("query_timeout", &self.query_timeout)
            .field("url", &self.url.as_ref().map(|_| "***"))
            .finish()
    }
}
