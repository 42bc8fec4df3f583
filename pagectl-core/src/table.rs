//! Table descriptions and the SQL text generated from them.
//!
//! Identifiers are validated once, so they can be spliced into statements.
//! Every user-influenced number (LIMIT, OFFSET, key values) is bound as a
//! parameter and never formatted into the SQL string.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{PagectlError, Result};

/// Plain unquoted SQL identifier, at most 63 bytes (Postgres NAMEDATALEN - 1)
static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("invalid identifier regex"));

/// Validated SQL identifier (table or column name)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident(String);

impl Ident {
    pub fn new(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(PagectlError::InvalidIdentifier {
                value: String::new(),
                reason: "identifier cannot be empty",
            });
        }

        if !IDENT_RE.is_match(s) {
            return Err(PagectlError::InvalidIdentifier {
                value: s.to_owned(),
                reason: "must be letters, digits or underscores, not starting with a digit, max 63 chars",
            });
        }

        Ok(Self(s.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Ident {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A table to page through: its name, ordering key and selected columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    name: Ident,
    key: Ident,
    columns: Vec<Ident>,
}

impl TableRef {
    /// Describe a table. `key` orders pages and is always selected.
    pub fn new(name: &str, key: &str, columns: &[&str]) -> Result<Self> {
        let name = Ident::new(name)?;
        let key = Ident::new(key)?;
        let mut selected = vec![key.clone()];
        for column in columns {
            let column = Ident::new(column)?;
            if !selected.contains(&column) {
                selected.push(column);
            }
        }

        Ok(Self {
            name,
            key,
            columns: selected,
        })
    }

    /// The `user_data` table: `user_id`, `name`, `email`, `age`.
    pub fn user_data() -> Self {
        let ident = |s: &str| Ident(s.to_owned());
        Self {
            name: ident("user_data"),
            key: ident("user_id"),
            columns: vec![ident("user_id"), ident("name"), ident("email"), ident("age")],
        }
    }

    pub fn name(&self) -> &Ident {
        &self.name
    }

    pub fn key(&self) -> &Ident {
        &self.key
    }

    pub fn columns(&self) -> &[Ident] {
        &self.columns
    }

    fn select_list(&self) -> String {
        self.columns
            .iter()
            .map(Ident::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn count_sql(&self) -> String {
        format!("SELECT COUNT(*) FROM {}", self.name)
    }

    /// One page; `$1` = LIMIT, `$2` = OFFSET.
    pub fn page_sql(&self) -> String {
        format!(
            "SELECT {} FROM {} ORDER BY {} LIMIT $1 OFFSET $2",
            self.select_list(),
            self.name,
            self.key
        )
    }

    /// Single row by key; `$1` = key compared as text.
    pub fn by_key_sql(&self) -> String {
        format!(
            "SELECT {} FROM {} WHERE {}::text = $1",
            self.select_list(),
            self.name,
            self.key
        )
    }

    /// Scan of one column, for row-at-a-time streaming.
    pub fn column_scan(&self, column: &str) -> Result<ColumnScan> {
        let column = Ident::new(column)?;
        let sql = format!("SELECT {} FROM {}", column, self.name);
        Ok(ColumnScan {
            table: self.name.clone(),
            column,
            sql,
        })
    }
}

/// A prepared single-column scan. Data sources either run `sql` or read the
/// column by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnScan {
    pub table: Ident,
    pub column: Ident,
    pub sql: String,
}
