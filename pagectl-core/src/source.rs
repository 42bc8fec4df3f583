//! Data source collaborator traits.
//!
//! A [`DataSource`] hands out exclusively-owned [`Connection`]s. Everything the
//! streaming, scoping and caching code needs from a database goes through these
//! two traits, so the same code runs against Postgres and [`crate::MemorySource`].

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::model::{Row, Value};
use crate::table::{ColumnScan, TableRef};

/// Something that can open connections.
#[async_trait]
pub trait DataSource: Send + Sync {
    type Conn: Connection;

    /// Open a new connection. Failures are [`crate::PagectlError::Connection`].
    async fn connect(&self) -> Result<Self::Conn>;
}

/// An open connection, owned by one operation at a time.
#[async_trait]
pub trait Connection: Send {
    /// `SELECT COUNT(*)` over the table.
    async fn count_rows(&mut self, table: &TableRef) -> Result<u64>;

    /// One page of the table in key order.
    async fn fetch_page(&mut self, table: &TableRef, limit: u64, offset: u64) -> Result<Vec<Row>>;

    /// The row whose key equals `key`, if any.
    async fn fetch_by_key(&mut self, table: &TableRef, key: &str) -> Result<Option<Row>>;

    /// Run a read query and materialize the whole result set.
    async fn fetch_all(&mut self, sql: &str) -> Result<Vec<Row>>;

    /// Stream a single column one value at a time.
    fn stream_column<'c>(&'c mut self, scan: &'c ColumnScan) -> BoxStream<'c, Result<Value>>;

    /// Release the connection.
    async fn close(self) -> Result<()>
    where
        Self: Sized;
}
