//! In-memory data source.
//!
//! Tables are plain `Vec<Row>`s kept in insertion order. Every handle shares
//! the same state, so a test can mutate a table between page fetches while a
//! streamer holds a connection. Counters record connection lifecycle and
//! query traffic; failures can be injected for connect and for the nth query.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::debug;

use crate::error::{PagectlError, Result};
use crate::model::{Row, Value};
use crate::source::{Connection, DataSource};
use crate::table::{ColumnScan, TableRef};

/// Query and connection counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub opened: u64,
    pub closed: u64,
    pub count_queries: u64,
    pub page_queries: u64,
    pub key_queries: u64,
    pub raw_queries: u64,
    pub column_scans: u64,
}

impl SourceStats {
    /// Total queries of every kind
    pub fn queries(&self) -> u64 {
        self.count_queries + self.page_queries + self.key_queries + self.raw_queries + self.column_scans
    }

    /// Connections opened but not yet released
    pub fn open_connections(&self) -> u64 {
        self.opened - self.closed
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, Vec<Row>>,
    canned: HashMap<String, Vec<Row>>,
    stats: SourceStats,
    refuse_connections: bool,
    fail_query_at: Option<u64>,
}

impl MemoryState {
    /// Count a query and fail it if it is the injected one.
    fn begin_query(&mut self) -> Result<()> {
        let n = self.stats.queries();
        if self.fail_query_at == Some(n) {
            self.fail_query_at = None;
            return Err(PagectlError::query(sqlx::Error::Protocol(format!(
                "injected failure on query #{}",
                n + 1
            ))));
        }
        Ok(())
    }

    fn table(&self, table: &TableRef) -> Result<&[Row]> {
        self.tables
            .get(table.name().as_str())
            .map(Vec::as_slice)
            .ok_or_else(|| {
                PagectlError::query(sqlx::Error::Protocol(format!(
                    "relation \"{}\" does not exist",
                    table.name()
                )))
            })
    }
}

/// Shared in-memory database
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or replace a table.
    pub fn with_table(self, name: &str, rows: Vec<Row>) -> Self {
        self.lock().tables.insert(name.to_owned(), rows);
        self
    }

    /// Register the result for an exact query text used by `fetch_all`.
    pub fn with_query(self, sql: &str, rows: Vec<Row>) -> Self {
        self.lock().canned.insert(sql.to_owned(), rows);
        self
    }

    /// Make every subsequent `connect` fail.
    pub fn refuse_connections(&self) {
        self.lock().refuse_connections = true;
    }

    /// Fail the query with zero-based sequence number `n` (counted across all
    /// connections), once.
    pub fn fail_query_at(&self, n: u64) {
        self.lock().fail_query_at = Some(n);
    }

    pub fn insert_row(&self, table: &str, row: Row) {
        self.lock().tables.entry(table.to_owned()).or_default().push(row);
    }

    /// Remove the first `n` rows of a table, returning how many were removed.
    pub fn delete_front(&self, table: &str, n: usize) -> usize {
        let mut state = self.lock();
        match state.tables.get_mut(table) {
            Some(rows) => {
                let n = n.min(rows.len());
                rows.drain(..n);
                n
            }
            None => 0,
        }
    }

    pub fn stats(&self) -> SourceStats {
        self.lock().stats
    }
}

#[async_trait]
impl DataSource for MemorySource {
    type Conn = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection> {
        let mut state = self.lock();
        if state.refuse_connections {
            return Err(PagectlError::connection(sqlx::Error::Protocol(
                "connection refused".into(),
            )));
        }
        state.stats.opened += 1;
        Ok(MemoryConnection {
            source: self.clone(),
            released: false,
        })
    }
}

/// Connection to a [`MemorySource`]. Released exactly once: by `close`, or on
/// drop if it was never closed.
#[derive(Debug)]
pub struct MemoryConnection {
    source: MemorySource,
    released: bool,
}

impl MemoryConnection {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.source.lock().stats.closed += 1;
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn count_rows(&mut self, table: &TableRef) -> Result<u64> {
        let mut state = self.source.lock();
        state.begin_query()?;
        state.stats.count_queries += 1;
        Ok(state.table(table)?.len() as u64)
    }

    async fn fetch_page(&mut self, table: &TableRef, limit: u64, offset: u64) -> Result<Vec<Row>> {
        let mut state = self.source.lock();
        state.begin_query()?;
        state.stats.page_queries += 1;
        let rows = state.table(table)?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(rows.len());
        let take = usize::try_from(limit).unwrap_or(usize::MAX);
        let page: Vec<Row> = rows[start..].iter().take(take).cloned().collect();
        debug!(table = %table.name(), limit, offset, rows = page.len(), "memory page");
        Ok(page)
    }

    async fn fetch_by_key(&mut self, table: &TableRef, key: &str) -> Result<Option<Row>> {
        let mut state = self.source.lock();
        state.begin_query()?;
        state.stats.key_queries += 1;
        let key_column = table.key().as_str();
        let found = state.table(table)?.iter().find(|row| {
            row.get(key_column)
                .is_some_and(|value| !value.is_null() && value.to_string() == key)
        });
        Ok(found.cloned())
    }

    async fn fetch_all(&mut self, sql: &str) -> Result<Vec<Row>> {
        let mut state = self.source.lock();
        state.begin_query()?;
        state.stats.raw_queries += 1;
        state.canned.get(sql).cloned().ok_or_else(|| {
            PagectlError::query(sqlx::Error::Protocol(format!("no canned result for: {}", sql)))
        })
    }

    fn stream_column<'c>(&'c mut self, scan: &'c ColumnScan) -> BoxStream<'c, Result<Value>> {
        let values = {
            let mut state = self.source.lock();
            state.begin_query().and_then(|()| {
                state.stats.column_scans += 1;
                let rows = state
                    .tables
                    .get(scan.table.as_str())
                    .ok_or_else(|| {
                        PagectlError::query(sqlx::Error::Protocol(format!(
                            "relation \"{}\" does not exist",
                            scan.table
                        )))
                    })?;
                Ok(rows
                    .iter()
                    .map(|row| row.get(scan.column.as_str()).cloned().unwrap_or(Value::Null))
                    .collect::<Vec<_>>())
            })
        };

        match values {
            Ok(values) => stream::iter(values.into_iter().map(Ok)).boxed(),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }

    async fn close(mut self) -> Result<()> {
        self.release();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn rows(n: i64) -> Vec<Row> {
        (0..n)
            .map(|i| {
                Row::from_pairs([
                    ("user_id", Value::from(format!("u{:03}", i))),
                    ("age", Value::Integer(20 + i)),
                ])
            })
            .collect()
    }

    #[tokio::test]
    async fn pages_slice_in_order() {
        let source = MemorySource::new().with_table("user_data", rows(5));
        let table = TableRef::user_data();
        let mut conn = source.connect().await.unwrap();

        assert_eq!(conn.count_rows(&table).await.unwrap(), 5);
        let page = conn.fetch_page(&table, 2, 3).await.unwrap();
        assert_eq!(page, rows(5)[3..5].to_vec());
        assert!(conn.fetch_page(&table, 2, 10).await.unwrap().is_empty());

        conn.close().await.unwrap();
        let stats = source.stats();
        assert_eq!((stats.opened, stats.closed), (1, 1));
        assert_eq!(stats.page_queries, 2);
    }

    #[tokio::test]
    async fn drop_releases_once() {
        let source = MemorySource::new();
        {
            let _conn = source.connect().await.unwrap();
            assert_eq!(source.stats().open_connections(), 1);
        }
        assert_eq!(source.stats().closed, 1);
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let source = MemorySource::new().with_table("user_data", rows(1));
        let table = TableRef::user_data();
        source.fail_query_at(0);

        let mut conn = source.connect().await.unwrap();
        assert!(matches!(
            conn.count_rows(&table).await,
            Err(PagectlError::Query { .. })
        ));
        assert_eq!(conn.count_rows(&table).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn refused_connection_is_not_counted() {
        let source = MemorySource::new();
        source.refuse_connections();
        let err = source.connect().await.unwrap_err();
        assert!(err.is_connection());
        assert_eq!(source.stats().opened, 0);
    }

    #[tokio::test]
    async fn column_stream_and_key_lookup() {
        let source = MemorySource::new().with_table("user_data", rows(3));
        let table = TableRef::user_data();
        let scan = table.column_scan("age").unwrap();
        let mut conn = source.connect().await.unwrap();

        let ages: Vec<Value> = conn.stream_column(&scan).try_collect().await.unwrap();
        assert_eq!(ages, [Value::Integer(20), Value::Integer(21), Value::Integer(22)]);

        let row = conn.fetch_by_key(&table, "u001").await.unwrap().unwrap();
        assert_eq!(row.get("age"), Some(&Value::Integer(21)));
        assert!(conn.fetch_by_key(&table, "nobody").await.unwrap().is_none());
    }
}
