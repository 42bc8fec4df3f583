//! Memoizing cache for one-shot queries.
//!
//! Keys are the exact query text: no trimming, no case folding. Entries live
//! until [`QueryCache::clear`] or until the cache is dropped.
//!
//! # Concurrency
//!
//! Each key owns a `tokio::sync::OnceCell`. Concurrent callers asking for the
//! same uncached text queue on that cell and only one of them runs the query;
//! callers for different keys never wait on each other. A failed fetch stores
//! nothing, so the next caller retries; its entry is dropped once nobody is
//! waiting on it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use crate::error::Result;
use crate::model::Row;
use crate::scope::ConnectionScope;
use crate::source::{Connection, DataSource};

/// A fully materialized, shared result set
pub type ResultSet = Arc<Vec<Row>>;

/// Query text → result set, shared by reference
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: Mutex<HashMap<String, Arc<OnceCell<ResultSet>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached rows for `query`, running it through `scope` only if
    /// it has never completed successfully. A hit does not open a connection.
    pub async fn fetch_cached<S: DataSource>(
        &self,
        scope: &ConnectionScope<S>,
        query: &str,
    ) -> Result<ResultSet> {
        let cell = {
            let mut entries = self.entries.lock().await;
            entries.entry(query.to_owned()).or_default().clone()
        };

        if let Some(rows) = cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(query, rows = rows.len(), "cache hit");
            return Ok(rows.clone());
        }

        let mut executed = false;
        let ran = &mut executed;
        let fetched = cell
            .get_or_try_init(|| async move {
                *ran = true;
                let rows = scope
                    .with_connection(async |conn| conn.fetch_all(query).await)
                    .await?;
                Ok::<_, crate::PagectlError>(Arc::new(rows))
            })
            .await
            .cloned();

        let rows = match fetched {
            Ok(rows) => rows,
            Err(err) => {
                self.forget_failed(query, &cell).await;
                return Err(err);
            }
        };

        if executed {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(query, rows = rows.len(), "cache miss, stored result");
        } else {
            // Another caller filled the cell while we waited
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(query, rows = rows.len(), "cache hit after wait");
        }
        Ok(rows)
    }

    /// Drop the empty cell for `query` unless another caller is still waiting
    /// on it. Clones of the cell are only taken under the map lock, so the
    /// count is stable here.
    async fn forget_failed(&self, query: &str, cell: &Arc<OnceCell<ResultSet>>) {
        let mut entries = self.entries.lock().await;
        let unused = entries.get(query).is_some_and(|current| {
            Arc::ptr_eq(current, cell) && !current.initialized() && Arc::strong_count(cell) == 2
        });
        if unused {
            entries.remove(query);
        }
    }

    /// Number of cached result sets
    pub async fn len(&self) -> usize {
        let entries = self.entries.lock().await;
        entries.values().filter(|cell| cell.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, query: &str) -> bool {
        let entries = self.entries.lock().await;
        entries.get(query).is_some_and(|cell| cell.initialized())
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryConnection, MemorySource};
    use crate::model::Value;
    use crate::PagectlError;

    const ALL_USERS: &str = "SELECT * FROM users";

    fn source() -> MemorySource {
        let rows = vec![
            Row::from_pairs([("id", Value::Integer(1)), ("name", Value::from("Ada"))]),
            Row::from_pairs([("id", Value::Integer(2)), ("name", Value::from("Linus"))]),
        ];
        MemorySource::new().with_query(ALL_USERS, rows)
    }

    #[tokio::test]
    async fn repeated_text_runs_once() {
        let source = source();
        let scope = ConnectionScope::new(source.clone());
        let cache = QueryCache::new();

        let first = cache.fetch_cached(&scope, ALL_USERS).await.unwrap();
        for _ in 0..4 {
            let again = cache.fetch_cached(&scope, ALL_USERS).await.unwrap();
            assert_eq!(again, first);
        }

        let stats = source.stats();
        assert_eq!(stats.raw_queries, 1);
        // Hits never open a connection
        assert_eq!((stats.opened, stats.closed), (1, 1));
        assert_eq!((cache.misses(), cache.hits()), (1, 4));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn keys_are_exact_text() {
        let source = source().with_query("select * from users", vec![]);
        let scope = ConnectionScope::new(source.clone());
        let cache = QueryCache::new();

        cache.fetch_cached(&scope, ALL_USERS).await.unwrap();
        let lower = cache.fetch_cached(&scope, "select * from users").await.unwrap();

        assert!(lower.is_empty());
        assert_eq!(source.stats().raw_queries, 2);
        assert!(cache.contains(ALL_USERS).await);
        assert!(!cache.contains(" SELECT * FROM users").await);
    }

    #[tokio::test]
    async fn failure_is_not_cached() {
        let source = source();
        source.fail_query_at(0);
        let scope = ConnectionScope::new(source.clone());
        let cache = QueryCache::new();

        let err = cache.fetch_cached(&scope, ALL_USERS).await.unwrap_err();
        assert!(matches!(err, PagectlError::Query { .. }));
        assert!(!cache.contains(ALL_USERS).await);

        let rows = cache.fetch_cached(&scope, ALL_USERS).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(source.stats().closed, 2);
    }

    #[tokio::test]
    async fn failed_queries_leave_no_entries() {
        let source = source();
        let scope = ConnectionScope::new(source.clone());
        let cache = QueryCache::new();

        for n in 0..5 {
            let query = format!("SELECT {}", n);
            assert!(cache.fetch_cached(&scope, &query).await.is_err());
        }

        assert!(cache.entries.lock().await.is_empty());
        assert_eq!(source.stats().open_connections(), 0);
    }

    /// Yields before connecting, so concurrent lookups interleave with the fetch
    struct SlowConnect(MemorySource);

    #[async_trait::async_trait]
    impl DataSource for SlowConnect {
        type Conn = MemoryConnection;

        async fn connect(&self) -> Result<MemoryConnection> {
            tokio::task::yield_now().await;
            self.0.connect().await
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let source = source();
        let scope = ConnectionScope::new(SlowConnect(source.clone()));
        let cache = QueryCache::new();

        let (a, b, c) = tokio::join!(
            cache.fetch_cached(&scope, ALL_USERS),
            cache.fetch_cached(&scope, ALL_USERS),
            cache.fetch_cached(&scope, ALL_USERS),
        );

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(c.unwrap().len(), 2);
        assert_eq!(source.stats().raw_queries, 1);
        assert_eq!(source.stats().opened, 1);
        assert_eq!((cache.misses(), cache.hits()), (1, 2));
    }

    #[tokio::test]
    async fn concurrent_callers_for_different_keys_each_run() {
        let source = source().with_query("SELECT 1", vec![]);
        let scope = ConnectionScope::new(SlowConnect(source.clone()));
        let cache = QueryCache::new();

        let (a, b) = tokio::join!(
            cache.fetch_cached(&scope, ALL_USERS),
            cache.fetch_cached(&scope, "SELECT 1"),
        );

        assert_eq!(a.unwrap().len(), 2);
        assert!(b.unwrap().is_empty());
        assert_eq!(source.stats().raw_queries, 2);
        assert_eq!((cache.misses(), cache.hits()), (2, 0));
    }

    #[tokio::test]
    async fn clear_forgets_entries() {
        let source = source();
        let scope = ConnectionScope::new(source.clone());
        let cache = QueryCache::new();

        cache.fetch_cached(&scope, ALL_USERS).await.unwrap();
        cache.clear().await;
        assert!(cache.is_empty().await);

        cache.fetch_cached(&scope, ALL_USERS).await.unwrap();
        assert_eq!(source.stats().raw_queries, 2);
    }
}
