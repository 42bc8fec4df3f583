//! Caller-facing operations over the `user_data` table.
//!
//! Every function here opens its connection through a [`ConnectionScope`], so
//! stopping early or failing part-way still closes it. Output goes to any
//! `io::Write` (one JSON object per line for rows).

use std::io::Write;

use futures::TryStreamExt;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::cache::{QueryCache, ResultSet};
use crate::error::Result;
use crate::model::{BatchSize, Row};
use crate::pager::{PagedStreamer, Strategy};
use crate::scope::ConnectionScope;
use crate::source::{Connection, DataSource};
use crate::table::TableRef;

/// Rows with an age strictly above this are selected by [`batch_processing`]
pub const AGE_THRESHOLD: i64 = 25;

/// Count-then-offset batches over `user_data`.
pub fn stream_users_in_batches<C: Connection>(conn: &mut C, size: BatchSize) -> PagedStreamer<'_, C> {
    PagedStreamer::new(conn, TableRef::user_data(), size, Strategy::CountThenOffset)
}

/// Probe-until-empty pages over `user_data`.
pub fn lazy_pagination<C: Connection>(conn: &mut C, size: BatchSize) -> PagedStreamer<'_, C> {
    PagedStreamer::new(conn, TableRef::user_data(), size, Strategy::ProbeUntilEmpty)
}

/// True when the row's age is known and above [`AGE_THRESHOLD`].
pub fn is_over_threshold(row: &Row) -> bool {
    row.age().is_some_and(|age| age > Decimal::from(AGE_THRESHOLD))
}

fn write_row<W: Write>(out: &mut W, row: &Row) -> Result<()> {
    serde_json::to_writer(&mut *out, row)?;
    writeln!(out)?;
    Ok(())
}

/// Stream `user_data` in batches and print every user older than
/// [`AGE_THRESHOLD`]. Returns how many rows were printed.
///
/// A non-positive `batch_size` fails before any connection is opened.
pub async fn batch_processing<S, W>(
    scope: &ConnectionScope<S>,
    batch_size: i64,
    strategy: Strategy,
    out: &mut W,
) -> Result<u64>
where
    S: DataSource,
    W: Write,
{
    let size = BatchSize::new(batch_size)?;
    scope
        .with_connection(async |conn| {
            let mut pager = PagedStreamer::new(conn, TableRef::user_data(), size, strategy);
            let mut printed = 0u64;
            while let Some(batch) = pager.next_batch().await? {
                for row in batch.iter().filter(|row| is_over_threshold(row)) {
                    write_row(out, row)?;
                    printed += 1;
                }
            }
            info!(
                pages = pager.pages_fetched(),
                rows = pager.rows_yielded(),
                printed,
                "batch processing finished"
            );
            Ok(printed)
        })
        .await
}

/// One page of `user_data` at `offset`, on its own connection.
pub async fn paginate_users<S: DataSource>(
    scope: &ConnectionScope<S>,
    page_size: i64,
    offset: u64,
) -> Result<Vec<Row>> {
    let size = BatchSize::new(page_size)?;
    scope
        .with_connection(async |conn| {
            conn.fetch_page(&TableRef::user_data(), size.get(), offset)
                .await
        })
        .await
}

/// Print every page of `user_data`, one JSON line per row, fetching each page
/// only after the previous one is written. Returns the number of pages.
pub async fn print_pages<S, W>(scope: &ConnectionScope<S>, page_size: i64, out: &mut W) -> Result<u64>
where
    S: DataSource,
    W: Write,
{
    let size = BatchSize::new(page_size)?;
    scope
        .with_connection(async |conn| {
            let mut pages = lazy_pagination(conn, size);
            let mut count = 0u64;
            while let Some(page) = pages.next_batch().await? {
                debug!(index = page.index, rows = page.len(), "page");
                for row in &page {
                    write_row(out, row)?;
                }
                count += 1;
            }
            Ok(count)
        })
        .await
}

/// Sum and count of a numeric column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgeSummary {
    pub total: Decimal,
    pub count: u64,
}

impl AgeSummary {
    pub fn add(&mut self, age: Decimal) {
        self.total += age;
        self.count += 1;
    }

    /// `None` for an empty table
    pub fn average(&self) -> Option<Decimal> {
        (self.count > 0).then(|| self.total / Decimal::from(self.count))
    }
}

/// Stream the `age` column one value at a time and fold it into a summary.
/// NULL ages are skipped.
pub async fn sum_user_ages<C: Connection>(conn: &mut C) -> Result<AgeSummary> {
    let scan = TableRef::user_data().column_scan("age")?;
    conn.stream_column(&scan)
        .try_fold(AgeSummary::default(), |mut summary, value| async move {
            if let Some(age) = value.as_decimal() {
                summary.add(age);
            }
            Ok(summary)
        })
        .await
}

/// Print the average user age, or `No users found.` for an empty table.
pub async fn compute_average_age<S, W>(scope: &ConnectionScope<S>, out: &mut W) -> Result<AgeSummary>
where
    S: DataSource,
    W: Write,
{
    let summary = scope.with_connection(async |conn| sum_user_ages(conn).await).await?;
    match summary.average() {
        Some(avg) => writeln!(out, "Average age of users: {:.2}", avg.round_dp(2))?,
        None => writeln!(out, "No users found.")?,
    }
    Ok(summary)
}

/// Look up one user by id on a scoped connection.
pub async fn get_user_by_id<S: DataSource>(scope: &ConnectionScope<S>, user_id: &str) -> Result<Option<Row>> {
    scope
        .with_connection(async |conn| conn.fetch_by_key(&TableRef::user_data(), user_id).await)
        .await
}

/// Run `query` through the cache; repeats with identical text are served
/// without touching the database.
pub async fn fetch_users_with_cache<S: DataSource>(
    cache: &QueryCache,
    scope: &ConnectionScope<S>,
    query: &str,
) -> Result<ResultSet> {
    cache.fetch_cached(scope, query).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySource;
    use crate::model::Value;

    fn user(id: &str, age: i64) -> Row {
        Row::from_pairs([
            ("user_id", Value::from(id)),
            ("name", Value::from(format!("user {}", id))),
            ("email", Value::from(format!("{}@example.com", id))),
            ("age", Value::Decimal(Decimal::from(age))),
        ])
    }

    fn scope_with(rows: Vec<Row>) -> (MemorySource, ConnectionScope<MemorySource>) {
        let source = MemorySource::new().with_table("user_data", rows);
        (source.clone(), ConnectionScope::new(source))
    }

    #[test]
    fn threshold_is_strict() {
        assert!(!is_over_threshold(&user("a", 25)));
        assert!(is_over_threshold(&user("b", 26)));
        assert!(!is_over_threshold(&Row::from_pairs([("age", Value::Null)])));
    }

    #[tokio::test]
    async fn prints_only_users_over_threshold() {
        let (source, scope) = scope_with(vec![user("a", 20), user("b", 30), user("c", 26)]);
        let mut out = Vec::new();

        let printed = batch_processing(&scope, 2, Strategy::CountThenOffset, &mut out)
            .await
            .unwrap();

        assert_eq!(printed, 2);
        let text = String::from_utf8(out).unwrap();
        let ages: Vec<i64> = text
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["age"].as_i64().unwrap())
            .collect();
        assert_eq!(ages, [30, 26]);
        assert_eq!(source.stats().open_connections(), 0);
    }

    #[tokio::test]
    async fn invalid_batch_size_opens_nothing() {
        let (source, scope) = scope_with(vec![user("a", 40)]);
        let mut out = Vec::new();

        for bad in [0, -1] {
            let err = batch_processing(&scope, bad, Strategy::default(), &mut out)
                .await
                .unwrap_err();
            assert!(err.is_configuration());
        }
        assert_eq!(source.stats().opened, 0);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn average_of_ages() {
        let (_, scope) = scope_with(vec![user("a", 20), user("b", 30), user("c", 26)]);
        let mut out = Vec::new();

        let summary = compute_average_age(&scope, &mut out).await.unwrap();

        assert_eq!(summary.count, 3);
        assert_eq!(summary.total, Decimal::from(76));
        assert_eq!(String::from_utf8(out).unwrap(), "Average age of users: 25.33\n");
    }

    #[tokio::test]
    async fn average_of_empty_table() {
        let (source, scope) = scope_with(vec![]);
        let mut out = Vec::new();

        let summary = compute_average_age(&scope, &mut out).await.unwrap();

        assert_eq!(summary, AgeSummary::default());
        assert_eq!(summary.average(), None);
        assert_eq!(String::from_utf8(out).unwrap(), "No users found.\n");
        assert_eq!(source.stats().closed, 1);
    }

    #[tokio::test]
    async fn pages_print_lazily() {
        let (source, scope) = scope_with((0..5).map(|i| user(&format!("u{}", i), 30)).collect());
        let mut out = Vec::new();

        let pages = print_pages(&scope, 2, &mut out).await.unwrap();

        assert_eq!(pages, 3);
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 5);
        // Three pages of rows plus the empty probe
        assert_eq!(source.stats().page_queries, 4);
    }

    #[tokio::test]
    async fn single_page_fetch() {
        let (_, scope) = scope_with((0..5).map(|i| user(&format!("u{}", i), 30)).collect());
        let page = paginate_users(&scope, 2, 4).await.unwrap();
        assert_eq!(page, vec![user("u4", 30)]);
        assert!(paginate_users(&scope, 0, 0).await.is_err());
    }

    #[tokio::test]
    async fn lookup_by_id() {
        let (source, scope) = scope_with(vec![user("a", 20), user("b", 30)]);

        let found = get_user_by_id(&scope, "b").await.unwrap().unwrap();
        assert_eq!(found.get("age"), Some(&Value::Decimal(Decimal::from(30))));
        assert!(get_user_by_id(&scope, "zzz").await.unwrap().is_none());

        let stats = source.stats();
        assert_eq!((stats.opened, stats.closed), (2, 2));
    }

    #[tokio::test]
    async fn cached_fetch_goes_through_cache() {
        let source = MemorySource::new().with_query("SELECT * FROM users", vec![user("a", 20)]);
        let scope = ConnectionScope::new(source.clone());
        let cache = QueryCache::new();

        let first = fetch_users_with_cache(&cache, &scope, "SELECT * FROM users").await.unwrap();
        let second = fetch_users_with_cache(&cache, &scope, "SELECT * FROM users").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(source.stats().raw_queries, 1);
    }
}
