//! PostgreSQL data source over a single sqlx `PgConnection`.
//!
//! No pool: each scope opens its own connection and closes it when done.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnectOptions, PgRow};
use sqlx::{Column, ConnectOptions, Connection as _, PgConnection, Row as _, TypeInfo};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DbConfig;
use crate::error::{PagectlError, Result};
use crate::model::{Row, Value};
use crate::source::{Connection, DataSource};
use crate::table::{ColumnScan, TableRef};

/// Connection factory for a Postgres server
#[derive(Debug, Clone)]
pub struct PgSource {
    options: PgConnectOptions,
    query_timeout: Option<Duration>,
}

impl PgSource {
    pub fn new(options: PgConnectOptions) -> Self {
        Self {
            options,
            query_timeout: None,
        }
    }

    pub fn from_config(config: &DbConfig) -> Result<Self> {
        Ok(Self {
            options: config.connect_options()?,
            query_timeout: config.query_timeout,
        })
    }

    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout = timeout;
        self
    }
}

#[async_trait]
impl DataSource for PgSource {
    type Conn = PgConn;

    async fn connect(&self) -> Result<PgConn> {
        let conn = self
            .options
            .connect()
            .await
            .map_err(PagectlError::connection)?;
        info!(
            host = self.options.get_host(),
            database = self.options.get_database().unwrap_or_default(),
            "connection opened"
        );
        Ok(PgConn {
            conn,
            query_timeout: self.query_timeout,
        })
    }
}

/// An open Postgres connection
#[derive(Debug)]
pub struct PgConn {
    conn: PgConnection,
    query_timeout: Option<Duration>,
}

/// Await a query, bounded by `timeout` when one is set.
async fn with_timeout<T, F>(timeout: Option<Duration>, query: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    match timeout {
        Some(after) => tokio::time::timeout(after, query)
            .await
            .map_err(|_| PagectlError::Timeout { after })?
            .map_err(PagectlError::query),
        None => query.await.map_err(PagectlError::query),
    }
}

/// Bound every pull of `items` by `timeout` when one is set. The stream ends
/// after yielding the timeout error.
fn with_pull_timeout<'a, T, S>(timeout: Option<Duration>, items: S) -> BoxStream<'a, Result<T>>
where
    T: Send + 'a,
    S: Stream<Item = Result<T>> + Send + 'a,
{
    let Some(after) = timeout else {
        return items.boxed();
    };
    stream::unfold(Some(items.boxed()), move |state| async move {
        let mut items = state?;
        match tokio::time::timeout(after, items.next()).await {
            Ok(Some(item)) => Some((item, Some(items))),
            Ok(None) => None,
            Err(_) => Some((Err(PagectlError::Timeout { after }), None)),
        }
    })
    .boxed()
}

#[async_trait]
impl Connection for PgConn {
    async fn count_rows(&mut self, table: &TableRef) -> Result<u64> {
        let sql = table.count_sql();
        let timeout = self.query_timeout;
        let (total,): (i64,) =
            with_timeout(timeout, sqlx::query_as(&sql).fetch_one(&mut self.conn)).await?;
        debug!(table = %table.name(), total, "counted rows");
        Ok(u64::try_from(total).unwrap_or(0))
    }

    async fn fetch_page(&mut self, table: &TableRef, limit: u64, offset: u64) -> Result<Vec<Row>> {
        let sql = table.page_sql();
        let timeout = self.query_timeout;
        let rows = with_timeout(
            timeout,
            sqlx::query(&sql)
                .bind(to_i64(limit))
                .bind(to_i64(offset))
                .fetch_all(&mut self.conn),
        )
        .await?;
        debug!(table = %table.name(), limit, offset, rows = rows.len(), "fetched page");
        rows.iter().map(decode_row).collect()
    }

    async fn fetch_by_key(&mut self, table: &TableRef, key: &str) -> Result<Option<Row>> {
        let sql = table.by_key_sql();
        let timeout = self.query_timeout;
        let row = with_timeout(
            timeout,
            sqlx::query(&sql).bind(key).fetch_optional(&mut self.conn),
        )
        .await?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn fetch_all(&mut self, sql: &str) -> Result<Vec<Row>> {
        let timeout = self.query_timeout;
        let rows = with_timeout(timeout, sqlx::query(sql).fetch_all(&mut self.conn)).await?;
        debug!(rows = rows.len(), "fetched result set");
        rows.iter().map(decode_row).collect()
    }

    fn stream_column<'c>(&'c mut self, scan: &'c ColumnScan) -> BoxStream<'c, Result<Value>> {
        let timeout = self.query_timeout;
        // Cursor-style: rows are decoded as they arrive, never collected
        let values = sqlx::query(&scan.sql)
            .fetch(&mut self.conn)
            .map(|row| {
                let row = row.map_err(PagectlError::query)?;
                decode_value(&row, 0)
            });
        with_pull_timeout(timeout, values)
    }

    async fn close(self) -> Result<()> {
        self.conn.close().await.map_err(PagectlError::query)?;
        info!("connection closed");
        Ok(())
    }
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn decode_row(row: &PgRow) -> Result<Row> {
    row.columns()
        .iter()
        .map(|column| Ok((column.name().to_owned(), decode_value(row, column.ordinal())?)))
        .collect()
}

fn decode_value(row: &PgRow, index: usize) -> Result<Value> {
    let column = &row.columns()[index];
    let type_name = column.type_info().name();
    let value: std::result::Result<Value, sqlx::Error> = match type_name {
        "INT2" => row.try_get::<Option<i16>, _>(index).map(|v| v.map(i64::from).into()),
        "INT4" => row.try_get::<Option<i32>, _>(index).map(|v| v.map(i64::from).into()),
        "INT8" => row.try_get::<Option<i64>, _>(index).map(Value::from),
        "NUMERIC" => row.try_get::<Option<Decimal>, _>(index).map(Value::from),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
            row.try_get::<Option<String>, _>(index).map(Value::from)
        }
        "UUID" => row
            .try_get::<Option<Uuid>, _>(index)
            .map(|v| v.map(|id| id.to_string()).into()),
        other => return Err(PagectlError::unsupported_type(column.name(), other)),
    };
    value.map_err(PagectlError::query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BatchSize, ConnectionScope, PagedStreamer, Strategy};

    // Integration tests require a real database with a populated user_data table
    // Run with: DATABASE_URL=postgres://... cargo test -p pagectl-core -- --ignored

    fn source() -> PgSource {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let config = DbConfig::default().with_url(url).expect("valid DATABASE_URL");
        PgSource::from_config(&config).expect("connect options")
    }

    #[tokio::test]
    async fn timeout_maps_to_timeout_error() {
        let err = with_timeout(Some(Duration::from_millis(1)), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, sqlx::Error>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, PagectlError::Timeout { .. }));
    }

    #[tokio::test]
    async fn stalled_stream_times_out_per_pull() {
        let stalled = stream::pending::<Result<Value>>();
        let mut values = with_pull_timeout(Some(Duration::from_millis(1)), stalled);

        let err = values.next().await.unwrap().unwrap_err();
        assert!(matches!(err, PagectlError::Timeout { .. }));
        assert!(values.next().await.is_none());
    }

    #[tokio::test]
    async fn timely_stream_passes_through() {
        let items = stream::iter([Ok(Value::Integer(20)), Ok(Value::Integer(30))]);
        let values: Vec<Value> = with_pull_timeout(Some(Duration::from_secs(5)), items)
            .map(|value| value.unwrap())
            .collect()
            .await;
        assert_eq!(values, [Value::Integer(20), Value::Integer(30)]);
    }

    #[tokio::test]
    async fn refused_connection_is_connection_error() {
        let options = PgConnectOptions::new().host("127.0.0.1").port(1);
        let err = PgSource::new(options).connect().await.unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn pages_cover_whole_table() {
        let scope = ConnectionScope::new(source());
        let table = TableRef::user_data();
        let size = BatchSize::new(7).unwrap();

        let (total, streamed) = scope
            .with_connection(async |conn| {
                let total = conn.count_rows(&table).await?;
                let mut pager = PagedStreamer::new(conn, table.clone(), size, Strategy::CountThenOffset);
                let mut streamed = 0u64;
                while let Some(batch) = pager.next_batch().await? {
                    assert!(batch.len() as u64 <= size.get());
                    streamed += batch.len() as u64;
                }
                Ok((total, streamed))
            })
            .await
            .expect("stream failed");

        assert_eq!(total, streamed);
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn decodes_user_rows() {
        let scope = ConnectionScope::new(source());
        let rows = scope
            .with_connection(async |conn| {
                conn.fetch_page(&TableRef::user_data(), 1, 0).await
            })
            .await
            .expect("query failed");

        if let Some(row) = rows.first() {
            let columns: Vec<_> = row.columns().collect();
            assert_eq!(columns, ["user_id", "name", "email", "age"]);
            assert!(row.age().is_some());
        }
    }
}
