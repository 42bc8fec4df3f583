//! Offset-paginated streaming with bounded memory.
//!
//! [`PagedStreamer`] is a pull iterator over [`Batch`]es: each call to
//! [`PagedStreamer::next_batch`] issues at most one page query and hands the
//! page straight to the caller. The streamer keeps no rows between calls, so
//! at most one batch is alive at a time unless the caller hoards them.
//!
//! ```text
//!   CountThenOffset                    ProbeUntilEmpty
//!   ───────────────                    ───────────────
//!   first pull: COUNT(*) -> total      pull k: LIMIT n OFFSET k*n
//!   pull k:     LIMIT n OFFSET k*n       rows   -> yield
//!     until k*n >= total                 empty  -> finish (not yielded)
//!     (or a page comes back empty)
//! ```
//!
//! Pages are independent queries. Rows inserted or deleted between pulls may
//! be skipped or seen twice; the stream never fails because of it.

use futures::stream::{self, Stream};
use tracing::debug;

use crate::error::Result;
use crate::model::{Batch, BatchSize};
use crate::source::Connection;
use crate::table::TableRef;

/// How the end of the table is detected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Strategy {
    /// Count once, then fetch `ceil(total / size)` pages
    #[default]
    CountThenOffset,
    /// Fetch pages until one comes back empty
    ProbeUntilEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Nothing queried yet
    Fresh,
    /// Next page starts at `offset`; `total` is known for the count strategy
    Paging { offset: u64, total: Option<u64> },
    Done,
}

/// Lazy batch stream over one table, borrowing a connection for its lifetime.
#[derive(Debug)]
pub struct PagedStreamer<'c, C> {
    conn: &'c mut C,
    table: TableRef,
    size: BatchSize,
    strategy: Strategy,
    state: State,
    pages_fetched: u64,
    batches_yielded: u64,
    rows_yielded: u64,
}

impl<'c, C: Connection> PagedStreamer<'c, C> {
    /// Build a streamer. Issues no query; the first one runs on the first pull.
    pub fn new(conn: &'c mut C, table: TableRef, size: BatchSize, strategy: Strategy) -> Self {
        Self {
            conn,
            table,
            size,
            strategy,
            state: State::Fresh,
            pages_fetched: 0,
            batches_yielded: 0,
            rows_yielded: 0,
        }
    }

    /// Page queries issued so far (the count query is not included)
    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched
    }

    pub fn rows_yielded(&self) -> u64 {
        self.rows_yielded
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Fetch the next page. `Ok(None)` once the table is exhausted; after an
    /// error the stream is finished.
    pub async fn next_batch(&mut self) -> Result<Option<Batch>> {
        let result = self.advance().await;
        if result.is_err() {
            self.state = State::Done;
        }
        result
    }

    async fn advance(&mut self) -> Result<Option<Batch>> {
        let (offset, total) = match self.state {
            State::Done => return Ok(None),
            State::Fresh => {
                let total = match self.strategy {
                    Strategy::CountThenOffset => {
                        let total = self.conn.count_rows(&self.table).await?;
                        debug!(table = %self.table.name(), total, size = %self.size, "planned pages");
                        Some(total)
                    }
                    Strategy::ProbeUntilEmpty => None,
                };
                (0, total)
            }
            State::Paging { offset, total } => (offset, total),
        };

        if total.is_some_and(|total| offset >= total) {
            self.state = State::Done;
            return Ok(None);
        }

        let limit = self.size.get();
        let rows = self.conn.fetch_page(&self.table, limit, offset).await?;
        self.pages_fetched += 1;

        if rows.is_empty() {
            debug!(table = %self.table.name(), offset, "empty page, stream finished");
            self.state = State::Done;
            return Ok(None);
        }

        let batch = Batch::new(self.batches_yielded, offset, rows);
        self.batches_yielded += 1;
        self.rows_yielded += batch.len() as u64;
        self.state = State::Paging {
            offset: offset + limit,
            total,
        };
        debug!(index = batch.index, offset, rows = batch.len(), "yielding batch");
        Ok(Some(batch))
    }

    /// Adapt to a [`Stream`]. Polling the stream drives `next_batch`, so the
    /// same one-page-per-pull behaviour holds.
    pub fn into_stream(self) -> impl Stream<Item = Result<Batch>> + 'c
    where
        C: 'c,
    {
        stream::try_unfold(self, |mut pager| async move {
            Ok(pager.next_batch().await?.map(|batch| (batch, pager)))
        })
    }
}

/// Number of pages a table of `total` rows splits into.
pub fn page_count(total: u64, size: BatchSize) -> u64 {
    total.div_ceil(size.get())
}
