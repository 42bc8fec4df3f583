//! pagectl-core: bounded-memory paging over a relational table.
//!
//! - [`ConnectionScope`] opens a connection per operation and always closes it.
//! - [`PagedStreamer`] pulls one LIMIT/OFFSET page at a time.
//! - [`QueryCache`] memoizes one-shot queries by exact text.
//!
//! Postgres access lives in [`postgres`]; [`memory`] provides an in-process
//! source with the same behaviour for tests and demos.

pub mod cache;
pub mod config;
pub mod consumers;
pub mod error;
pub mod memory;
pub mod model;
pub mod pager;
pub mod postgres;
pub mod scope;
pub mod source;
pub mod table;

pub use cache::{QueryCache, ResultSet};
pub use config::DbConfig;
pub use consumers::{
    batch_processing, compute_average_age, fetch_users_with_cache, get_user_by_id,
    lazy_pagination, paginate_users, print_pages, stream_users_in_batches, sum_user_ages,
    AgeSummary, AGE_THRESHOLD,
};
pub use error::{PagectlError, Result};
pub use memory::{MemoryConnection, MemorySource, SourceStats};
pub use model::{Batch, BatchSize, Row, Value};
pub use pager::{page_count, PagedStreamer, Strategy};
pub use postgres::{PgConn, PgSource};
pub use scope::ConnectionScope;
pub use source::{Connection, DataSource};
pub use table::{ColumnScan, Ident, TableRef};
