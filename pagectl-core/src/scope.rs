//! Connection scoping: open, run, always close.

use tracing::{debug, warn};

use crate::error::Result;
use crate::source::{Connection, DataSource};

/// Runs operations against a freshly opened connection and releases it on
/// every exit path.
///
/// One `with_connection` call opens exactly one connection and closes exactly
/// one. If the operation's future is dropped mid-flight the connection is
/// dropped with it, which releases it without a graceful close.
#[derive(Debug, Clone)]
pub struct ConnectionScope<S> {
    source: S,
}

impl<S: DataSource> ConnectionScope<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Open a connection, run `operation` with it, then close it.
    ///
    /// - A connect failure is returned as-is; `operation` never runs.
    /// - An `operation` failure is returned after the connection is closed. If
    ///   closing also fails, that failure is logged and the operation's error wins.
    /// - After a successful `operation`, a close failure is returned.
    pub async fn with_connection<T, F>(&self, operation: F) -> Result<T>
    where
        F: AsyncFnOnce(&mut S::Conn) -> Result<T>,
    {
        let mut conn = self.source.connect().await?;
        debug!("connection scope entered");

        let outcome = operation(&mut conn).await;
        let closed = conn.close().await;
        debug!(ok = outcome.is_ok(), "connection scope exited");

        match (outcome, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(close_err)) => Err(close_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(close_err)) => {
                warn!(error = %close_err, "failed to close connection after error");
                Err(err)
            }
        }
    }
}
