//! Driver contracts consumed by the pool
//!
//! The pool never speaks the native protocol itself. A [`Connector`] opens
//! [`Connection`]s, and connections that also implement [`Session`] can run
//! statements through the pool's pass-through helpers.

use crate::config::ConnParams;
use anyhow::Result;
use async_trait::async_trait;

/// A live connection managed by the pool
#[async_trait]
pub trait Connection: Send + 'static {
    /// Whether the connection is known to be unusable
    fn is_closed(&self) -> bool;

    /// Whether the connection is in the middle of an operation
    fn is_busy(&self) -> bool;

    /// Close the connection
    async fn close(&mut self) -> Result<()>;
}

/// Factory for new connections
///
/// Implementations must be able to connect using the parameters left over
/// after the pool keys were stripped from the connection string.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The connection type produced by this connector
    type Conn: Connection;

    /// Open a new connection
    async fn connect(&self, params: &ConnParams) -> Result<Self::Conn>;
}

/// A connection that can execute statements
#[async_trait]
pub trait Session: Connection {
    /// Result stream returned by [`select`](Self::select)
    type Rows: RowStream<Self>;
    /// Insert stream returned by [`insert`](Self::insert)
    type Insert: InsertStream<Self>;

    /// Execute a statement that returns no rows
    async fn exec(&mut self, query: &str) -> Result<()>;

    /// Start a query and return its row stream
    async fn select(&mut self, query: &str) -> Result<Self::Rows>;

    /// Start an insert and return its input stream
    async fn insert(&mut self, query: &str) -> Result<Self::Insert>;
}

/// Rows of a running query, read from the connection that started it
#[async_trait]
pub trait RowStream<C: ?Sized + Send>: Send + 'static {
    /// Decoded row type
    type Row: Send;

    /// Fetch the next row; `None` once the result is exhausted
    async fn next(&mut self, conn: &mut C) -> Result<Option<Self::Row>>;

    /// Stop reading and discard the rest of the result
    async fn close(&mut self, conn: &mut C) -> Result<()>;
}

/// Input side of a running insert
#[async_trait]
pub trait InsertStream<C: ?Sized + Send>: Send + 'static {
    /// Row type accepted by the insert
    type Row: Send;

    /// Queue one row
    async fn append(&mut self, conn: &mut C, row: Self::Row) -> Result<()>;

    /// Send queued rows and finish the insert
    async fn send(&mut self, conn: &mut C) -> Result<()>;

    /// Abandon the insert
    async fn abort(&mut self, conn: &mut C) -> Result<()>;
}
