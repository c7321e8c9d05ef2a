//! Pool-aware statement wrappers
//!
//! [`PooledRows`] and [`PooledInsert`] keep their connection leased while the
//! statement is running and release it as soon as the statement ends.

use super::lease::Lease;
use crate::driver::{InsertStream, RowStream, Session};
use crate::error::PoolError;
use std::fmt;

/// Row stream that releases its connection once exhausted or closed
pub struct PooledRows<C: Session> {
    lease: Lease<C>,
    rows: C::Rows,
}

impl<C: Session> PooledRows<C> {
    pub(crate) fn new(lease: Lease<C>, rows: C::Rows) -> Self {
        PooledRows { lease, rows }
    }

    /// Fetch the next row
    ///
    /// The connection is released when the stream ends or fails; later
    /// calls return `Ok(None)`.
    pub async fn next(&mut self) -> Result<Option<<C::Rows as RowStream<C>>::Row>, PoolError> {
        let Ok(conn) = self.lease.conn_mut() else {
            return Ok(None);
        };

        match self.rows.next(conn).await {
            Ok(Some(row)) => Ok(Some(row)),
            Ok(None) => {
                self.lease.release();
                Ok(None)
            }
            Err(e) => {
                self.lease.release();
                Err(PoolError::Driver(e))
            }
        }
    }

    /// Discard the rest of the result and release the connection
    pub async fn close(mut self) -> Result<(), PoolError> {
        let result = match self.lease.conn_mut() {
            Ok(conn) => self.rows.close(conn).await.map_err(PoolError::Driver),
            Err(_) => Ok(()),
        };
        self.lease.release();
        result
    }

    /// Whether the connection has been released
    pub fn is_released(&self) -> bool {
        self.lease.is_released()
    }
}

/// Insert stream that releases its connection once sent, aborted or failed
pub struct PooledInsert<C: Session> {
    lease: Lease<C>,
    insert: C::Insert,
}

impl<C: Session> PooledInsert<C> {
    pub(crate) fn new(lease: Lease<C>, insert: C::Insert) -> Self {
        PooledInsert { lease, insert }
    }

    /// Queue one row; a failure releases the connection
    pub async fn append(
        &mut self,
        row: <C::Insert as InsertStream<C>>::Row,
    ) -> Result<(), PoolError> {
        let conn = self.lease.conn_mut()?;
        if let Err(e) = self.insert.append(conn, row).await {
            self.lease.release();
            return Err(PoolError::Driver(e));
        }
        Ok(())
    }

    /// Finish the insert and release the connection
    pub async fn send(mut self) -> Result<(), PoolError> {
        let conn = self.lease.conn_mut()?;
        let result = self.insert.send(conn).await;
        self.lease.release();
        result.map_err(PoolError::Driver)
    }

    /// Abandon the insert and release the connection
    pub async fn abort(mut self) -> Result<(), PoolError> {
        let conn = self.lease.conn_mut()?;
        let result = self.insert.abort(conn).await;
        self.lease.release();
        result.map_err(PoolError::Driver)
    }

    /// Whether the connection has been released
    pub fn is_released(&self) -> bool {
        self.lease.is_released()
    }
}

impl<C: Session> fmt::Debug for PooledRows<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledRows")
            .field("lease", &self.lease)
            .finish()
    }
}

impl<C: Session> fmt::Debug for PooledInsert<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledInsert")
            .field("lease", &self.lease)
            .finish()
    }
}
