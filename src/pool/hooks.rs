//! Connection lifecycle hooks
//!
//! Each hook is an optional strategy object set on the
//! [`PoolBuilder`](super::PoolBuilder). Hooks receive exclusive access to
//! the connection for the duration of the call.

use crate::driver::Connection;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Runs once on every new connection before it enters the pool
///
/// An error closes the connection and fails the creation.
#[async_trait]
pub trait AfterConnect<C: Connection>: Send + Sync + 'static {
    /// Prepare a freshly opened connection
    async fn after_connect(&self, conn: &mut C) -> Result<()>;
}

/// Runs before a connection is handed to a caller
///
/// Returning `false` destroys the connection and the acquire tries again.
#[async_trait]
pub trait BeforeAcquire<C: Connection>: Send + Sync + 'static {
    /// Decide whether `conn` may be leased
    async fn before_acquire(&self, conn: &mut C) -> bool;
}

/// Runs after a lease is released, in the background
///
/// Returning `true` puts the connection back into the idle set, `false`
/// destroys it.
#[async_trait]
pub trait AfterRelease<C: Connection>: Send + Sync + 'static {
    /// Decide whether `conn` goes back to the idle set
    async fn after_release(&self, conn: &mut C) -> bool;
}

/// The set of hooks configured on a pool
pub(crate) struct Hooks<C: Connection> {
    pub(crate) after_connect: Option<Arc<dyn AfterConnect<C>>>,
    pub(crate) before_acquire: Option<Arc<dyn BeforeAcquire<C>>>,
    pub(crate) after_release: Option<Arc<dyn AfterRelease<C>>>,
}

impl<C: Connection> Default for Hooks<C> {
    fn default() -> Self {
        Hooks {
            after_connect: None,
            before_acquire: None,
            after_release: None,
        }
    }
}
