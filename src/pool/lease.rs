//! Exclusive connection lease
//!
//! A [`Lease`] grants exclusive use of one pooled connection. Dropping the
//! lease releases the connection back to the pool.

use super::conn_pool::Shared;
use super::resource::PooledResource;
use crate::driver::Connection;
use crate::error::PoolError;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OwnedSemaphorePermit;

/// Exclusive access to a pooled connection
///
/// Every accessor fails with [`PoolError::Released`] once the lease has been
/// released or destroyed.
pub struct Lease<C: Connection> {
    resource: Option<PooledResource<C>>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<Shared<C>>,
}

impl<C: Connection> Lease<C> {
    pub(crate) fn new(
        pool: Arc<Shared<C>>,
        resource: PooledResource<C>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Lease {
            resource: Some(resource),
            permit: Some(permit),
            pool,
        }
    }

    fn resource(&self) -> Result<&PooledResource<C>, PoolError> {
        self.resource.as_ref().ok_or(PoolError::Released)
    }

    /// Borrow the connection
    pub fn conn(&self) -> Result<&C, PoolError> {
        self.resource().map(|r| &r.conn)
    }

    /// Mutably borrow the connection
    pub fn conn_mut(&mut self) -> Result<&mut C, PoolError> {
        self.resource
            .as_mut()
            .map(|r| &mut r.conn)
            .ok_or(PoolError::Released)
    }

    /// Pool-unique connection id
    pub fn id(&self) -> Result<u64, PoolError> {
        self.resource().map(|r| r.id)
    }

    /// When the underlying connection was established
    pub fn created_at(&self) -> Result<Instant, PoolError> {
        self.resource().map(|r| r.created_at)
    }

    /// Age of the underlying connection
    pub fn age(&self) -> Result<Duration, PoolError> {
        self.resource().map(|r| r.age())
    }

    /// Whether the lease has been released or destroyed
    pub fn is_released(&self) -> bool {
        self.resource.is_none()
    }

    /// Return the connection to the pool
    ///
    /// Calling this more than once has no further effect.
    pub fn release(&mut self) {
        if let (Some(resource), Some(permit)) = (self.resource.take(), self.permit.take()) {
            self.pool.release(resource, permit);
        }
    }

    /// Close the connection instead of returning it to the pool
    pub fn destroy(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.destroy(resource);
        }
        self.permit.take();
    }
}

impl<C: Connection> Drop for Lease<C> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<C: Connection> fmt::Debug for Lease<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.resource.as_ref().map(|r| r.id))
            .field("released", &self.is_released())
            .finish()
    }
}
