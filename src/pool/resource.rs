//! Pooled resource structure
//!
//! Represents a single connection owned by the pool, with lifecycle metadata.

use std::time::{Duration, Instant};

/// A pooled connection with metadata
#[derive(Debug)]
pub(crate) struct PooledResource<C> {
    /// The underlying connection
    pub(crate) conn: C,
    /// Pool-unique identifier
    pub(crate) id: u64,
    /// When the connection was established
    pub(crate) created_at: Instant,
    /// When the connection was last returned to the idle set
    pub(crate) last_released: Instant,
}

impl<C> PooledResource<C> {
    /// Wrap a freshly established connection
    pub(crate) fn new(conn: C, id: u64) -> Self {
        let now = Instant::now();
        PooledResource {
            conn,
            id,
            created_at: now,
            last_released: now,
        }
    }

    /// Get the age of the connection
    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Get the time spent idle since the last release
    pub(crate) fn idle_time(&self) -> Duration {
        self.last_released.elapsed()
    }

    /// Whether the connection has outlived `max_lifetime`
    pub(crate) fn is_expired(&self, max_lifetime: Duration) -> bool {
        self.age() > max_lifetime
    }

    /// Whether the connection has been idle longer than `max_idle`
    pub(crate) fn is_stale(&self, max_idle: Duration) -> bool {
        self.idle_time() > max_idle
    }

    /// Mark the connection as returned to the idle set
    pub(crate) fn touch(&mut self) {
        self.last_released = Instant::now();
    }
}
