//! Pool statistics and background health checking
//!
//! Handles idle/lifetime eviction, minimum pool size maintenance and the
//! counters behind [`Pool::stat`](super::Pool::stat).

use super::conn_pool::Shared;
use crate::driver::Connection;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Weak;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cumulative counters for the connection pool
#[derive(Debug, Default)]
pub(crate) struct PoolStats {
    /// Successful acquisitions
    acquire_count: AtomicU64,
    /// Total time spent in successful acquisitions
    acquire_duration_nanos: AtomicU64,
    /// Acquisitions that had to wait or open a connection
    empty_acquire_count: AtomicU64,
    /// Acquisitions abandoned before completing
    canceled_acquire_count: AtomicU64,
    /// Connections opened
    new_conns_count: AtomicU64,
    /// Connections closed for exceeding their lifetime
    max_lifetime_destroy_count: AtomicU64,
    /// Connections closed for idling too long
    max_idle_destroy_count: AtomicU64,
    /// Callers currently waiting for a connection slot
    pub(crate) waiting: AtomicUsize,
}

impl PoolStats {
    /// Record a successful acquisition
    pub(crate) fn record_acquired(&self, elapsed: Duration, empty: bool) {
        self.acquire_count.fetch_add(1, Ordering::Relaxed);
        self.acquire_duration_nanos.fetch_add(
            u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        if empty {
            self.empty_acquire_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an abandoned acquisition
    pub(crate) fn record_canceled(&self) {
        self.canceled_acquire_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection creation
    pub(crate) fn record_created(&self) {
        self.new_conns_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lifetime eviction
    pub(crate) fn record_lifetime_destroy(&self) {
        self.max_lifetime_destroy_count
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record an idle eviction
    pub(crate) fn record_idle_destroy(&self) {
        self.max_idle_destroy_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Combine the counters with the current pool population
    pub(crate) fn snapshot(
        &self,
        total: usize,
        idle: usize,
        constructing: usize,
        max: usize,
    ) -> PoolState {
        PoolState {
            total_conns: total,
            idle_conns: idle,
            acquired_conns: total.saturating_sub(idle + constructing),
            constructing_conns: constructing,
            max_conns: max,
            waiting: self.waiting.load(Ordering::Relaxed),
            acquire_count: self.acquire_count.load(Ordering::Relaxed),
            acquire_duration: Duration::from_nanos(
                self.acquire_duration_nanos.load(Ordering::Relaxed),
            ),
            empty_acquire_count: self.empty_acquire_count.load(Ordering::Relaxed),
            canceled_acquire_count: self.canceled_acquire_count.load(Ordering::Relaxed),
            new_conns_count: self.new_conns_count.load(Ordering::Relaxed),
            max_lifetime_destroy_count: self.max_lifetime_destroy_count.load(Ordering::Relaxed),
            max_idle_destroy_count: self.max_idle_destroy_count.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolState {
    /// Open connections, including leased and under construction
    pub total_conns: usize,
    /// Connections in the idle set
    pub idle_conns: usize,
    /// Connections held by callers or settling after release
    pub acquired_conns: usize,
    /// Connections being opened
    pub constructing_conns: usize,
    /// Configured maximum
    pub max_conns: usize,
    /// Callers waiting for a connection slot
    pub waiting: usize,
    /// Successful acquisitions
    pub acquire_count: u64,
    /// Total time spent in successful acquisitions
    pub acquire_duration: Duration,
    /// Acquisitions that had to wait or open a connection
    pub empty_acquire_count: u64,
    /// Acquisitions abandoned by timeout, cancellation or drop
    pub canceled_acquire_count: u64,
    /// Connections opened
    pub new_conns_count: u64,
    /// Connections closed for exceeding their lifetime
    pub max_lifetime_destroy_count: u64,
    /// Connections closed for idling too long
    pub max_idle_destroy_count: u64,
}

/// Counts a caller as waiting while alive
pub(crate) struct WaitGuard<'a>(&'a AtomicUsize);

impl<'a> WaitGuard<'a> {
    pub(crate) fn new(waiting: &'a AtomicUsize) -> Self {
        waiting.fetch_add(1, Ordering::Relaxed);
        WaitGuard(waiting)
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Records an acquisition as canceled unless it completes
pub(crate) struct AcquireGuard<'a> {
    stats: &'a PoolStats,
    armed: bool,
}

impl<'a> AcquireGuard<'a> {
    pub(crate) fn new(stats: &'a PoolStats) -> Self {
        AcquireGuard { stats, armed: true }
    }

    /// Mark the acquisition as finished, successfully or not
    pub(crate) fn complete(mut self) {
        self.armed = false;
    }
}

impl Drop for AcquireGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.stats.record_canceled();
        }
    }
}

/// Run the periodic health check until shutdown or until the pool is dropped
pub(crate) async fn run_health_check<C: Connection>(
    pool: Weak<Shared<C>>,
    shutdown: CancellationToken,
    period: Duration,
) {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Pool health check shutting down");
                break;
            }
            _ = interval.tick() => {}
        }

        let Some(shared) = pool.upgrade() else {
            debug!("Pool dropped, health check exiting");
            break;
        };
        shared.check_idle();
        shared.check_min_conns();
        shared.log_health();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_stats_new() {
        let stats = PoolStats::default();
        let snapshot = stats.snapshot(0, 0, 0, 4);

        assert_eq!(snapshot.total_conns, 0);
        assert_eq!(snapshot.acquire_count, 0);
        assert_eq!(snapshot.max_conns, 4);
    }

    #[test]
    fn test_pool_stats_record_acquired() {
        let stats = PoolStats::default();
        stats.record_acquired(Duration::from_millis(5), false);
        stats.record_acquired(Duration::from_millis(10), true);

        let snapshot = stats.snapshot(2, 0, 0, 4);
        assert_eq!(snapshot.acquire_count, 2);
        assert_eq!(snapshot.empty_acquire_count, 1);
        assert_eq!(snapshot.acquire_duration, Duration::from_millis(15));
        assert_eq!(snapshot.acquired_conns, 2);
    }

    #[test]
    fn test_pool_stats_destroy_counters() {
        let stats = PoolStats::default();
        stats.record_created();
        stats.record_lifetime_destroy();
        stats.record_idle_destroy();
        stats.record_idle_destroy();

        let snapshot = stats.snapshot(0, 0, 0, 4);
        assert_eq!(snapshot.new_conns_count, 1);
        assert_eq!(snapshot.max_lifetime_destroy_count, 1);
        assert_eq!(snapshot.max_idle_destroy_count, 2);
    }

    #[test]
    fn test_snapshot_population() {
        let stats = PoolStats::default();
        let snapshot = stats.snapshot(5, 2, 1, 8);

        assert_eq!(snapshot.total_conns, 5);
        assert_eq!(snapshot.idle_conns, 2);
        assert_eq!(snapshot.constructing_conns, 1);
        assert_eq!(snapshot.acquired_conns, 2);
    }

    #[test]
    fn test_wait_guard() {
        let stats = PoolStats::default();
        {
            let _a = WaitGuard::new(&stats.waiting);
            let _b = WaitGuard::new(&stats.waiting);
            assert_eq!(stats.snapshot(0, 0, 0, 1).waiting, 2);
        }
        assert_eq!(stats.snapshot(0, 0, 0, 1).waiting, 0);
    }

    #[test]
    fn test_acquire_guard() {
        let stats = PoolStats::default();

        AcquireGuard::new(&stats).complete();
        assert_eq!(stats.snapshot(0, 0, 0, 1).canceled_acquire_count, 0);

        drop(AcquireGuard::new(&stats));
        assert_eq!(stats.snapshot(0, 0, 0, 1).canceled_acquire_count, 1);
    }
}
