//! Connection pool implementation
//!
//! Manages a bounded set of driver connections. Capacity is tracked with a
//! semaphore: every leased connection, every connection under construction
//! and every connection held by a running `after_release` hook owns one
//! permit, so the number of open connections never exceeds the maximum.
//! Waiters are served in FIFO order; idle connections are reused LIFO.

use super::hooks::{AfterConnect, AfterRelease, BeforeAcquire, Hooks};
use super::lease::Lease;
use super::manager::{run_health_check, AcquireGuard, PoolState, PoolStats, WaitGuard};
use super::resource::PooledResource;
use super::statement::{PooledInsert, PooledRows};
use crate::config::{Config, ConnParams, PoolConfig};
use crate::driver::{Connection, Connector, Session};
use crate::error::PoolError;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Upper bound on a single background connection close
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Mutable pool population, guarded by a mutex
struct PoolInner<C> {
    /// Idle connections, most recently released last
    idle: Vec<PooledResource<C>>,
    /// Open connections, including leased and under construction
    total: usize,
    /// Connections being opened
    constructing: usize,
    /// Set once by `close`
    closed: bool,
}

/// State shared by all pool handles, leases and background tasks
pub(crate) struct Shared<C: Connection> {
    connector: Box<dyn Connector<Conn = C>>,
    params: ConnParams,
    config: PoolConfig,
    hooks: Hooks<C>,
    state: Mutex<PoolInner<C>>,
    permits: Arc<Semaphore>,
    stats: PoolStats,
    next_id: AtomicU64,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    /// Running `after_release` hooks
    releasing: AtomicUsize,
    release_settled: Notify,
}

impl<C: Connection> Shared<C> {
    fn lock(&self) -> MutexGuard<'_, PoolInner<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Open a connection and run the `after_connect` hook on it
    async fn create_resource(&self) -> anyhow::Result<PooledResource<C>> {
        let mut conn = self.connector.connect(&self.params).await?;

        if let Some(hook) = &self.hooks.after_connect {
            if let Err(e) = hook.after_connect(&mut conn).await {
                if let Err(close_err) = conn.close().await {
                    debug!("Failed to close rejected connection: {:#}", close_err);
                }
                return Err(e.context("after_connect hook failed"));
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Opened connection {} to {}", id, self.params.addr());
        Ok(PooledResource::new(conn, id))
    }

    /// Take a permit, waiting in FIFO order if none is free
    ///
    /// The flag reports whether the caller had to wait.
    async fn wait_permit(&self) -> Result<(OwnedSemaphorePermit, bool), PoolError> {
        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => return Ok((permit, false)),
            Err(TryAcquireError::Closed) => return Err(PoolError::Closed),
            Err(TryAcquireError::NoPermits) => {}
        }

        let _waiting = WaitGuard::new(&self.stats.waiting);
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        Ok((permit, true))
    }

    /// Pop an idle connection or open a new one
    ///
    /// Must be called while holding a permit. The flag reports whether a
    /// connection had to be opened.
    async fn checkout(&self) -> Result<(PooledResource<C>, bool), PoolError> {
        {
            let mut inner = self.lock();
            if inner.closed {
                return Err(PoolError::Closed);
            }
            if let Some(resource) = inner.idle.pop() {
                return Ok((resource, false));
            }
            inner.total += 1;
            inner.constructing += 1;
        }

        let guard = ConstructGuard::new(self);
        let resource = self.create_resource().await.map_err(PoolError::Connect)?;
        guard.finish();
        self.stats.record_created();

        if self.is_closed() {
            self.destroy(resource);
            return Err(PoolError::Closed);
        }
        Ok((resource, true))
    }

    /// Take back a released connection
    pub(crate) fn release(self: &Arc<Self>, resource: PooledResource<C>, permit: OwnedSemaphorePermit) {
        let expired = resource.is_expired(self.config.max_connection_lifetime);
        if self.is_closed() || expired || resource.conn.is_closed() || resource.conn.is_busy() {
            if expired {
                self.stats.record_lifetime_destroy();
            }
            self.destroy(resource);
            drop(permit);
            return;
        }

        let Some(hook) = self.hooks.after_release.clone() else {
            self.return_idle(resource, permit);
            return;
        };

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                debug!("No runtime to run after_release hook, destroying connection {}", resource.id);
                self.destroy(resource);
                return;
            }
        };

        self.releasing.fetch_add(1, Ordering::AcqRel);
        let settle = SettleGuard(Arc::clone(self));
        self.tasks.spawn_on(
            async move {
                let mut resource = resource;
                let pool = &settle.0;
                if hook.after_release(&mut resource.conn).await {
                    pool.return_idle(resource, permit);
                } else {
                    debug!("Connection {} rejected by after_release hook", resource.id);
                    pool.destroy(resource);
                    drop(permit);
                }
                drop(settle);
            },
            &handle,
        );
    }

    /// Put a connection back into the idle set, then free its permit
    fn return_idle(&self, mut resource: PooledResource<C>, permit: OwnedSemaphorePermit) {
        let rejected = {
            let mut inner = self.lock();
            if inner.closed {
                inner.total -= 1;
                Some(resource)
            } else {
                resource.touch();
                inner.idle.push(resource);
                None
            }
        };

        if let Some(resource) = rejected {
            self.spawn_close(resource);
        }
        drop(permit);
    }

    /// Remove a connection from the population and close it
    pub(crate) fn destroy(&self, resource: PooledResource<C>) {
        self.lock().total -= 1;
        self.spawn_close(resource);
    }

    /// Close a connection in the background
    fn spawn_close(&self, resource: PooledResource<C>) {
        let PooledResource { mut conn, id, .. } = resource;
        debug!("Closing connection {}", id);

        match Handle::try_current() {
            Ok(handle) => {
                self.tasks.spawn_on(
                    async move {
                        match tokio::time::timeout(CLOSE_TIMEOUT, conn.close()).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => debug!("Error closing connection {}: {:#}", id, e),
                            Err(_) => debug!("Timed out closing connection {}", id),
                        }
                    },
                    &handle,
                );
            }
            Err(_) => drop(conn),
        }
    }

    /// Evict idle connections past their lifetime or idle limit
    pub(crate) fn check_idle(&self) {
        let lifetime = self.config.max_connection_lifetime;
        let max_idle = self.config.max_connection_idle_time;

        let evicted = {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }

            let idle = std::mem::take(&mut inner.idle);
            let mut kept = Vec::with_capacity(idle.len());
            let mut evicted = Vec::new();
            for resource in idle {
                if resource.is_expired(lifetime) {
                    evicted.push((resource, true));
                } else if resource.is_stale(max_idle) {
                    evicted.push((resource, false));
                } else {
                    kept.push(resource);
                }
            }
            inner.idle = kept;
            inner.total -= evicted.len();
            evicted
        };

        for (resource, expired) in evicted {
            if expired {
                self.stats.record_lifetime_destroy();
            } else {
                self.stats.record_idle_destroy();
            }
            self.spawn_close(resource);
        }
    }

    /// Open connections in the background until the minimum is reached
    pub(crate) fn check_min_conns(self: &Arc<Self>) {
        let Ok(handle) = Handle::try_current() else {
            return;
        };

        loop {
            let permit = {
                let mut inner = self.lock();
                if inner.closed
                    || inner.total >= self.config.min_connections
                    || inner.total >= self.config.max_connections
                {
                    break;
                }
                let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                    break;
                };
                inner.total += 1;
                inner.constructing += 1;
                permit
            };

            let pool = Arc::clone(self);
            self.tasks
                .spawn_on(async move { pool.top_up(permit).await }, &handle);
        }
    }

    /// Open one connection reserved by `check_min_conns`
    async fn top_up(&self, permit: OwnedSemaphorePermit) {
        let timeout = self.config.background_connect_timeout;
        let guard = ConstructGuard::new(self);

        match tokio::time::timeout(timeout, self.create_resource()).await {
            Ok(Ok(resource)) => {
                guard.finish();
                self.stats.record_created();
                self.return_idle(resource, permit);
            }
            Ok(Err(e)) => warn!("Background connect failed: {:#}", e),
            Err(_) => warn!("Background connect timed out after {:?}", timeout),
        }
    }

    fn state(&self) -> PoolState {
        let (total, idle, constructing) = {
            let inner = self.lock();
            (inner.total, inner.idle.len(), inner.constructing)
        };
        self.stats
            .snapshot(total, idle, constructing, self.config.max_connections)
    }

    /// Log pool health
    pub(crate) fn log_health(&self) {
        let state = self.state();
        debug!(
            "Pool health: total={}, idle={}, acquired={}, constructing={}, waiting={}",
            state.total_conns,
            state.idle_conns,
            state.acquired_conns,
            state.constructing_conns,
            state.waiting
        );
    }
}

/// Rolls back a construction reservation unless finished
struct ConstructGuard<'a, C: Connection> {
    shared: &'a Shared<C>,
    armed: bool,
}

impl<'a, C: Connection> ConstructGuard<'a, C> {
    fn new(shared: &'a Shared<C>) -> Self {
        ConstructGuard {
            shared,
            armed: true,
        }
    }

    /// The connection was opened; keep it counted in the total
    fn finish(mut self) {
        self.armed = false;
        self.shared.lock().constructing -= 1;
    }
}

impl<C: Connection> Drop for ConstructGuard<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.shared.lock();
            inner.total -= 1;
            inner.constructing -= 1;
        }
    }
}

/// Wakes `wait_for_release_hooks` callers when the last hook finishes
struct SettleGuard<C: Connection>(Arc<Shared<C>>);

impl<C: Connection> Drop for SettleGuard<C> {
    fn drop(&mut self) {
        if self.0.releasing.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.release_settled.notify_waiters();
        }
    }
}

/// Builder for a [`Pool`] with optional lifecycle hooks
pub struct PoolBuilder<C: Connection> {
    config: Config,
    connector: Box<dyn Connector<Conn = C>>,
    hooks: Hooks<C>,
}

impl<C: Connection> PoolBuilder<C> {
    /// Set the hook run on every new connection
    pub fn after_connect<H: AfterConnect<C>>(mut self, hook: H) -> Self {
        self.hooks.after_connect = Some(Arc::new(hook));
        self
    }

    /// Set the hook run before a connection is leased
    pub fn before_acquire<H: BeforeAcquire<C>>(mut self, hook: H) -> Self {
        self.hooks.before_acquire = Some(Arc::new(hook));
        self
    }

    /// Set the hook run after a lease is released
    pub fn after_release<H: AfterRelease<C>>(mut self, hook: H) -> Self {
        self.hooks.after_release = Some(Arc::new(hook));
        self
    }

    /// Open the pool
    ///
    /// One connection is established eagerly so configuration and
    /// connectivity problems surface here rather than on first use.
    pub async fn connect(self) -> Result<Pool<C>, PoolError> {
        self.connect_with_cancel(&CancellationToken::new()).await
    }

    /// Open the pool, giving up when `cancel` fires
    pub async fn connect_with_cancel(
        self,
        cancel: &CancellationToken,
    ) -> Result<Pool<C>, PoolError> {
        let (config, params) = self.config.into_parts();
        config.validate()?;

        let shared = Arc::new(Shared {
            connector: self.connector,
            params,
            permits: Arc::new(Semaphore::new(config.max_connections)),
            config,
            hooks: self.hooks,
            state: Mutex::new(PoolInner {
                idle: Vec::new(),
                total: 0,
                constructing: 0,
                closed: false,
            }),
            stats: PoolStats::default(),
            next_id: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            releasing: AtomicUsize::new(0),
            release_settled: Notify::new(),
        });

        let resource = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PoolError::Cancelled),
            result = shared.create_resource() => result.map_err(PoolError::Connect)?,
        };
        {
            let mut inner = shared.lock();
            inner.total += 1;
            inner.idle.push(resource);
        }
        shared.stats.record_created();

        shared.tasks.spawn(run_health_check(
            Arc::downgrade(&shared),
            shared.shutdown.clone(),
            shared.config.health_check_period,
        ));

        info!(
            "Connection pool open: {} (max {} connections)",
            shared.params.addr(),
            shared.config.max_connections
        );
        Ok(Pool { shared })
    }
}

/// A bounded pool of driver connections
///
/// Cloning the pool is cheap; all clones share the same connections.
pub struct Pool<C: Connection> {
    shared: Arc<Shared<C>>,
}

impl<C: Connection> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Pool {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connection> fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("addr", &self.shared.params.addr())
            .field("state", &self.shared.state())
            .finish()
    }
}

impl<C: Connection> Pool<C> {
    /// Start building a pool with hooks
    pub fn builder<K>(config: Config, connector: K) -> PoolBuilder<C>
    where
        K: Connector<Conn = C>,
    {
        PoolBuilder {
            config,
            connector: Box::new(connector),
            hooks: Hooks::default(),
        }
    }

    /// Open a pool without hooks
    pub async fn connect<K>(config: Config, connector: K) -> Result<Self, PoolError>
    where
        K: Connector<Conn = C>,
    {
        Self::builder(config, connector).connect().await
    }

    /// Lease a connection, waiting for one to become available
    pub async fn acquire(&self) -> Result<Lease<C>, PoolError> {
        let started = Instant::now();
        let guard = AcquireGuard::new(&self.shared.stats);
        let result = self.acquire_inner().await;
        guard.complete();

        let (lease, empty) = result?;
        self.shared.stats.record_acquired(started.elapsed(), empty);
        Ok(lease)
    }

    /// Lease a connection, failing after `timeout`
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<Lease<C>, PoolError> {
        match tokio::time::timeout(timeout, self.acquire()).await {
            Ok(result) => result,
            Err(_) => Err(PoolError::Timeout(timeout)),
        }
    }

    /// Lease a connection, giving up when `cancel` fires
    pub async fn acquire_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Lease<C>, PoolError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PoolError::Cancelled),
            result = self.acquire() => result,
        }
    }

    async fn acquire_inner(&self) -> Result<(Lease<C>, bool), PoolError> {
        let shared = &self.shared;
        let mut empty = false;

        loop {
            let (permit, waited) = shared.wait_permit().await?;
            let (resource, created) = shared.checkout().await?;
            empty |= waited || created;

            let id = resource.id;
            let mut lease = Lease::new(Arc::clone(shared), resource, permit);
            if let Some(hook) = &shared.hooks.before_acquire {
                if !hook.before_acquire(lease.conn_mut()?).await {
                    debug!("Connection {} rejected by before_acquire hook", id);
                    lease.destroy();
                    continue;
                }
            }
            return Ok((lease, empty));
        }
    }

    /// Lease every idle connection that has a free slot, without waiting
    ///
    /// Connections rejected by the `before_acquire` hook are destroyed.
    /// These leases are not counted in `acquire_count`.
    pub async fn acquire_all_idle(&self) -> Vec<Lease<C>> {
        let shared = &self.shared;

        let candidates: Vec<Lease<C>> = {
            let mut inner = shared.lock();
            let mut drained = Vec::with_capacity(inner.idle.len());
            if !inner.closed {
                while let Some(resource) = inner.idle.pop() {
                    match shared.permits.clone().try_acquire_owned() {
                        Ok(permit) => drained.push((resource, permit)),
                        Err(_) => {
                            inner.idle.push(resource);
                            break;
                        }
                    }
                }
            }
            drop(inner);
            drained
                .into_iter()
                .map(|(resource, permit)| Lease::new(Arc::clone(shared), resource, permit))
                .collect()
        };

        let Some(hook) = &shared.hooks.before_acquire else {
            return candidates;
        };

        let mut leases = Vec::with_capacity(candidates.len());
        for mut lease in candidates {
            let accepted = match lease.conn_mut() {
                Ok(conn) => hook.before_acquire(conn).await,
                Err(_) => false,
            };
            if accepted {
                leases.push(lease);
            } else {
                debug!("Idle connection rejected by before_acquire hook");
                lease.destroy();
            }
        }
        leases
    }

    /// Snapshot the pool population and counters
    pub fn stat(&self) -> PoolState {
        self.shared.state()
    }

    /// Wait until every running `after_release` hook has finished
    pub async fn wait_for_release_hooks(&self) {
        loop {
            let settled = self.shared.release_settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();
            if self.shared.releasing.load(Ordering::Acquire) == 0 {
                return;
            }
            settled.await;
        }
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Pool settings in effect
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Connection parameters handed to the connector
    pub fn conn_params(&self) -> &ConnParams {
        &self.shared.params
    }

    /// Close the pool
    ///
    /// Idle connections are closed, pending and future acquisitions fail
    /// with [`PoolError::Closed`], and leased connections are closed when
    /// released. Returns once background work has finished. Calling this
    /// more than once is harmless.
    pub async fn close(&self) {
        let shared = &self.shared;
        let (idle, first) = {
            let mut inner = shared.lock();
            let first = !inner.closed;
            inner.closed = true;
            let idle = std::mem::take(&mut inner.idle);
            inner.total -= idle.len();
            (idle, first)
        };

        if first {
            info!("Closing connection pool: {} idle connections", idle.len());
        }
        shared.permits.close();
        shared.shutdown.cancel();
        for resource in idle {
            shared.spawn_close(resource);
        }

        shared.tasks.close();
        shared.tasks.wait().await;
        if first {
            info!("Connection pool closed");
        }
    }
}

impl<C: Session> Pool<C> {
    /// Run a statement on a pooled connection
    pub async fn exec(&self, query: &str) -> Result<(), PoolError> {
        let mut lease = self.acquire().await?;
        let result = lease.conn_mut()?.exec(query).await;
        lease.release();
        result.map_err(PoolError::Driver)
    }

    /// Start a query; the connection is held until the rows are drained or closed
    pub async fn select(&self, query: &str) -> Result<PooledRows<C>, PoolError> {
        let mut lease = self.acquire().await?;
        match lease.conn_mut()?.select(query).await {
            Ok(rows) => Ok(PooledRows::new(lease, rows)),
            Err(e) => {
                lease.release();
                Err(PoolError::Driver(e))
            }
        }
    }

    /// Start an insert; the connection is held until it is sent or aborted
    pub async fn insert(&self, query: &str) -> Result<PooledInsert<C>, PoolError> {
        let mut lease = self.acquire().await?;
        match lease.conn_mut()?.insert(query).await {
            Ok(insert) => Ok(PooledInsert::new(lease, insert)),
            Err(e) => {
                lease.release();
                Err(PoolError::Driver(e))
            }
        }
    }
}
