//! Test utilities and mocks for chpool
//!
//! This module provides a mock connector and session used across the
//! integration tests, with counters and fault injection.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use chpool::config::{parse_config, ConnParams};
use chpool::driver::{Connection, Connector, InsertStream, RowStream, Session};
use chpool::Config;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Create a connected TCP stream pair for testing
pub async fn create_tcp_stream_pair() -> (TcpStream, TcpStream) {
    let (listener, addr) = create_test_listener().await;

    let connect_fut = TcpStream::connect(addr);
    let accept_fut = listener.accept();

    let (client_stream, accepted) = tokio::join!(connect_fut, accept_fut);
    let server_stream = accepted.map(|(stream, _)| stream);

    (client_stream.unwrap(), server_stream.unwrap())
}

/// Parse a mock connection string with the given pool query
pub fn test_config(query: &str) -> Config {
    let dsn = if query.is_empty() {
        "clickhouse://mock:9000/default".to_string()
    } else {
        format!("clickhouse://mock:9000/default?{}", query)
    };
    parse_config(&dsn).unwrap()
}

/// Shared counters and fault switches for mock connections
#[derive(Debug, Default)]
pub struct MockState {
    /// Successful connects
    pub connects: AtomicUsize,
    /// Connection attempts, including failures
    pub attempts: AtomicUsize,
    /// Connections closed
    pub closes: AtomicUsize,
    /// Number of upcoming connects that fail
    pub fail_connects: AtomicUsize,
    /// Delay applied to every connect, in milliseconds
    pub connect_delay_ms: AtomicU64,
    /// Statements executed
    pub execs: AtomicUsize,
    /// Rows delivered by sends
    pub inserted: AtomicUsize,
    /// Settings the connector last received
    pub last_settings: Mutex<Vec<(String, String)>>,
}

impl MockState {
    /// Make the next `n` connects fail
    pub fn fail_next(&self, n: usize) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Delay every connect
    pub fn set_connect_delay(&self, delay: Duration) {
        self.connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Connector producing [`MockConn`]s
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    pub state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Conn = MockConn;

    async fn connect(&self, params: &ConnParams) -> Result<MockConn> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        *self.state.last_settings.lock().unwrap() = params.settings();

        let delay = self.state.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let failed = self
            .state
            .fail_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            bail!("mock connect refused");
        }

        let id = self.state.connects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MockConn {
            id,
            state: Arc::clone(&self.state),
            closed: false,
            busy: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// A fake connection
#[derive(Debug)]
pub struct MockConn {
    /// Order in which this connection was opened, starting at 1
    pub id: usize,
    pub state: Arc<MockState>,
    pub closed: bool,
    pub busy: Arc<AtomicBool>,
}

impl MockConn {
    /// Simulate a transport failure
    pub fn break_conn(&mut self) {
        self.closed = true;
    }
}

#[async_trait]
impl Connection for MockConn {
    fn is_closed(&self) -> bool {
        self.closed
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Session for MockConn {
    type Rows = MockRows;
    type Insert = MockInsert;

    /// `"fail"` errors, anything else succeeds
    async fn exec(&mut self, query: &str) -> Result<()> {
        if query == "fail" {
            bail!("mock exec failed");
        }
        self.state.execs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// `"rows:N"` yields `N` rows, `"broken:N"` fails after `N` rows,
    /// `"fail"` fails to start
    async fn select(&mut self, query: &str) -> Result<MockRows> {
        let (count, fail) = match query.split_once(':') {
            Some(("rows", n)) => (n.parse::<u64>()?, false),
            Some(("broken", n)) => (n.parse::<u64>()?, true),
            _ => bail!("mock select failed: {}", query),
        };
        Ok(MockRows {
            next: 0,
            count,
            fail,
            closed: false,
        })
    }

    /// `"fail"` fails to start
    async fn insert(&mut self, query: &str) -> Result<MockInsert> {
        if query == "fail" {
            bail!("mock insert failed");
        }
        Ok(MockInsert { rows: Vec::new() })
    }
}

/// Rows produced by [`MockConn::select`]
#[derive(Debug)]
pub struct MockRows {
    next: u64,
    count: u64,
    fail: bool,
    pub closed: bool,
}

#[async_trait]
impl RowStream<MockConn> for MockRows {
    type Row = u64;

    async fn next(&mut self, _conn: &mut MockConn) -> Result<Option<u64>> {
        if self.next < self.count {
            self.next += 1;
            return Ok(Some(self.next));
        }
        if self.fail {
            bail!("mock stream broke");
        }
        Ok(None)
    }

    async fn close(&mut self, _conn: &mut MockConn) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Insert started by [`MockConn::insert`]; rows equal to `u64::MAX` are rejected
#[derive(Debug)]
pub struct MockInsert {
    rows: Vec<u64>,
}

#[async_trait]
impl InsertStream<MockConn> for MockInsert {
    type Row = u64;

    async fn append(&mut self, _conn: &mut MockConn, row: u64) -> Result<()> {
        if row == u64::MAX {
            bail!("mock row rejected");
        }
        self.rows.push(row);
        Ok(())
    }

    async fn send(&mut self, conn: &mut MockConn) -> Result<()> {
        conn.state
            .inserted
            .fetch_add(self.rows.len(), Ordering::SeqCst);
        self.rows.clear();
        Ok(())
    }

    async fn abort(&mut self, _conn: &mut MockConn) -> Result<()> {
        self.rows.clear();
        Ok(())
    }
}

/// Poll `cond` until it holds or `timeout` passes
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
