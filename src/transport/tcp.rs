//! TCP transport implementation
//!
//! Provides TCP connections that speak the compressed block framing in both
//! directions.

use super::SocketOpts;
use crate::compress::{CompressReader, CompressWriter};
use crate::config::ConnParams;
use crate::driver::{Connection, Connector};
use crate::error::CompressError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// Connector producing [`TcpConnection`]s
#[derive(Debug, Clone)]
pub struct TcpConnector {
    /// Socket options to apply to connections
    socket_opts: SocketOpts,
    /// Connection timeout
    connect_timeout: Duration,
    /// Whether inbound data starts out block-compressed
    compressed: bool,
    /// Whether inbound block checksums are verified
    verify_checksum: bool,
}

impl Default for TcpConnector {
    fn default() -> Self {
        TcpConnector {
            socket_opts: SocketOpts::default(),
            connect_timeout: Duration::from_secs(10),
            compressed: true,
            verify_checksum: true,
        }
    }
}

impl TcpConnector {
    /// Create a new TCP connector with default options
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Set socket options
    pub fn with_socket_opts(mut self, opts: SocketOpts) -> Self {
        self.socket_opts = opts;
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set whether inbound data starts out block-compressed
    pub fn with_compression(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    /// Set whether inbound block checksums are verified
    pub fn with_checksum_verification(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Conn = TcpConnection;

    async fn connect(&self, params: &ConnParams) -> Result<TcpConnection> {
        let addr = params.addr();

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .with_context(|| format!("Connection timeout to {}", addr))?
            .with_context(|| format!("Failed to connect to {}", addr))?;

        self.socket_opts.apply(&stream)?;

        debug!("TCP connection established to {}", addr);

        let mut conn = TcpConnection::new(stream, self.verify_checksum);
        conn.set_compressed(self.compressed);
        Ok(conn)
    }
}

/// A TCP connection framed with compressed blocks
#[derive(Debug)]
pub struct TcpConnection {
    reader: CompressReader<OwnedReadHalf>,
    writer: CompressWriter<OwnedWriteHalf>,
    closed: bool,
}

impl TcpConnection {
    /// Wrap an established stream
    pub fn new(stream: TcpStream, verify_checksum: bool) -> Self {
        let (read_half, write_half) = stream.into_split();
        TcpConnection {
            reader: CompressReader::new(read_half).verify_checksum(verify_checksum),
            writer: CompressWriter::new(write_half),
            closed: false,
        }
    }

    /// Write `data` as compressed blocks and flush
    pub async fn send(&mut self, data: &[u8]) -> Result<(), CompressError> {
        let result = match self.writer.write(data).await {
            Ok(_) => self.writer.flush().await,
            Err(e) => Err(e),
        };
        self.track(result)
    }

    /// Fill `buf` from the inbound stream
    pub async fn recv_exact(&mut self, buf: &mut [u8]) -> Result<(), CompressError> {
        let result = self.reader.read(buf).await.map(|_| ());
        self.track(result)
    }

    /// Switch inbound decoding between compressed blocks and raw bytes
    pub fn set_compressed(&mut self, compressed: bool) {
        self.reader.set_compressed(compressed);
    }

    /// Whether inbound data is decoded as compressed blocks
    pub fn is_compressed(&self) -> bool {
        self.reader.is_compressed()
    }

    fn track<T>(&mut self, result: Result<T, CompressError>) -> Result<T, CompressError> {
        if result.is_err() {
            self.closed = true;
        }
        result
    }
}

#[async_trait]
impl Connection for TcpConnection {
    fn is_closed(&self) -> bool {
        self.closed
    }

    fn is_busy(&self) -> bool {
        self.writer.buffered() > 0 || self.reader.buffered() > 0
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.writer
            .get_mut()
            .shutdown()
            .await
            .context("Failed to shut down connection")
    }
}
