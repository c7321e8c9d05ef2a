//! # chpool - Pooled native-protocol client core
//!
//! chpool is the connection layer of a native-protocol client for a columnar
//! database. It manages a bounded pool of driver connections and provides
//! the LZ4 block framing used on the wire.
//!
//! ## Features
//!
//! - **Connection Pooling**: Bounded pool with FIFO waiters, lifetime and idle eviction,
//!   minimum pool size maintenance and lifecycle hooks
//! - **Connection Strings**: `pool_*` keys are parsed and stripped before the
//!   remaining parameters reach the driver
//! - **Compressed Blocks**: LZ4 block framing with a CityHash128 checksum
//! - **Scalar Codec**: Fixed-width, varint and length-prefixed encodings
//! - **Pass-through Statements**: Run queries and inserts that release their
//!   connection automatically
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chpool::config::parse_config;
//! use chpool::pool::Pool;
//! use chpool::transport::TcpConnector;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = parse_config("clickhouse://localhost:9000/default?pool_max_conns=8")?;
//!     let pool = Pool::connect(config, TcpConnector::with_defaults()).await?;
//!
//!     let mut lease = pool.acquire().await?;
//!     lease.conn_mut()?.send(b"ping").await?;
//!     lease.release();
//!
//!     pool.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The pool never speaks the protocol itself. A [`driver::Connector`] opens
//! connections, the pool leases them out, and connections that implement
//! [`driver::Session`] can run statements through the pool directly.
//!
//! ```text
//! Caller -> Pool -> Lease -> Connection -> CompressWriter/CompressReader -> Server
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod compress;
pub mod config;
pub mod driver;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod transport;

// Re-export commonly used items
pub use config::{load_config, parse_config, Config, ConnParams, PoolConfig};
pub use error::{CompressError, ConfigError, PoolError};
pub use pool::{Lease, Pool, PoolBuilder, PoolState};

/// Version of the chpool library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name() {
        assert_eq!(NAME, "chpool");
    }
}
