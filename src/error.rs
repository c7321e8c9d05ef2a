//! Error types for chpool
//!
//! This module defines the error types surfaced by configuration parsing,
//! the connection pool and the compressed block transport.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors produced while parsing or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The connection string is not a valid URL
    #[error("Invalid connection string: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// An integer setting could not be parsed
    #[error("Invalid value {value:?} for {key}: expected an integer")]
    InvalidInt {
        /// Offending key
        key: String,
        /// Raw value
        value: String,
    },

    /// A duration setting could not be parsed
    #[error("Invalid value {value:?} for {key}: expected a duration such as \"90s\" or \"1h30m\"")]
    InvalidDuration {
        /// Offending key
        key: String,
        /// Raw value
        value: String,
    },

    /// An integer setting is below its minimum
    #[error("Invalid value {value} for {key}: must be at least {min}")]
    OutOfRange {
        /// Offending key
        key: String,
        /// Parsed value
        value: usize,
        /// Smallest accepted value
        min: usize,
    },

    /// An integer setting is above its maximum
    #[error("Invalid value {value} for {key}: must be at most {max}")]
    TooLarge {
        /// Offending key
        key: String,
        /// Parsed value
        value: usize,
        /// Largest accepted value
        max: usize,
    },

    /// A percent-encoded component does not decode to UTF-8
    #[error("Invalid percent-encoding in {component}")]
    InvalidEncoding {
        /// Connection string component, such as the user name
        component: &'static str,
    },

    /// A duration setting must be strictly positive
    #[error("Invalid value for {key}: must be greater than zero")]
    ZeroDuration {
        /// Offending key
        key: String,
    },

    /// Minimum pool size exceeds the maximum
    #[error("pool_min_conns ({min}) cannot be greater than pool_max_conns ({max})")]
    MinExceedsMax {
        /// Configured minimum
        min: usize,
        /// Configured maximum
        max: usize,
    },

    /// The configuration file could not be read
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid TOML
    #[error("Failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Errors returned by pool operations
#[derive(Error, Debug)]
pub enum PoolError {
    /// Configuration rejected at pool creation
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Establishing a connection failed
    #[error("Connection error: {0:#}")]
    Connect(anyhow::Error),

    /// The caller's cancellation token fired
    #[error("Operation cancelled")]
    Cancelled,

    /// No connection became available in time
    #[error("Timed out after {0:?} waiting for a connection")]
    Timeout(Duration),

    /// The pool has been closed
    #[error("Pool is closed")]
    Closed,

    /// The lease was already released
    #[error("Lease already released")]
    Released,

    /// A pass-through operation on a leased connection failed
    #[error("Driver error: {0:#}")]
    Driver(anyhow::Error),
}

/// Errors raised by the compressed block transport
#[derive(Error, Debug)]
pub enum CompressError {
    /// IO error on the underlying stream, including short reads
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The block header carries a method tag other than LZ4
    #[error("Unknown compression method: 0x{0:02x}")]
    UnknownMethod(u8),

    /// The block checksum does not match its contents
    #[error("Checksum mismatch: expected {expected:032x}, got {actual:032x}")]
    ChecksumMismatch {
        /// Checksum stored in the header
        expected: u128,
        /// Checksum computed over the received bytes
        actual: u128,
    },

    /// A block exceeds the maximum block size
    #[error("Block of {0} bytes exceeds the maximum block size")]
    BlockTooLarge(usize),

    /// The block header is malformed
    #[error("Invalid block header: {0}")]
    InvalidHeader(String),

    /// LZ4 compression failed
    #[error("Compression failed: {0}")]
    Compress(#[from] lz4_flex::block::CompressError),

    /// LZ4 decompression failed
    #[error("Decompression failed: {0}")]
    Decompress(#[from] lz4_flex::block::DecompressError),

    /// Decompressed length differs from the header
    #[error("Decompressed {actual} bytes, header declared {expected}")]
    SizeMismatch {
        /// Size from the header
        expected: usize,
        /// Size actually produced
        actual: usize,
    },

    /// Emitting a block failed part way through a write call
    #[error("Write failed after {written} bytes: {source}")]
    PartialWrite {
        /// Bytes consumed from the caller's buffer before the failure
        written: usize,
        /// The failure itself
        #[source]
        source: Box<CompressError>,
    },
}

impl CompressError {
    /// Whether the error came from the underlying stream reaching EOF
    pub fn is_eof(&self) -> bool {
        match self {
            CompressError::Io(e) => e.kind() == io::ErrorKind::UnexpectedEof,
            CompressError::PartialWrite { source, .. } => source.is_eof(),
            _ => false,
        }
    }

    /// Bytes a failed write consumed, if the error came from one
    pub fn written(&self) -> Option<usize> {
        match self {
            CompressError::PartialWrite { written, .. } => Some(*written),
            _ => None,
        }
    }
}
