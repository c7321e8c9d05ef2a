//! Connection pool module for chpool
//!
//! This module provides a bounded, hook-aware pool of driver connections
//! with background health checking and pool-aware statement wrappers.

mod conn_pool;
mod hooks;
mod lease;
mod manager;
mod resource;
mod statement;

pub use conn_pool::{Pool, PoolBuilder};
pub use hooks::{AfterConnect, AfterRelease, BeforeAcquire};
pub use lease::Lease;
pub use manager::PoolState;
pub use statement::{PooledInsert, PooledRows};
