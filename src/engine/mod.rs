//! DuckDB engine module - native handle, file registry and connection pool.
//!
//! This module provides:
//! - `Engine`: the opened database and its virtual file registry
//! - `ConnectionPool`: leases native connections, optionally recycling them
//! - `EngineConnector`: the pool's connection manager for an `Engine`

mod factory;
pub mod files;
pub mod pool;

pub use factory::{Engine, EngineConnector};
pub use files::{FileLocation, FileRegistry};
pub use pool::{ConnectionManager, ConnectionPool, PooledConnection};

/// Pool of native DuckDB sessions on one engine.
pub type EnginePool = ConnectionPool<EngineConnector>;
/// A leased native DuckDB session.
pub type EngineLease = PooledConnection<EngineConnector>;
