//! Broker-backed message bus implementations.
//!
//! The bus abstraction lives in `voxnlu-bus` as pure mechanics (plus the
//! in-memory bus). This module provides infrastructure-backed transports.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsBus;
