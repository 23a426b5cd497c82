//! Cache tiers specific to the server.
//!
//! ## Cache Hierarchy
//!
//! ```text
//! request → L1 (TtlMap) → L2 (Redis) → origin (PostgreSQL) / verifier
//!              ↓              ↓                ↓
//!          <1µs latency   ~1ms, 300ms cap   up to the request deadline
//! ```
//!
//! ## Graceful Degradation
//!
//! If Redis is unavailable or disabled the shared tier is a no-op and every
//! lookup goes from L1 straight to the origin.

pub mod redis;
pub mod token;

pub use redis::{RedisSharedCache, create_shared_cache};
pub use token::{TokenPipeline, TokenRejection};
