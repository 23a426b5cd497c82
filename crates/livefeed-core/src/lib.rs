//! Livefeed core caching and fan-out primitives.
//!
//! - [`ttl_map`]: bounded process-local map with lazy expiry
//! - [`shared`]: shared cache trait and key namespaces
//! - [`tiered`]: read-through lookup across local, shared and origin tiers
//! - [`pool`]: fixed-size worker pools
//! - [`fetch`]: deadline-bounded parallel fetch
//!
//! Nothing here knows about HTTP, Redis or SQL; the server crate supplies
//! those as trait implementations.

pub mod fetch;
pub mod pool;
pub mod shared;
pub mod tiered;
pub mod ttl_map;

pub use fetch::{FetchOrchestrator, FetchReport, FetchTask, TaskError, TaskOutcome, TaskStatus};
pub use pool::{PoolError, WorkerPool};
pub use shared::{
    DynSharedCache, Namespace, NoopSharedCache, SharedCache, SharedCacheError, fetch_bounded,
    spawn_set,
};
pub use tiered::{CacheCodec, Hit, Tier, TierPolicy, TieredLookup};
pub use ttl_map::{CacheEntry, TtlMap, TtlMapConfig, TtlMapStats};
