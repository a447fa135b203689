//! NearMap - A coherent client-side near cache for a shared key/value store
//!
//! Provides a map facade whose reads are served from a bounded local cache,
//! kept consistent across instances through invalidation messaging.

pub mod bus;
pub mod cache;
pub mod config;
pub mod error;
pub mod map;
pub mod protocol;
pub mod store;
pub mod tasks;

pub use bus::{Bus, ConnectionState, ConnectionStateListener, MemoryBus};
pub use cache::{CacheStats, LocalCache};
pub use config::{
    CacheOptions, EvictionPolicy, ReconnectionStrategy, SyncStrategy, WriteMode,
};
pub use error::{NearMapError, Result};
pub use map::{topic_name, LocalCachedMap};
pub use protocol::{InvalidateListener, ListenerId};
pub use store::{MapLoader, MapWriter, MemoryStore, Store};
