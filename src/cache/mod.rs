//! Versioned asset cache for offline operation.
//!
//! This module provides the cache-first side of the offline layer:
//! - Installs a fixed manifest of assets as one named generation, all or nothing
//! - Prunes every other generation on activation
//! - Serves GET requests from the cache, falling back to the network and storing
//!   same-origin 200 responses (never API responses)

mod layer;
mod storage;
mod traits;

pub use layer::AssetCache;
pub use storage::{CacheStorage, CachedEntry, Generation, SqliteStorage};
pub use traits::{request_key, CacheEntry, CacheResult, CacheSource};
