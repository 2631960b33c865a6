//! Generation-versioned asset cache with cache-first serving.
//!
//! This module provides the offline layer of the tool:
//! - Snapshots a fixed asset manifest into a named cache generation
//! - Serves requests from the cache first, refreshing in the background
//! - Purges superseded generations on activation
//! - Posts update notices when refreshed content differs from the cache

mod controller;
mod store;
mod types;

pub use controller::{CacheController, CacheError};
pub use store::{AssetStore, MemoryStore, SqliteStore, StoreError};
pub use types::{AssetSnapshot, LifecycleState, RequestKey, Served, ServedFrom, StoredAsset};
