//! Result and screenshot caching.
//!
//! Three tiers back the analysis pipeline:
//!
//! - [`ResultCache`]: in-memory TTL cache with oldest-insertion eviction and
//!   content-hash aliases
//! - [`CacheDb`]: SQLite store of results that survives restarts
//! - [`ScreenshotStore`]: screenshot bytes in an LRU plus temp and companion files

pub mod connection;
pub mod entries;
pub mod hash;
pub mod migrations;
pub mod result;
pub mod screenshot;

pub use crate::Error;

pub use connection::CacheDb;
pub use entries::PersistedEntry;
pub use result::{CacheStats, ResultCache};
pub use screenshot::{ScreenshotStats, ScreenshotStore, StoreSettings};
