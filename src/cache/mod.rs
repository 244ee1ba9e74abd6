//! # Cache Module
//!
//! Process-wide cache of fulfillment results.
//!
//! When a catalog-only track (for example a Spotify recommendation) is matched
//! to a playable video, the match is stored here keyed by the catalog
//! identifier. Other sessions that meet the same catalog track later reuse the
//! match instead of searching again.
//!
//! ## Features
//!
//! - **TTL Support**: entries expire after `FULFILLMENT_CACHE_TTL_SECS`
//! - **Bounded**: least recently accessed entry is dropped when full
//! - **Thread Safety**: backed by `DashMap`, shared freely between sessions
//! - **Metrics**: hit/miss/eviction counters
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use open_music_session::cache::FulfillmentCache;
//! use std::time::Duration;
//!
//! let cache = FulfillmentCache::new(500, Some(Duration::from_secs(3600)));
//! assert!(cache.get(&"4uLU6hMCjMI75M1A2tKUQC".to_string()).is_none());
//! ```

pub mod lru_cache;

pub use lru_cache::{CacheMetrics, LRUCache};

use crate::sources::Track;

/// Identificador del catálogo → track reproducible encontrado
pub type FulfillmentCache = LRUCache<String, Track>;
