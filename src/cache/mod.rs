//! Caching subsystem.
//!
//! - [`fingerprint`]: normalization rules and the SHA-256 request digest
//!   used as the cache key.
//! - [`store::FingerprintCache`]: bounded, TTL-limited, concurrently
//!   accessible map from fingerprint to formula, with debounced autosave.
//! - [`persist`]: the versioned JSON cache file, written atomically and
//!   loaded tolerantly.
//!
//! Validation results are never cached: whether a formula evaluates depends
//! on sheet state that can change between requests.

pub mod fingerprint;
pub mod persist;
pub mod store;

pub use fingerprint::{Fingerprint, normalize_description};
pub use persist::default_cache_path;
pub use store::{CacheConfig, CacheEntry, CacheStats, FingerprintCache};
