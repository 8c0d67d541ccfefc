//! In-memory snapshot cache.
//!
//! This module provides the process-local cache sitting between callers and
//! the upstream feeds. It supports:
//!
//! - Whole-snapshot entries keyed by source tag or `merged`
//! - TTL expiry with stale entries retained for fallback
//! - Hit/miss accounting and content digests
//! - Per-key request coalescing for refreshes

pub mod flight;
pub mod hash;
pub mod store;

pub use flight::InFlight;
pub use store::{CacheEntry, CachePayload, CacheStats, CacheStore, EntryStats, Lookup, MERGED_KEY};
