//! Keyed snapshot store with TTL expiry and hit/miss accounting.
//!
//! Entries are whole snapshots: `set` swaps the payload, timestamps and
//! counters in one write, so readers never observe a half-updated entry.
//! Expired entries are kept until `cleanup_expired` or an explicit clear so
//! they can still be served as a fallback.

use super::hash::payload_digest;
use crate::clock::Clock;
use crate::model::{RawStationReading, ReconciledStation};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Key of the reconciled snapshot; per-source entries use the source tag.
pub const MERGED_KEY: &str = "merged";

/// What a cache entry holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "items", rename_all = "lowercase")]
pub enum CachePayload {
    Readings(Vec<RawStationReading>),
    Stations(Vec<ReconciledStation>),
}

impl CachePayload {
    pub fn len(&self) -> usize {
        match self {
            CachePayload::Readings(r) => r.len(),
            CachePayload::Stations(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_readings(&self) -> Option<&[RawStationReading]> {
        match self {
            CachePayload::Readings(r) => Some(r),
            CachePayload::Stations(_) => None,
        }
    }

    pub fn as_stations(&self) -> Option<&[ReconciledStation]> {
        match self {
            CachePayload::Stations(s) => Some(s),
            CachePayload::Readings(_) => None,
        }
    }
}

/// A cached snapshot and its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Arc<CachePayload>,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hits: u64,
    /// Last time this entry was served after expiry.
    pub last_fallback_at: Option<DateTime<Utc>>,
    pub size_bytes: usize,
    pub digest: String,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Result of a counted read.
#[derive(Debug, Clone)]
pub enum Lookup {
    Fresh(CacheEntry),
    Stale(CacheEntry),
    Missing,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryStats {
    pub key: String,
    pub items: usize,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub expired: bool,
    pub hits: u64,
    pub size_bytes: usize,
    pub last_fallback_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub size_bytes: usize,
    pub last_update: Option<DateTime<Utc>>,
    pub entries: Vec<EntryStats>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    last_update: Option<DateTime<Utc>>,
}

/// In-process snapshot cache.
///
/// Constructed once and shared by handle; there is no process-global instance.
#[derive(Debug)]
pub struct CacheStore {
    state: RwLock<CacheState>,
    clock: Arc<dyn Clock>,
    stale_grace: Duration,
}

impl CacheStore {
    /// Create an empty store.
    ///
    /// `stale_grace` protects entries recently served as a fallback from
    /// `cleanup_expired`.
    pub fn new(clock: Arc<dyn Clock>, stale_grace: std::time::Duration) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            clock,
            stale_grace: Duration::from_std(stale_grace).unwrap_or(Duration::MAX),
        }
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Entry for `key` regardless of expiry. Does not touch counters.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        self.state.read().await.entries.get(key).cloned()
    }

    /// Counted read: a fresh entry is a hit, anything else a miss.
    pub async fn lookup(&self, key: &str) -> Lookup {
        let now = self.clock.now();
        let mut state = self.state.write().await;

        let fresh = match state.entries.get(key) {
            None => None,
            Some(entry) => Some(!entry.is_expired_at(now)),
        };

        match fresh {
            Some(true) => {
                state.hits += 1;
                match state.entries.get_mut(key) {
                    Some(entry) => {
                        entry.hits += 1;
                        Lookup::Fresh(entry.clone())
                    }
                    None => Lookup::Missing,
                }
            }
            Some(false) => {
                state.misses += 1;
                state.entries.get(key).cloned().map_or(Lookup::Missing, Lookup::Stale)
            }
            None => {
                state.misses += 1;
                Lookup::Missing
            }
        }
    }

    /// Replace the entry for `key` with a new snapshot.
    pub async fn set(&self, key: &str, payload: CachePayload, ttl: std::time::Duration) -> CacheEntry {
        let now = self.clock.now();
        let ttl = Duration::from_std(ttl).unwrap_or(Duration::MAX);
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);

        let bytes = serde_json::to_vec(&payload).unwrap_or_default();
        let entry = CacheEntry {
            key: key.to_string(),
            payload: Arc::new(payload),
            fetched_at: now,
            expires_at,
            hits: 0,
            last_fallback_at: None,
            size_bytes: bytes.len(),
            digest: payload_digest(&bytes),
        };

        let mut state = self.state.write().await;
        state.entries.insert(key.to_string(), entry.clone());
        state.last_update = Some(now);

        tracing::debug!(key, items = entry.payload.len(), expires_at = %entry.expires_at, "cache entry replaced");
        entry
    }

    /// Absent entries count as expired.
    pub async fn is_expired(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.state
            .read()
            .await
            .entries
            .get(key)
            .is_none_or(|entry| entry.is_expired_at(now))
    }

    /// Record that an expired entry was served in place of a failed refresh.
    pub async fn mark_fallback(&self, key: &str) {
        let now = self.clock.now();
        if let Some(entry) = self.state.write().await.entries.get_mut(key) {
            entry.last_fallback_at = Some(now);
        }
    }

    pub async fn invalidate(&self, key: &str) -> bool {
        let removed = self.state.write().await.entries.remove(key).is_some();
        if removed {
            tracing::debug!(key, "cache entry invalidated");
        }
        removed
    }

    /// Drop every entry. Counters are kept.
    pub async fn clear_all(&self) -> usize {
        let mut state = self.state.write().await;
        let count = state.entries.len();
        state.entries.clear();
        count
    }

    /// Remove expired entries that have not served as a fallback within the
    /// grace window. Returns how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let grace = self.stale_grace;
        let mut state = self.state.write().await;
        let before = state.entries.len();

        state.entries.retain(|_, entry| {
            if entry.expires_at >= now {
                return true;
            }
            entry
                .last_fallback_at
                .is_some_and(|used| now.signed_duration_since(used) <= grace)
        });

        let removed = before - state.entries.len();
        if removed > 0 {
            tracing::info!(removed, remaining = state.entries.len(), "expired cache entries cleaned up");
        }
        removed
    }

    pub async fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let state = self.state.read().await;

        let mut entries: Vec<EntryStats> = state
            .entries
            .values()
            .map(|e| EntryStats {
                key: e.key.clone(),
                items: e.payload.len(),
                fetched_at: e.fetched_at,
                expires_at: e.expires_at,
                expired: e.is_expired_at(now),
                hits: e.hits,
                size_bytes: e.size_bytes,
                last_fallback_at: e.last_fallback_at,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        CacheStats {
            total_entries: entries.len(),
            hits: state.hits,
            misses: state.misses,
            size_bytes: entries.iter().map(|e| e.size_bytes).sum(),
            last_update: state.last_update,
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::SourceTag;
    use chrono::TimeZone;
    use std::time::Duration as StdDuration;

    const TTL: StdDuration = StdDuration::from_secs(300);

    fn setup() -> (CacheStore, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let store = CacheStore::new(Arc::new(clock.clone()), StdDuration::from_secs(3600));
        (store, clock)
    }

    fn readings(ids: &[&str]) -> CachePayload {
        CachePayload::Readings(
            ids.iter()
                .map(|id| RawStationReading::new(*id, format!("Station {id}"), SourceTag::Hydro))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (store, _clock) = setup();
        let payload = readings(&["150160180", "150190340"]);

        store.set("hydro", payload.clone(), TTL).await;

        let entry = store.get("hydro").await.unwrap();
        assert_eq!(*entry.payload, payload);
        assert_eq!(entry.hits, 0);
        assert!(!store.is_expired("hydro").await);
    }

    #[tokio::test]
    async fn test_expires_after_ttl() {
        let (store, clock) = setup();
        store.set("hydro", readings(&["1"]), TTL).await;

        clock.advance(Duration::seconds(299));
        assert!(!store.is_expired("hydro").await);

        clock.advance(Duration::seconds(2));
        assert!(store.is_expired("hydro").await);
        assert!(store.get("hydro").await.is_some(), "expired entries stay readable");
    }

    #[tokio::test]
    async fn test_missing_is_expired() {
        let (store, _clock) = setup();
        assert!(store.is_expired("merged").await);
        assert!(store.get("merged").await.is_none());
    }

    #[tokio::test]
    async fn test_lookup_counts_hits_and_misses() {
        let (store, clock) = setup();

        assert!(matches!(store.lookup("hydro").await, Lookup::Missing));
        store.set("hydro", readings(&["1"]), TTL).await;
        assert!(matches!(store.lookup("hydro").await, Lookup::Fresh(_)));
        let Lookup::Fresh(entry) = store.lookup("hydro").await else { panic!("expected fresh entry") };
        assert_eq!(entry.hits, 2);

        clock.advance(Duration::seconds(301));
        assert!(matches!(store.lookup("hydro").await, Lookup::Stale(_)));

        let stats = store.stats().await;
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 2);
    }

    #[tokio::test]
    async fn test_set_resets_hits() {
        let (store, _clock) = setup();
        store.set("hydro", readings(&["1"]), TTL).await;
        store.lookup("hydro").await;
        store.lookup("hydro").await;

        store.set("hydro", readings(&["1", "2"]), TTL).await;
        let entry = store.get("hydro").await.unwrap();
        assert_eq!(entry.hits, 0);
        assert_eq!(entry.payload.len(), 2);
    }

    #[tokio::test]
    async fn test_digest_tracks_payload() {
        let (store, _clock) = setup();
        let first = store.set("hydro", readings(&["1"]), TTL).await;
        let same = store.set("hydro", readings(&["1"]), TTL).await;
        let changed = store.set("hydro", readings(&["2"]), TTL).await;

        assert_eq!(first.digest, same.digest);
        assert_ne!(first.digest, changed.digest);
        assert!(first.size_bytes > 0);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let (store, _clock) = setup();
        store.set("hydro", readings(&["1"]), TTL).await;
        store.set("hydro2", readings(&["2"]), TTL).await;
        store.set(MERGED_KEY, CachePayload::Stations(vec![]), TTL).await;

        assert!(store.invalidate("hydro").await);
        assert!(!store.invalidate("hydro").await);
        assert_eq!(store.clear_all().await, 2);
        assert_eq!(store.stats().await.total_entries, 0);
    }

    #[tokio::test]
    async fn test_cleanup_expired_spares_recent_fallbacks() {
        let (store, clock) = setup();
        store.set("hydro", readings(&["1"]), TTL).await;
        store.set("hydro2", readings(&["2"]), TTL).await;
        store.set(MERGED_KEY, CachePayload::Stations(vec![]), StdDuration::from_secs(3600)).await;

        clock.advance(Duration::seconds(600));
        store.mark_fallback("hydro2").await;

        assert_eq!(store.cleanup_expired().await, 1);
        assert!(store.get("hydro").await.is_none());
        assert!(store.get("hydro2").await.is_some());
        assert!(store.get(MERGED_KEY).await.is_some());

        clock.advance(Duration::seconds(3601));
        assert_eq!(store.cleanup_expired().await, 2);
        assert_eq!(store.stats().await.total_entries, 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let (store, clock) = setup();
        assert!(store.stats().await.last_update.is_none());

        store.set("hydro2", readings(&["1", "2", "3"]), TTL).await;
        store.set("hydro", readings(&["1"]), StdDuration::from_secs(10)).await;
        clock.advance(Duration::seconds(20));

        let stats = store.stats().await;
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.entries[0].key, "hydro");
        assert!(stats.entries[0].expired);
        assert_eq!(stats.entries[1].items, 3);
        assert!(!stats.entries[1].expired);
        assert_eq!(stats.size_bytes, stats.entries[0].size_bytes + stats.entries[1].size_bytes);
        assert_eq!(stats.last_update, Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()));
    }
}
