//! Smart data service: cache-first access to the reconciled station list.
//!
//! Reads are served from the `merged` cache entry while it is fresh. On a
//! miss a single coalesced refresh fetches both feeds concurrently (each
//! through its own cache entry and in-flight guard), reconciles them and
//! stores the result. When a refresh fails the previous snapshot is served
//! as stale with the error attached; only when nothing was ever cached does
//! the call fail.
//!
//! Alarm status and data age are recomputed on every read, so threshold
//! updates and the passage of time show up without refetching.

use crate::Error;
use crate::alarm;
use crate::cache::{CacheEntry, CachePayload, CacheStats, CacheStore, InFlight, Lookup, MERGED_KEY};
use crate::fetch::{FetchError, SourceFetcher};
use crate::model::{MapStation, PinnedCoordinates, ReconciledStation, SourceTag, StationStats, StationThresholds};
use crate::reconcile::{FreshnessPolicy, Reconciler};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::RwLock as AsyncRwLock;

/// Cache lifetimes and fetch budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServicePolicy {
    pub source_ttl: Duration,
    pub merged_ttl: Duration,
    pub freshness_threshold_hours: f64,
    /// How long past expiry a source snapshot may stand in for a failed fetch.
    pub stale_grace: Duration,
    pub fetch_timeout: Duration,
}

impl Default for ServicePolicy {
    fn default() -> Self {
        Self {
            source_ttl: Duration::from_secs(300),
            merged_ttl: Duration::from_secs(300),
            freshness_threshold_hours: crate::reconcile::DEFAULT_FRESHNESS_THRESHOLD_HOURS,
            stale_grace: Duration::from_secs(3600),
            fetch_timeout: Duration::from_secs(20),
        }
    }
}

/// How a feed's readings were obtained for the current snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    /// Fetched from upstream during this refresh.
    Live,
    /// Reused from a fresh cache entry.
    Cached,
    /// Upstream failed; an expired cache entry was used instead.
    Fallback,
    /// Upstream failed and nothing usable was cached.
    Failed,
    /// No refresh has run yet.
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceReport {
    pub status: SourceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stations: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourcesReport {
    pub hydro: SourceReport,
    pub hydro2: SourceReport,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataMeta {
    pub cache_hit: bool,
    pub stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub sources: SourcesReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct SmartStationsData {
    pub stations: Vec<ReconciledStation>,
    pub meta: DataMeta,
}

#[derive(Debug, Clone, Serialize)]
pub struct SmartDataStats {
    pub stations: StationStats,
    pub cache: CacheStats,
    pub stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshFailure {
    pub key: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshReport {
    pub success: Vec<String>,
    pub failed: Vec<RefreshFailure>,
}

impl RefreshReport {
    fn record(&mut self, key: &str, error: Option<String>) {
        match error {
            None => self.success.push(key.to_string()),
            Some(error) => self.failed.push(RefreshFailure { key: key.to_string(), error }),
        }
    }
}

#[derive(Debug, Clone)]
struct SourceOutcome {
    payload: Option<Arc<CachePayload>>,
    report: SourceReport,
}

impl SourceOutcome {
    fn from_entry(status: SourceStatus, entry: &CacheEntry, error: Option<String>) -> Self {
        Self {
            payload: Some(entry.payload.clone()),
            report: SourceReport { status, error, stations: entry.payload.len() },
        }
    }

    fn failed(error: String) -> Self {
        Self { payload: None, report: SourceReport { status: SourceStatus::Failed, error: Some(error), stations: 0 } }
    }

    fn readings(&self) -> Option<&[crate::model::RawStationReading]> {
        self.payload.as_deref().and_then(CachePayload::as_readings)
    }
}

#[derive(Debug, Clone)]
struct MergedOutcome {
    result: Result<CacheEntry, String>,
    sources: SourcesReport,
}

struct Inner {
    primary: Arc<dyn SourceFetcher>,
    secondary: Arc<dyn SourceFetcher>,
    cache: Arc<CacheStore>,
    policy: ServicePolicy,
    reconciler: Reconciler,
    thresholds: RwLock<HashMap<String, StationThresholds>>,
    pinned: RwLock<HashMap<String, PinnedCoordinates>>,
    last_sources: AsyncRwLock<SourcesReport>,
    source_flight: InFlight<SourceOutcome>,
    merged_flight: InFlight<MergedOutcome>,
}

/// Cache-first facade over both feeds. Cheap to clone.
#[derive(Clone)]
pub struct SmartDataService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SmartDataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartDataService")
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}

impl SmartDataService {
    /// `primary` is source A (`hydro`), `secondary` source B (`hydro2`).
    pub fn new(
        primary: Arc<dyn SourceFetcher>, secondary: Arc<dyn SourceFetcher>, cache: Arc<CacheStore>,
        policy: ServicePolicy,
    ) -> Self {
        let reconciler = Reconciler::new(FreshnessPolicy { threshold_hours: policy.freshness_threshold_hours });
        Self {
            inner: Arc::new(Inner {
                primary,
                secondary,
                cache,
                policy,
                reconciler,
                thresholds: RwLock::new(HashMap::new()),
                pinned: RwLock::new(HashMap::new()),
                last_sources: AsyncRwLock::new(SourcesReport::default()),
                source_flight: InFlight::new(),
                merged_flight: InFlight::new(),
            }),
        }
    }

    pub fn with_thresholds(self, thresholds: HashMap<String, StationThresholds>) -> Self {
        self.set_thresholds(thresholds);
        self
    }

    pub fn with_pinned_coordinates(self, pinned: HashMap<String, PinnedCoordinates>) -> Self {
        self.set_pinned_coordinates(pinned);
        self
    }

    /// Replace the warning/alarm thresholds. Applies to the next read.
    pub fn set_thresholds(&self, thresholds: HashMap<String, StationThresholds>) {
        *self.inner.thresholds.write().unwrap_or_else(PoisonError::into_inner) = thresholds;
    }

    /// Replace the known coordinates. Applies to the next reconciliation.
    pub fn set_pinned_coordinates(&self, pinned: HashMap<String, PinnedCoordinates>) {
        *self.inner.pinned.write().unwrap_or_else(PoisonError::into_inner) = pinned;
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.inner.cache
    }

    /// The reconciled station list.
    pub async fn get_smart_stations_data(&self) -> Result<SmartStationsData, Error> {
        let inner = &self.inner;

        if let Lookup::Fresh(entry) = inner.cache.lookup(MERGED_KEY).await {
            let sources = inner.last_sources.read().await.clone();
            return Ok(self.respond(&entry, true, None, sources));
        }

        let outcome = inner.refresh_merged(false, false).await;
        match outcome.result {
            Ok(entry) => Ok(self.respond(&entry, false, None, outcome.sources)),
            Err(error) => match inner.cache.get(MERGED_KEY).await {
                Some(entry) => {
                    inner.cache.mark_fallback(MERGED_KEY).await;
                    tracing::warn!(%error, fetched_at = %entry.fetched_at, "refresh failed; serving stale stations");
                    Ok(self.respond(&entry, false, Some(error), outcome.sources))
                }
                None => Err(Error::TotalFetchFailure(error)),
            },
        }
    }

    pub async fn get_smart_data_stats(&self) -> Result<SmartDataStats, Error> {
        let data = self.get_smart_stations_data().await?;
        Ok(SmartDataStats {
            stations: StationStats::from_stations(&data.stations),
            cache: self.inner.cache.stats().await,
            stale: data.meta.stale,
            error: data.meta.error,
        })
    }

    /// Stations with usable coordinates, in map form.
    pub async fn get_smart_stations_for_map(&self) -> Result<Vec<MapStation>, Error> {
        let data = self.get_smart_stations_data().await?;
        Ok(data.stations.iter().filter_map(MapStation::from_station).collect())
    }

    /// Force a refresh.
    ///
    /// `None` refetches both feeds and rebuilds `merged`; a source tag
    /// refetches that feed only; `merged` rebuilds from the source entries
    /// without forcing them.
    pub async fn refresh(&self, key: Option<&str>) -> RefreshReport {
        let inner = &self.inner;
        let mut report = RefreshReport::default();

        match key {
            None => {
                let outcome = inner.refresh_merged(true, true).await;
                report.record(SourceTag::Hydro.as_str(), source_error(&outcome.sources.hydro));
                report.record(SourceTag::Hydro2.as_str(), source_error(&outcome.sources.hydro2));
                report.record(MERGED_KEY, outcome.result.err());
            }
            Some(MERGED_KEY) => {
                let outcome = inner.refresh_merged(false, true).await;
                report.record(MERGED_KEY, outcome.result.err());
            }
            Some(key) => match SourceTag::parse(key) {
                Some(tag) => {
                    let outcome = inner.resolve_source(tag, true).await;
                    report.record(key, source_error(&outcome.report));
                }
                None => {
                    report.record(key, Some(Error::InvalidInput(format!("unknown cache key '{key}'")).to_string()));
                }
            },
        }

        tracing::info!(success = report.success.len(), failed = report.failed.len(), ?key, "manual refresh");
        report
    }

    pub async fn clear_cache(&self) -> usize {
        let cleared = self.inner.cache.clear_all().await;
        *self.inner.last_sources.write().await = SourcesReport::default();
        tracing::info!(cleared, "cache cleared");
        cleared
    }

    pub async fn cleanup_expired(&self) -> usize {
        self.inner.cache.cleanup_expired().await
    }

    fn respond(
        &self, entry: &CacheEntry, cache_hit: bool, error: Option<String>, sources: SourcesReport,
    ) -> SmartStationsData {
        let now = self.inner.cache.now();
        let stale = error.is_some() || entry.is_expired_at(now);
        let policy = self.inner.reconciler.policy();

        let mut stations = entry.payload.as_stations().map(<[_]>::to_vec).unwrap_or_default();
        {
            let thresholds = self.inner.thresholds.read().unwrap_or_else(PoisonError::into_inner);
            for station in &mut stations {
                policy.refresh_age(station, now);
                alarm::annotate(station, thresholds.get(&station.id));
            }
        }

        SmartStationsData {
            stations,
            meta: DataMeta {
                cache_hit,
                stale,
                error,
                fetched_at: entry.fetched_at,
                expires_at: entry.expires_at,
                sources,
            },
        }
    }
}

/// A source counts as refreshed only when upstream answered.
fn source_error(report: &SourceReport) -> Option<String> {
    match report.status {
        SourceStatus::Live | SourceStatus::Cached => None,
        _ => Some(report.error.clone().unwrap_or_else(|| format!("source status {:?}", report.status))),
    }
}

impl Inner {
    fn fetcher(&self, tag: SourceTag) -> &Arc<dyn SourceFetcher> {
        match tag {
            SourceTag::Hydro => &self.primary,
            SourceTag::Hydro2 => &self.secondary,
        }
    }

    /// Readings for one feed: the fresh cache entry, or a coalesced fetch.
    async fn resolve_source(self: &Arc<Self>, tag: SourceTag, force: bool) -> SourceOutcome {
        let key = tag.as_str();

        if !force && let Lookup::Fresh(entry) = self.cache.lookup(key).await {
            return SourceOutcome::from_entry(SourceStatus::Cached, &entry, None);
        }

        let inner = Arc::clone(self);
        self.source_flight
            .run(key, move || async move { inner.fetch_source(tag).await })
            .await
    }

    async fn fetch_source(&self, tag: SourceTag) -> SourceOutcome {
        let key = tag.as_str();
        let started = std::time::Instant::now();

        let result = tokio::time::timeout(self.policy.fetch_timeout, self.fetcher(tag).fetch())
            .await
            .unwrap_or(Err(FetchError::Timeout));

        match result {
            Ok(readings) => {
                let count = readings.len();
                let entry = self.cache.set(key, CachePayload::Readings(readings), self.policy.source_ttl).await;
                tracing::info!(
                    source = %tag,
                    stations = count,
                    digest = %entry.digest,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "source refreshed"
                );
                SourceOutcome::from_entry(SourceStatus::Live, &entry, None)
            }
            Err(error) => {
                let error = Error::UpstreamFetch { tag, error }.to_string();
                let now = self.cache.now();
                let grace = chrono::Duration::from_std(self.policy.stale_grace).unwrap_or(chrono::Duration::MAX);

                match self.cache.get(key).await {
                    Some(entry) if now.signed_duration_since(entry.expires_at) <= grace => {
                        self.cache.mark_fallback(key).await;
                        tracing::warn!(
                            source = %tag,
                            %error,
                            fetched_at = %entry.fetched_at,
                            "using stale source snapshot"
                        );
                        SourceOutcome::from_entry(SourceStatus::Fallback, &entry, Some(error))
                    }
                    _ => {
                        tracing::warn!(source = %tag, %error, "source unavailable");
                        SourceOutcome::failed(error)
                    }
                }
            }
        }
    }

    /// Coalesced rebuild of the `merged` entry.
    ///
    /// Unless `rebuild` is set, a leader that finds `merged` already fresh
    /// (another refresh finished between the caller's lookup and now) returns
    /// it without fetching. Each mode coalesces only with callers asking for
    /// the same thing, so a forced refresh never joins a plain read.
    async fn refresh_merged(self: &Arc<Self>, force_sources: bool, rebuild: bool) -> MergedOutcome {
        let flight_key = match (force_sources, rebuild) {
            (true, _) => "merged:force",
            (false, true) => "merged:rebuild",
            (false, false) => MERGED_KEY,
        };
        let inner = Arc::clone(self);
        self.merged_flight
            .run(flight_key, move || async move { inner.rebuild_merged(force_sources, rebuild).await })
            .await
    }

    async fn rebuild_merged(self: &Arc<Self>, force_sources: bool, rebuild: bool) -> MergedOutcome {
        if !rebuild
            && let Some(entry) = self.cache.get(MERGED_KEY).await
            && !entry.is_expired_at(self.cache.now())
        {
            let sources = self.last_sources.read().await.clone();
            return MergedOutcome { result: Ok(entry), sources };
        }

        let (hydro, hydro2) = tokio::join!(
            self.resolve_source(SourceTag::Hydro, force_sources),
            self.resolve_source(SourceTag::Hydro2, force_sources),
        );
        let sources = SourcesReport { hydro: hydro.report.clone(), hydro2: hydro2.report.clone() };
        *self.last_sources.write().await = sources.clone();

        if hydro.readings().is_none() && hydro2.readings().is_none() {
            let error = format!(
                "{}; {}",
                hydro.report.error.as_deref().unwrap_or("hydro: no data"),
                hydro2.report.error.as_deref().unwrap_or("hydro2: no data"),
            );
            tracing::error!(%error, "both sources unavailable");
            return MergedOutcome { result: Err(error), sources };
        }

        let pinned = self.known_coordinates().await;
        let now = self.cache.now();
        let result = match self.reconciler.reconcile(hydro.readings(), hydro2.readings(), &pinned, now) {
            Ok(stations) => {
                let entry = self.cache.set(MERGED_KEY, CachePayload::Stations(stations), self.policy.merged_ttl).await;
                tracing::info!(
                    stations = entry.payload.len(),
                    hydro = ?sources.hydro.status,
                    hydro2 = ?sources.hydro2.status,
                    "merged snapshot rebuilt"
                );
                Ok(entry)
            }
            Err(e) => Err(e.to_string()),
        };

        MergedOutcome { result, sources }
    }

    /// Configured pins, plus coordinates from the previous snapshot for
    /// stations the feeds may have stopped locating. Only configured pins
    /// are ever verified.
    async fn known_coordinates(&self) -> HashMap<String, PinnedCoordinates> {
        let mut pinned = self.pinned.read().unwrap_or_else(PoisonError::into_inner).clone();

        if let Some(previous) = self.cache.get(MERGED_KEY).await
            && let Some(stations) = previous.payload.as_stations()
        {
            for station in stations {
                if let Some(coordinates) = station.coordinates {
                    pinned
                        .entry(station.id.clone())
                        .or_insert(PinnedCoordinates { coordinates, verified: false });
                }
            }
        }

        pinned
    }
}
