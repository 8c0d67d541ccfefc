//! Persistence sync: write reconciled stations and their latest reading to
//! the relational store.
//!
//! Stations are processed in batches; inside a batch at most `concurrency`
//! stations are written at once. Writes for the same station code are
//! serialized even across overlapping sync runs. A failing station is
//! counted and reported, never aborting the batch.

use crate::Error;
use crate::clock::{Clock, SystemClock};
use crate::model::{Coordinates, PinnedCoordinates, ReconciledStation, SourceTag, StationThresholds};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinSet;

/// Station row as stored; `station_code` is the join key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedStation {
    pub station_code: String,
    pub name: String,
    pub river_name: Option<String>,
    pub voivodeship: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub coordinates_verified: bool,
    pub warning_level: Option<f64>,
    pub alarm_level: Option<f64>,
    pub last_water_level: Option<f64>,
    pub last_water_level_at: Option<DateTime<Utc>>,
    pub last_flow: Option<f64>,
    pub last_flow_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl PersistedStation {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)).filter(Coordinates::is_usable),
            _ => None,
        }
    }

    /// Thresholds known for this station, if any.
    pub fn thresholds(&self) -> Option<StationThresholds> {
        (self.warning_level.is_some() || self.alarm_level.is_some())
            .then_some(StationThresholds { warning_level: self.warning_level, alarm_level: self.alarm_level })
    }

    /// Coordinates worth pinning: only those confirmed by hand.
    pub fn pinned_coordinates(&self) -> Option<PinnedCoordinates> {
        self.coordinates()
            .filter(|_| self.coordinates_verified)
            .map(|coordinates| PinnedCoordinates { coordinates, verified: true })
    }
}

/// One reading; unique on `(station_code, measured_at, source)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedMeasurement {
    pub station_code: String,
    pub measured_at: DateTime<Utc>,
    pub source: SourceTag,
    pub water_level: Option<f64>,
    pub flow: Option<f64>,
}

impl PersistedMeasurement {
    /// The station's primary reading, keyed by its water level timestamp
    /// (or the flow timestamp when there is no level).
    pub fn from_station(station: &ReconciledStation) -> Option<Self> {
        let (measured_at, source) = match (station.water_level_date, station.flow_date) {
            (Some(at), _) => (at, station.water_level_source.unwrap_or(station.source)),
            (None, Some(at)) => (at, station.flow_source.unwrap_or(station.source)),
            (None, None) => return None,
        };

        let flow = station.flow.filter(|_| station.flow_date == Some(measured_at));

        Some(Self {
            station_code: station.id.clone(),
            measured_at,
            source,
            water_level: station.water_level.filter(|_| station.water_level_date.is_some()),
            flow,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub stations: u64,
    pub measurements: u64,
}

/// Relational store the sync writes to.
#[async_trait]
pub trait StationStore: Send + Sync {
    async fn find_station(&self, station_code: &str) -> Result<Option<PersistedStation>, Error>;

    /// Insert or fully replace the row for `station.station_code`.
    async fn upsert_station(&self, station: &PersistedStation) -> Result<(), Error>;

    /// Returns `false` when the same `(station, time, source)` already exists.
    async fn create_measurement_if_absent(&self, measurement: &PersistedMeasurement) -> Result<bool, Error>;

    async fn list_stations(&self) -> Result<Vec<PersistedStation>, Error>;

    async fn counts(&self) -> Result<StoreCounts, Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub batch_size: usize,
    pub station_limit: Option<usize>,
    pub auth_required: bool,
    pub concurrency: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self { batch_size: 50, station_limit: None, auth_required: false, concurrency: 4 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub measurements_created: usize,
    pub measurements_skipped: usize,
    pub errors: usize,
    pub error_details: Vec<String>,
}

#[derive(Debug)]
struct StationOutcome {
    created: bool,
    measurement_created: Option<bool>,
}

/// Apply an incoming station onto what is stored.
///
/// Curated fields (`river_name`, thresholds, verified coordinates) are never
/// replaced once set, and the verified flag of a stored station is only
/// changed by whoever curates it. Readings move forward only.
pub fn merge_station(
    existing: Option<&PersistedStation>, incoming: &ReconciledStation, now: DateTime<Utc>,
) -> PersistedStation {
    let incoming_coords = incoming.coordinates.filter(Coordinates::is_usable);

    let Some(existing) = existing else {
        return PersistedStation {
            station_code: incoming.id.clone(),
            name: incoming.name.clone(),
            river_name: incoming.river.clone(),
            voivodeship: incoming.voivodeship.clone(),
            latitude: incoming_coords.map(|c| c.latitude),
            longitude: incoming_coords.map(|c| c.longitude),
            coordinates_verified: incoming_coords.is_some() && incoming.coordinates_verified,
            warning_level: incoming.warning_level,
            alarm_level: incoming.alarm_level,
            last_water_level: incoming.water_level,
            last_water_level_at: incoming.water_level_date,
            last_flow: incoming.flow,
            last_flow_at: incoming.flow_date,
            updated_at: now,
        };
    };

    let (coordinates, coordinates_verified) = match (existing.coordinates(), incoming_coords) {
        (Some(kept), _) if existing.coordinates_verified => (Some(kept), true),
        (_, Some(new)) => (Some(new), false),
        (kept, None) => (kept, false),
    };

    let (last_water_level, last_water_level_at) = newer(
        (existing.last_water_level, existing.last_water_level_at),
        (incoming.water_level, incoming.water_level_date),
    );
    let (last_flow, last_flow_at) =
        newer((existing.last_flow, existing.last_flow_at), (incoming.flow, incoming.flow_date));

    PersistedStation {
        station_code: existing.station_code.clone(),
        name: incoming.name.clone(),
        river_name: existing.river_name.clone().or_else(|| incoming.river.clone()),
        voivodeship: incoming.voivodeship.clone().or_else(|| existing.voivodeship.clone()),
        latitude: coordinates.map(|c| c.latitude),
        longitude: coordinates.map(|c| c.longitude),
        coordinates_verified,
        warning_level: existing.warning_level.or(incoming.warning_level),
        alarm_level: existing.alarm_level.or(incoming.alarm_level),
        last_water_level,
        last_water_level_at,
        last_flow,
        last_flow_at,
        updated_at: now,
    }
}

type Reading = (Option<f64>, Option<DateTime<Utc>>);

fn newer(stored: Reading, incoming: Reading) -> Reading {
    match (stored, incoming) {
        (_, (None, _)) => stored,
        ((Some(_), Some(stored_at)), (Some(_), Some(incoming_at))) if incoming_at < stored_at => stored,
        ((Some(_), Some(_)), (Some(_), None)) => stored,
        _ => incoming,
    }
}

/// Writes reconciled stations through a [`StationStore`].
#[derive(Clone)]
pub struct PersistenceSync {
    store: Arc<dyn StationStore>,
    clock: Arc<dyn Clock>,
    station_locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl std::fmt::Debug for PersistenceSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceSync").finish_non_exhaustive()
    }
}

impl PersistenceSync {
    pub fn new(store: Arc<dyn StationStore>) -> Self {
        Self { store, clock: Arc::new(SystemClock), station_locks: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn StationStore> {
        &self.store
    }

    /// Sync `stations`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] when authorization is required and
    /// `authorized` is false. Per-station failures are reported in the
    /// returned [`SyncReport`] instead.
    pub async fn sync(
        &self, stations: &[ReconciledStation], options: SyncOptions, authorized: bool,
    ) -> Result<SyncReport, Error> {
        if options.auth_required && !authorized {
            tracing::warn!("sync rejected: missing or invalid token");
            return Err(Error::Unauthorized("a valid sync token is required".into()));
        }

        let limit = options.station_limit.unwrap_or(stations.len()).min(stations.len());
        let selected = &stations[..limit];
        let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
        let mut report = SyncReport::default();

        tracing::info!(
            stations = selected.len(),
            batch_size = options.batch_size,
            concurrency = options.concurrency,
            "station sync started"
        );

        for (index, batch) in selected.chunks(options.batch_size.max(1)).enumerate() {
            let mut tasks = JoinSet::new();

            for station in batch {
                let this = self.clone();
                let station = station.clone();
                let semaphore = Arc::clone(&semaphore);
                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    let code = station.id.clone();
                    (code, this.sync_station(&station).await)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                report.processed += 1;
                match joined {
                    Ok((_, Ok(outcome))) => {
                        if outcome.created {
                            report.created += 1;
                        } else {
                            report.updated += 1;
                        }
                        match outcome.measurement_created {
                            Some(true) => report.measurements_created += 1,
                            Some(false) | None => report.measurements_skipped += 1,
                        }
                    }
                    Ok((code, Err(e))) => {
                        tracing::warn!(station = %code, error = %e, "station sync failed");
                        report.errors += 1;
                        report.error_details.push(e.to_string());
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "station sync task aborted");
                        report.errors += 1;
                        report.error_details.push(format!("sync task failed: {e}"));
                    }
                }
            }

            tracing::debug!(batch = index, processed = report.processed, "sync batch finished");
        }

        tracing::info!(
            processed = report.processed,
            created = report.created,
            updated = report.updated,
            measurements_created = report.measurements_created,
            errors = report.errors,
            "station sync finished"
        );

        Ok(report)
    }

    fn station_lock(&self, code: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.station_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(code.to_string()).or_default())
    }

    /// Drop the lock for `code` once no sync holds it.
    fn release_station_lock(&self, code: &str) {
        let mut locks = self.station_locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(code).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(code);
        }
    }

    async fn sync_station(&self, station: &ReconciledStation) -> Result<StationOutcome, Error> {
        let lock = self.station_lock(&station.id);
        let result = {
            let _guard = lock.lock().await;
            self.write_station(station).await
        };
        drop(lock);
        self.release_station_lock(&station.id);
        result
    }

    async fn write_station(&self, station: &ReconciledStation) -> Result<StationOutcome, Error> {
        let write_error = |e: Error| Error::PersistenceWrite { station: station.id.clone(), message: e.to_string() };

        let existing = self.store.find_station(&station.id).await.map_err(write_error)?;
        let merged = merge_station(existing.as_ref(), station, self.clock.now());
        self.store.upsert_station(&merged).await.map_err(write_error)?;

        let measurement_created = match PersistedMeasurement::from_station(station) {
            Some(measurement) => Some(
                self.store
                    .create_measurement_if_absent(&measurement)
                    .await
                    .map_err(write_error)?,
            ),
            None => None,
        };

        Ok(StationOutcome { created: existing.is_none(), measurement_created })
    }
}
