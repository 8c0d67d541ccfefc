//! Wiring shared by the MCP server and the CLI.

use hydrosync_client::clients_from_config;
use hydrosync_core::{
    AppConfig, CacheStore, Error, PersistenceSync, SmartDataService, SourceFetcher, StationDb, StationStore,
    SyncOptions, SyncReport, SystemClock,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Per-run overrides of the configured sync options.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOverrides {
    pub batch_size: Option<usize>,
    pub station_limit: Option<usize>,
}

/// The assembled application: service, store and sync.
#[derive(Clone, Debug)]
pub struct App {
    pub config: AppConfig,
    pub service: SmartDataService,
    pub sync: PersistenceSync,
    pub db: StationDb,
}

impl App {
    /// Open the station store and build the live feed clients.
    pub async fn from_config(config: AppConfig) -> Result<Self, Error> {
        let db = StationDb::open(&config.db_path).await?;
        let (hydro, hydro2) = clients_from_config(&config)?;
        Self::with_fetchers(config, db, Arc::new(hydro), Arc::new(hydro2)).await
    }

    pub async fn with_fetchers(
        config: AppConfig, db: StationDb, primary: Arc<dyn SourceFetcher>, secondary: Arc<dyn SourceFetcher>,
    ) -> Result<Self, Error> {
        let policy = config.service_policy();
        let cache = Arc::new(CacheStore::new(Arc::new(SystemClock), policy.stale_grace));
        let service = SmartDataService::new(primary, secondary, cache, policy);
        let sync = PersistenceSync::new(Arc::new(db.clone()));

        let app = Self { config, service, sync, db };
        app.load_station_metadata().await?;
        Ok(app)
    }

    /// Push thresholds and verified coordinates from the store into the
    /// service. Returns how many stations carried either.
    pub async fn load_station_metadata(&self) -> Result<usize, Error> {
        let stations = self.db.list_stations().await?;

        let thresholds: HashMap<_, _> = stations
            .iter()
            .filter_map(|s| s.thresholds().map(|t| (s.station_code.clone(), t)))
            .collect();
        let pinned: HashMap<_, _> = stations
            .iter()
            .filter_map(|s| s.pinned_coordinates().map(|p| (s.station_code.clone(), p)))
            .collect();

        let annotated = stations
            .iter()
            .filter(|s| thresholds.contains_key(&s.station_code) || pinned.contains_key(&s.station_code))
            .count();
        tracing::debug!(thresholds = thresholds.len(), pinned = pinned.len(), "station metadata loaded");

        self.service.set_thresholds(thresholds);
        self.service.set_pinned_coordinates(pinned);
        Ok(annotated)
    }

    /// Sync the current reconciled list into the store.
    pub async fn sync_stations(&self, token: Option<&str>, overrides: SyncOverrides) -> Result<SyncReport, Error> {
        let defaults = self.config.sync_options();
        let options = SyncOptions {
            batch_size: overrides.batch_size.unwrap_or(defaults.batch_size),
            station_limit: overrides.station_limit.or(defaults.station_limit),
            ..defaults
        };
        if options.batch_size == 0 {
            return Err(Error::InvalidInput("batch_size must be at least 1".into()));
        }

        let authorized = self.config.sync_token_matches(token);
        if options.auth_required && !authorized {
            return Err(Error::Unauthorized("a valid sync token is required".into()));
        }

        let data = self.service.get_smart_stations_data().await?;
        let report = self.sync.sync(&data.stations, options, authorized).await?;
        self.load_station_metadata().await?;
        Ok(report)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use chrono::{Duration, Utc};
    use hydrosync_core::{RawStationReading, SourceTag, StaticFetcher};

    pub(crate) fn readings(source: SourceTag) -> Vec<RawStationReading> {
        let now = Utc::now();
        match source {
            SourceTag::Hydro => vec![
                RawStationReading::new("150160180", "Kłodzko", source)
                    .with_river("Nysa Kłodzka")
                    .with_water_level(245.0, now - Duration::hours(1))
                    .with_coordinates(50.4361, 16.6544),
                RawStationReading::new("149180020", "Bielsko-Biała", source).with_river("Biała"),
            ],
            SourceTag::Hydro2 => vec![
                RawStationReading::new("150160180", "Kłodzko", source).with_water_level(250.0, now),
                RawStationReading::new("152210170", "Warszawa-Bulwary", source).with_water_level(180.0, now),
            ],
        }
    }

    pub(crate) async fn app(config: AppConfig) -> App {
        let db = StationDb::open_in_memory().await.unwrap();
        App::with_fetchers(
            config,
            db,
            Arc::new(StaticFetcher::new(SourceTag::Hydro, readings(SourceTag::Hydro))),
            Arc::new(StaticFetcher::new(SourceTag::Hydro2, readings(SourceTag::Hydro2))),
        )
        .await
        .unwrap()
    }
}
