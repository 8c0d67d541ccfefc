//! Core types and shared functionality for hydrosync.
//!
//! This crate provides:
//! - The station data model and error taxonomy
//! - Layered configuration
//! - The in-memory snapshot cache and request coalescing
//! - Freshness reconciliation of the two feeds and alarm classification
//! - The smart data service callers talk to
//! - Persistence sync with a SQLite station store

pub mod alarm;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetch;
pub mod model;
pub mod reconcile;
pub mod service;
pub mod store;
pub mod sync;

pub use cache::{CacheStore, InFlight};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use error::Error;
pub use fetch::{FetchError, SourceFetcher, StaticFetcher};
pub use model::{
    AlarmStatus, CoordinateSource, Coordinates, DataFreshness, MapStation, PinnedCoordinates, RawStationReading,
    ReconciledStation, SourceTag, StationStats, StationThresholds,
};
pub use reconcile::{FreshnessPolicy, Reconciler};
pub use service::{RefreshReport, ServicePolicy, SmartDataService, SmartDataStats, SmartStationsData};
pub use store::StationDb;
pub use sync::{PersistenceSync, StationStore, SyncOptions, SyncReport};
