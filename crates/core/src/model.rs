//! Shared station data types.
//!
//! `RawStationReading` is what a fetcher hands over after normalizing its
//! upstream schema; `ReconciledStation` is the canonical per-station record
//! served to callers. Field names at the JSON boundary stay camelCase to match
//! what existing consumers already read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upstream data feed identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    /// Source A, the primary feed.
    Hydro,
    /// Source B.
    Hydro2,
}

impl SourceTag {
    pub const ALL: [SourceTag; 2] = [SourceTag::Hydro, SourceTag::Hydro2];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Hydro => "hydro",
            SourceTag::Hydro2 => "hydro2",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hydro" => Some(SourceTag::Hydro),
            "hydro2" => Some(SourceTag::Hydro2),
            _ => None,
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// WGS84 position of a gauge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Finite, within WGS84 bounds, and not the 0/0 placeholder some feeds emit.
    pub fn is_usable(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
            && !(self.latitude == 0.0 && self.longitude == 0.0)
    }
}

/// Which feed (or pin) supplied a station's coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateSource {
    Hydro,
    Hydro2,
    Pinned,
}

impl From<SourceTag> for CoordinateSource {
    fn from(tag: SourceTag) -> Self {
        match tag {
            SourceTag::Hydro => CoordinateSource::Hydro,
            SourceTag::Hydro2 => CoordinateSource::Hydro2,
        }
    }
}

/// Coordinates known from an earlier snapshot or from the station store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PinnedCoordinates {
    pub coordinates: Coordinates,
    /// Set when a person confirmed the position; verified pins beat upstream values.
    pub verified: bool,
}

/// One station's reading as delivered by a single upstream feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawStationReading {
    pub id: String,
    pub name: String,
    pub river: Option<String>,
    pub voivodeship: Option<String>,
    /// Water level in centimetres.
    pub water_level: Option<f64>,
    pub water_level_at: Option<DateTime<Utc>>,
    /// Flow rate in m³/s.
    pub flow: Option<f64>,
    pub flow_at: Option<DateTime<Utc>>,
    pub coordinates: Option<Coordinates>,
    pub source: SourceTag,
}

impl RawStationReading {
    /// Bare reading with only identity fields filled in.
    pub fn new(id: impl Into<String>, name: impl Into<String>, source: SourceTag) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            river: None,
            voivodeship: None,
            water_level: None,
            water_level_at: None,
            flow: None,
            flow_at: None,
            coordinates: None,
            source,
        }
    }

    pub fn with_water_level(mut self, level: f64, at: DateTime<Utc>) -> Self {
        self.water_level = Some(level);
        self.water_level_at = Some(at);
        self
    }

    pub fn with_flow(mut self, flow: f64, at: DateTime<Utc>) -> Self {
        self.flow = Some(flow);
        self.flow_at = Some(at);
        self
    }

    pub fn with_river(mut self, river: impl Into<String>) -> Self {
        self.river = Some(river.into());
        self
    }

    pub fn with_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.coordinates = Some(Coordinates::new(latitude, longitude));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFreshness {
    Fresh,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmStatus {
    Normal,
    Warning,
    Alarm,
    Unknown,
}

/// Canonical, deduplicated record for one physical station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciledStation {
    pub id: String,
    pub name: String,
    pub river: Option<String>,
    pub voivodeship: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub coordinates_source: Option<CoordinateSource>,
    pub coordinates_verified: bool,
    pub water_level: Option<f64>,
    pub water_level_date: Option<DateTime<Utc>>,
    pub water_level_source: Option<SourceTag>,
    pub flow: Option<f64>,
    pub flow_date: Option<DateTime<Utc>>,
    pub flow_source: Option<SourceTag>,
    pub data_freshness: DataFreshness,
    pub hours_old: Option<f64>,
    /// Feed that won the primary (water level) reading.
    pub source: SourceTag,
    pub alarm_status: AlarmStatus,
    pub alarm_message: String,
    pub warning_level: Option<f64>,
    pub alarm_level: Option<f64>,
}

impl ReconciledStation {
    pub fn has_usable_coordinates(&self) -> bool {
        self.coordinates.is_some_and(|c| c.is_usable())
    }
}

/// Projection of a station for spatial display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapStation {
    pub id: String,
    pub name: String,
    pub river: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub water_level: Option<f64>,
    pub water_level_date: Option<DateTime<Utc>>,
    pub data_freshness: DataFreshness,
    pub alarm_status: AlarmStatus,
    pub source: SourceTag,
}

impl MapStation {
    /// Returns `None` for stations without usable coordinates.
    pub fn from_station(station: &ReconciledStation) -> Option<Self> {
        let coords = station.coordinates.filter(Coordinates::is_usable)?;
        Some(Self {
            id: station.id.clone(),
            name: station.name.clone(),
            river: station.river.clone(),
            latitude: coords.latitude,
            longitude: coords.longitude,
            water_level: station.water_level,
            water_level_date: station.water_level_date,
            data_freshness: station.data_freshness,
            alarm_status: station.alarm_status,
            source: station.source,
        })
    }
}

/// Alarm thresholds for one station, in centimetres.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StationThresholds {
    pub warning_level: Option<f64>,
    pub alarm_level: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCounts {
    pub hydro: usize,
    pub hydro2: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmCounts {
    pub normal: usize,
    pub warning: usize,
    pub alarm: usize,
    pub unknown: usize,
}

/// Aggregate counts over a reconciled station list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationStats {
    pub total: usize,
    pub fresh: usize,
    pub stale: usize,
    pub by_source: SourceCounts,
    pub with_coordinates: usize,
    /// Percentage of stations with usable coordinates, one decimal.
    pub coordinate_coverage: f64,
    pub average_hours_old: Option<f64>,
    pub by_alarm_status: AlarmCounts,
}

impl StationStats {
    /// Single pass over the list.
    pub fn from_stations(stations: &[ReconciledStation]) -> Self {
        let mut stats = StationStats::default();
        let mut age_sum = 0.0;
        let mut aged = 0usize;

        for station in stations {
            stats.total += 1;
            match station.data_freshness {
                DataFreshness::Fresh => stats.fresh += 1,
                DataFreshness::Stale => stats.stale += 1,
            }
            match station.source {
                SourceTag::Hydro => stats.by_source.hydro += 1,
                SourceTag::Hydro2 => stats.by_source.hydro2 += 1,
            }
            match station.alarm_status {
                AlarmStatus::Normal => stats.by_alarm_status.normal += 1,
                AlarmStatus::Warning => stats.by_alarm_status.warning += 1,
                AlarmStatus::Alarm => stats.by_alarm_status.alarm += 1,
                AlarmStatus::Unknown => stats.by_alarm_status.unknown += 1,
            }
            if station.has_usable_coordinates() {
                stats.with_coordinates += 1;
            }
            if let Some(hours) = station.hours_old {
                age_sum += hours;
                aged += 1;
            }
        }

        if stats.total > 0 {
            stats.coordinate_coverage = round1(stats.with_coordinates as f64 * 100.0 / stats.total as f64);
        }
        if aged > 0 {
            stats.average_hours_old = Some(round1(age_sum / aged as f64));
        }

        stats
    }
}

pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn station(id: &str, freshness: DataFreshness, source: SourceTag, coords: Option<Coordinates>) -> ReconciledStation {
        ReconciledStation {
            id: id.to_string(),
            name: format!("Station {id}"),
            river: Some("Wisła".to_string()),
            voivodeship: None,
            coordinates: coords,
            coordinates_source: coords.map(|_| CoordinateSource::from(source)),
            coordinates_verified: false,
            water_level: Some(200.0),
            water_level_date: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
            water_level_source: Some(source),
            flow: None,
            flow_date: None,
            flow_source: None,
            data_freshness: freshness,
            hours_old: Some(if freshness == DataFreshness::Fresh { 1.0 } else { 10.0 }),
            source,
            alarm_status: AlarmStatus::Unknown,
            alarm_message: String::new(),
            warning_level: None,
            alarm_level: None,
        }
    }

    #[test]
    fn test_coordinates_usable() {
        assert!(Coordinates::new(52.23, 21.01).is_usable());
        assert!(!Coordinates::new(0.0, 0.0).is_usable());
        assert!(!Coordinates::new(91.0, 21.0).is_usable());
        assert!(!Coordinates::new(f64::NAN, 21.0).is_usable());
    }

    #[test]
    fn test_source_tag_roundtrip_names() {
        for tag in SourceTag::ALL {
            assert_eq!(SourceTag::parse(tag.as_str()), Some(tag));
        }
        assert_eq!(SourceTag::parse("merged"), None);
        assert_eq!(serde_json::to_string(&SourceTag::Hydro2).unwrap(), "\"hydro2\"");
    }

    #[test]
    fn test_reconciled_station_uses_camel_case() {
        let json = serde_json::to_value(station("1", DataFreshness::Fresh, SourceTag::Hydro, None)).unwrap();
        assert!(json.get("dataFreshness").is_some());
        assert!(json.get("hoursOld").is_some());
        assert!(json.get("alarmStatus").is_some());
        assert_eq!(json["dataFreshness"], "fresh");
    }

    #[test]
    fn test_map_station_requires_coordinates() {
        let without = station("1", DataFreshness::Fresh, SourceTag::Hydro, None);
        assert!(MapStation::from_station(&without).is_none());

        let zero = station("2", DataFreshness::Fresh, SourceTag::Hydro, Some(Coordinates::new(0.0, 0.0)));
        assert!(MapStation::from_station(&zero).is_none());

        let with = station("3", DataFreshness::Stale, SourceTag::Hydro2, Some(Coordinates::new(50.06, 19.94)));
        let map = MapStation::from_station(&with).unwrap();
        assert_eq!(map.latitude, 50.06);
        assert_eq!(map.source, SourceTag::Hydro2);
    }

    #[test]
    fn test_station_stats_single_pass() {
        let stations = vec![
            station("1", DataFreshness::Fresh, SourceTag::Hydro, Some(Coordinates::new(50.0, 20.0))),
            station("2", DataFreshness::Stale, SourceTag::Hydro2, None),
            station("3", DataFreshness::Fresh, SourceTag::Hydro2, Some(Coordinates::new(51.0, 19.0))),
            station("4", DataFreshness::Fresh, SourceTag::Hydro, None),
        ];

        let stats = StationStats::from_stations(&stations);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.fresh, 3);
        assert_eq!(stats.stale, 1);
        assert_eq!(stats.by_source, SourceCounts { hydro: 2, hydro2: 2 });
        assert_eq!(stats.with_coordinates, 2);
        assert_eq!(stats.coordinate_coverage, 50.0);
        assert_eq!(stats.average_hours_old, Some(3.3));
        assert_eq!(stats.by_alarm_status.unknown, 4);
    }

    #[test]
    fn test_station_stats_empty() {
        let stats = StationStats::from_stations(&[]);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.coordinate_coverage, 0.0);
        assert!(stats.average_hours_old.is_none());
    }
}
