//! Station and measurement rows.
//!
//! Timestamps are stored as RFC 3339 text in UTC with second precision, so
//! the measurement uniqueness key compares equal for equal instants.

use super::StationDb;
use crate::Error;
use crate::model::SourceTag;
use crate::sync::{PersistedMeasurement, PersistedStation, StationStore, StoreCounts};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, Row, types::Type};

const STATION_COLUMNS: &str = "station_code, name, river_name, voivodeship, latitude, longitude,
    coordinates_verified, warning_level, alarm_level, last_water_level, last_water_level_at,
    last_flow, last_flow_at, updated_at";

fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_time(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|value| parse_time(idx, &value))
        .transpose()
}

fn station_from_row(row: &Row<'_>) -> rusqlite::Result<PersistedStation> {
    Ok(PersistedStation {
        station_code: row.get(0)?,
        name: row.get(1)?,
        river_name: row.get(2)?,
        voivodeship: row.get(3)?,
        latitude: row.get(4)?,
        longitude: row.get(5)?,
        coordinates_verified: row.get::<_, i32>(6)? == 1,
        warning_level: row.get(7)?,
        alarm_level: row.get(8)?,
        last_water_level: row.get(9)?,
        last_water_level_at: optional_time(row, 10)?,
        last_flow: row.get(11)?,
        last_flow_at: optional_time(row, 12)?,
        updated_at: parse_time(13, &row.get::<_, String>(13)?)?,
    })
}

#[async_trait]
impl StationStore for StationDb {
    async fn find_station(&self, station_code: &str) -> Result<Option<PersistedStation>, Error> {
        let code = station_code.to_string();
        self.conn
            .call(move |conn| -> Result<Option<PersistedStation>, Error> {
                let sql = format!("SELECT {STATION_COLUMNS} FROM stations WHERE station_code = ?1");
                let result = conn.query_row(&sql, params![code], station_from_row);

                match result {
                    Ok(s) => Ok(Some(s)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    async fn upsert_station(&self, station: &PersistedStation) -> Result<(), Error> {
        let s = station.clone();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO stations (
                        station_code, name, river_name, voivodeship, latitude, longitude,
                        coordinates_verified, warning_level, alarm_level, last_water_level,
                        last_water_level_at, last_flow, last_flow_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                    ON CONFLICT(station_code) DO UPDATE SET
                        name = excluded.name,
                        river_name = excluded.river_name,
                        voivodeship = excluded.voivodeship,
                        latitude = excluded.latitude,
                        longitude = excluded.longitude,
                        coordinates_verified = excluded.coordinates_verified,
                        warning_level = excluded.warning_level,
                        alarm_level = excluded.alarm_level,
                        last_water_level = excluded.last_water_level,
                        last_water_level_at = excluded.last_water_level_at,
                        last_flow = excluded.last_flow,
                        last_flow_at = excluded.last_flow_at,
                        updated_at = excluded.updated_at",
                    params![
                        &s.station_code,
                        &s.name,
                        &s.river_name,
                        &s.voivodeship,
                        &s.latitude,
                        &s.longitude,
                        s.coordinates_verified as i32,
                        &s.warning_level,
                        &s.alarm_level,
                        &s.last_water_level,
                        s.last_water_level_at.map(format_time),
                        &s.last_flow,
                        s.last_flow_at.map(format_time),
                        format_time(s.updated_at),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn create_measurement_if_absent(&self, measurement: &PersistedMeasurement) -> Result<bool, Error> {
        let m = measurement.clone();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO measurements (station_code, measured_at, source, water_level, flow)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        &m.station_code,
                        format_time(m.measured_at),
                        m.source.as_str(),
                        &m.water_level,
                        &m.flow
                    ],
                )?;
                Ok(inserted == 1)
            })
            .await
            .map_err(Error::from)
    }

    async fn list_stations(&self) -> Result<Vec<PersistedStation>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<PersistedStation>, Error> {
                let sql = format!("SELECT {STATION_COLUMNS} FROM stations ORDER BY station_code");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], station_from_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(Error::from)
    }

    async fn counts(&self) -> Result<StoreCounts, Error> {
        self.conn
            .call(|conn| -> Result<StoreCounts, Error> {
                let stations: i64 = conn.query_row("SELECT COUNT(*) FROM stations", [], |row| row.get(0))?;
                let measurements: i64 = conn.query_row("SELECT COUNT(*) FROM measurements", [], |row| row.get(0))?;
                Ok(StoreCounts { stations: stations as u64, measurements: measurements as u64 })
            })
            .await
            .map_err(Error::from)
    }
}

impl StationDb {
    /// Measurements for one station, newest first.
    pub async fn recent_measurements(
        &self, station_code: &str, limit: usize,
    ) -> Result<Vec<PersistedMeasurement>, Error> {
        let code = station_code.to_string();
        let limit = limit as i64;
        self.conn
            .call(move |conn| -> Result<Vec<PersistedMeasurement>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT station_code, measured_at, source, water_level, flow
                     FROM measurements WHERE station_code = ?1
                     ORDER BY measured_at DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![code, limit], |row| {
                    let source: String = row.get(2)?;
                    Ok(PersistedMeasurement {
                        station_code: row.get(0)?,
                        measured_at: parse_time(1, &row.get::<_, String>(1)?)?,
                        source: SourceTag::parse(&source).ok_or_else(|| {
                            let message = format!("unknown source '{source}'");
                            rusqlite::Error::FromSqlConversionFailure(2, Type::Text, message.into())
                        })?,
                        water_level: row.get(3)?,
                        flow: row.get(4)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn station(code: &str) -> PersistedStation {
        PersistedStation {
            station_code: code.to_string(),
            name: "Kłodzko".into(),
            river_name: Some("Nysa Kłodzka".into()),
            voivodeship: Some("dolnośląskie".into()),
            latitude: Some(50.43),
            longitude: Some(16.65),
            coordinates_verified: true,
            warning_level: Some(200.0),
            alarm_level: None,
            last_water_level: Some(150.0),
            last_water_level_at: Some(at(10)),
            last_flow: None,
            last_flow_at: None,
            updated_at: at(11),
        }
    }

    fn measurement(code: &str, hour: u32, source: SourceTag) -> PersistedMeasurement {
        PersistedMeasurement { station_code: code.into(), measured_at: at(hour), source, water_level: Some(150.0), flow: None }
    }

    #[tokio::test]
    async fn test_station_roundtrip() {
        let db = StationDb::open_in_memory().await.unwrap();
        assert!(db.find_station("150160180").await.unwrap().is_none());

        let original = station("150160180");
        db.upsert_station(&original).await.unwrap();
        assert_eq!(db.find_station("150160180").await.unwrap(), Some(original.clone()));

        let mut changed = original;
        changed.last_water_level = Some(170.0);
        changed.alarm_level = Some(260.0);
        db.upsert_station(&changed).await.unwrap();
        assert_eq!(db.find_station("150160180").await.unwrap(), Some(changed));
        assert_eq!(db.counts().await.unwrap().stations, 1);
    }

    #[tokio::test]
    async fn test_measurement_uniqueness() {
        let db = StationDb::open_in_memory().await.unwrap();
        db.upsert_station(&station("1")).await.unwrap();

        assert!(db.create_measurement_if_absent(&measurement("1", 10, SourceTag::Hydro)).await.unwrap());
        assert!(!db.create_measurement_if_absent(&measurement("1", 10, SourceTag::Hydro)).await.unwrap());
        assert!(db.create_measurement_if_absent(&measurement("1", 10, SourceTag::Hydro2)).await.unwrap());
        assert!(db.create_measurement_if_absent(&measurement("1", 11, SourceTag::Hydro)).await.unwrap());

        assert_eq!(db.counts().await.unwrap(), StoreCounts { stations: 1, measurements: 3 });

        let recent = db.recent_measurements("1", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].measured_at, at(11));
    }

    #[tokio::test]
    async fn test_measurement_requires_station() {
        let db = StationDb::open_in_memory().await.unwrap();
        let result = db.create_measurement_if_absent(&measurement("missing", 10, SourceTag::Hydro)).await;
        assert!(matches!(result, Err(Error::Database(_))));
    }

    #[tokio::test]
    async fn test_list_stations_sorted() {
        let db = StationDb::open_in_memory().await.unwrap();
        for code in ["3", "1", "2"] {
            db.upsert_station(&station(code)).await.unwrap();
        }
        let codes: Vec<String> = db.list_stations().await.unwrap().into_iter().map(|s| s.station_code).collect();
        assert_eq!(codes, vec!["1", "2", "3"]);
    }
}
