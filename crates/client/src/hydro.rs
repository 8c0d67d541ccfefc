//! Source A: the current hydrological readings feed (`hydro`).
//!
//! Foreign schema (one object per station):
//! `id_stacji`, `stacja`, `rzeka`, `województwo`, `stan_wody`,
//! `stan_wody_data_pomiaru`, `przeplyw` (published as `przelyw` by some
//! deployments), `przeplyw_data`, `lat`, `lon`.

use crate::http::{FeedConfig, FeedHttp};
use crate::parse::{self, FeedRecord, lenient_f64, lenient_string};
use async_trait::async_trait;
use chrono::FixedOffset;
use hydrosync_core::{Coordinates, Error, FetchError, RawStationReading, SourceFetcher, SourceTag};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct HydroRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    id_stacji: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    stacja: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    rzeka: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", rename = "województwo", alias = "wojewodztwo")]
    wojewodztwo: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    stan_wody: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    stan_wody_data_pomiaru: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64", alias = "przelyw")]
    przeplyw: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    przeplyw_data: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    lon: Option<f64>,
}

impl FeedRecord for HydroRecord {
    fn into_reading(self, offset: FixedOffset) -> Result<RawStationReading, String> {
        let id = self.id_stacji.ok_or("id_stacji")?;
        let name = self.stacja.ok_or("stacja")?;

        let water_level_at = parse::timestamp(self.stan_wody_data_pomiaru.as_deref(), offset);
        let flow_at = parse::timestamp(self.przeplyw_data.as_deref(), offset);

        Ok(RawStationReading {
            id,
            name,
            river: self.rzeka,
            voivodeship: self.wojewodztwo,
            water_level: self.stan_wody,
            water_level_at: self.stan_wody.and(water_level_at),
            flow: self.przeplyw,
            flow_at: self.przeplyw.and(flow_at),
            coordinates: self.lat.zip(self.lon).map(|(lat, lon)| Coordinates::new(lat, lon)),
            source: SourceTag::Hydro,
        })
    }
}

/// Client for source A.
#[derive(Debug, Clone)]
pub struct HydroClient {
    http: FeedHttp,
    offset: FixedOffset,
}

impl HydroClient {
    pub fn new(config: FeedConfig) -> Result<Self, Error> {
        Ok(Self { http: FeedHttp::new(SourceTag::Hydro, &config)?, offset: config.utc_offset })
    }

    pub fn endpoint(&self) -> &str {
        self.http.url().as_str()
    }

    /// Decode a captured `hydro` body.
    pub fn parse(&self, body: &[u8]) -> Result<Vec<RawStationReading>, FetchError> {
        parse::readings::<HydroRecord>(body, self.offset)
    }
}

#[async_trait]
impl SourceFetcher for HydroClient {
    fn source(&self) -> SourceTag {
        SourceTag::Hydro
    }

    async fn fetch(&self) -> Result<Vec<RawStationReading>, FetchError> {
        let body = self.http.get_body().await?;
        let readings = self.parse(&body)?;
        tracing::debug!(source = "hydro", stations = readings.len(), "feed decoded");
        Ok(readings)
    }
}
