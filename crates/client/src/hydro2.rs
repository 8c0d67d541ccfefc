//! Source B: the secondary hydrological feed (`hydro2`).
//!
//! Foreign schema: `kod_stacji`, `nazwa_stacji`, `rzeka`, `wojewodztwo`,
//! `stan`, `stan_data`, `przeplyw`, `przeplyw_data`, `lat`, `lon`.

use crate::http::{FeedConfig, FeedHttp};
use crate::parse::{self, FeedRecord, lenient_f64, lenient_string};
use async_trait::async_trait;
use chrono::FixedOffset;
use hydrosync_core::{Coordinates, Error, FetchError, RawStationReading, SourceFetcher, SourceTag};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct Hydro2Record {
    #[serde(default, deserialize_with = "lenient_string")]
    kod_stacji: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    nazwa_stacji: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    rzeka: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", alias = "województwo")]
    wojewodztwo: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    stan: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    stan_data: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    przeplyw: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    przeplyw_data: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    lon: Option<f64>,
}

impl FeedRecord for Hydro2Record {
    fn into_reading(self, offset: FixedOffset) -> Result<RawStationReading, String> {
        let id = self.kod_stacji.ok_or("kod_stacji")?;
        let name = self.nazwa_stacji.ok_or("nazwa_stacji")?;

        let water_level_at = parse::timestamp(self.stan_data.as_deref(), offset);
        let flow_at = parse::timestamp(self.przeplyw_data.as_deref(), offset);

        Ok(RawStationReading {
            id,
            name,
            river: self.rzeka,
            voivodeship: self.wojewodztwo,
            water_level: self.stan,
            water_level_at: self.stan.and(water_level_at),
            flow: self.przeplyw,
            flow_at: self.przeplyw.and(flow_at),
            coordinates: self.lat.zip(self.lon).map(|(lat, lon)| Coordinates::new(lat, lon)),
            source: SourceTag::Hydro2,
        })
    }
}

/// Client for source B.
#[derive(Debug, Clone)]
pub struct Hydro2Client {
    http: FeedHttp,
    offset: FixedOffset,
}

impl Hydro2Client {
    pub fn new(config: FeedConfig) -> Result<Self, Error> {
        Ok(Self { http: FeedHttp::new(SourceTag::Hydro2, &config)?, offset: config.utc_offset })
    }

    pub fn endpoint(&self) -> &str {
        self.http.url().as_str()
    }

    pub fn parse(&self, body: &[u8]) -> Result<Vec<RawStationReading>, FetchError> {
        parse::readings::<Hydro2Record>(body, self.offset)
    }
}

#[async_trait]
impl SourceFetcher for Hydro2Client {
    fn source(&self) -> SourceTag {
        SourceTag::Hydro2
    }

    async fn fetch(&self) -> Result<Vec<RawStationReading>, FetchError> {
        let body = self.http.get_body().await?;
        let readings = self.parse(&body)?;
        tracing::debug!(source = "hydro2", stations = readings.len(), "feed decoded");
        Ok(readings)
    }
}
