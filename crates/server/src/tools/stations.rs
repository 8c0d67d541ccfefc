//! Read tools: reconciled stations, statistics and map points.

use super::json_result;
use hydrosync_core::{AlarmStatus, DataFreshness, Error, ReconciledStation, SmartDataService};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the get_reconciled_stations tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct StationsParams {
    /// Only stations on this river (case-insensitive).
    #[serde(default)]
    pub river: Option<String>,

    /// Only stations whose reading is within the freshness threshold.
    #[serde(default)]
    pub fresh_only: bool,

    /// Only stations at or above this alarm level: "warning" or "alarm".
    #[serde(default)]
    pub min_alarm: Option<String>,

    /// Maximum number of stations to return.
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct StatsParams {}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct MapParams {}

fn alarm_rank(status: AlarmStatus) -> u8 {
    match status {
        AlarmStatus::Unknown | AlarmStatus::Normal => 0,
        AlarmStatus::Warning => 1,
        AlarmStatus::Alarm => 2,
    }
}

fn min_alarm_rank(value: Option<&str>) -> Result<u8, Error> {
    match value.map(str::to_lowercase).as_deref() {
        None => Ok(0),
        Some("warning") => Ok(1),
        Some("alarm") => Ok(2),
        Some(other) => Err(Error::InvalidInput(format!(
            "min_alarm must be \"warning\" or \"alarm\", got \"{other}\""
        ))),
    }
}

/// Apply the river, freshness, alarm and limit filters in place.
pub fn filter_stations(stations: &mut Vec<ReconciledStation>, params: &StationsParams) -> Result<(), Error> {
    let min_rank = min_alarm_rank(params.min_alarm.as_deref())?;
    let river = params.river.as_deref().map(|r| r.trim().to_lowercase());

    stations.retain(|s| {
        let river_ok = match (&river, &s.river) {
            (Some(wanted), Some(actual)) => actual.to_lowercase() == *wanted,
            (Some(_), None) => false,
            (None, _) => true,
        };
        river_ok
            && (!params.fresh_only || s.data_freshness == DataFreshness::Fresh)
            && alarm_rank(s.alarm_status) >= min_rank
    });
    if let Some(limit) = params.limit {
        stations.truncate(limit);
    }
    Ok(())
}

/// Implementation of the get_reconciled_stations tool.
pub async fn stations_impl(service: &SmartDataService, params: StationsParams) -> Result<CallToolResult, McpError> {
    min_alarm_rank(params.min_alarm.as_deref())?;
    let mut data = service.get_smart_stations_data().await?;
    filter_stations(&mut data.stations, &params)?;
    json_result(&data)
}

/// Implementation of the get_station_stats tool.
pub async fn stats_impl(service: &SmartDataService, _params: StatsParams) -> Result<CallToolResult, McpError> {
    let stats = service.get_smart_data_stats().await?;
    json_result(&stats)
}

/// Implementation of the get_map_stations tool.
pub async fn map_impl(service: &SmartDataService, _params: MapParams) -> Result<CallToolResult, McpError> {
    let stations = service.get_smart_stations_for_map().await?;
    json_result(&stations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::app;
    use crate::tools::result_json;
    use hydrosync_core::{AppConfig, StationThresholds};
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_stations_impl() {
        let app = app(AppConfig::default()).await;
        let result = stations_impl(&app.service, StationsParams::default()).await.unwrap();
        let json = result_json(&result);

        let stations = json["stations"].as_array().unwrap();
        assert_eq!(stations.len(), 3);
        assert_eq!(stations[0]["id"], "150160180");
        assert_eq!(stations[0]["waterLevel"], 250.0);
        assert_eq!(stations[0]["source"], "hydro2");
        assert_eq!(json["meta"]["cacheHit"], false);
    }

    #[tokio::test]
    async fn test_stations_filters() {
        let app = app(AppConfig::default()).await;

        let params = StationsParams { river: Some("biała".into()), ..Default::default() };
        let json = result_json(&stations_impl(&app.service, params).await.unwrap());
        assert_eq!(json["stations"].as_array().unwrap().len(), 1);

        let params = StationsParams { fresh_only: true, ..Default::default() };
        let json = result_json(&stations_impl(&app.service, params).await.unwrap());
        assert_eq!(json["stations"].as_array().unwrap().len(), 2);

        let params = StationsParams { limit: Some(1), ..Default::default() };
        let json = result_json(&stations_impl(&app.service, params).await.unwrap());
        assert_eq!(json["stations"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_min_alarm_filter() {
        let app = app(AppConfig::default()).await;
        let mut thresholds = HashMap::new();
        let levels = StationThresholds { warning_level: Some(200.0), alarm_level: Some(300.0) };
        thresholds.insert("150160180".to_string(), levels);
        app.service.set_thresholds(thresholds);

        let params = StationsParams { min_alarm: Some("warning".into()), ..Default::default() };
        let json = result_json(&stations_impl(&app.service, params).await.unwrap());
        let stations = json["stations"].as_array().unwrap();
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0]["alarmStatus"], "warning");

        let params = StationsParams { min_alarm: Some("flood".into()), ..Default::default() };
        assert!(stations_impl(&app.service, params).await.is_err());
    }

    #[tokio::test]
    async fn test_stats_impl() {
        let app = app(AppConfig::default()).await;
        let json = result_json(&stats_impl(&app.service, StatsParams {}).await.unwrap());
        assert_eq!(json["stations"]["total"], 3);
        assert_eq!(json["stations"]["withCoordinates"], 1);
        assert_eq!(json["cache"]["totalEntries"], 3);
    }

    #[tokio::test]
    async fn test_map_impl() {
        let app = app(AppConfig::default()).await;
        let json = result_json(&map_impl(&app.service, MapParams {}).await.unwrap());
        let points = json.as_array().unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0]["latitude"], 50.4361);
    }
}
