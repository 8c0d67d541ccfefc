//! Persistence sync tool.

use super::json_result;
use crate::app::{App, SyncOverrides};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the sync_stations tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SyncParams {
    /// Shared secret, required when sync authorization is enabled.
    #[serde(default)]
    pub token: Option<String>,

    /// Stations written per batch (default from configuration).
    #[serde(default)]
    pub batch_size: Option<usize>,

    /// Only sync the first N stations.
    #[serde(default)]
    pub station_limit: Option<usize>,
}

/// Implementation of the sync_stations tool.
pub async fn sync_impl(app: &App, params: SyncParams) -> Result<CallToolResult, McpError> {
    let overrides = SyncOverrides { batch_size: params.batch_size, station_limit: params.station_limit };
    let report = app.sync_stations(params.token.as_deref(), overrides).await?;
    json_result(&report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::app;
    use crate::tools::result_json;
    use hydrosync_core::{AppConfig, StationStore};

    #[tokio::test]
    async fn test_sync_impl() {
        let app = app(AppConfig::default()).await;
        let json = result_json(&sync_impl(&app, SyncParams::default()).await.unwrap());

        assert_eq!(json["processed"], 3);
        assert_eq!(json["created"], 3);
        assert_eq!(json["measurementsCreated"], 2);
        assert_eq!(json["errors"], 0);

        let counts = app.db.counts().await.unwrap();
        assert_eq!(counts.stations, 3);
        assert_eq!(counts.measurements, 2);
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let app = app(AppConfig::default()).await;
        sync_impl(&app, SyncParams::default()).await.unwrap();
        let json = result_json(&sync_impl(&app, SyncParams::default()).await.unwrap());

        assert_eq!(json["created"], 0);
        assert_eq!(json["updated"], 3);
        assert_eq!(json["measurementsCreated"], 0);
        assert_eq!(json["measurementsSkipped"], 3);
    }

    #[tokio::test]
    async fn test_sync_limit() {
        let app = app(AppConfig::default()).await;
        let params = SyncParams { station_limit: Some(1), batch_size: Some(1), ..Default::default() };
        let json = result_json(&sync_impl(&app, params).await.unwrap());
        assert_eq!(json["processed"], 1);
    }

    #[tokio::test]
    async fn test_sync_requires_token() {
        let config = AppConfig { sync_auth_required: true, sync_token: Some("s3cret".into()), ..Default::default() };
        let app = app(config).await;

        let err = sync_impl(&app, SyncParams::default()).await.unwrap_err();
        assert_eq!(err.code.0, -32005);

        let params = SyncParams { token: Some("s3cret".into()), ..Default::default() };
        assert!(sync_impl(&app, params).await.is_ok());
    }

    #[tokio::test]
    async fn test_zero_batch_rejected() {
        let app = app(AppConfig::default()).await;
        let params = SyncParams { batch_size: Some(0), ..Default::default() };
        assert!(sync_impl(&app, params).await.is_err());
    }
}
