//! Cache maintenance tools.

use super::json_result;
use hydrosync_core::SmartDataService;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the refresh_cache tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RefreshParams {
    /// Cache key to refresh: "hydro", "hydro2" or "merged".
    /// Omit to refresh everything.
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ClearParams {}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CleanupParams {}

#[derive(Debug, Serialize)]
struct RemovedOutput {
    removed: usize,
}

/// Implementation of the refresh_cache tool.
///
/// Unknown keys and upstream failures are reported in the `failed` list
/// rather than as a tool error.
pub async fn refresh_impl(service: &SmartDataService, params: RefreshParams) -> Result<CallToolResult, McpError> {
    let key = params.key.as_deref().map(str::trim).filter(|k| !k.is_empty());
    let report = service.refresh(key).await;
    json_result(&report)
}

pub async fn clear_impl(service: &SmartDataService, _params: ClearParams) -> Result<CallToolResult, McpError> {
    let removed = service.clear_cache().await;
    json_result(&RemovedOutput { removed })
}

pub async fn cleanup_impl(service: &SmartDataService, _params: CleanupParams) -> Result<CallToolResult, McpError> {
    let removed = service.cleanup_expired().await;
    json_result(&RemovedOutput { removed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::app;
    use crate::tools::result_json;
    use hydrosync_core::AppConfig;

    #[tokio::test]
    async fn test_refresh_all() {
        let app = app(AppConfig::default()).await;
        let json = result_json(&refresh_impl(&app.service, RefreshParams::default()).await.unwrap());
        assert_eq!(json["success"], serde_json::json!(["hydro", "hydro2", "merged"]));
        assert_eq!(json["failed"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_refresh_unknown_key() {
        let app = app(AppConfig::default()).await;
        let params = RefreshParams { key: Some("rainfall".into()) };
        let json = result_json(&refresh_impl(&app.service, params).await.unwrap());
        assert_eq!(json["success"].as_array().unwrap().len(), 0);
        assert_eq!(json["failed"][0]["key"], "rainfall");
    }

    #[tokio::test]
    async fn test_blank_key_refreshes_all() {
        let app = app(AppConfig::default()).await;
        let params = RefreshParams { key: Some("  ".into()) };
        let json = result_json(&refresh_impl(&app.service, params).await.unwrap());
        assert_eq!(json["success"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_clear_and_cleanup() {
        let app = app(AppConfig::default()).await;
        app.service.get_smart_stations_data().await.unwrap();

        let json = result_json(&cleanup_impl(&app.service, CleanupParams {}).await.unwrap());
        assert_eq!(json["removed"], 0);

        let json = result_json(&clear_impl(&app.service, ClearParams {}).await.unwrap());
        assert_eq!(json["removed"], 3);
    }
}
