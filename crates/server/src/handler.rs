//! MCP server handler implementation.
//!
//! Routes tool calls to the implementations in [`crate::tools`].
use crate::app::App;
use crate::tools::{
    CleanupParams, ClearParams, MapParams, RefreshParams, StationsParams, StatsParams, SyncParams, cache, stations,
    sync,
};

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

/// The hydrosync MCP server.
#[derive(Clone)]
pub struct HydrosyncServer {
    app: App,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl HydrosyncServer {
    pub fn new(app: App) -> Self {
        Self { app, tool_router: Self::tool_router() }
    }

    /// Reconciled station list with freshness and alarm annotations.
    #[tool(
        description = "List hydrological stations reconciled from both IMGW feeds. Each station carries the freshest water level and flow, coordinates, data freshness and alarm status. Optional filters: river, fresh_only, min_alarm, limit."
    )]
    async fn get_reconciled_stations(&self, params: Parameters<StationsParams>) -> Result<CallToolResult, McpError> {
        stations::stations_impl(&self.app.service, params.0).await
    }

    #[tool(description = "Aggregate statistics over the reconciled stations plus cache statistics.")]
    async fn get_station_stats(&self, params: Parameters<StatsParams>) -> Result<CallToolResult, McpError> {
        stations::stats_impl(&self.app.service, params.0).await
    }

    #[tool(description = "Stations that have coordinates, reduced to what a map marker needs.")]
    async fn get_map_stations(&self, params: Parameters<MapParams>) -> Result<CallToolResult, McpError> {
        stations::map_impl(&self.app.service, params.0).await
    }

    /// Force a refetch of one cache key or all of them.
    #[tool(
        description = "Force-refresh cached data. key may be \"hydro\", \"hydro2\" or \"merged\"; omit it to refresh everything. Reports which keys succeeded and which failed."
    )]
    async fn refresh_cache(&self, params: Parameters<RefreshParams>) -> Result<CallToolResult, McpError> {
        cache::refresh_impl(&self.app.service, params.0).await
    }

    #[tool(description = "Drop every cache entry. Returns the number removed.")]
    async fn clear_cache(&self, params: Parameters<ClearParams>) -> Result<CallToolResult, McpError> {
        cache::clear_impl(&self.app.service, params.0).await
    }

    #[tool(description = "Remove expired cache entries that are no longer usable as a fallback.")]
    async fn cleanup_expired(&self, params: Parameters<CleanupParams>) -> Result<CallToolResult, McpError> {
        cache::cleanup_impl(&self.app.service, params.0).await
    }

    /// Persist the current reconciled stations and their latest readings.
    #[tool(
        description = "Write the reconciled stations and one measurement per new reading into the station store. Requires token when sync authorization is enabled."
    )]
    async fn sync_stations(&self, params: Parameters<SyncParams>) -> Result<CallToolResult, McpError> {
        sync::sync_impl(&self.app, params.0).await
    }
}

impl ServerHandler for HydrosyncServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "hydrosync".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
