//! MCP tool implementations.
//!
//! Each tool returns its result as pretty-printed JSON text content.

pub mod cache;
pub mod stations;
pub mod sync;

pub use cache::{CleanupParams, ClearParams, RefreshParams};
pub use stations::{MapParams, StationsParams, StatsParams, filter_stations};
pub use sync::SyncParams;

use hydrosync_core::Error;
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;

pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[cfg(test)]
pub(crate) fn result_json(result: &CallToolResult) -> serde_json::Value {
    let text = result
        .content
        .first()
        .and_then(|c| c.as_text())
        .map(|t| t.text.clone())
        .unwrap_or_default();
    serde_json::from_str(&text).unwrap()
}
