//! MCP server for hydrosync.
//!
//! Exposes the smart data service, cache maintenance and persistence sync
//! as MCP tools. [`App`] is the shared wiring, also used by the CLI.

pub mod app;
pub mod handler;
pub mod tools;

pub use app::{App, SyncOverrides};
pub use handler::HydrosyncServer;
