//! Upstream feed clients for hydrosync.
//!
//! Each client performs one GET against its feed and normalizes the foreign
//! station schema into [`RawStationReading`](hydrosync_core::RawStationReading)
//! values. Both implement [`SourceFetcher`](hydrosync_core::SourceFetcher).

pub mod endpoint;
pub mod http;
pub mod hydro;
pub mod hydro2;
mod parse;

pub use endpoint::{EndpointError, parse_endpoint};
pub use http::FeedConfig;
pub use hydro::HydroClient;
pub use hydro2::Hydro2Client;

use hydrosync_core::{AppConfig, Error, SourceTag};

/// Build both feed clients from the application config.
pub fn clients_from_config(config: &AppConfig) -> Result<(HydroClient, Hydro2Client), Error> {
    let hydro = HydroClient::new(FeedConfig::from_app_config(config, SourceTag::Hydro))?;
    let hydro2 = Hydro2Client::new(FeedConfig::from_app_config(config, SourceTag::Hydro2))?;
    tracing::debug!(hydro = hydro.endpoint(), hydro2 = hydro2.endpoint(), "feed clients ready");
    Ok((hydro, hydro2))
}
