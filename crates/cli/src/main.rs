//! One-shot command line for hydrosync.
//!
//! Each subcommand prints its result as JSON on stdout. Logs go to stderr.
//!
//! Every run starts with an empty in-process cache, so cache maintenance
//! (refresh, clear, cleanup) is only offered by the long-running MCP server.

use anyhow::Result;
use clap::{Parser, Subcommand};
use hydrosync_core::AppConfig;
use hydrosync_server::tools::{StationsParams, filter_stations};
use hydrosync_server::{App, SyncOverrides};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hydrosync")]
#[command(about = "Reconciled hydrological station data from the IMGW feeds")]
struct Args {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List reconciled stations
    Stations {
        /// Only stations on this river
        #[arg(long)]
        river: Option<String>,

        /// Only stations with a fresh reading
        #[arg(long)]
        fresh_only: bool,

        /// Minimum alarm status ("warning" or "alarm")
        #[arg(long)]
        min_alarm: Option<String>,

        /// Maximum number of stations
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Station and cache statistics
    Stats,

    /// Stations with coordinates, as map points
    Map,

    /// Stored measurements for one station, newest first
    History {
        station: String,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Persist reconciled stations into the station store
    Sync {
        /// Sync token, when authorization is required
        #[arg(long, env = "HYDROSYNC_SYNC_TOKEN")]
        token: Option<String>,

        /// Stations written per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Only sync the first N stations
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config = AppConfig::load()?;
    tracing::debug!(db = %config.db_path.display(), "configuration loaded");
    let app = App::from_config(config).await?;

    match args.command {
        Command::Stations { river, fresh_only, min_alarm, limit } => {
            let params = StationsParams { river, fresh_only, min_alarm, limit };
            let mut data = app.service.get_smart_stations_data().await?;
            filter_stations(&mut data.stations, &params)?;
            print_json(&data)
        }
        Command::Stats => print_json(&app.service.get_smart_data_stats().await?),
        Command::Map => print_json(&app.service.get_smart_stations_for_map().await?),
        Command::History { station, limit } => print_json(&app.db.recent_measurements(&station, limit).await?),
        Command::Sync { token, batch_size, limit } => {
            let overrides = SyncOverrides { batch_size, station_limit: limit };
            let report = app.sync_stations(token.as_deref(), overrides).await?;
            print_json(&report)
        }
    }
}
