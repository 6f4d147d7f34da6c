//! Command-line interface for querying an OpenStreetMap-compatible API.
//!
//! Two subcommands drive an [`OsmSession`] over HTTP:
//! - `status` reports the API status and imagery blacklists.
//! - `fetch` loads the map-data (or note) tiles around a point and prints a
//!   JSON summary of what came back.
//!
//! Options layer CLI flags over `WAYMARK_*` environment variables and
//! configuration files via `ortho_config`. Logs are written to stderr as JSON
//! lines; reports go to stdout.
#![forbid(unsafe_code)]

mod error;

use std::{
    cell::RefCell,
    io::{self, Write},
    rc::Rc,
    time::Duration,
};

use clap::{Parser, Subcommand};
use geo::Coord;
use log::{debug, info, warn};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use waymark_core::{Entity, EntityKind, MercatorProjection, Note, Tile, TileCoord, Viewport};
use waymark_data::{
    DEFAULT_API_URL, DEFAULT_USER_AGENT, HttpTransport, HttpTransportConfig, OsmError, OsmSession,
    SessionConfig, SessionEvent, TileCallback, Transport,
};

pub use error::CliError;

const ARG_LON: &str = "lon";
const ARG_LAT: &str = "lat";
const ARG_ZOOM: &str = "zoom";
const ARG_WIDTH: &str = "width";
const ARG_HEIGHT: &str = "height";
const ARG_API_URL: &str = "api-url";
const ARG_TIMEOUT_SECS: &str = "timeout-secs";
const ENV_LON: &str = "WAYMARK_CMDS_FETCH_LON";
const ENV_LAT: &str = "WAYMARK_CMDS_FETCH_LAT";

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_ZOOM: f64 = 17.0;
const DEFAULT_WIDTH: f64 = 1024.0;
const DEFAULT_HEIGHT: f64 = 768.0;
const MAX_ZOOM: f64 = 22.0;
const MAX_LATITUDE: f64 = 85.051_128_78;

/// Run the Waymark CLI with the current process arguments and environment.
///
/// # Errors
///
/// Returns [`CliError`] when arguments or configuration are invalid, the
/// runtime cannot start, or the API request fails.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    match cli.command {
        Command::Status(args) => run_status(args),
        Command::Fetch(args) => run_fetch(args),
    }
}

fn run_status(args: StatusArgs) -> Result<(), CliError> {
    let connection = args.into_config()?;
    init_logging(&connection.log_level);
    let session = open_session(&connection)?;
    let report = block_on_local(collect_status(&session))??;
    write_report(io::stdout().lock(), &report)
}

fn run_fetch(args: FetchArgs) -> Result<(), CliError> {
    let request = args.into_config()?;
    init_logging(&request.connection.log_level);
    let session = open_session(&request.connection)?;
    let report = block_on_local(collect_fetch(&session, &request))??;
    write_report(io::stdout().lock(), &report)
}

#[derive(Debug, Parser)]
#[command(
    name = "waymark",
    about = "Query an OpenStreetMap-compatible API through the Waymark session",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report the API status and imagery blacklists.
    Status(StatusArgs),
    /// Load the tiles around a point and summarise them.
    Fetch(FetchArgs),
}

/// CLI arguments for the `status` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(about = "Report the API status and imagery blacklists")]
#[ortho_config(prefix = "WAYMARK")]
struct StatusArgs {
    /// API root, e.g. `https://api.openstreetmap.org`.
    #[arg(long = ARG_API_URL, value_name = "url")]
    #[serde(default)]
    api_url: Option<String>,
    /// User agent sent with every request.
    #[arg(long, value_name = "agent")]
    #[serde(default)]
    user_agent: Option<String>,
    /// Request timeout in seconds.
    #[arg(long = ARG_TIMEOUT_SECS, value_name = "secs")]
    #[serde(default)]
    timeout_secs: Option<u64>,
    /// OAuth 2 bearer token for credentialed requests.
    #[arg(long, value_name = "token")]
    #[serde(default)]
    access_token: Option<String>,
    /// Log level (`error`, `warn`, `info`, `debug`, `trace`).
    #[arg(long, value_name = "level")]
    #[serde(default)]
    log_level: Option<String>,
}

impl StatusArgs {
    fn into_config(self) -> Result<ConnectionConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        ConnectionConfig::try_from(merged)
    }
}

impl TryFrom<StatusArgs> for ConnectionConfig {
    type Error = CliError;

    fn try_from(args: StatusArgs) -> Result<Self, Self::Error> {
        Self::from_parts(
            args.api_url,
            args.user_agent,
            args.timeout_secs,
            args.access_token,
            args.log_level,
        )
    }
}

/// CLI arguments for the `fetch` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Load the tiles covering a viewport centred on a point. \
                 Map data is summarised by entity kind; with --notes the \
                 notes inside the viewport are printed instead.",
    about = "Load the tiles around a point and summarise them"
)]
#[ortho_config(prefix = "WAYMARK")]
struct FetchArgs {
    /// Longitude of the viewport centre.
    #[arg(long = ARG_LON, value_name = "degrees", allow_negative_numbers = true)]
    #[serde(default)]
    lon: Option<f64>,
    /// Latitude of the viewport centre.
    #[arg(long = ARG_LAT, value_name = "degrees", allow_negative_numbers = true)]
    #[serde(default)]
    lat: Option<f64>,
    /// Fractional slippy-map zoom of the viewport.
    #[arg(long = ARG_ZOOM, value_name = "level")]
    #[serde(default)]
    zoom: Option<f64>,
    /// Viewport width in pixels.
    #[arg(long = ARG_WIDTH, value_name = "px")]
    #[serde(default)]
    width: Option<f64>,
    /// Viewport height in pixels.
    #[arg(long = ARG_HEIGHT, value_name = "px")]
    #[serde(default)]
    height: Option<f64>,
    /// Load notes instead of map data.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_name = "bool")]
    #[serde(default)]
    notes: Option<bool>,
    /// API root, e.g. `https://api.openstreetmap.org`.
    #[arg(long = ARG_API_URL, value_name = "url")]
    #[serde(default)]
    api_url: Option<String>,
    /// User agent sent with every request.
    #[arg(long, value_name = "agent")]
    #[serde(default)]
    user_agent: Option<String>,
    /// Request timeout in seconds.
    #[arg(long = ARG_TIMEOUT_SECS, value_name = "secs")]
    #[serde(default)]
    timeout_secs: Option<u64>,
    /// OAuth 2 bearer token for credentialed requests.
    #[arg(long, value_name = "token")]
    #[serde(default)]
    access_token: Option<String>,
    /// Log level (`error`, `warn`, `info`, `debug`, `trace`).
    #[arg(long, value_name = "level")]
    #[serde(default)]
    log_level: Option<String>,
}

impl FetchArgs {
    fn into_config(self) -> Result<FetchConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        FetchConfig::try_from(merged)
    }
}

/// Where and how to reach the API.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConnectionConfig {
    api_url: String,
    user_agent: String,
    timeout: Duration,
    access_token: Option<String>,
    log_level: String,
}

impl ConnectionConfig {
    fn from_parts(
        api_url: Option<String>,
        user_agent: Option<String>,
        timeout_secs: Option<u64>,
        access_token: Option<String>,
        log_level: Option<String>,
    ) -> Result<Self, CliError> {
        let api_url = api_url.unwrap_or_else(|| DEFAULT_API_URL.to_owned());
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(CliError::InvalidArgument {
                field: ARG_API_URL,
                reason: format!("{api_url:?} is not an http(s) URL"),
            });
        }
        let timeout_secs = timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(CliError::InvalidArgument {
                field: ARG_TIMEOUT_SECS,
                reason: "must be at least one second".to_owned(),
            });
        }
        Ok(Self {
            api_url,
            user_agent: user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_owned()),
            timeout: Duration::from_secs(timeout_secs),
            access_token: access_token.filter(|token| !token.is_empty()),
            log_level: log_level.unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_owned()),
        })
    }

    fn transport_config(&self) -> HttpTransportConfig {
        let config = HttpTransportConfig::new(&self.api_url)
            .with_timeout(self.timeout)
            .with_user_agent(&self.user_agent);
        match &self.access_token {
            Some(token) => config.with_access_token(token),
            None => config,
        }
    }
}

/// Validated `fetch` request.
#[derive(Debug, Clone, PartialEq)]
struct FetchConfig {
    connection: ConnectionConfig,
    centre: Coord<f64>,
    zoom: f64,
    viewport: Viewport,
    notes: bool,
}

impl FetchConfig {
    fn projection(&self) -> MercatorProjection {
        MercatorProjection::centred(self.centre, self.zoom, self.viewport)
    }
}

impl TryFrom<FetchArgs> for FetchConfig {
    type Error = CliError;

    fn try_from(args: FetchArgs) -> Result<Self, Self::Error> {
        let lon = args.lon.ok_or(CliError::MissingArgument {
            field: ARG_LON,
            env: ENV_LON,
        })?;
        let lat = args.lat.ok_or(CliError::MissingArgument {
            field: ARG_LAT,
            env: ENV_LAT,
        })?;
        let lon = require_range(ARG_LON, lon, -180.0, 180.0)?;
        let lat = require_range(ARG_LAT, lat, -MAX_LATITUDE, MAX_LATITUDE)?;
        let zoom = require_range(ARG_ZOOM, args.zoom.unwrap_or(DEFAULT_ZOOM), 0.0, MAX_ZOOM)?;
        let width = require_positive(ARG_WIDTH, args.width.unwrap_or(DEFAULT_WIDTH))?;
        let height = require_positive(ARG_HEIGHT, args.height.unwrap_or(DEFAULT_HEIGHT))?;
        let connection = ConnectionConfig::from_parts(
            args.api_url,
            args.user_agent,
            args.timeout_secs,
            args.access_token,
            args.log_level,
        )?;
        Ok(Self {
            connection,
            centre: Coord { x: lon, y: lat },
            zoom,
            viewport: Viewport::new(width, height),
            notes: args.notes.unwrap_or(false),
        })
    }
}

fn require_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<f64, CliError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(CliError::InvalidArgument {
            field,
            reason: format!("{value} is outside {min}..={max}"),
        })
    }
}

fn require_positive(field: &'static str, value: f64) -> Result<f64, CliError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(CliError::InvalidArgument {
            field,
            reason: format!("{value} must be a positive number of pixels"),
        })
    }
}

fn init_logging(level: &str) {
    structured_logger::Builder::with_level(level)
        .with_target_writer("*", structured_logger::json::new_writer(io::stderr()))
        .init();
}

fn open_session(connection: &ConnectionConfig) -> Result<OsmSession<HttpTransport>, CliError> {
    let transport = HttpTransport::with_config(connection.transport_config()).map_err(|source| {
        CliError::BuildTransport {
            url_root: connection.api_url.clone(),
            source,
        }
    })?;
    let config = SessionConfig::default().with_url_root(&connection.api_url);
    Ok(OsmSession::new(transport, config))
}

fn block_on_local<F: Future>(future: F) -> Result<F::Output, CliError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;
    Ok(tokio::task::LocalSet::new().block_on(&runtime, future))
}

fn write_report<W: Write, R: Serialize>(mut out: W, report: &R) -> Result<(), CliError> {
    serde_json::to_writer_pretty(&mut out, report).map_err(CliError::WriteReport)?;
    writeln!(out).map_err(|err| CliError::WriteReport(serde_json::Error::io(err)))
}

/// Output of the `status` subcommand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct StatusReport {
    api_url: String,
    status: String,
    imagery_blacklists: Vec<String>,
}

async fn collect_status<T: Transport + 'static>(
    session: &OsmSession<T>,
) -> Result<StatusReport, CliError> {
    let status = session.status().await?;
    info!("API at {} is {status}", session.urls().url_root());
    Ok(StatusReport {
        api_url: session.urls().url_root().to_owned(),
        status: status.to_string(),
        imagery_blacklists: session.imagery_blacklists(),
    })
}

/// Output of the `fetch` subcommand.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum FetchReport {
    MapData(MapDataReport),
    Notes(NotesReport),
}

/// Entities received per kind, plus the tiles that failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
struct MapDataReport {
    tiles: Vec<TileCoord>,
    failed_tiles: Vec<TileCoord>,
    nodes: usize,
    ways: usize,
    relations: usize,
}

impl MapDataReport {
    fn record(&mut self, tile: &Tile, result: Result<Vec<Entity>, OsmError>) {
        match result {
            Ok(entities) => {
                for entity in &entities {
                    match entity.kind() {
                        EntityKind::Node => self.nodes += 1,
                        EntityKind::Way => self.ways += 1,
                        EntityKind::Relation => self.relations += 1,
                    }
                }
            }
            Err(err) => {
                warn!("tile {} failed: {err}", tile.coord);
                self.failed_tiles.push(tile.coord);
            }
        }
    }
}

/// Notes cached inside the viewport once every note tile finished.
#[derive(Debug, Clone, PartialEq, Serialize)]
struct NotesReport {
    tiles: Vec<TileCoord>,
    notes: Vec<Note>,
}

async fn collect_fetch<T: Transport + 'static>(
    session: &OsmSession<T>,
    request: &FetchConfig,
) -> Result<FetchReport, CliError> {
    if session.authenticated() {
        let user = session.user_details().await?;
        info!(
            "signed in as {}",
            user.display_name.as_deref().unwrap_or("an unnamed user")
        );
    }
    let projection = request.projection();
    let mut events = session.subscribe();

    if request.notes {
        let mut tiles = session.load_notes(&projection, request.viewport);
        info!("requested {} note tiles", tiles.len());
        wait_for(&mut events, SessionEvent::NotesLoaded, tiles.len()).await;
        let mut notes: Vec<Note> = session
            .notes(&projection)
            .iter()
            .map(|note| Note::clone(note))
            .collect();
        notes.sort_by_key(|note| note.id);
        tiles.sort_unstable();
        return Ok(FetchReport::Notes(NotesReport { tiles, notes }));
    }

    let tally = Rc::new(RefCell::new(MapDataReport::default()));
    let callback: TileCallback = {
        let tally = Rc::clone(&tally);
        Rc::new(move |tile: &Tile, result| tally.borrow_mut().record(tile, result))
    };
    let tiles = session.load_tiles(&projection, request.viewport, Some(callback));
    info!("requested {} map-data tiles", tiles.len());
    if !tiles.is_empty() {
        wait_for(&mut events, SessionEvent::Loaded, 1).await;
    }
    let mut report = tally.replace(MapDataReport::default());
    report.tiles = tiles;
    report.tiles.sort_unstable();
    report.failed_tiles.sort_unstable();
    Ok(FetchReport::MapData(report))
}

async fn wait_for(
    events: &mut broadcast::Receiver<SessionEvent>,
    wanted: SessionEvent,
    mut remaining: usize,
) {
    while remaining > 0 {
        match events.recv().await {
            Ok(event) if event == wanted => remaining -= 1,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => debug!("missed {skipped} session events"),
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests;
