//! Error types emitted by the Waymark CLI.

use std::sync::Arc;

use thiserror::Error;
use waymark_data::{OsmError, TransportBuildError};

/// Errors emitted by the Waymark CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        field: &'static str,
        env: &'static str,
    },
    /// An option is present but outside its accepted range.
    #[error("invalid {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },
    /// The HTTP transport could not be built.
    #[error("failed to build HTTP transport for {url_root:?}: {source}")]
    BuildTransport {
        url_root: String,
        #[source]
        source: TransportBuildError,
    },
    /// The API session reported a failure.
    #[error(transparent)]
    Session(#[from] OsmError),
    /// The async runtime could not be started.
    #[error("failed to start the async runtime: {0}")]
    Runtime(#[source] std::io::Error),
    /// Writing the JSON report failed.
    #[error("failed to write report: {0}")]
    WriteReport(#[source] serde_json::Error),
}
