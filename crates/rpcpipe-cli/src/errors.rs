//! Error types for the CLI runtime.

use std::io;
use std::sync::Arc;

use rpcpipe::{DispatchError, SpawnError};
use rpcpipe_config::ConfigError;
use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("failed to start worker: {0}")]
    Spawn(#[from] SpawnError),
    #[error("failed to start thread: {0}")]
    Thread(#[source] io::Error),
    #[error("dispatch loop failed: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("dispatch thread panicked")]
    DispatchPanicked,
}
