//! Runtime for the `rpcpipe` bridge binary.
//!
//! `rpcpipe [config flags] <command> [args...]` spawns the worker command and
//! relays between newline-delimited JSON on its own standard streams and the
//! worker's `Content-Length` framed protocol. Each JSON value read from stdin
//! is sent as one frame; each frame the worker produces is written to stdout
//! as one JSON line. Logs, including the worker's captured stderr once its
//! stream ends, go to stderr.

mod cli;
mod config;
mod errors;
mod session;
mod telemetry;

#[cfg(test)]
mod tests;

use std::ffi::OsString;
use std::io::{Read, Write};
use std::process::ExitCode;

use clap::Parser;
use rpcpipe::{Connection, StopReason};
use tracing::{debug, error};

use crate::cli::Cli;
use crate::config::{ConfigArgumentSplit, ConfigLoader, OrthoConfigLoader, split_config_arguments};
use crate::errors::AppError;
use crate::session::SessionTiming;

/// Log target for the CLI runtime.
const CLI_TARGET: &str = "rpcpipe::cli";

/// Runs the bridge with the provided arguments and streams.
///
/// `input` feeds the worker; `output` receives the worker's messages; `stderr`
/// receives usage and startup errors that occur before logging is available.
#[must_use]
pub fn run<I, R, W, E>(args: I, input: R, output: W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    R: Read + Send + 'static,
    W: Write + Send,
    E: Write,
{
    run_with_loader(args, input, output, stderr, &OrthoConfigLoader)
}

fn run_with_loader<I, R, W, E, L>(
    args: I,
    input: R,
    mut output: W,
    stderr: &mut E,
    loader: &L,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    R: Read + Send + 'static,
    W: Write + Send,
    E: Write,
    L: ConfigLoader,
{
    match execute(args, input, &mut output, loader) {
        Ok(stop_reason) => {
            debug!(target: CLI_TARGET, ?stop_reason, "bridge finished");
            ExitCode::SUCCESS
        }
        Err(failure) => {
            error!(target: CLI_TARGET, error = %failure, "bridge failed");
            // Nothing further can be reported when stderr itself is gone.
            drop(writeln!(stderr, "rpcpipe: {failure}"));
            ExitCode::FAILURE
        }
    }
}

fn execute<I, R, W, L>(
    args: I,
    input: R,
    output: &mut W,
    loader: &L,
) -> Result<StopReason, AppError>
where
    I: IntoIterator<Item = OsString>,
    R: Read + Send + 'static,
    W: Write + Send,
    L: ConfigLoader,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let split = split_config_arguments(&args);
    let cli = Cli::try_parse_from(cli_arguments(&args, &split)).map_err(AppError::CliUsage)?;
    let config = loader.load(&split.config_arguments)?;
    telemetry::initialise(&config)?;

    let connection_config = config.connection_config(cli.worker)?;
    let connection = Connection::open(&connection_config)?;
    debug!(
        target: CLI_TARGET,
        pid = connection.pid(),
        command = %connection_config.command.display(),
        "worker started"
    );

    let timing = SessionTiming {
        poll_interval: config.tuning().poll_interval,
        drain_timeout: config.drain_timeout(),
    };
    let summary = session::bridge(&connection, input, output, timing)?;
    debug!(
        target: CLI_TARGET,
        messages = summary.messages,
        decode_errors = summary.decode_errors,
        "worker session summary"
    );
    Ok(summary.stop_reason)
}

fn cli_arguments(args: &[OsString], split: &ConfigArgumentSplit) -> Vec<OsString> {
    args.first()
        .into_iter()
        .chain(args.iter().skip(split.command_start))
        .cloned()
        .collect()
}
