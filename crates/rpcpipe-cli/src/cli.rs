//! CLI argument definitions for the rpcpipe bridge.

use std::ffi::OsString;

use clap::Parser;

/// Command-line interface for the rpcpipe bridge.
///
/// Configuration flags are split off before clap sees the arguments, so the
/// parser only ever receives the worker command line.
#[derive(Parser, Debug)]
#[command(
    name = "rpcpipe",
    about = "Relays newline-delimited JSON to a worker speaking Content-Length framed JSON-RPC"
)]
pub(crate) struct Cli {
    /// Worker executable followed by its arguments.
    #[arg(
        value_name = "COMMAND",
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub(crate) worker: Vec<OsString>,
}
