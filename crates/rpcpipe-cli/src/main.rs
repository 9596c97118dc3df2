//! CLI entrypoint for the rpcpipe bridge.
//!
//! The binary delegates to [`rpcpipe_cli::run`], which loads configuration,
//! spawns the worker named on the command line, and relays JSON between its
//! own standard streams and the worker's framed protocol.

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    // Unlocked: the tracing subscriber on other threads writes to stderr too.
    rpcpipe_cli::run(std::env::args_os(), io::stdin(), io::stdout(), &mut io::stderr())
}
