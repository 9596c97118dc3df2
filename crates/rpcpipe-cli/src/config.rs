//! Configuration loading helpers for the rpcpipe CLI.
//!
//! Only recognised configuration flags at the front of the argument list are
//! forwarded to `ortho-config`; everything from the first other token onwards
//! is the worker command line and must reach the worker untouched.

use std::ffi::{OsStr, OsString};

use rpcpipe_config::{Config, OrthoConfig};

use crate::errors::AppError;

/// Flags accepted by the configuration loader.
pub(crate) const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--log-filter",
    "--log-format",
    "--send-timeout-ms",
    "--shutdown-timeout-ms",
    "--close-timeout-ms",
    "--poll-interval-ms",
    "--stderr-capacity",
    "--drain-timeout-ms",
];

pub(crate) trait ConfigLoader {
    /// Loads configuration from the filtered argument list.
    ///
    /// Configuration flags must appear before the worker command; anything
    /// after it is passed to the worker.
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Stop,
}

fn classify(argument: &OsStr) -> FlagAction {
    let text = argument.to_string_lossy();
    let (flag, inline_value) = match text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (text.as_ref(), false),
    };

    if CONFIG_CLI_FLAGS.contains(&flag) {
        FlagAction::Include {
            needs_value: !inline_value,
        }
    } else {
        FlagAction::Stop
    }
}

/// Configuration arguments and the position where the worker command starts.
#[derive(Debug)]
pub(crate) struct ConfigArgumentSplit {
    pub(crate) config_arguments: Vec<OsString>,
    pub(crate) command_start: usize,
}

pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let mut arguments = args.iter();
    let Some(program) = arguments.next() else {
        return ConfigArgumentSplit {
            config_arguments: Vec::new(),
            command_start: 0,
        };
    };

    let mut config_arguments = vec![program.clone()];
    let mut command_start = 1usize;
    while let Some(argument) = arguments.next() {
        match classify(argument) {
            FlagAction::Include { needs_value } => {
                config_arguments.push(argument.clone());
                command_start += 1;
                if needs_value && let Some(value) = arguments.next() {
                    config_arguments.push(value.clone());
                    command_start += 1;
                }
            }
            FlagAction::Stop => break,
        }
    }

    ConfigArgumentSplit {
        config_arguments,
        command_start,
    }
}
