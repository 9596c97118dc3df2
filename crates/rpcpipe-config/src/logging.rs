//! Log output settings.
//!
//! Hosts speak the protocol on stdout, so these only shape the records they
//! write to stderr.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Filter applied when none is configured.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// How each log record is rendered.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per record with event fields at the top level.
    Json,
    /// One terse line per record, readable next to worker diagnostics.
    #[default]
    Compact,
}

/// Owned default filter for the configuration derive.
#[must_use]
pub fn default_log_filter_string() -> String {
    String::from(DEFAULT_LOG_FILTER)
}

/// Default record format.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Compact
}
