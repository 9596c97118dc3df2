//! Tracing setup for the bridge.
//!
//! Stdout carries protocol output, so every log record goes to stderr. The
//! dispatch thread, the pump threads and the main thread all log; each record
//! takes the stderr lock only for its own write, so nothing else may hold
//! that lock for longer.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use rpcpipe_config::{Config, LogFormat};
use tracing::Subscriber;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::{EnvFilter, Layer, Registry};

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// The filtered registry that the output layer is stacked on.
type Filtered = Layered<EnvFilter, Registry>;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub(crate) enum TelemetryError {
    /// The configured filter expression does not parse.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Another global subscriber is already installed.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the stderr subscriber the first time it is called.
pub(crate) fn initialise(config: &Config) -> Result<(), TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| {
            let subscriber = build_subscriber(config, io::stderr, io::stderr().is_terminal())?;
            tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
        })
        .map(|_| ())
}

/// Builds a subscriber that writes records for `config` through `writer`.
pub(crate) fn build_subscriber<W>(
    config: &Config,
    writer: W,
    ansi: bool,
) -> Result<Box<dyn Subscriber + Send + Sync>, TelemetryError>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_new(config.log_filter())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;

    let records = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true)
        .with_thread_names(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());
    let records: Box<dyn Layer<Filtered> + Send + Sync> = match config.log_format() {
        LogFormat::Json => records.json().flatten_event(true).boxed(),
        LogFormat::Compact => records.compact().boxed(),
    };

    Ok(Box::new(Registry::default().with(filter).with(records)))
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use std::thread;

    use rstest::rstest;
    use tracing::dispatcher::{self, Dispatch};

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().expect("capture poisoned")).into_owned()
        }
    }

    impl Write for Captured {
        fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
            self.0
                .lock()
                .expect("capture poisoned")
                .extend_from_slice(bytes);
            Ok(bytes.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'w> MakeWriter<'w> for Captured {
        type Writer = Self;

        fn make_writer(&'w self) -> Self::Writer {
            self.clone()
        }
    }

    fn config(filter: &str, format: LogFormat) -> Config {
        Config {
            log_filter: filter.to_owned(),
            log_format: format,
            ..Config::default()
        }
    }

    #[rstest]
    fn compact_records_carry_target_and_message() {
        let captured = Captured::default();
        let subscriber =
            build_subscriber(&config("info", LogFormat::Compact), captured.clone(), false)
                .expect("subscriber should build");

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "rpcpipe::cli", pid = 7, "worker started");
            tracing::debug!(target: "rpcpipe::cli", "filtered out");
        });

        let text = captured.text();
        assert!(text.contains("rpcpipe::cli"), "missing target: {text}");
        assert!(text.contains("worker started"), "missing message: {text}");
        assert!(!text.contains("filtered out"), "filter ignored: {text}");
    }

    #[rstest]
    fn json_records_are_one_object_per_line() {
        let captured = Captured::default();
        let subscriber =
            build_subscriber(&config("debug", LogFormat::Json), captured.clone(), false)
                .expect("subscriber should build");

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(
                target: "rpcpipe::dispatch",
                content_length = 4,
                "failed to decode frame payload"
            );
        });

        let text = captured.text();
        let record: serde_json::Value =
            serde_json::from_str(text.trim_end()).expect("record should be JSON");
        assert_eq!(record["message"], "failed to decode frame payload");
        assert_eq!(record["content_length"], 4);
        assert_eq!(record["target"], "rpcpipe::dispatch");
    }

    #[rstest]
    fn records_from_worker_threads_are_written() {
        let captured = Captured::default();
        let subscriber =
            build_subscriber(&config("info", LogFormat::Compact), captured.clone(), false)
                .expect("subscriber should build");
        let dispatch = Dispatch::new(subscriber);

        let worker = {
            let dispatch = dispatch.clone();
            thread::Builder::new()
                .name(String::from("rpcpipe-dispatch"))
                .spawn(move || {
                    dispatcher::with_default(&dispatch, || {
                        tracing::info!(target: "rpcpipe::cli", "worker stream ended");
                    });
                })
                .expect("thread should start")
        };
        worker.join().expect("worker panicked");

        let text = captured.text();
        assert!(text.contains("worker stream ended"), "missing record: {text}");
        assert!(text.contains("rpcpipe-dispatch"), "missing thread name: {text}");
    }

    #[rstest]
    fn invalid_filters_are_rejected() {
        let outcome = build_subscriber(
            &config("rpcpipe=loudest", LogFormat::Compact),
            Captured::default(),
            false,
        );

        assert!(matches!(outcome, Err(TelemetryError::Filter(_))));
    }
}
