//! Precedence tests for file, environment and CLI configuration layers.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;
use rpcpipe_config::{Config, LogFormat, OrthoConfig, default_send_timeout_ms};
use rstest::{fixture, rstest};
use tempfile::TempDir;

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

struct EnvOverride {
    key: &'static str,
    previous: Option<OsString>,
    guard: Option<MutexGuard<'static, ()>>,
}

impl EnvOverride {
    fn set_var(key: &'static str, value: &OsStr) -> Self {
        let guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        let previous = std::env::var_os(key);
        // Environment mutation is unsafe on edition 2024; the mutex keeps
        // overrides from racing with each other.
        unsafe { std::env::set_var(key, value) };
        Self {
            key,
            previous,
            guard: Some(guard),
        }
    }
}

impl Drop for EnvOverride {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(value) => unsafe { std::env::set_var(self.key, value) },
            None => unsafe { std::env::remove_var(self.key) },
        }
        drop(self.guard.take());
    }
}

struct Harness {
    temp_dir: TempDir,
    args: Vec<OsString>,
}

impl Harness {
    fn write_config(&mut self, toml: &str) {
        let path = self.temp_dir.path().join("rpcpipe.toml");
        fs::write(&path, toml).expect("write configuration");
        self.args.push(OsString::from("--config-path"));
        self.args.push(path.into_os_string());
    }

    fn push(&mut self, argument: &str) {
        self.args.push(OsString::from(argument));
    }

    fn load(&self) -> Config {
        Config::load_from_iter(self.args.clone()).expect("configuration should load")
    }
}

#[fixture]
fn harness() -> Harness {
    Harness {
        temp_dir: TempDir::new().expect("create temp dir"),
        args: vec![OsString::from("rpcpipe")],
    }
}

#[rstest]
fn file_values_override_defaults(mut harness: Harness) {
    harness.write_config("log_format = \"json\"\nshutdown_timeout_ms = 250\n");

    let config = harness.load();

    assert_eq!(config.log_format(), LogFormat::Json);
    assert_eq!(config.shutdown_timeout_ms, 250);
    assert_eq!(config.send_timeout_ms, default_send_timeout_ms());
}

#[rstest]
fn cli_flags_override_the_file(mut harness: Harness) {
    harness.write_config("log_filter = \"warn\"\n");
    harness.push("--log-filter");
    harness.push("rpcpipe=trace");

    assert_eq!(harness.load().log_filter(), "rpcpipe=trace");
}

#[rstest]
fn environment_overrides_the_file(mut harness: Harness) {
    harness.write_config("stderr_capacity = 1024\n");
    let _env = EnvOverride::set_var("RPCPIPE_STDERR_CAPACITY", OsStr::new("2048"));

    assert_eq!(harness.load().stderr_capacity, 2048);
}

#[rstest]
fn malformed_file_is_reported(mut harness: Harness) {
    harness.write_config("send_timeout_ms = \"soon\"\n");

    assert!(Config::load_from_iter(harness.args.clone()).is_err());
}
