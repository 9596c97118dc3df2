use super::*;

use std::io::Cursor;

use rpcpipe_config::Config;
use rstest::rstest;

struct StaticConfigLoader {
    config: Config,
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self, _args: &[OsString]) -> Result<Config, AppError> {
        Ok(self.config.clone())
    }
}

struct Outcome {
    exit: ExitCode,
    stdout: String,
    stderr: String,
}

fn invoke(args: &[&str], input: &str) -> Outcome {
    let loader = StaticConfigLoader {
        config: Config {
            drain_timeout_ms: 2000,
            poll_interval_ms: 10,
            ..Config::default()
        },
    };
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let exit = run_with_loader(
        args.iter().map(OsString::from),
        Cursor::new(input.as_bytes().to_vec()),
        &mut stdout,
        &mut stderr,
        &loader,
    );
    Outcome {
        exit,
        stdout: String::from_utf8(stdout).expect("stdout utf8"),
        stderr: String::from_utf8(stderr).expect("stderr utf8"),
    }
}

#[cfg(unix)]
#[rstest]
fn worker_messages_are_written_as_json_lines() {
    let outcome = invoke(
        &[
            "rpcpipe",
            "sh",
            "-c",
            r#"printf 'Content-Length: 11\r\n\r\n{"ok":true}Content-Length: 7\r\n\r\n[1,2,3]'"#,
        ],
        "",
    );

    assert_eq!(outcome.exit, ExitCode::SUCCESS, "stderr: {}", outcome.stderr);
    assert_eq!(outcome.stdout, "{\"ok\":true}\n[1,2,3]\n");
}

#[cfg(unix)]
#[rstest]
fn input_lines_are_sent_as_frames() {
    let outcome = invoke(
        &[
            "rpcpipe",
            "sh",
            "-c",
            "head -c 58 >/dev/null; printf 'Content-Length: 2\\r\\n\\r\\n{}'",
        ],
        "{\"id\":1}\n\nnot json\n{\"id\":2}\n",
    );

    assert_eq!(outcome.exit, ExitCode::SUCCESS, "stderr: {}", outcome.stderr);
    assert_eq!(outcome.stdout, "{}\n");
}

#[cfg(unix)]
#[rstest]
fn echoed_frames_round_trip() {
    let outcome = invoke(&["rpcpipe", "cat"], "{\"id\":1}\n{\"id\":2}\n");

    assert_eq!(outcome.exit, ExitCode::SUCCESS, "stderr: {}", outcome.stderr);
    assert_eq!(outcome.stdout, "{\"id\":1}\n{\"id\":2}\n");
}

#[rstest]
fn missing_worker_fails_to_start() {
    let outcome = invoke(&["rpcpipe", "/nonexistent/rpcpipe-worker"], "");

    assert_eq!(outcome.exit, ExitCode::FAILURE);
    assert!(
        outcome.stderr.contains("failed to start worker"),
        "stderr: {}",
        outcome.stderr
    );
}

#[rstest]
fn missing_command_is_a_usage_error() {
    let outcome = invoke(&["rpcpipe"], "");

    assert_eq!(outcome.exit, ExitCode::FAILURE);
    assert!(outcome.stdout.is_empty());
    assert!(outcome.stderr.starts_with("rpcpipe: "));
}

#[rstest]
fn cli_arguments_skip_config_flags() {
    let args: Vec<OsString> = ["rpcpipe", "--log-format", "json", "cat", "-u"]
        .into_iter()
        .map(OsString::from)
        .collect();
    let split = split_config_arguments(&args);

    assert_eq!(cli_arguments(&args, &split), vec!["rpcpipe", "cat", "-u"]);
}
