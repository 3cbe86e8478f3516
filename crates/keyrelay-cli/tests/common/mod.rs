//! Shared E2E helpers for `keyrelay` binary tests.

use assert_cmd::cargo::cargo_bin_cmd;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default timeout for a single binary run.
pub const TIMEOUT_BASIC: Duration = Duration::from_secs(10);

const ENV_VARS: &[&str] = &[
    "KEYRELAY_MODE",
    "KEYRELAY_SERIAL_DEVICE",
    "KEYRELAY_SERIAL_TCP",
    "KEYRELAY_LAYOUT",
    "KEYRELAY_LOG_SINK",
    "KEYRELAY_CONSOLE",
    "KEYRELAY_WATCH_FILE",
    "KEYRELAY_AUTO_PUBLISH",
    "KEYRELAY_TRACE_EVENTS",
    "KEYRELAY_LOG_FILE",
    "KEYRELAY_LOG_DIR",
    "RUST_LOG",
];

/// Isolated environment: HOME and the working directory point into a
/// fresh temp dir, so no user config leaks in.
pub struct Sandbox {
    pub dir: tempfile::TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn sink(&self) -> PathBuf {
        self.path().join("sink.jsonl")
    }

    /// Command for the binary in log sink mode writing to [`sink`](Self::sink).
    pub fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = self.bare_cmd();
        cmd.args(["--mode", "log-sink", "--log-sink"])
            .arg(self.sink());
        cmd
    }

    /// Command for the binary without any mode flags.
    pub fn bare_cmd(&self) -> assert_cmd::Command {
        let mut cmd: assert_cmd::Command = cargo_bin_cmd!("keyrelay");
        cmd.timeout(TIMEOUT_BASIC);
        for var in ENV_VARS {
            cmd.env_remove(var);
        }
        cmd.env("HOME", self.path()).current_dir(self.path());
        cmd
    }

    /// Every command written to the sink, in order.
    pub fn sent(&self) -> Vec<String> {
        let content = std::fs::read_to_string(self.sink()).unwrap_or_default();
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .flat_map(|line| {
                let record: serde_json::Value =
                    serde_json::from_str(line).expect("sink line is JSON");
                record["commands"]
                    .as_array()
                    .expect("commands array")
                    .iter()
                    .map(|c| c.as_str().expect("command string").to_string())
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}
