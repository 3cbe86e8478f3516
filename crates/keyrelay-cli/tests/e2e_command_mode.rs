//! E2E tests for command mode (`keyrelay key:A text:hi`).

mod common;

use common::Sandbox;
use predicates::str::contains;

#[test]
fn commands_reach_the_sink_in_order() {
    let sb = Sandbox::new();
    sb.cmd()
        .args(["text:hello", "key:ENTER", "line:World"])
        .assert()
        .success();

    assert_eq!(sb.sent(), vec!["text:hello", "key:ENTER", "line:World"]);
}

#[test]
fn priority_command_is_not_written() {
    let sb = Sandbox::new();
    sb.cmd().args(["key:A", "PAUSE", "RESUME"]).assert().success();

    assert_eq!(sb.sent(), vec!["key:A"]);
}

#[test]
fn stop_discards_later_commands() {
    let sb = Sandbox::new();
    sb.cmd().args(["STOP", "key:A", "key:B"]).assert().success();

    assert!(sb.sent().is_empty());
}

#[test]
fn missing_device_fails() {
    // No serial endpoint is configured, so serial mode has no device.
    let sb = Sandbox::new();
    sb.bare_cmd()
        .args(["--mode", "serial", "key:A"])
        .assert()
        .failure()
        .stderr(contains("serial"));
}

#[test]
fn unknown_mode_is_rejected() {
    let sb = Sandbox::new();
    sb.bare_cmd()
        .args(["--mode", "typewriter", "key:A"])
        .assert()
        .failure()
        .stderr(contains("unknown device kind"));
}

#[test]
fn verbose_logs_processor_lifecycle() {
    let sb = Sandbox::new();
    sb.cmd()
        .args(["-v", "key:A"])
        .assert()
        .success()
        .stderr(contains("CommandProcessor log_sink started"))
        .stderr(contains("CommandProcessor log_sink stopped"));
}

#[test]
fn env_var_selects_mode() {
    let sb = Sandbox::new();
    sb.bare_cmd()
        .env("KEYRELAY_MODE", "log_sink")
        .env("KEYRELAY_LOG_SINK", sb.sink())
        .arg("text:from-env")
        .assert()
        .success();

    assert_eq!(sb.sent(), vec!["text:from-env"]);
}
