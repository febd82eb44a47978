// ABOUTME: Integration tests for the halyard CLI.
// ABOUTME: Validates --help output and argument error paths; no network.

use assert_cmd::Command;
use predicates::prelude::*;

fn halyard_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("halyard"))
}

#[test]
fn help_shows_commands() {
    halyard_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("sudo"))
        .stdout(predicate::str::contains("forward"));
}

#[test]
fn hosts_flag_is_required() {
    halyard_cmd()
        .args(["run", "true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--hosts"));
}

#[test]
fn ambiguous_port_is_rejected_before_any_dial() {
    halyard_cmd()
        .args(["-H", "web1:2222", "--port", "22", "run", "true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("shorthand"));
}

#[test]
fn gateway_conflicts_with_proxy_command() {
    halyard_cmd()
        .args([
            "-H",
            "web1",
            "--gateway",
            "bastion",
            "--proxy-command",
            "nc %h %p",
            "run",
            "true",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}
