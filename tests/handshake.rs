//! End-to-end tests of the stdio handshake without a sandbox.
//!
//! The redirector binary is launched directly instead of through Sandboxie, so
//! these tests need Windows but no Sandboxie installation.

#![cfg(windows)]

use std::io::{Read, Write};
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use sandboxie_bridge::SandboxError;
use sandboxie_bridge::process::{Handshake, PipedProcess, StdioChannels};

const PREFIX: &str = r"\\.\pipe\sandboxie_bridge_test";

fn launch(command: &[&str], channels: StdioChannels) -> PipedProcess {
    let handshake = Handshake::new(PREFIX, channels);
    let args = handshake.redirect_args(command.iter().map(ToString::to_string).collect());
    let pending = handshake.accept().expect("Failed to create channels");

    let launcher = Command::new(env!("CARGO_BIN_EXE_sbie-redirect"))
        .args(args.to_args())
        .spawn()
        .expect("Failed to start redirector");

    pending.complete(launcher).expect("Redirector did not connect")
}

#[test]
fn test_cmd_session() {
    let mut process = launch(&["cmd"], StdioChannels::ALL);

    let mut stdin = process.take_stdin().unwrap();
    stdin.write_all(b"cd\nexit\n").unwrap();
    stdin.close().unwrap();

    let mut output = String::new();
    process.stdout().unwrap().read_to_string(&mut output).unwrap();
    assert!(!output.is_empty());

    assert_eq!(process.close().unwrap(), 0);
}

#[test]
fn test_stdout_and_stderr_are_separate() {
    let mut process = launch(&["cmd", "/c", "echo out& echo err 1>&2"], StdioChannels::ALL);

    let mut stdout = String::new();
    process.stdout().unwrap().read_to_string(&mut stdout).unwrap();
    let mut stderr = String::new();
    process.stderr().unwrap().read_to_string(&mut stderr).unwrap();

    assert_eq!(stdout.trim(), "out");
    assert_eq!(stderr.trim(), "err");
    assert_eq!(process.close().unwrap(), 0);
}

#[test]
fn test_exit_code_propagates() {
    let process = launch(&["cmd", "/c", "exit 7"], StdioChannels::ALL);
    assert_eq!(process.close().unwrap(), 7);
}

/// Writing to stdin after the command is gone is swallowed at release.
#[test]
fn test_broken_pipe() {
    let mut process = launch(&["cmd", "/c", "echo", "yay"], StdioChannels::ALL);

    thread::sleep(Duration::from_secs(2));
    process.stdin().unwrap().write_all(b"test").unwrap();

    assert_eq!(process.close().unwrap(), 0);
}

#[test]
fn test_stdout_only() {
    let channels = StdioChannels {
        stdin: false,
        stdout: true,
        stderr: false,
    };
    let mut process = launch(&["cmd", "/c", "echo only"], channels);
    assert!(process.stdin().is_none());
    assert!(process.stderr().is_none());

    let mut output = String::new();
    process.stdout().unwrap().read_to_string(&mut output).unwrap();
    assert_eq!(output.trim(), "only");
    assert_eq!(process.close().unwrap(), 0);
}

/// A launcher that exits without running the redirector fails the handshake
/// instead of leaving it blocked.
#[test]
fn test_launcher_exits_before_connecting() {
    let pending = Handshake::new(PREFIX, StdioChannels::ALL)
        .accept()
        .expect("Failed to create channels");
    let launcher = Command::new("cmd")
        .args(["/c", "exit 3"])
        .spawn()
        .expect("Failed to start cmd");

    let started = Instant::now();
    let err = pending.complete(launcher).unwrap_err();

    assert!(matches!(err, SandboxError::LauncherExited { code: 3 }), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_stderr_lines_are_readable() {
    use std::io::BufRead;

    let mut process = launch(&["cmd", "/c", "echo first 1>&2& echo second 1>&2"], StdioChannels::ALL);

    let lines: Vec<String> = process
        .take_stderr()
        .unwrap()
        .lines()
        .map(|line| line.unwrap().trim_end().to_string())
        .collect();

    assert_eq!(lines, ["first", "second"]);
    assert_eq!(process.close().unwrap(), 0);
}
