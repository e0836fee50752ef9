//! Black-box tests for the `dataflow` binary, styled after
//! `langgraph-cli/tests/cli_tests.rs`: spawn the built binary via
//! `std::process::Command` and inspect exit codes and stdout, rather than
//! calling any internal function directly.

use std::process::Command;

fn dataflow_bin() -> &'static str {
    env!("CARGO_BIN_EXE_dataflow")
}

#[test]
fn run_add_then_double_succeeds_and_prints_the_sink_value() {
    let dir = tempfile::tempdir().unwrap();
    let output = Command::new(dataflow_bin())
        .args(["run", "add_then_double"])
        .current_dir(dir.path())
        .output()
        .expect("failed to spawn dataflow binary");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    // `add(2, 3)` fuses with `double(x)` into one sink named after the
    // chain's head, `add`; (2 + 3) * 2 == 10.
    assert!(stdout.contains("add"), "stdout: {stdout}");
    assert!(stdout.contains("10"), "stdout: {stdout}");
}

#[test]
fn run_fan_out_squares_succeeds_and_prints_both_sinks() {
    let dir = tempfile::tempdir().unwrap();
    let output = Command::new(dataflow_bin())
        .args(["run", "fan_out_squares"])
        .current_dir(dir.path())
        .output()
        .expect("failed to spawn dataflow binary");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    // split(4) -> (4, 5); square_left = 16, square_right = 25.
    assert!(stdout.contains("square_left"), "stdout: {stdout}");
    assert!(stdout.contains("square_right"), "stdout: {stdout}");
    assert!(stdout.contains("16"), "stdout: {stdout}");
    assert!(stdout.contains("25"), "stdout: {stdout}");
}

#[test]
fn run_an_unregistered_pipeline_name_fails_with_a_nonzero_exit() {
    let dir = tempfile::tempdir().unwrap();
    let output = Command::new(dataflow_bin())
        .args(["run", "not_a_real_pipeline"])
        .current_dir(dir.path())
        .output()
        .expect("failed to spawn dataflow binary");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error"), "stderr: {stderr}");
}

#[test]
fn package_writes_a_serial_archive() {
    let dir = tempfile::tempdir().unwrap();
    let output = Command::new(dataflow_bin())
        .args(["package", "-b", "serial", "-o", dir.path().to_str().unwrap(), "add_then_double"])
        .current_dir(dir.path())
        .output()
        .expect("failed to spawn dataflow binary");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let archive = dir.path().join("add_then_double.tar.gz");
    assert!(archive.exists(), "expected {archive:?} to exist");
}
