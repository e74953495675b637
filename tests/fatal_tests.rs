//! Fatal errors abort the process, so each scenario re-runs this test binary
//! with an environment variable naming the scenario and inspects the child.

use frame_logger::level::Level;
use frame_logger::log_format_registry::CallSite;
use frame_logger::{fatal, log_call, log_fatal, log_info};
use std::env;
use std::process::{Command, Output};

const SCENARIO_ENV: &str = "FRAME_LOGGER_FATAL_SCENARIO";

fn run_scenario(test_name: &str, scenario: &str) -> Output {
    let exe = env::current_exe().expect("test binary path");
    Command::new(exe)
        .args([test_name, "--exact", "--nocapture", "--test-threads=1"])
        .env(SCENARIO_ENV, scenario)
        .output()
        .expect("spawn child test")
}

fn scenario() -> Option<String> {
    env::var(SCENARIO_ENV).ok()
}

#[test]
fn child_fatal_scenarios() {
    match scenario().as_deref() {
        Some("explicit") => fatal("disk controller vanished"),
        Some("macro") => log_fatal!("fatal_test.invariant", slot = 3u32),
        Some("oversized") => {
            let blob = vec![0u8; 70_000];
            log_info!("fatal_test.oversized", blob = blob);
        }
        Some("malformed_path") => {
            static SITE: CallSite = CallSite::new(Level::Info, "not a path", &[]);
            log_call(&SITE, &());
        }
        _ => {}
    }
}

fn assert_aborted(output: &Output, expected: &str) {
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success(), "child should abort");
    assert!(
        stderr.contains("fatal error at"),
        "missing fatal report in stderr: {}",
        stderr
    );
    assert!(
        stderr.contains(expected),
        "expected {:?} in stderr: {}",
        expected,
        stderr
    );
}

#[test]
fn test_explicit_fatal_aborts() {
    if scenario().is_some() {
        return;
    }
    let output = run_scenario("child_fatal_scenarios", "explicit");
    assert_aborted(&output, "disk controller vanished");

    // The best-effort fatal frame is also rendered.
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("eror fatal: message = 'disk controller vanished'"));
}

#[test]
fn test_fatal_macro_logs_then_aborts() {
    if scenario().is_some() {
        return;
    }
    let output = run_scenario("child_fatal_scenarios", "macro");
    assert_aborted(&output, "fatal log message fatal_test.invariant");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("fatl fatal_test.invariant: slot = 3"));
}

#[test]
fn test_oversized_frame_is_fatal() {
    if scenario().is_some() {
        return;
    }
    let output = run_scenario("child_fatal_scenarios", "oversized");
    assert_aborted(&output, "cannot log fatal_test.oversized: frame payload too large");
}

#[test]
fn test_malformed_path_is_fatal() {
    if scenario().is_some() {
        return;
    }
    let output = run_scenario("child_fatal_scenarios", "malformed_path");
    assert_aborted(&output, "malformed log message path");
}
