//! CLI surface smoke tests. Anything touching a real browser lives in the
//! cdp-probe contract tests instead.

use assert_cmd::Command;

#[test]
fn help_lists_the_core_options() {
    let output = Command::cargo_bin("evidence-collector")
        .expect("binary")
        .arg("--help")
        .output()
        .expect("run --help");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for option in [
        "--first-party-uri",
        "--browse-link",
        "--set-cookie",
        "--page-timeout",
        "--tracker-list",
        "--overwrite",
    ] {
        assert!(stdout.contains(option), "missing {option} in help output");
    }
}

#[test]
fn a_target_uri_is_mandatory() {
    let output = Command::cargo_bin("evidence-collector")
        .expect("binary")
        .output()
        .expect("run without args");
    assert!(!output.status.success());
}
