//! Binary surface checks that run without a browser.

use std::process::Command;

use serde_json::Value;

#[test]
fn help_lists_the_subcommands() {
    let bin = assert_cmd::cargo::cargo_bin!("webhelm");
    let output = Command::new(bin).arg("--help").output().expect("run --help");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    for subcommand in ["navigate", "inspect", "exec", "status"] {
        assert!(
            stdout.contains(subcommand),
            "--help should mention '{subcommand}': {stdout}"
        );
    }
}

#[test]
fn status_reports_pool_configuration_as_json() {
    let bin = assert_cmd::cargo::cargo_bin!("webhelm");
    let output = Command::new(bin)
        .env("WEBHELM_SKIP_OS_PATHS", "1")
        .arg("status")
        .output()
        .expect("run status");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let value: Value = serde_json::from_str(extract_json(&stdout)).expect("valid json");

    assert_eq!(value["pool"]["max_connections"].as_u64(), Some(10));
    assert_eq!(value["pool"]["open_connections"].as_u64(), Some(0));
    let domains: Vec<&str> = value["pool"]["enabled_domains"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert_eq!(domains, ["Page", "DOM", "CSS", "Runtime", "Network"]);
}

#[test]
fn version_carries_the_build_stamp() {
    let bin = assert_cmd::cargo::cargo_bin!("webhelm");
    let output = Command::new(bin)
        .arg("--version")
        .output()
        .expect("run --version");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

fn extract_json(output: &str) -> &str {
    let start = output.find('{').expect("json start");
    let end = output.rfind('}').expect("json end");
    &output[start..=end]
}
