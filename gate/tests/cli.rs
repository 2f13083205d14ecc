use std::path::Path;
use std::process::{Command, Output};

fn gate(args: &[&str], store: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gate"))
        .args(args)
        .env("GATE_CERT_STORE", store)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run gate")
}

fn write_config(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path.to_str().unwrap().to_string()
}

const VALID: &str = r#"{
    "tlsAddr": "127.0.0.1:0",
    "httpAddr": "",
    "domains": [{
        "domain": "test.com",
        "provider": "exec",
        "token": "/usr/local/bin/dns-hook",
        "routes": [
            {"selector": {"exp": "svc"}, "destination": "127.0.0.1:9000"},
            {"selector": {"type": "pattern", "exp": "api-[0-9]+"}, "destination": "127.0.0.1:9001"}
        ]
    }]
}"#;

#[test]
fn test_validate_accepts_good_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "config.json", VALID);

    let output = gate(&["validate", &config], dir.path());
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("is valid"));
    assert!(stdout.contains("1 domain(s)"));
}

#[test]
fn test_validate_accepts_toml() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        "config.toml",
        r#"
            [[domains]]
            domain = "test.com"
            provider = "exec"
            token = "/usr/local/bin/dns-hook"
        "#,
    );

    assert!(gate(&["validate", &config], dir.path()).status.success());
}

#[test]
fn test_validate_rejects_bad_configs() {
    let dir = tempfile::tempdir().unwrap();

    let unknown_provider = write_config(
        dir.path(),
        "provider.json",
        r#"{"domains": [{"domain": "test.com", "provider": "route53"}]}"#,
    );
    let output = gate(&["validate", &unknown_provider], dir.path());
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("route53"));

    let bad_pattern = write_config(
        dir.path(),
        "pattern.json",
        r#"{"domains": [{"domain": "test.com", "provider": "exec",
            "routes": [{"selector": {"type": "pattern", "exp": "(("}, "destination": "127.0.0.1:1"}]}]}"#,
    );
    assert!(!gate(&["validate", &bad_pattern], dir.path()).status.success());

    let missing = dir.path().join("missing.json");
    assert!(!gate(&["validate", missing.to_str().unwrap()], dir.path()).status.success());
}

#[test]
fn test_run_fails_fast_on_unknown_provider() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        "config.json",
        r#"{"tlsAddr": "127.0.0.1:0", "httpAddr": "", "domains": [{"domain": "test.com", "provider": "route53"}]}"#,
    );

    let output = gate(&["run", &config], dir.path());
    assert!(!output.status.success());
}

#[test]
fn test_version() {
    let dir = tempfile::tempdir().unwrap();
    let output = gate(&["version"], dir.path());
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("Gate v"));
}
