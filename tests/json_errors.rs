use assert_cmd::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;

fn gazette(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("gazette").unwrap();
    cmd.current_dir(home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("AZURE_OPENAI_KEY")
        .env_remove("AZURE_OPENAI_ENDPOINT")
        .env_remove("COGNITIVE_SERVICES_KEY")
        .env_remove("COGNITIVE_SERVICES_ENDPOINT")
        .env_remove("GAZETTE_MAX_TOKENS")
        .env_remove("GAZETTE_MAX_SECTION_TOKENS")
        .arg("--db")
        .arg(home.join("gazette.db"));
    cmd
}

fn json_error_code(assert: &assert_cmd::assert::Assert) -> String {
    let out = assert.get_output();
    assert_eq!(out.status.success(), false);
    let stdout = String::from_utf8_lossy(&out.stdout);
    let v: serde_json::Value = serde_json::from_str(&stdout).expect("valid json error");
    assert!(v.get("message").is_some());
    v["code"].as_str().unwrap().to_string()
}

#[test]
fn read_missing_file_json_error() {
    let temp = tempfile::tempdir().unwrap();
    let assert = gazette(temp.path()).args(["read", "missing.pdf", "--json"]).assert();
    assert_eq!(json_error_code(&assert), "file_not_found");
}

#[test]
fn read_without_ocr_key_json_error() {
    let temp = tempfile::tempdir().unwrap();
    let pdf = temp.path().join("2008_VOL110.pdf");
    fs::write(&pdf, b"%PDF-1.4\n").unwrap();
    let assert = gazette(temp.path()).args(["read", pdf.to_str().unwrap(), "--json"]).assert();
    assert_eq!(json_error_code(&assert), "missing_api_key");
}

#[test]
fn extract_bad_doc_id_json_error() {
    let temp = tempfile::tempdir().unwrap();
    let assert = gazette(temp.path()).args(["extract", "not-a-uuid", "--provider", "mock", "--json"]).assert();
    assert_eq!(json_error_code(&assert), "invalid_args");
}

#[test]
fn extract_unknown_doc_json_error() {
    let temp = tempfile::tempdir().unwrap();
    let assert = gazette(temp.path())
        .args(["extract", "3f1e6a52-2c4b-4f7e-9b7a-0d6c1f2e8a90", "--provider", "mock", "--json"])
        .assert();
    assert_eq!(json_error_code(&assert), "not_found");
}

#[test]
fn extract_unsupported_provider_json_error() {
    let temp = tempfile::tempdir().unwrap();
    let assert = gazette(temp.path())
        .args(["extract", "3f1e6a52-2c4b-4f7e-9b7a-0d6c1f2e8a90", "--provider", "bard", "--json"])
        .assert();
    assert_eq!(json_error_code(&assert), "provider_unsupported");
}

#[test]
fn import_incomplete_operation_json_error() {
    let temp = tempfile::tempdir().unwrap();
    let body = temp.path().join("running.json");
    fs::write(&body, "{\"status\": \"running\"}").unwrap();
    let assert = gazette(temp.path()).args(["import", body.to_str().unwrap(), "--json"]).assert();
    assert_eq!(json_error_code(&assert), "parse_error");
}

#[test]
fn inverted_token_limits_json_error() {
    let temp = tempfile::tempdir().unwrap();
    let mut cmd = gazette(temp.path());
    cmd.env("GAZETTE_MAX_TOKENS", "100").env("GAZETTE_MAX_SECTION_TOKENS", "600");
    let assert = cmd.args(["sections", "3f1e6a52-2c4b-4f7e-9b7a-0d6c1f2e8a90", "--json"]).assert();
    assert_eq!(json_error_code(&assert), "invalid_args");
}
