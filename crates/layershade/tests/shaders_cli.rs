use std::path::PathBuf;
use std::process::Command;

use tempfile::TempDir;

fn bundled_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../shaders")
}

fn layershade(config_root: &TempDir) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_layershade"));
    command
        .env("LAYERSHADE_CONFIG", config_root.path().join("config.toml"))
        .env("LAYERSHADE_SHADER_DIR", bundled_dir())
        .env_remove("RUST_LOG");
    command
}

#[test]
fn shaders_list_json_reports_bundled_catalog() {
    let root = TempDir::new().unwrap();
    let output = layershade(&root)
        .args(["shaders", "list", "--json"])
        .output()
        .expect("failed to run layershade shaders list");
    assert!(output.status.success(), "{output:?}");

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let ids: Vec<_> = value
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["rain", "snow", "vignette"]);
    assert_eq!(value[0]["params"][0]["id"], "u_speed");
}

#[test]
fn shaders_list_text_has_one_row_per_shader() {
    let root = TempDir::new().unwrap();
    let output = layershade(&root)
        .args(["shaders", "list"])
        .output()
        .expect("failed to run layershade shaders list");
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert_eq!(stdout.lines().count(), 3);
    assert!(stdout.lines().next().unwrap().starts_with("rain"));
}

#[test]
fn missing_shader_dir_fails() {
    let root = TempDir::new().unwrap();
    let status = layershade(&root)
        .env("LAYERSHADE_SHADER_DIR", root.path().join("nowhere"))
        .args(["shaders", "list"])
        .status()
        .expect("failed to run layershade shaders list");
    assert!(!status.success());
}
