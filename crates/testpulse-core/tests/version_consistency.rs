//! Ensures every workspace crate inherits the workspace version and that the
//! internal dependency pin follows it.

use std::path::{Path, PathBuf};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .to_path_buf()
}

fn read_toml(path: &Path) -> toml::Value {
    let raw = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", path.display(), e));
    raw.parse().unwrap()
}

fn workspace_version() -> String {
    let doc = read_toml(&workspace_root().join("Cargo.toml"));
    doc["workspace"]["package"]["version"]
        .as_str()
        .unwrap()
        .to_string()
}

/// `"workspace"` when the crate inherits its version, else the literal.
fn crate_version(manifest_dir: &Path) -> String {
    let doc = read_toml(&manifest_dir.join("Cargo.toml"));
    let version = &doc["package"]["version"];
    if let Some(table) = version.as_table() {
        if table.get("workspace").and_then(|v| v.as_bool()) == Some(true) {
            return "workspace".to_string();
        }
    }
    version
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| panic!("no version in {}", manifest_dir.display()))
}

#[test]
fn all_crates_use_workspace_version() {
    let root = workspace_root();
    let members = read_toml(&root.join("Cargo.toml"))["workspace"]["members"]
        .as_array()
        .unwrap()
        .clone();
    assert!(!members.is_empty());

    for member in members {
        let krate = member.as_str().unwrap();
        let version = crate_version(&root.join(krate));
        assert_eq!(
            version, "workspace",
            "{} should use version.workspace = true, got version = {:?}",
            krate, version
        );
    }
}

#[test]
fn workspace_version_matches_cargo_pkg() {
    let ws_version = workspace_version();
    assert_eq!(ws_version, env!("CARGO_PKG_VERSION"));
    assert_eq!(ws_version, testpulse_core::VERSION);
}

#[test]
fn internal_dependency_pin_matches_workspace_version() {
    let doc = read_toml(&workspace_root().join("Cargo.toml"));
    let pinned = doc["workspace"]["dependencies"]["testpulse-core"]["version"]
        .as_str()
        .unwrap();
    assert_eq!(pinned, workspace_version());
}
