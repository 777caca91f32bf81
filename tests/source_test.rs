use std::path::Path;

use eventgate::source::{SourceMeta, SourceRegistry};

fn write(dir: &Path, file: &str, content: &str) {
    std::fs::write(dir.join(file), content).unwrap();
}

#[test]
fn loads_toml_files_and_ignores_others() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "push.toml",
        "[source]\nname = \"push\"\nexpected_interval_ms = 900000\n",
    );
    write(
        dir.path(),
        "erp.toml",
        "[source]\nname = \"poll:erp-sync\"\nexpected_interval_ms = 3600000\norg_id = \"acme\"\n",
    );
    write(dir.path(), "README.md", "not a source");

    let registry = SourceRegistry::load_from_dir(dir.path()).unwrap();
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.expected_interval("anyone", "push"), Some(900_000));
    assert_eq!(registry.expected_interval("acme", "poll:erp-sync"), Some(3_600_000));
    assert_eq!(registry.expected_interval("globex", "poll:erp-sync"), None);
}

#[test]
fn org_entry_overrides_global_entry() {
    let mut registry = SourceRegistry::empty();
    registry.insert(SourceMeta {
        name: "push".into(),
        expected_interval_ms: 900_000,
        org_id: None,
    });
    registry.insert(SourceMeta {
        name: "push".into(),
        expected_interval_ms: 60_000,
        org_id: Some("acme".into()),
    });

    assert_eq!(registry.expected_interval("acme", "push"), Some(60_000));
    assert_eq!(registry.expected_interval("globex", "push"), Some(900_000));
}

#[test]
fn malformed_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "bad.toml", "[source]\nname = \"push\"\n");

    let err = SourceRegistry::load_from_dir(dir.path()).unwrap_err();
    assert_eq!(err.code(), "CONFIG_ERROR");
    assert!(err.to_string().contains("bad.toml"));
}

#[test]
fn missing_dir_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = SourceRegistry::load_from_dir(&dir.path().join("absent")).unwrap_err();
    assert_eq!(err.code(), "CONFIG_ERROR");
}

#[test]
fn shipped_source_files_parse() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("sources");
    let registry = SourceRegistry::load_from_dir(&dir).unwrap();
    assert!(!registry.is_empty());
}
