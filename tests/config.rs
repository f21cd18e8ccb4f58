use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use kira_metadata::config::ConfigLoader;
use kira_metadata::error::KiraError;

#[test]
fn resolves_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("kira-md.json");
    std::fs::write(
        &path,
        r#"{
            "data_dir": "/srv/metadata",
            "default_page_size": 50,
            "max_page_size": 500,
            "fetch_timeout_secs": 5,
            "max_traversal_depth": 12,
            "drs_base_url": "https://drs.example.org/ ",
            "typecodes": [{"name": "wfx", "schema_class": "nmdc:MetagenomeAssembly"}]
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.data_dir, Utf8PathBuf::from("/srv/metadata"));
    assert_eq!(resolved.limits.default_page_size, 50);
    assert_eq!(resolved.limits.max_page_size, 500);
    assert_eq!(resolved.fetch_timeout, Duration::from_secs(5));
    assert_eq!(resolved.max_traversal_depth, Some(12));
    assert_eq!(resolved.drs_base_url.as_deref(), Some("https://drs.example.org"));
    assert_eq!(resolved.extra_typecodes.len(), 1);
}

#[test]
fn explicit_missing_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(KiraError::ConfigRead(_))
    );
}

#[test]
fn inconsistent_limits_are_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("kira-md.json");
    std::fs::write(&path, r#"{"default_page_size": 100, "max_page_size": 10}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(KiraError::ConfigParse(_))
    );

    std::fs::write(&path, r#"{"fetch_timeout_secs": 0, "data_dir": "d"}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(KiraError::ConfigParse(_))
    );

    std::fs::write(&path, "{ not json").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(KiraError::ConfigParse(_))
    );
}
