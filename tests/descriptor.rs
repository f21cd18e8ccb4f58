use serde_json::{Map, Value, json};

use kira_metadata::descriptor::{DrsObjectIn, drs_metadata_for, site_object_in_for};
use kira_metadata::error::KiraError;
use kira_metadata::typecode::{TypecodeClassifier, classname_from_typecode};

fn base(value: Value) -> Map<String, Value> {
    value.as_object().unwrap().clone()
}

#[test]
fn supplied_fields_are_never_recomputed() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("annotations.tsv");
    std::fs::write(&path, "gene\tproduct\n").unwrap();

    let meta = drs_metadata_for(
        &path,
        Some(base(json!({
            "size": 42,
            "mime_type": "text/x-custom",
            "name": "renamed.tsv",
            "description": "kept as is"
        }))),
    )
    .unwrap();

    assert_eq!(meta["size"], json!(42));
    assert_eq!(meta["mime_type"], json!("text/x-custom"));
    assert_eq!(meta["name"], json!("renamed.tsv"));
    assert_eq!(meta["description"], json!("kept as is"));
    assert!(meta.contains_key("checksums"));
    assert!(meta.contains_key("created_time"));
}

#[test]
fn repeated_builds_are_identical() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("reads.json");
    std::fs::write(&path, br#"{"reads": 1024}"#).unwrap();
    let seed = base(json!({"access_methods": [{"access_id": "site:obj-1"}]}));

    let first = drs_metadata_for(&path, Some(seed.clone())).unwrap();
    let second = drs_metadata_for(&path, Some(seed)).unwrap();
    assert_eq!(first, second);

    let again = drs_metadata_for(&path, Some(first.clone())).unwrap();
    assert_eq!(again, first);
}

#[test]
fn typed_object_rejects_missing_checksums() {
    let object = DrsObjectIn::try_from(base(json!({
        "size": 1,
        "created_time": "2021-09-14T10:02:00Z",
        "checksums": [],
        "access_methods": [{"access_url": {"url": "https://x.org/a"}}]
    })));
    assert!(matches!(object, Err(KiraError::InvalidDrsObject(_))));

    let object = DrsObjectIn::try_from(base(json!({
        "size": 1,
        "created_time": "2021-09-14T10:02:00Z",
        "checksums": [{"type": "sha-256", "checksum": "00"}],
        "access_methods": [{"access_url": {"url": "https://x.org/a"}}],
        "aliases": ["a1"],
        "extra": true
    })))
    .unwrap();
    assert_eq!(object.aliases, Some(vec!["a1".to_string()]));
}

#[test]
fn typecodes_classify_ids() {
    let classifier = TypecodeClassifier::builtin();
    for (id, class) in [
        ("nmdc:sty-11-34xj1150", "Study"),
        ("nmdc:bsm-11-qq8s6x03", "Biosample"),
        ("nmdc:dobj-11-00095294", "DataObject"),
        ("nmdc:wfmgas-11-y43zyn66.1", "MetagenomeAssembly"),
    ] {
        assert_eq!(classifier.classify(id), Some(class));
        assert_eq!(classname_from_typecode(id), Some(class));
    }
    for id in ["nmdc:nope-11-x", "no-colon", "nmdc:", ""] {
        assert_eq!(classifier.classify(id), None);
    }
}

#[test]
fn site_objects_are_reached_by_access_id() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("mags.tsv");
    std::fs::write(&path, "bin\tcompleteness\n").unwrap();

    let object = site_object_in_for(
        &path,
        "nmdc-runtime",
        "sys0x1",
        Some(base(json!({
            "description": "MAG summary",
            "access_methods": [{"access_url": {"url": "https://old.example.org/mags.tsv"}}]
        }))),
    )
    .unwrap();
    assert_eq!(object.access_methods.len(), 1);
    assert_eq!(object.access_methods[0].access_id.as_deref(), Some("nmdc-runtime:sys0x1"));
    assert!(object.access_methods[0].access_url.is_none());
    assert_eq!(object.name.as_deref(), Some("mags.tsv"));
    assert_eq!(object.mime_type.as_deref(), Some("text/tab-separated-values"));
    assert_eq!(object.description.as_deref(), Some("MAG summary"));
}
