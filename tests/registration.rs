use std::collections::HashMap;
use std::sync::Mutex;

use assert_matches::assert_matches;
use serde_json::{Value, json};

use kira_metadata::descriptor::DrsObjectIn;
use kira_metadata::error::KiraError;
use kira_metadata::fingerprint::sha256_bytes;
use kira_metadata::registration::{
    DEFAULT_METADATA_TAGS, FetchFailure, FetchedResponse, ObjectRegistry, Registrar,
    RegistrationOutcome, RemoteFetcher, create_drs_object_for, ensure_metadata_tags_for,
    put_object,
};

#[derive(Default)]
struct MockFetcher {
    responses: HashMap<String, FetchedResponse>,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    fn with(mut self, url: &str, status: u16, body: &[u8]) -> Self {
        self.responses.insert(
            url.to_string(),
            FetchedResponse {
                status,
                body: body.to_vec(),
            },
        );
        self
    }
}

impl RemoteFetcher for MockFetcher {
    fn get(&self, url: &str) -> Result<FetchedResponse, KiraError> {
        self.calls.lock().unwrap().push(url.to_string());
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| KiraError::Http(format!("connection refused: {url}")))
    }
}

#[derive(Default)]
struct MockRegistry {
    created: Mutex<Vec<DrsObjectIn>>,
    contents: HashMap<String, Vec<u8>>,
    tags: Mutex<HashMap<String, Vec<String>>>,
    uploads: Mutex<Vec<(String, Vec<u8>, String)>>,
}

impl MockRegistry {
    fn with_content(mut self, drs_id: &str, body: &[u8]) -> Self {
        self.contents.insert(drs_id.to_string(), body.to_vec());
        self
    }
}

impl ObjectRegistry for MockRegistry {
    fn create_object(&self, object: &DrsObjectIn) -> Result<Value, KiraError> {
        self.created.lock().unwrap().push(object.clone());
        Ok(json!({"id": "sys0abc", "name": object.name}))
    }

    fn get_object_bytes(&self, drs_id: &str) -> Result<Vec<u8>, KiraError> {
        self.contents
            .get(drs_id)
            .cloned()
            .ok_or_else(|| KiraError::NotFound(drs_id.to_string()))
    }

    fn ensure_object_tag(&self, drs_id: &str, tag: &str) -> Result<Value, KiraError> {
        let mut tags = self.tags.lock().unwrap();
        let existing = tags.entry(drs_id.to_string()).or_default();
        if existing.iter().any(|t| t == tag) {
            return Ok(Value::Null);
        }
        existing.push(tag.to_string());
        Ok(json!(existing))
    }

    fn upload(
        &self,
        url: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<FetchedResponse, KiraError> {
        self.uploads
            .lock()
            .unwrap()
            .push((url.to_string(), body, content_type.to_string()));
        Ok(FetchedResponse {
            status: 200,
            body: Vec::new(),
        })
    }
}

const OK_URL: &str = "https://data.example.org/meta/run:7/annotations.json";

#[test]
fn fetch_errors_are_reported_as_values() {
    let fetcher = MockFetcher::default()
        .with("https://a.org/500.json", 500, b"{}")
        .with("https://a.org/html.json", 200, b"<html></html>");
    let registrar = Registrar::new(&fetcher);

    let outcome = registrar.drs_object_in_for("https://a.org/500.json").unwrap();
    assert_eq!(outcome, RegistrationOutcome::Error(FetchFailure::HttpResponseNotOk));
    assert_eq!(
        serde_json::to_value(&outcome).unwrap(),
        json!({"error": "HttpResponseNotOk"})
    );

    let outcome = registrar.drs_object_in_for("https://a.org/html.json").unwrap();
    assert_eq!(
        serde_json::to_value(&outcome).unwrap(),
        json!({"error": "HttpResponseNotJson"})
    );

    let outcome = registrar.drs_object_in_for("https://a.org/unreachable.json").unwrap();
    assert_eq!(outcome, RegistrationOutcome::Error(FetchFailure::HttpResponseNotOk));
}

#[test]
fn successful_fetch_is_described() {
    let body = br#"{"data_object_set": [{"id": "nmdc:dobj-1"}]}"#;
    let fetcher = MockFetcher::default().with(OK_URL, 200, body);
    let outcome = Registrar::new(&fetcher).drs_object_in_for(OK_URL).unwrap();

    let object = outcome.object().unwrap();
    let written = serde_json::to_vec(&serde_json::from_slice::<Value>(body).unwrap()).unwrap();
    assert_eq!(object.size, written.len() as u64);
    assert_eq!(object.sha256(), Some(sha256_bytes(&written).as_str()));
    assert_eq!(
        object.name.as_deref(),
        Some("org.example.data__meta.run-7.annotations.json")
    );
    assert_eq!(object.mime_type.as_deref(), Some("application/json"));
    let access = object.access_methods[0].access_url.as_ref().unwrap();
    assert_eq!(access.url, OK_URL);

    let value = serde_json::to_value(&outcome).unwrap();
    assert_eq!(value["result"]["checksums"][0]["type"], "sha-256");
}

#[test]
fn scratch_directories_do_not_outlive_the_call() {
    let fetcher = MockFetcher::default()
        .with(OK_URL, 200, b"[1, 2, 3]")
        .with("https://a.org/bad.json", 404, b"");
    let root = tempfile::tempdir().unwrap();
    let registrar = Registrar::new(&fetcher).with_scratch_root(Some(root.path().to_path_buf()));
    registrar.drs_object_in_for(OK_URL).unwrap();
    registrar.drs_object_in_for("https://a.org/bad.json").unwrap();
    let left = std::fs::read_dir(root.path()).unwrap().count();
    assert_eq!(left, 0);
}

#[test]
fn malformed_urls_are_rejected_before_fetching() {
    let fetcher = MockFetcher::default();
    let err = Registrar::new(&fetcher)
        .drs_object_in_for("not a url")
        .unwrap_err();
    assert_matches!(err, KiraError::InvalidUrl(_));
    assert!(fetcher.calls.lock().unwrap().is_empty());
}

#[test]
fn batch_keeps_going_after_failures() {
    let fetcher = MockFetcher::default()
        .with(OK_URL, 200, b"{}")
        .with("https://a.org/500.json", 500, b"");
    let urls = ["https://a.org/500.json", "mailto:x", OK_URL];
    let batch = Registrar::new(&fetcher).register_many(urls);

    assert_eq!(batch.len(), 3);
    assert_eq!(
        batch[0].outcome,
        Some(RegistrationOutcome::Error(FetchFailure::HttpResponseNotOk))
    );
    assert!(batch[1].outcome.is_none());
    assert!(batch[1].rejected.is_some());
    assert!(batch[2].outcome.as_ref().and_then(RegistrationOutcome::object).is_some());

    let value = serde_json::to_value(&batch[0]).unwrap();
    assert_eq!(
        value,
        json!({"url": "https://a.org/500.json", "error": "HttpResponseNotOk"})
    );
}

#[test]
fn created_objects_carry_their_source_url() {
    let fetcher = MockFetcher::default().with(OK_URL, 200, b"{}");
    let outcome = Registrar::new(&fetcher).drs_object_in_for(OK_URL).unwrap();
    let registry = MockRegistry::default();
    let created = create_drs_object_for(OK_URL, outcome.object().unwrap(), &registry).unwrap();
    assert_eq!(created.url, OK_URL);
    assert_eq!(created.response["id"], "sys0abc");
    assert_eq!(registry.created.lock().unwrap().len(), 1);
}

#[test]
fn submission_batch_survives_a_failing_url() {
    let fetcher = MockFetcher::default()
        .with("https://a.org/500.json", 500, b"")
        .with(OK_URL, 200, b"{}");
    let registry = MockRegistry::default();
    let urls = ["https://a.org/500.json", "not a url", OK_URL];
    let batch = Registrar::new(&fetcher).submit_many(urls, &registry);

    assert_eq!(batch.len(), 3);
    assert_eq!(
        serde_json::to_value(&batch[0]).unwrap(),
        json!({"url": "https://a.org/500.json", "error": "HttpResponseNotOk"})
    );
    assert!(batch[1].error.as_deref().unwrap().contains("invalid URL"));
    assert_eq!(batch[2].response.as_ref().unwrap()["id"], "sys0abc");
    assert!(batch[2].error.is_none());
    assert_eq!(registry.created.lock().unwrap().len(), 1);
}

#[test]
fn uploads_use_the_guessed_content_type() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("contigs.fna.gz");
    std::fs::write(&path, [0x1f, 0x8b, 0x08]).unwrap();
    let registry = MockRegistry::default();

    let response = put_object(&registry, &path, "https://store.example.org/up/1", None).unwrap();
    assert_eq!(response.status, 200);
    put_object(&registry, &path, "https://store.example.org/up/2", Some("text/x-fasta")).unwrap();

    let bare = temp.path().join("README");
    std::fs::write(&bare, "notes").unwrap();
    put_object(&registry, &bare, "https://store.example.org/up/3", None).unwrap();

    let uploads = registry.uploads.lock().unwrap();
    assert_eq!(uploads[0].1, vec![0x1f, 0x8b, 0x08]);
    assert_eq!(uploads[0].2, "application/gzip");
    assert_eq!(uploads[1].2, "text/x-fasta");
    assert_eq!(uploads[2].2, "application/octet-stream");
}

#[test]
fn valid_metadata_gets_every_tag_once() {
    let registry = MockRegistry::default().with_content(
        "sys0meta",
        br#"{"activity_set": [{"id": "a1", "type": "nmdc:MetagenomeAssembly"}]}"#,
    );

    let first = ensure_metadata_tags_for("sys0meta", &registry, DEFAULT_METADATA_TAGS).unwrap();
    assert_eq!(
        first.keys().collect::<Vec<_>>(),
        vec!["schema#/definitions/Database", "metadata-in"]
    );
    assert_eq!(first["metadata-in"], json!(["schema#/definitions/Database", "metadata-in"]));

    let second = ensure_metadata_tags_for("sys0meta", &registry, DEFAULT_METADATA_TAGS).unwrap();
    assert!(second.values().all(Value::is_null));
}

#[test]
fn invalid_metadata_is_left_untagged() {
    let registry = MockRegistry::default()
        .with_content(
            "sys0bad",
            br#"{"activity_set": [{"id": "a1", "type": "nmdc:Unknown"}]}"#,
        )
        .with_content("sys0list", b"[1, 2]");

    let err = ensure_metadata_tags_for("sys0bad", &registry, DEFAULT_METADATA_TAGS).unwrap_err();
    assert_matches!(&err, KiraError::ValidationErrors { key, messages } if key == "activity_set" && messages.len() == 1);
    assert!(err.is_validation());

    assert_matches!(
        ensure_metadata_tags_for("sys0list", &registry, DEFAULT_METADATA_TAGS),
        Err(KiraError::InvalidDrsObject(_))
    );
    assert!(registry.tags.lock().unwrap().is_empty());
}
