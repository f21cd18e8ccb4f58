use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::activity::specialize_activity_set_docs;
use crate::descriptor::{
    DrsObjectIn, OCTET_STREAM, access_url_base, drs_metadata_for, guess_mime_type,
};
use crate::domain::Document;
use crate::error::KiraError;

pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?P<domain>[^/]+)/(?P<path>.+)$").expect("URL pattern compiles")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

pub trait RemoteFetcher: Send + Sync {
    /// Transport failures and timeouts are `Err`; any HTTP status is `Ok`.
    fn get(&self, url: &str) -> Result<FetchedResponse, KiraError>;
}

pub(crate) fn user_agent_headers() -> Result<HeaderMap, KiraError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("kira-md/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| KiraError::Http(err.to_string()))?,
    );
    Ok(headers)
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, KiraError> {
        let client = Client::builder()
            .default_headers(user_agent_headers()?)
            .timeout(timeout)
            .build()
            .map_err(|err| KiraError::Http(err.to_string()))?;
        Ok(Self { client })
    }
}

impl RemoteFetcher for HttpFetcher {
    fn get(&self, url: &str) -> Result<FetchedResponse, KiraError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| KiraError::Http(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|err| KiraError::Http(err.to_string()))?;
        Ok(FetchedResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum FetchFailure {
    #[error("HttpResponseNotOk")]
    HttpResponseNotOk,
    #[error("HttpResponseNotJson")]
    HttpResponseNotJson,
}

/// `{"result": <object>}` or `{"error": "<failure>"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationOutcome {
    Result(DrsObjectIn),
    Error(FetchFailure),
}

impl RegistrationOutcome {
    pub fn object(&self) -> Option<&DrsObjectIn> {
        match self {
            RegistrationOutcome::Result(object) => Some(object),
            RegistrationOutcome::Error(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRegistration {
    pub url: String,
    #[serde(flatten)]
    pub outcome: Option<RegistrationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected: Option<String>,
}

pub fn url_to_name(url: &str) -> Result<String, KiraError> {
    let captures = URL_PATTERN
        .captures(url)
        .ok_or_else(|| KiraError::InvalidUrl(url.to_string()))?;
    let domain = captures["domain"].split('.').rev().collect::<Vec<_>>().join(".");
    Ok(format!("{domain}__{}", captures["path"].replace('/', ".")))
}

pub fn response_to_json(response: &FetchedResponse) -> Result<Value, FetchFailure> {
    if response.status != 200 {
        return Err(FetchFailure::HttpResponseNotOk);
    }
    serde_json::from_slice(&response.body).map_err(|_| FetchFailure::HttpResponseNotJson)
}

pub fn json_data_from_url_to_file(
    json: &Value,
    url: &str,
    save_dir: &Path,
) -> Result<PathBuf, KiraError> {
    let path = save_dir.join(url_to_name(url)?);
    let file = File::create(&path)
        .map_err(|err| KiraError::Filesystem(format!("create {}: {err}", path.display())))?;
    write_json(file, json)
        .map_err(|err| KiraError::Filesystem(format!("write {}: {err}", path.display())))?;
    Ok(path)
}

fn write_json<W: Write>(out: W, json: &Value) -> io::Result<()> {
    let mut writer = BufWriter::new(out);
    serde_json::to_writer(&mut writer, json)?;
    writer.flush()
}

pub struct Registrar<'f, F: RemoteFetcher + ?Sized> {
    fetcher: &'f F,
    scratch_root: Option<PathBuf>,
}

impl<'f, F: RemoteFetcher + ?Sized> Registrar<'f, F> {
    pub fn new(fetcher: &'f F) -> Self {
        Self {
            fetcher,
            scratch_root: None,
        }
    }

    pub fn with_scratch_root(mut self, root: Option<PathBuf>) -> Self {
        self.scratch_root = root;
        self
    }

    pub fn drs_object_in_for(&self, url: &str) -> Result<RegistrationOutcome, KiraError> {
        url_to_name(url)?;
        let mut builder = tempfile::Builder::new();
        builder.prefix("kira-md-");
        let scratch = match &self.scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|err| KiraError::Filesystem(format!("scratch directory: {err}")))?;

        let response = match self.fetcher.get(url) {
            Ok(response) => response,
            Err(err) => {
                warn!(url, error = %err, "fetch failed");
                return Ok(RegistrationOutcome::Error(FetchFailure::HttpResponseNotOk));
            }
        };
        let json = match response_to_json(&response) {
            Ok(json) => json,
            Err(failure) => {
                warn!(url, status = response.status, %failure, "fetch rejected");
                return Ok(RegistrationOutcome::Error(failure));
            }
        };

        let path = json_data_from_url_to_file(&json, url, scratch.path())?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().replace(':', "-"))
            .unwrap_or_default();
        let metadata = drs_metadata_for(&path, Some(access_url_base(url, &name)))?;
        let object = DrsObjectIn::try_from(metadata)?;
        debug!(url, name = %name, size = object.size, "described remote document");
        Ok(RegistrationOutcome::Result(object))
    }

    pub fn register_many<I, U>(&self, urls: I) -> Vec<BatchRegistration>
    where
        I: IntoIterator<Item = U>,
        U: AsRef<str>,
    {
        let mut out = Vec::new();
        for url in urls {
            let url = url.as_ref();
            let entry = match self.drs_object_in_for(url) {
                Ok(outcome) => BatchRegistration {
                    url: url.to_string(),
                    outcome: Some(outcome),
                    rejected: None,
                },
                Err(err) => {
                    warn!(url, error = %err, "registration rejected");
                    BatchRegistration {
                        url: url.to_string(),
                        outcome: None,
                        rejected: Some(err.to_string()),
                    }
                }
            };
            out.push(entry);
        }
        let registered = out
            .iter()
            .filter(|entry| entry.outcome.as_ref().and_then(RegistrationOutcome::object).is_some())
            .count();
        info!(total = out.len(), registered, "batch registration");
        out
    }
}

pub trait ObjectRegistry: Send + Sync {
    fn create_object(&self, object: &DrsObjectIn) -> Result<Value, KiraError>;

    fn get_object_bytes(&self, drs_id: &str) -> Result<Vec<u8>, KiraError>;

    /// Adds `tag` to the object's types. `Null` when it was already present.
    fn ensure_object_tag(&self, drs_id: &str, tag: &str) -> Result<Value, KiraError>;

    fn upload(
        &self,
        url: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<FetchedResponse, KiraError>;
}

#[derive(Clone)]
pub struct HttpObjectRegistry {
    client: Client,
    base_url: String,
}

impl HttpObjectRegistry {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, KiraError> {
        let client = Client::builder()
            .default_headers(user_agent_headers()?)
            .timeout(timeout)
            .build()
            .map_err(|err| KiraError::Http(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn object_url(&self, drs_id: &str, suffix: &str) -> String {
        format!("{}/objects/{drs_id}{suffix}", self.base_url)
    }

    fn send_json(&self, request: RequestBuilder) -> Result<Value, KiraError> {
        let response = request
            .send()
            .map_err(|err| KiraError::Http(err.to_string()))?;
        let response = check_status(response)?;
        response.json().map_err(|err| KiraError::Http(err.to_string()))
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, KiraError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| KiraError::Http(err.to_string()))?;
        let bytes = check_status(response)?
            .bytes()
            .map_err(|err| KiraError::Http(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

fn check_status(response: Response) -> Result<Response, KiraError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .unwrap_or_else(|_| "object registry request failed".to_string());
    Err(KiraError::HttpStatus { status, message })
}

impl ObjectRegistry for HttpObjectRegistry {
    fn create_object(&self, object: &DrsObjectIn) -> Result<Value, KiraError> {
        self.send_json(self.client.post(format!("{}/objects", self.base_url)).json(object))
    }

    fn get_object_bytes(&self, drs_id: &str) -> Result<Vec<u8>, KiraError> {
        let object = self.send_json(self.client.get(self.object_url(drs_id, "")))?;
        let methods = object
            .get("access_methods")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for method in methods {
            if let Some(url) = method.pointer("/access_url/url").and_then(Value::as_str) {
                return self.download(url);
            }
            if let Some(access_id) = method.get("access_id").and_then(Value::as_str) {
                let access = self.send_json(
                    self.client
                        .get(self.object_url(drs_id, &format!("/access/{access_id}"))),
                )?;
                let url = access.get("url").and_then(Value::as_str).ok_or_else(|| {
                    KiraError::InvalidDrsObject(format!("access {access_id} of {drs_id} has no url"))
                })?;
                return self.download(url);
            }
        }
        Err(KiraError::InvalidDrsObject(format!(
            "{drs_id} has no usable access method"
        )))
    }

    fn ensure_object_tag(&self, drs_id: &str, tag: &str) -> Result<Value, KiraError> {
        let types = self.send_json(self.client.get(self.object_url(drs_id, "/types")))?;
        let mut ids = types
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(|entry| entry.get("id").and_then(Value::as_str))
            .map(str::to_string)
            .collect::<Vec<_>>();
        if ids.iter().any(|id| id == tag) {
            return Ok(Value::Null);
        }
        ids.push(tag.to_string());
        self.send_json(self.client.put(self.object_url(drs_id, "/types")).json(&ids))
    }

    fn upload(
        &self,
        url: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<FetchedResponse, KiraError> {
        let response = self
            .client
            .put(url)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .map_err(|err| KiraError::Http(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|err| KiraError::Http(err.to_string()))?;
        Ok(FetchedResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedObject {
    pub url: String,
    pub response: Value,
}

pub fn create_drs_object_for<R: ObjectRegistry + ?Sized>(
    url: &str,
    object: &DrsObjectIn,
    registry: &R,
) -> Result<CreatedObject, KiraError> {
    let response = registry.create_object(object)?;
    Ok(CreatedObject {
        url: url.to_string(),
        response,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSubmission {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<F: RemoteFetcher + ?Sized> Registrar<'_, F> {
    pub fn submit_many<I, U, R>(&self, urls: I, registry: &R) -> Vec<BatchSubmission>
    where
        I: IntoIterator<Item = U>,
        U: AsRef<str>,
        R: ObjectRegistry + ?Sized,
    {
        let mut out = Vec::new();
        for url in urls {
            let url = url.as_ref();
            let result = self.drs_object_in_for(url).and_then(|outcome| match outcome {
                RegistrationOutcome::Result(object) => {
                    create_drs_object_for(url, &object, registry).map(|created| Ok(created.response))
                }
                RegistrationOutcome::Error(failure) => Ok(Err(failure.to_string())),
            });
            let (response, error) = match result {
                Ok(Ok(response)) => (Some(response), None),
                Ok(Err(failure)) => (None, Some(failure)),
                Err(err) => (None, Some(err.to_string())),
            };
            if let Some(error) = &error {
                warn!(url, error = %error, "submission failed");
            }
            out.push(BatchSubmission {
                url: url.to_string(),
                response,
                error,
            });
        }
        let submitted = out.iter().filter(|entry| entry.response.is_some()).count();
        info!(total = out.len(), submitted, "batch submission");
        out
    }
}

pub fn put_object<R: ObjectRegistry + ?Sized>(
    registry: &R,
    path: &Path,
    url: &str,
    mime_type: Option<&str>,
) -> Result<FetchedResponse, KiraError> {
    let content_type = mime_type
        .or_else(|| guess_mime_type(path))
        .unwrap_or(OCTET_STREAM);
    let body = fs::read(path)
        .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", path.display())))?;
    debug!(url, content_type, size = body.len(), "uploading object");
    registry.upload(url, body, content_type)
}

pub const DEFAULT_METADATA_TAGS: &[&str] = &["schema#/definitions/Database", "metadata-in"];

pub fn ensure_metadata_tags_for<R: ObjectRegistry + ?Sized>(
    drs_id: &str,
    registry: &R,
    tags: &[&str],
) -> Result<Document, KiraError> {
    let bytes = registry.get_object_bytes(drs_id)?;
    let docs = match serde_json::from_slice(&bytes) {
        Ok(Value::Object(docs)) => docs,
        _ => {
            return Err(KiraError::InvalidDrsObject(format!(
                "{drs_id} is not a JSON object of collections"
            )));
        }
    };
    let (_, errors) = specialize_activity_set_docs(docs);
    if let Some((key, messages)) = errors.into_iter().next() {
        return Err(KiraError::ValidationErrors { key, messages });
    }
    let mut results = Document::new();
    for tag in tags {
        let result = registry.ensure_object_tag(drs_id, tag)?;
        results.insert((*tag).to_string(), result);
    }
    info!(drs_id, tags = tags.len(), "metadata tags ensured");
    Ok(results)
}
