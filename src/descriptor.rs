use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::domain::Document;
use crate::error::KiraError;
use crate::fingerprint::sha256_hex;

pub const SHA256_CHECKSUM: &str = "sha-256";
pub const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    #[serde(rename = "type")]
    pub kind: String,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessMethod {
    #[serde(rename = "type", default = "default_access_type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_url: Option<AccessUrl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

fn default_access_type() -> String {
    "https".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrsObjectIn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub size: u64,
    pub created_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub checksums: Vec<Checksum>,
    pub access_methods: Vec<AccessMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
}

impl DrsObjectIn {
    pub fn sha256(&self) -> Option<&str> {
        self.checksums
            .iter()
            .find(|checksum| checksum.kind == SHA256_CHECKSUM)
            .map(|checksum| checksum.checksum.as_str())
    }

    fn validate(self) -> Result<Self, KiraError> {
        if self.checksums.is_empty() {
            return Err(KiraError::InvalidDrsObject(
                "at least one checksum is required".to_string(),
            ));
        }
        if self.access_methods.is_empty() {
            return Err(KiraError::InvalidDrsObject(
                "at least one access method is required".to_string(),
            ));
        }
        if let Some(method) = self
            .access_methods
            .iter()
            .find(|method| method.access_url.is_none() && method.access_id.is_none())
        {
            return Err(KiraError::InvalidDrsObject(format!(
                "{} access method needs an access_url or access_id",
                method.kind
            )));
        }
        Ok(self)
    }
}

impl TryFrom<Document> for DrsObjectIn {
    type Error = KiraError;

    fn try_from(map: Document) -> Result<Self, Self::Error> {
        let object: DrsObjectIn = serde_json::from_value(Value::Object(map))
            .map_err(|err| KiraError::InvalidDrsObject(err.to_string()))?;
        object.validate()
    }
}

pub fn drs_metadata_for(path: &Path, base: Option<Document>) -> Result<Document, KiraError> {
    let mut base = base.unwrap_or_default();
    let needs_stat = !base.contains_key("size") || !base.contains_key("created_time");
    let metadata = if needs_stat {
        Some(
            fs::metadata(path)
                .map_err(|err| KiraError::Filesystem(format!("stat {}: {err}", path.display())))?,
        )
    } else {
        None
    };

    if !base.contains_key("size") {
        let size = metadata.as_ref().map_or(0, fs::Metadata::len);
        base.insert("size".to_string(), Value::from(size));
    }
    if !base.contains_key("created_time") {
        let created = metadata
            .as_ref()
            .and_then(|meta| meta.created().or_else(|_| meta.modified()).ok())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(Utc::now);
        base.insert("created_time".to_string(), Value::from(created.to_rfc3339()));
    }
    if !base.contains_key("checksums") {
        let checksum = sha256_hex(path)?;
        base.insert(
            "checksums".to_string(),
            json!([{"type": SHA256_CHECKSUM, "checksum": checksum}]),
        );
    }
    if !base.contains_key("mime_type") {
        let mime = guess_mime_type(path).map_or(Value::Null, Value::from);
        base.insert("mime_type".to_string(), mime);
    }
    if !base.contains_key("name") {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        base.insert("name".to_string(), Value::from(name));
    }
    Ok(base)
}

pub fn access_url_base(url: &str, name: &str) -> Document {
    let mut base = Map::new();
    base.insert(
        "access_methods".to_string(),
        json!([{"access_url": {"url": url}}]),
    );
    base.insert("name".to_string(), Value::from(name));
    base
}

pub fn site_object_in_for(
    path: &Path,
    site_id: &str,
    object_id: &str,
    base: Option<Document>,
) -> Result<DrsObjectIn, KiraError> {
    let mut base = base.unwrap_or_default();
    base.insert(
        "access_methods".to_string(),
        json!([{"access_id": format!("{site_id}:{object_id}")}]),
    );
    DrsObjectIn::try_from(drs_metadata_for(path, Some(base))?)
}

pub fn guess_mime_type(path: &Path) -> Option<&'static str> {
    let name = path.file_name()?.to_str()?.to_ascii_lowercase();
    let ext = name.rsplit_once('.').map(|(_, ext)| ext)?;
    let mime = match ext {
        "json" => "application/json",
        "jsonl" => "application/jsonl",
        "txt" | "log" => "text/plain",
        "tsv" | "tab" => "text/tab-separated-values",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        "yaml" | "yml" => "application/yaml",
        "gz" | "tgz" => "application/gzip",
        "zip" => "application/zip",
        "bz2" => "application/x-bzip2",
        "7z" => "application/x-7z-compressed",
        "tar" => "application/x-tar",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tif" | "tiff" => "image/tiff",
        "svg" => "image/svg+xml",
        _ => return None,
    };
    Some(mime)
}
