use std::collections::BTreeMap;
use std::fs;
use std::io::{BufReader, Read};

use camino::Utf8Path;
use flate2::read::GzDecoder;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::Record;
use crate::error::KiraError;
use crate::filter::Filter;

pub trait DocumentStore: Send + Sync {
    fn find(
        &self,
        collection: &str,
        filter: &Filter,
        fields: Option<&[String]>,
    ) -> Result<Vec<Record>, KiraError>;

    fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        fields: Option<&[String]>,
    ) -> Result<Option<Record>, KiraError> {
        Ok(self.find(collection, filter, fields)?.into_iter().next())
    }

    fn collection_names(&self) -> Vec<String>;

    fn has_collection(&self, name: &str) -> bool {
        self.collection_names().iter().any(|existing| existing == name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    collections: BTreeMap<String, Vec<Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, collection: &str, record: Record) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(record);
    }

    pub fn insert_value(&mut self, collection: &str, value: Value) -> Result<(), KiraError> {
        let record = Record::try_from(value)?;
        self.insert(collection, record);
        Ok(())
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, Vec::len)
    }

    pub fn from_database_value(value: Value) -> Result<Self, KiraError> {
        let Value::Object(collections) = value else {
            return Err(KiraError::StoreLoad(
                "database document must be a JSON object of collections".to_string(),
            ));
        };
        let mut store = Self::new();
        for (name, docs) in collections {
            store.load_collection_value(&name, docs)?;
        }
        Ok(store)
    }

    pub fn load(path: &Utf8Path) -> Result<Self, KiraError> {
        if path.is_file() {
            let value = read_json(path)?;
            return Self::from_database_value(value);
        }
        if !path.is_dir() {
            return Err(KiraError::StoreLoad(format!("no data at {path}")));
        }
        let mut store = Self::new();
        let mut entries = path
            .read_dir_utf8()
            .map_err(|err| KiraError::StoreLoad(format!("read {path}: {err}")))?
            .filter_map(Result::ok)
            .map(|entry| entry.path().to_owned())
            .collect::<Vec<_>>();
        entries.sort();
        for entry in entries {
            let Some(file_name) = entry.file_name() else {
                continue;
            };
            let collection = file_name
                .strip_suffix(".json.gz")
                .or_else(|| file_name.strip_suffix(".json"));
            let Some(collection) = collection else {
                debug!(file = %entry, "skipping non-JSON file in data directory");
                continue;
            };
            let value = read_json(&entry)?;
            store.load_collection_value(collection, value)?;
        }
        Ok(store)
    }

    fn load_collection_value(&mut self, name: &str, docs: Value) -> Result<(), KiraError> {
        let Value::Array(docs) = docs else {
            return Err(KiraError::StoreLoad(format!(
                "collection {name} must be a JSON array"
            )));
        };
        let mut skipped = 0usize;
        for doc in docs {
            match Record::try_from(doc) {
                Ok(record) => self.insert(name, record),
                Err(err) => {
                    skipped += 1;
                    debug!(collection = name, error = %err, "skipping record");
                }
            }
        }
        if skipped > 0 {
            warn!(collection = name, skipped, "records without a string id were skipped");
        }
        self.collections.entry(name.to_string()).or_default();
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn find(
        &self,
        collection: &str,
        filter: &Filter,
        fields: Option<&[String]>,
    ) -> Result<Vec<Record>, KiraError> {
        let Some(records) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(records
            .iter()
            .filter(|record| filter.matches(record.as_map()))
            .map(|record| match fields {
                Some(fields) => record.project(fields),
                None => record.clone(),
            })
            .collect())
    }

    fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        fields: Option<&[String]>,
    ) -> Result<Option<Record>, KiraError> {
        let Some(records) = self.collections.get(collection) else {
            return Ok(None);
        };
        Ok(records
            .iter()
            .find(|record| filter.matches(record.as_map()))
            .map(|record| match fields {
                Some(fields) => record.project(fields),
                None => record.clone(),
            }))
    }

    fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }
}

fn read_json(path: &Utf8Path) -> Result<Value, KiraError> {
    let file = fs::File::open(path.as_std_path())
        .map_err(|err| KiraError::StoreLoad(format!("open {path}: {err}")))?;
    let reader: Box<dyn Read> = if path.as_str().ends_with(".gz") {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    serde_json::from_reader(reader).map_err(|err| KiraError::StoreLoad(format!("{path}: {err}")))
}
