use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::KiraError;

pub type Document = Map<String, Value>;

pub const STORAGE_ID_FIELD: &str = "_id";

pub const ID_FIELD: &str = "id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Record(Document);

impl Record {
    pub fn id(&self) -> &str {
        // Constructors guarantee a string id.
        self.0
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn as_map(&self) -> &Document {
        &self.0
    }

    pub fn into_map(self) -> Document {
        self.0
    }

    pub fn get_path(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.0, path)
    }

    pub fn id_list(&self, key: &str) -> Vec<&str> {
        match self.0.get(key) {
            Some(Value::String(value)) => vec![value.as_str()],
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub fn strip_storage_fields(mut self) -> Self {
        self.0.shift_remove(STORAGE_ID_FIELD);
        self
    }

    pub fn project(&self, fields: &[String]) -> Record {
        let mut out = Map::new();
        out.insert(ID_FIELD.to_string(), Value::String(self.id().to_string()));
        for field in fields {
            if field == ID_FIELD {
                continue;
            }
            if let Some(value) = lookup_path(&self.0, field) {
                insert_path(&mut out, field, value.clone());
            }
        }
        Record(out)
    }
}

impl Deref for Record {
    type Target = Document;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<Map<String, Value>> for Record {
    type Error = KiraError;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        match map.get(ID_FIELD) {
            Some(Value::String(_)) => Ok(Self(map)),
            _ => Err(KiraError::MissingId(
                Value::Object(map).to_string().chars().take(120).collect(),
            )),
        }
    }
}

impl TryFrom<Value> for Record {
    type Error = KiraError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Record::try_from(map),
            other => Err(KiraError::MissingId(other.to_string())),
        }
    }
}

impl From<Record> for Map<String, Value> {
    fn from(record: Record) -> Self {
        record.0
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Follows a dotted path through nested objects. Numeric segments index arrays.
pub fn lookup_path<'a>(map: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = map.get(first)?;
    for segment in segments {
        current = match current {
            Value::Object(inner) => inner.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

pub fn lookup_candidates<'a>(map: &'a Document, path: &str) -> Vec<&'a Value> {
    let segments = path.split('.').collect::<Vec<_>>();
    let mut out = Vec::new();
    if let Some((first, rest)) = segments.split_first() {
        if let Some(value) = map.get(*first) {
            collect_candidates(value, rest, &mut out);
        }
    }
    out
}

fn collect_candidates<'a>(value: &'a Value, rest: &[&str], out: &mut Vec<&'a Value>) {
    match rest.split_first() {
        None => {
            out.push(value);
            if let Value::Array(items) = value {
                out.extend(items.iter());
            }
        }
        Some((segment, tail)) => match value {
            Value::Object(inner) => {
                if let Some(next) = inner.get(*segment) {
                    collect_candidates(next, tail, out);
                }
            }
            Value::Array(items) => {
                if let Ok(index) = segment.parse::<usize>() {
                    if let Some(next) = items.get(index) {
                        collect_candidates(next, tail, out);
                    }
                } else {
                    for item in items {
                        collect_candidates(item, rest, out);
                    }
                }
            }
            _ => {}
        },
    }
}

pub fn insert_path(map: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, tail)) => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(inner) = entry {
                insert_path(inner, tail, value);
            }
        }
    }
}

pub fn remove_path(map: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            map.shift_remove(path);
        }
        Some((head, tail)) => {
            if let Some(Value::Object(inner)) = map.get_mut(head) {
                remove_path(inner, tail);
            }
        }
    }
}

pub fn is_valid_attribute_path(path: &str) -> bool {
    !path.is_empty()
        && path.split('.').all(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(ch) if ch.is_ascii_alphanumeric() || ch == '_' => {
                    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
                }
                _ => false,
            }
        })
}
