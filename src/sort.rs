use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Document, ID_FIELD, Record, is_valid_attribute_path, lookup_path};
use crate::error::KiraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Asc => write!(f, "asc"),
            Direction::Desc => write!(f, "desc"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub path: String,
    pub direction: Direction,
}

/// A sort key value captured from a record; `Missing` sorts before `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SortValue {
    Missing,
    Present(Value),
}

impl SortValue {
    fn as_option(&self) -> Option<&Value> {
        match self {
            SortValue::Missing => None,
            SortValue::Present(value) => Some(value),
        }
    }
}

/// Ordered sort keys. `id` ascending is always the final tie-breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    keys: Vec<SortKey>,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl SortSpec {
    pub fn new(mut keys: Vec<SortKey>) -> Self {
        if !keys.iter().any(|key| key.path == ID_FIELD) {
            keys.push(SortKey {
                path: ID_FIELD.to_string(),
                direction: Direction::Asc,
            });
        }
        Self { keys }
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub fn from_json(value: &Value) -> Result<Self, KiraError> {
        let object = value
            .as_object()
            .ok_or_else(|| KiraError::InvalidSort("$sort expects an object".to_string()))?;
        if object.is_empty() {
            return Err(KiraError::InvalidSort("$sort must name at least one field".to_string()));
        }
        let mut keys = Vec::with_capacity(object.len());
        for (path, direction) in object {
            check_path(path)?;
            let direction = match direction.as_i64() {
                Some(1) => Direction::Asc,
                Some(-1) => Direction::Desc,
                _ => {
                    return Err(KiraError::InvalidSort(format!(
                        "direction for `{path}` must be 1 or -1"
                    )));
                }
            };
            keys.push(SortKey {
                path: path.clone(),
                direction,
            });
        }
        Ok(Self::new(keys))
    }

    pub fn values_of(&self, doc: &Document) -> Vec<SortValue> {
        self.keys
            .iter()
            .map(|key| match lookup_path(doc, &key.path) {
                Some(value) => SortValue::Present(value.clone()),
                None => SortValue::Missing,
            })
            .collect()
    }

    pub fn compare_values(&self, left: &[SortValue], right: &[SortValue]) -> Ordering {
        for ((key, a), b) in self.keys.iter().zip(left).zip(right) {
            let ordering = compare_json(a.as_option(), b.as_option());
            let ordering = match key.direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    pub fn compare(&self, left: &Document, right: &Document) -> Ordering {
        for key in &self.keys {
            let ordering = compare_json(lookup_path(left, &key.path), lookup_path(right, &key.path));
            let ordering = match key.direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    pub fn sort_docs(&self, docs: &mut [Document]) {
        docs.sort_by(|a, b| self.compare(a, b));
    }

    pub fn sort_records(&self, records: &mut [Record]) {
        records.sort_by(|a, b| self.compare(a.as_map(), b.as_map()));
    }

    pub fn canonical(&self) -> String {
        self.keys
            .iter()
            .map(|key| format!("{}:{}", key.path, key.direction))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl FromStr for SortSpec {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        let mut keys = Vec::new();
        for term in trimmed.split(',') {
            let term = term.trim();
            let (path, direction) = match term.split_once(':') {
                Some((path, dir)) => {
                    let direction = match dir.trim().to_ascii_lowercase().as_str() {
                        "asc" => Direction::Asc,
                        "desc" => Direction::Desc,
                        other => {
                            return Err(KiraError::InvalidSort(format!(
                                "unknown direction `{other}` for `{path}`; use asc or desc"
                            )));
                        }
                    };
                    (path.trim(), direction)
                }
                None => (term, Direction::Asc),
            };
            check_path(path)?;
            if keys.iter().any(|key: &SortKey| key.path == path) {
                return Err(KiraError::InvalidSort(format!("`{path}` listed twice")));
            }
            keys.push(SortKey {
                path: path.to_string(),
                direction,
            });
        }
        Ok(Self::new(keys))
    }
}

fn check_path(path: &str) -> Result<(), KiraError> {
    if is_valid_attribute_path(path) {
        Ok(())
    } else {
        Err(KiraError::InvalidSort(format!("invalid attribute `{path}`")))
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Bool(_)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Object(_)) => 6,
    }
}

pub fn compare_json(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    let rank = type_rank(left).cmp(&type_rank(right));
    if rank != Ordering::Equal {
        return rank;
    }
    match (left, right) {
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => compare_numbers(a, b),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Array(a)), Some(Value::Array(b))) => {
            for (x, y) in a.iter().zip(b) {
                let ordering = compare_json(Some(x), Some(y));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.len().cmp(&b.len())
        }
        (Some(Value::Object(a)), Some(Value::Object(b))) => {
            for ((ka, va), (kb, vb)) in a.iter().zip(b) {
                let ordering = ka.cmp(kb).then_with(|| compare_json(Some(va), Some(vb)));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.len().cmp(&b.len())
        }
        _ => Ordering::Equal,
    }
}

fn compare_numbers(a: &serde_json::Number, b: &serde_json::Number) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x.cmp(&y);
    }
    let x = a.as_f64().unwrap_or(f64::NAN);
    let y = b.as_f64().unwrap_or(f64::NAN);
    x.total_cmp(&y)
}
