use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{Document, ID_FIELD};
use crate::schema::{ACTIVITY_SET, type_collections};

pub type ValidationErrors = BTreeMap<String, Vec<String>>;

pub fn specialize_activity_set_docs(mut docs: Document) -> (Document, ValidationErrors) {
    let mut errors = ValidationErrors::new();
    let Some(activities) = docs.shift_remove(ACTIVITY_SET) else {
        return (docs, errors);
    };

    let activities = match activities {
        Value::Array(items) => items,
        other => {
            errors.entry(ACTIVITY_SET.to_string()).or_default().push(format!(
                "activity_set must be a list, got {}",
                kind_of(&other)
            ));
            return (docs, errors);
        }
    };

    let type_collections = type_collections();
    let mut moved = 0usize;
    for doc in activities {
        let doc_type = doc.get("type").and_then(Value::as_str);
        let Some(collection) = doc_type.and_then(|t| type_collections.get(t).copied()) else {
            let id = doc
                .get(ID_FIELD)
                .and_then(Value::as_str)
                .unwrap_or("<id missing>");
            let message = format!(
                "activity_set doc {id} has type {}, which is not in NMDC Schema. \
                 Note: Case is sensitive.",
                doc_type.unwrap_or("<type missing>")
            );
            warn!(id, "unrecognised activity type");
            errors.entry(ACTIVITY_SET.to_string()).or_default().push(message);
            continue;
        };
        match docs
            .entry(collection.to_string())
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            Value::Array(items) => items.push(doc),
            slot => *slot = Value::Array(vec![slot.take(), doc]),
        }
        moved += 1;
    }
    debug!(moved, rejected = errors.values().map(Vec::len).sum::<usize>(), "specialized activity_set");
    (docs, errors)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
