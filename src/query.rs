use std::cmp::Ordering;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cursor::{PageCursor, query_fingerprint};
use crate::domain::{ID_FIELD, Record, is_valid_attribute_path};
use crate::error::KiraError;
use crate::filter::Filter;
use crate::schema;
use crate::sort::SortSpec;
use crate::store::DocumentStore;

pub const DEFAULT_PAGE_SIZE: usize = 25;
pub const MAX_PAGE_SIZE: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindRequest {
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub page_token: Option<String>,
    #[serde(default)]
    pub fields: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FindMeta {
    pub collection: String,
    pub count: usize,
    pub page_size: usize,
    pub db_response_time_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FindResponse {
    pub meta: FindMeta,
    pub results: Vec<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

pub struct QueryEngine<'s, S: DocumentStore + ?Sized> {
    store: &'s S,
    limits: QueryLimits,
}

impl<'s, S: DocumentStore + ?Sized> QueryEngine<'s, S> {
    pub fn new(store: &'s S, limits: QueryLimits) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> QueryLimits {
        self.limits
    }

    pub fn find(&self, collection: &str, request: &FindRequest) -> Result<FindResponse, KiraError> {
        if !schema::is_queryable(collection) {
            return Err(KiraError::UnknownCollection(collection.to_string()));
        }
        let filter: Filter = request.filter.as_deref().unwrap_or_default().parse()?;
        let sort: SortSpec = request.sort.as_deref().unwrap_or_default().parse()?;
        let fields = request.fields.as_deref().map(parse_fields).transpose()?;
        let page_size = self.page_size(request.page_size)?;
        let fingerprint = query_fingerprint(collection, filter.canonical(), &sort.canonical());
        let after = match request.page_token.as_deref() {
            Some(token) => {
                let cursor = PageCursor::decode(token)?;
                if cursor.query != fingerprint || cursor.after.len() != sort.keys().len() {
                    return Err(KiraError::InvalidPageToken(
                        "token was issued for a different query".to_string(),
                    ));
                }
                Some(cursor.after)
            }
            None => None,
        };

        let started = Instant::now();
        let mut matches = self.store.find(collection, &filter, None)?;
        sort.sort_records(&mut matches);
        let count = matches.len();

        let start = match &after {
            Some(after) => matches.partition_point(|record| {
                sort.compare_values(&sort.values_of(record.as_map()), after) != Ordering::Greater
            }),
            None => 0,
        };
        let end = (start + page_size).min(count);
        let next_page_token = if end < count {
            let last = &matches[end - 1];
            Some(
                PageCursor {
                    query: fingerprint,
                    after: sort.values_of(last.as_map()),
                }
                .encode()?,
            )
        } else {
            None
        };

        let results = matches
            .drain(start..end)
            .map(|record| {
                let record = record.strip_storage_fields();
                match &fields {
                    Some(fields) => record.project(fields),
                    None => record,
                }
            })
            .collect::<Vec<_>>();
        let elapsed = started.elapsed().as_millis() as u64;
        info!(
            collection,
            count,
            returned = results.len(),
            elapsed_ms = elapsed,
            "find"
        );
        debug!(filter = filter.canonical(), sort = %sort.canonical(), "find query");

        Ok(FindResponse {
            meta: FindMeta {
                collection: collection.to_string(),
                count,
                page_size,
                db_response_time_ms: elapsed,
            },
            results,
            next_page_token,
        })
    }

    fn page_size(&self, requested: Option<usize>) -> Result<usize, KiraError> {
        let size = requested.unwrap_or(self.limits.default_page_size);
        if size == 0 || size > self.limits.max_page_size {
            return Err(KiraError::PageSizeOutOfRange {
                requested: size,
                max: self.limits.max_page_size,
            });
        }
        Ok(size)
    }
}

pub fn parse_fields(raw: &str) -> Result<Vec<String>, KiraError> {
    let mut fields = Vec::new();
    for field in raw.split(',').map(str::trim) {
        if !is_valid_attribute_path(field) {
            return Err(KiraError::InvalidFields(format!("invalid attribute `{field}`")));
        }
        if field != ID_FIELD && !fields.iter().any(|existing| existing == field) {
            fields.push(field.to_string());
        }
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::store::MemoryStore;

    fn store() -> MemoryStore {
        let mut store = MemoryStore::new();
        for (id, depth) in [("nmdc:bsm-3", 5), ("nmdc:bsm-1", 12), ("nmdc:bsm-2", 5)] {
            store
                .insert_value(
                    "biosample_set",
                    json!({"_id": {"$oid": id}, "id": id, "depth": depth, "name": id}),
                )
                .unwrap();
        }
        store
    }

    #[test]
    fn unknown_collection_is_not_found() {
        let store = store();
        let engine = QueryEngine::new(&store, QueryLimits::default());
        let err = engine.find("nope_set", &FindRequest::default()).unwrap_err();
        assert!(err.is_not_found());
        let err = engine.find("alldocs", &FindRequest::default()).unwrap_err();
        assert_matches!(err, KiraError::UnknownCollection(_));
    }

    #[test]
    fn page_size_above_maximum_is_rejected() {
        let store = store();
        let engine = QueryEngine::new(&store, QueryLimits::default());
        let request = FindRequest {
            page_size: Some(MAX_PAGE_SIZE + 1),
            ..FindRequest::default()
        };
        assert_matches!(
            engine.find("biosample_set", &request),
            Err(KiraError::PageSizeOutOfRange { requested: 2001, max: 2000 })
        );
    }

    #[test]
    fn sorted_results_are_stripped_and_projected() {
        let store = store();
        let engine = QueryEngine::new(&store, QueryLimits::default());
        let request = FindRequest {
            sort: Some("depth:desc".to_string()),
            fields: Some("depth".to_string()),
            ..FindRequest::default()
        };
        let response = engine.find("biosample_set", &request).unwrap();
        let ids = response.results.iter().map(Record::id).collect::<Vec<_>>();
        assert_eq!(ids, vec!["nmdc:bsm-1", "nmdc:bsm-2", "nmdc:bsm-3"]);
        assert!(response.results.iter().all(|r| !r.contains_key("_id")));
        assert!(response.results.iter().all(|r| !r.contains_key("name")));
        assert!(response.next_page_token.is_none());
        assert_eq!(response.meta.count, 3);
    }

    #[test]
    fn token_from_other_query_is_rejected() {
        let store = store();
        let engine = QueryEngine::new(&store, QueryLimits::default());
        let first = engine
            .find(
                "biosample_set",
                &FindRequest {
                    page_size: Some(1),
                    ..FindRequest::default()
                },
            )
            .unwrap();
        let token = first.next_page_token.unwrap();
        let err = engine
            .find(
                "biosample_set",
                &FindRequest {
                    sort: Some("depth".to_string()),
                    page_token: Some(token),
                    page_size: Some(1),
                    ..FindRequest::default()
                },
            )
            .unwrap_err();
        assert_matches!(err, KiraError::InvalidPageToken(_));
    }

    #[test]
    fn fields_parsing() {
        assert_eq!(parse_fields("id, name,name").unwrap(), vec!["name"]);
        assert_matches!(parse_fields("name,"), Err(KiraError::InvalidFields(_)));
    }
}
