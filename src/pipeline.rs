use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::domain::{
    Document, ID_FIELD, insert_path, is_valid_attribute_path, lookup_candidates, lookup_path,
    remove_path,
};
use crate::error::KiraError;
use crate::filter::Filter;
use crate::schema;
use crate::sort::{SortSpec, compare_json};
use crate::store::DocumentStore;

const READ_VERBS: &[&str] = &[
    "$match", "$project", "$sort", "$skip", "$limit", "$unwind", "$count", "$lookup",
];
const WRITE_VERBS: &[&str] = &["$out", "$merge"];

/// Documents a pipeline may hold between stages, `$lookup` matches included.
pub const MAX_WORKING_DOCUMENTS: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineFindRequest {
    pub pipeline_spec: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineMeta {
    pub description: String,
    pub collection: String,
    pub stages: usize,
    pub count: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineFindResponse {
    pub meta: PipelineMeta,
    pub results: Vec<Document>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    Include { fields: Vec<String>, keep_id: bool },
    Exclude(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub from: String,
    pub local_field: String,
    pub foreign_field: String,
    pub as_field: String,
}

#[derive(Debug, Clone)]
pub enum Stage {
    Match(Filter),
    Project(Projection),
    Sort(SortSpec),
    Skip(usize),
    Limit(usize),
    Unwind(String),
    Count(String),
    Lookup(Lookup),
}

impl Stage {
    pub fn verb(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Project(_) => "$project",
            Stage::Sort(_) => "$sort",
            Stage::Skip(_) => "$skip",
            Stage::Limit(_) => "$limit",
            Stage::Unwind(_) => "$unwind",
            Stage::Count(_) => "$count",
            Stage::Lookup(_) => "$lookup",
        }
    }

    fn parse(index: usize, value: &Value) -> Result<Self, KiraError> {
        let object = value.as_object().ok_or_else(|| {
            KiraError::InvalidPipeline(format!("stage {index} must be a JSON object"))
        })?;
        let mut entries = object.iter();
        let (verb, body) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => {
                return Err(KiraError::InvalidPipeline(format!(
                    "stage {index} must contain exactly one verb"
                )));
            }
        };
        let stage = match verb.as_str() {
            "$match" => Stage::Match(Filter::from_json(body).map_err(|err| stage_err(index, err))?),
            "$project" => Stage::Project(parse_projection(index, body)?),
            "$sort" => Stage::Sort(SortSpec::from_json(body).map_err(|err| stage_err(index, err))?),
            "$skip" => Stage::Skip(count_operand(index, verb, body)?),
            "$limit" => Stage::Limit(count_operand(index, verb, body)?),
            "$unwind" => Stage::Unwind(field_reference(index, verb, body)?),
            "$count" => {
                let name = body.as_str().filter(|name| is_valid_attribute_path(name));
                let name = name.filter(|name| !name.contains('.')).ok_or_else(|| {
                    KiraError::InvalidPipeline(format!(
                        "stage {index}: $count expects a plain field name"
                    ))
                })?;
                Stage::Count(name.to_string())
            }
            "$lookup" => Stage::Lookup(parse_lookup(index, body)?),
            other if WRITE_VERBS.contains(&other) => {
                return Err(KiraError::InvalidPipeline(format!(
                    "stage {index}: `{other}` writes to the database; pipelines are read-only"
                )));
            }
            other => {
                return Err(KiraError::InvalidPipeline(format!(
                    "stage {index}: unknown verb `{other}`; expected one of {}",
                    READ_VERBS.join(", ")
                )));
            }
        };
        Ok(stage)
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    pub collection: String,
    pub stages: Vec<Stage>,
}

#[derive(Deserialize)]
struct RawPipeline {
    collection: String,
    pipeline: Vec<Value>,
}

impl FromStr for Pipeline {
    type Err = KiraError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let raw: RawPipeline = serde_json::from_str(spec).map_err(|err| {
            KiraError::InvalidPipeline(format!(
                "expected {{\"collection\": ..., \"pipeline\": [...]}}: {err}"
            ))
        })?;
        if !schema::is_queryable(&raw.collection) {
            return Err(KiraError::UnknownCollection(raw.collection));
        }
        let stages = raw
            .pipeline
            .iter()
            .enumerate()
            .map(|(index, value)| Stage::parse(index, value))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            collection: raw.collection,
            stages,
        })
    }
}

impl Pipeline {
    pub fn execute<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        cap: usize,
    ) -> Result<(Vec<Document>, bool), KiraError> {
        self.execute_within(store, cap, MAX_WORKING_DOCUMENTS)
    }

    pub fn execute_within<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        cap: usize,
        working_limit: usize,
    ) -> Result<(Vec<Document>, bool), KiraError> {
        let mut docs = load_collection(store, &self.collection)?;
        for (index, stage) in self.stages.iter().enumerate() {
            docs = apply_stage(store, index, stage, docs, working_limit)?;
        }
        let truncated = docs.len() > cap;
        if truncated {
            warn!(
                collection = %self.collection,
                produced = docs.len(),
                cap,
                "pipeline output truncated"
            );
            docs.truncate(cap);
        }
        Ok((docs, truncated))
    }
}

pub fn pipeline_find<S: DocumentStore + ?Sized>(
    store: &S,
    request: &PipelineFindRequest,
    cap: usize,
) -> Result<PipelineFindResponse, KiraError> {
    let pipeline: Pipeline = request.pipeline_spec.parse()?;
    info!(
        collection = %pipeline.collection,
        stages = pipeline.stages.len(),
        description = %request.description,
        "pipeline find"
    );
    let (results, truncated) = pipeline.execute(store, cap)?;
    Ok(PipelineFindResponse {
        meta: PipelineMeta {
            description: request.description.clone(),
            collection: pipeline.collection,
            stages: pipeline.stages.len(),
            count: results.len(),
            truncated,
        },
        results,
    })
}

fn load_collection<S: DocumentStore + ?Sized>(
    store: &S,
    collection: &str,
) -> Result<Vec<Document>, KiraError> {
    Ok(store
        .find(collection, &Filter::all(), None)?
        .into_iter()
        .map(|record| record.strip_storage_fields().into_map())
        .collect())
}

fn apply_stage<S: DocumentStore + ?Sized>(
    store: &S,
    index: usize,
    stage: &Stage,
    docs: Vec<Document>,
    limit: usize,
) -> Result<Vec<Document>, KiraError> {
    let out = match stage {
        Stage::Match(filter) => docs.into_iter().filter(|doc| filter.matches(doc)).collect(),
        Stage::Project(projection) => docs
            .into_iter()
            .map(|doc| apply_projection(projection, doc))
            .collect(),
        Stage::Sort(sort) => {
            let mut docs = docs;
            sort.sort_docs(&mut docs);
            docs
        }
        Stage::Skip(n) => docs.into_iter().skip(*n).collect(),
        Stage::Limit(n) => docs.into_iter().take(*n).collect(),
        Stage::Unwind(path) => {
            let mut out = Vec::with_capacity(docs.len());
            for doc in docs {
                out.extend(unwind(path, doc));
                if out.len() > limit {
                    return Err(over_limit(index, stage, limit));
                }
            }
            out
        }
        Stage::Count(name) => {
            let mut doc = Map::new();
            doc.insert(name.clone(), Value::from(docs.len()));
            vec![doc]
        }
        Stage::Lookup(lookup) => {
            let foreign = load_collection(store, &lookup.from)?;
            let mut held = docs.len();
            let mut out = Vec::with_capacity(docs.len());
            for doc in docs {
                let (doc, matched) = join(lookup, &foreign, doc);
                held += matched;
                if held > limit {
                    return Err(over_limit(index, stage, limit));
                }
                out.push(doc);
            }
            out
        }
    };
    Ok(out)
}

fn apply_projection(projection: &Projection, doc: Document) -> Document {
    match projection {
        Projection::Include { fields, keep_id } => {
            let mut out = Map::new();
            if *keep_id {
                if let Some(id) = doc.get(ID_FIELD) {
                    out.insert(ID_FIELD.to_string(), id.clone());
                }
            }
            for field in fields {
                if let Some(value) = lookup_path(&doc, field) {
                    insert_path(&mut out, field, value.clone());
                }
            }
            out
        }
        Projection::Exclude(fields) => {
            let mut doc = doc;
            for field in fields {
                remove_path(&mut doc, field);
            }
            doc
        }
    }
}

fn unwind(path: &str, doc: Document) -> Vec<Document> {
    match lookup_path(&doc, path).cloned() {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| {
                let mut copy = doc.clone();
                insert_path(&mut copy, path, item);
                copy
            })
            .collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(_) => vec![doc],
    }
}

fn join(lookup: &Lookup, foreign: &[Document], mut doc: Document) -> (Document, usize) {
    let local = lookup_candidates(&doc, &lookup.local_field)
        .into_iter()
        .filter(|value| !value.is_array())
        .cloned()
        .collect::<Vec<_>>();
    let matched = foreign
        .iter()
        .filter(|candidate| {
            lookup_candidates(candidate, &lookup.foreign_field)
                .into_iter()
                .any(|value| {
                    local
                        .iter()
                        .any(|local| compare_json(Some(local), Some(value)).is_eq())
                })
        })
        .cloned()
        .map(Value::Object)
        .collect::<Vec<_>>();
    let count = matched.len();
    insert_path(&mut doc, &lookup.as_field, Value::Array(matched));
    (doc, count)
}

fn over_limit(index: usize, stage: &Stage, limit: usize) -> KiraError {
    warn!(stage = index, verb = stage.verb(), limit, "pipeline working set exceeded");
    KiraError::InvalidPipeline(format!(
        "stage {index}: {} would hold more than {limit} documents; narrow it with an earlier $match or $limit",
        stage.verb()
    ))
}

fn stage_err(index: usize, err: KiraError) -> KiraError {
    KiraError::InvalidPipeline(format!("stage {index}: {err}"))
}

fn count_operand(index: usize, verb: &str, body: &Value) -> Result<usize, KiraError> {
    body.as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| {
            KiraError::InvalidPipeline(format!(
                "stage {index}: {verb} expects a non-negative integer"
            ))
        })
}

fn field_reference(index: usize, verb: &str, body: &Value) -> Result<String, KiraError> {
    body.as_str()
        .and_then(|value| value.strip_prefix('$'))
        .filter(|path| is_valid_attribute_path(path))
        .map(str::to_string)
        .ok_or_else(|| {
            KiraError::InvalidPipeline(format!(
                "stage {index}: {verb} expects a field reference like \"$field\""
            ))
        })
}

fn parse_projection(index: usize, body: &Value) -> Result<Projection, KiraError> {
    let object = body.as_object().filter(|object| !object.is_empty()).ok_or_else(|| {
        KiraError::InvalidPipeline(format!("stage {index}: $project expects a non-empty object"))
    })?;
    let mut include = Vec::new();
    let mut exclude = Vec::new();
    for (field, flag) in object {
        if !is_valid_attribute_path(field) {
            return Err(KiraError::InvalidPipeline(format!(
                "stage {index}: invalid attribute `{field}`"
            )));
        }
        let keep = match flag {
            Value::Bool(flag) => *flag,
            Value::Number(n) if n.as_i64() == Some(1) => true,
            Value::Number(n) if n.as_i64() == Some(0) => false,
            _ => {
                return Err(KiraError::InvalidPipeline(format!(
                    "stage {index}: projection flag for `{field}` must be 0 or 1"
                )));
            }
        };
        if keep {
            include.push(field.clone());
        } else {
            exclude.push(field.clone());
        }
    }
    if include.is_empty() {
        return Ok(Projection::Exclude(exclude));
    }
    match exclude.as_slice() {
        [] => Ok(Projection::Include {
            fields: include,
            keep_id: true,
        }),
        [only] if only == ID_FIELD => Ok(Projection::Include {
            fields: include,
            keep_id: false,
        }),
        _ => Err(KiraError::InvalidPipeline(format!(
            "stage {index}: $project cannot mix inclusion and exclusion"
        ))),
    }
}

fn parse_lookup(index: usize, body: &Value) -> Result<Lookup, KiraError> {
    let field = |name: &str| -> Result<String, KiraError> {
        body.get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                KiraError::InvalidPipeline(format!("stage {index}: $lookup requires `{name}`"))
            })
    };
    let lookup = Lookup {
        from: field("from")?,
        local_field: field("localField")?,
        foreign_field: field("foreignField")?,
        as_field: field("as")?,
    };
    if !schema::is_queryable(&lookup.from) {
        return Err(KiraError::InvalidPipeline(format!(
            "stage {index}: unknown collection `{}`",
            lookup.from
        )));
    }
    for path in [&lookup.local_field, &lookup.foreign_field, &lookup.as_field] {
        if !is_valid_attribute_path(path) {
            return Err(KiraError::InvalidPipeline(format!(
                "stage {index}: invalid attribute `{path}`"
            )));
        }
    }
    Ok(lookup)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_every_read_verb() {
        let spec = json!({
            "collection": "biosample_set",
            "pipeline": [
                {"$match": {"ecosystem": "Environmental"}},
                {"$lookup": {"from": "study_set", "localField": "part_of", "foreignField": "id", "as": "studies"}},
                {"$unwind": "$part_of"},
                {"$project": {"part_of": 1, "id": 0}},
                {"$sort": {"part_of": -1}},
                {"$skip": 1},
                {"$limit": 5},
                {"$count": "n"}
            ]
        });
        let pipeline: Pipeline = spec.to_string().parse().unwrap();
        let verbs = pipeline.stages.iter().map(Stage::verb).collect::<Vec<_>>();
        assert_eq!(
            verbs,
            vec!["$match", "$lookup", "$unwind", "$project", "$sort", "$skip", "$limit", "$count"]
        );
    }

    #[test]
    fn write_stages_are_refused() {
        for verb in WRITE_VERBS {
            let spec = format!(r#"{{"collection": "study_set", "pipeline": [{{"{verb}": "copy"}}]}}"#);
            let err = spec.parse::<Pipeline>().unwrap_err();
            assert_matches!(&err, KiraError::InvalidPipeline(message) if message.contains("read-only"));
        }
    }

    #[test]
    fn unknown_verbs_name_the_offender() {
        let spec = json!({"collection": "study_set", "pipeline": [{"$group": {"_id": "$x"}}]});
        let err = spec.to_string().parse::<Pipeline>().unwrap_err();
        assert_matches!(&err, KiraError::InvalidPipeline(message) if message.contains("`$group`"));
    }

    #[test]
    fn stage_shape_is_checked() {
        let two_verbs = json!({"collection": "study_set", "pipeline": [{"$skip": 1, "$limit": 1}]});
        assert!(two_verbs.to_string().parse::<Pipeline>().is_err());
        let mixed = json!({"collection": "study_set", "pipeline": [{"$project": {"a": 1, "b": 0}}]});
        assert!(mixed.to_string().parse::<Pipeline>().is_err());
        let negative = json!({"collection": "study_set", "pipeline": [{"$limit": -1}]});
        assert!(negative.to_string().parse::<Pipeline>().is_err());
        assert!("not json".parse::<Pipeline>().is_err());
    }

    #[test]
    fn unknown_collection_is_not_found() {
        let spec = json!({"collection": "alldocs", "pipeline": []});
        let err = spec.to_string().parse::<Pipeline>().unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn unwind_skips_missing_and_expands_arrays() {
        let doc = json!({"id": "a", "tags": ["x", "y"]}).as_object().unwrap().clone();
        let out = unwind("tags", doc);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1]["tags"], json!("y"));
        let bare = json!({"id": "b"}).as_object().unwrap().clone();
        assert!(unwind("tags", bare).is_empty());
    }
}
