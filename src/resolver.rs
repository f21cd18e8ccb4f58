use std::collections::{HashSet, VecDeque};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{ID_FIELD, Record};
use crate::error::KiraError;
use crate::filter::Filter;
use crate::schema::{ALLDOCS, BIOSAMPLE_SET, DATA_OBJECT_SET, STUDY_SET};
use crate::store::DocumentStore;
use crate::typecode::TypecodeClassifier;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BiosampleDataObjects {
    pub biosample_id: String,
    #[serde(rename = "data_object_set")]
    pub data_objects: Vec<Record>,
}

pub struct DerivedObjectResolver<'s, S: DocumentStore + ?Sized> {
    store: &'s S,
    classifier: &'s TypecodeClassifier,
    max_depth: Option<usize>,
}

impl<'s, S: DocumentStore + ?Sized> DerivedObjectResolver<'s, S> {
    pub fn new(store: &'s S, classifier: &'s TypecodeClassifier) -> Self {
        Self {
            store,
            classifier,
            max_depth: None,
        }
    }

    /// Stops expanding after `depth` process hops from the biosample.
    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn resolve(&self, study_id: &str) -> Result<Vec<BiosampleDataObjects>, KiraError> {
        let id_only = [ID_FIELD.to_string()];
        let study = self
            .store
            .find_one(STUDY_SET, &Filter::eq(ID_FIELD, study_id), Some(&id_only))?
            .ok_or_else(|| KiraError::NotFound(format!("study not found: {study_id}")))?;

        let biosamples = self
            .store
            .find(BIOSAMPLE_SET, &Filter::eq("part_of", study.id()), Some(&id_only))?;
        info!(study = study.id(), biosamples = biosamples.len(), "resolving data objects");

        let mut out = Vec::new();
        for biosample in &biosamples {
            let data_objects = self.data_objects_for(biosample.id())?;
            if !data_objects.is_empty() {
                out.push(BiosampleDataObjects {
                    biosample_id: biosample.id().to_string(),
                    data_objects,
                });
            }
        }
        Ok(out)
    }

    pub fn data_objects_for(&self, biosample_id: &str) -> Result<Vec<Record>, KiraError> {
        let mut collected = Vec::new();
        let mut seen = HashSet::from([biosample_id.to_string()]);
        let mut frontier = VecDeque::from([biosample_id.to_string()]);
        let mut depth = 0usize;

        while !frontier.is_empty() {
            if self.max_depth.is_some_and(|max| depth >= max) {
                warn!(
                    biosample = biosample_id,
                    depth,
                    pending = frontier.len(),
                    "traversal depth limit reached"
                );
                break;
            }
            let mut next = VecDeque::new();
            for current in frontier.drain(..) {
                let Some(edge) =
                    self.store
                        .find_one(ALLDOCS, &Filter::eq("has_input", current.as_str()), None)?
                else {
                    continue;
                };
                for output in edge.id_list("has_output") {
                    if !seen.insert(output.to_string()) {
                        continue;
                    }
                    if self.classifier.is_data_object(output) {
                        match self
                            .store
                            .find_one(DATA_OBJECT_SET, &Filter::eq(ID_FIELD, output), None)?
                        {
                            Some(record) => collected.push(record.strip_storage_fields()),
                            None => debug!(id = output, "data object listed in alldocs is missing"),
                        }
                    } else {
                        next.push_back(output.to_string());
                    }
                }
            }
            depth += 1;
            debug!(
                biosample = biosample_id,
                depth,
                frontier = next.len(),
                collected = collected.len(),
                "traversal level done"
            );
            frontier = next;
        }
        Ok(collected)
    }
}
