use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::activity::{ValidationErrors, specialize_activity_set_docs};
use crate::config::ResolvedConfig;
use crate::domain::Document;
use crate::error::KiraError;
use crate::listing::fetch_recent_metadata_urls;
use crate::pipeline::{PipelineFindRequest, PipelineFindResponse, pipeline_find};
use crate::query::{FindRequest, FindResponse, QueryEngine, QueryLimits};
use crate::registration::{
    BatchRegistration, BatchSubmission, CreatedObject, ObjectRegistry, Registrar,
    RegistrationOutcome, RemoteFetcher, create_drs_object_for, ensure_metadata_tags_for,
    put_object,
};
use crate::resolver::{BiosampleDataObjects, DerivedObjectResolver};
use crate::schema::ALLDOCS;
use crate::store::DocumentStore;
use crate::typecode::TypecodeClassifier;

#[derive(Debug, Clone, Serialize)]
pub struct StudyDataObjects {
    pub study_id: String,
    pub biosamples: Vec<BiosampleDataObjects>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpecializeResult {
    pub docs: Document,
    pub validation_errors: ValidationErrors,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentUrlsResult {
    pub urlpath: String,
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagResult {
    pub drs_id: String,
    pub tags: Document,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    pub url: String,
    pub status: u16,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AppSettings {
    pub limits: QueryLimits,
    pub max_traversal_depth: Option<usize>,
}

impl From<&ResolvedConfig> for AppSettings {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            limits: config.limits,
            max_traversal_depth: config.max_traversal_depth,
        }
    }
}

pub struct App<S: DocumentStore, F: RemoteFetcher> {
    store: S,
    fetcher: F,
    classifier: TypecodeClassifier,
    settings: AppSettings,
}

impl<S: DocumentStore, F: RemoteFetcher> App<S, F> {
    pub fn new(store: S, fetcher: F, settings: AppSettings) -> Self {
        Self {
            store,
            fetcher,
            classifier: TypecodeClassifier::builtin().clone(),
            settings,
        }
    }

    pub fn from_config(store: S, fetcher: F, config: &ResolvedConfig) -> Self {
        Self {
            store,
            fetcher,
            classifier: TypecodeClassifier::from_registry(config),
            settings: AppSettings::from(config),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn find(&self, collection: &str, request: &FindRequest) -> Result<FindResponse, KiraError> {
        QueryEngine::new(&self.store, self.settings.limits).find(collection, request)
    }

    pub fn pipeline_find(
        &self,
        request: &PipelineFindRequest,
    ) -> Result<PipelineFindResponse, KiraError> {
        pipeline_find(&self.store, request, self.settings.limits.max_page_size)
    }

    pub fn data_objects_for_study(&self, study_id: &str) -> Result<StudyDataObjects, KiraError> {
        if !self.store.has_collection(ALLDOCS) {
            warn!(study_id, collection = ALLDOCS, "edge index is empty; no data objects can be derived");
        }
        let biosamples = DerivedObjectResolver::new(&self.store, &self.classifier)
            .with_max_depth(self.settings.max_traversal_depth)
            .resolve(study_id)?;
        Ok(StudyDataObjects {
            study_id: study_id.to_string(),
            biosamples,
        })
    }

    pub fn register(&self, url: &str) -> Result<RegistrationOutcome, KiraError> {
        Registrar::new(&self.fetcher).drs_object_in_for(url)
    }

    pub fn register_many(&self, urls: &[String]) -> Vec<BatchRegistration> {
        Registrar::new(&self.fetcher).register_many(urls)
    }

    pub fn submit<R: ObjectRegistry + ?Sized>(
        &self,
        url: &str,
        registry: &R,
    ) -> Result<CreatedObject, KiraError> {
        match self.register(url)? {
            RegistrationOutcome::Result(object) => {
                let created = create_drs_object_for(url, &object, registry)?;
                info!(url, "object submitted");
                Ok(created)
            }
            RegistrationOutcome::Error(failure) => Err(KiraError::Http(format!("{url}: {failure}"))),
        }
    }

    pub fn submit_many<R: ObjectRegistry + ?Sized>(
        &self,
        urls: &[String],
        registry: &R,
    ) -> Vec<BatchSubmission> {
        Registrar::new(&self.fetcher).submit_many(urls, registry)
    }

    pub fn ensure_metadata_tags<R: ObjectRegistry + ?Sized>(
        &self,
        drs_id: &str,
        tags: &[&str],
        registry: &R,
    ) -> Result<TagResult, KiraError> {
        let tags = ensure_metadata_tags_for(drs_id, registry, tags)?;
        Ok(TagResult {
            drs_id: drs_id.to_string(),
            tags,
        })
    }

    pub fn upload<R: ObjectRegistry + ?Sized>(
        &self,
        path: &Path,
        url: &str,
        mime_type: Option<&str>,
        registry: &R,
    ) -> Result<UploadResult, KiraError> {
        let response = put_object(registry, path, url, mime_type)?;
        if !(200..300).contains(&response.status) {
            return Err(KiraError::HttpStatus {
                status: response.status,
                message: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }
        Ok(UploadResult {
            url: url.to_string(),
            status: response.status,
        })
    }

    pub fn specialize(&self, docs: Document) -> SpecializeResult {
        let (docs, validation_errors) = specialize_activity_set_docs(docs);
        SpecializeResult {
            docs,
            validation_errors,
        }
    }

    pub fn recent_urls(
        &self,
        urlpath: &str,
        since: Option<&str>,
    ) -> Result<RecentUrlsResult, KiraError> {
        let urls = fetch_recent_metadata_urls(&self.fetcher, urlpath, since)?;
        Ok(RecentUrlsResult {
            urlpath: urlpath.to_string(),
            urls,
        })
    }
}
