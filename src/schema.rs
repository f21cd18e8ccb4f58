use std::collections::HashMap;
use std::sync::LazyLock;

pub const STUDY_SET: &str = "study_set";
pub const BIOSAMPLE_SET: &str = "biosample_set";
pub const DATA_OBJECT_SET: &str = "data_object_set";
pub const WORKFLOW_EXECUTION_SET: &str = "workflow_execution_set";
pub const ACTIVITY_SET: &str = "activity_set";

/// Denormalized edge index used only for provenance traversal.
pub const ALLDOCS: &str = "alldocs";

pub const SCHEMA_PREFIX: &str = "nmdc";

#[derive(Debug, Clone, Copy)]
pub struct CollectionSpec {
    pub name: &'static str,
    pub classes: &'static [&'static str],
}

pub const COLLECTIONS: &[CollectionSpec] = &[
    CollectionSpec {
        name: STUDY_SET,
        classes: &["Study"],
    },
    CollectionSpec {
        name: BIOSAMPLE_SET,
        classes: &["Biosample"],
    },
    CollectionSpec {
        name: DATA_OBJECT_SET,
        classes: &["DataObject"],
    },
    CollectionSpec {
        name: WORKFLOW_EXECUTION_SET,
        classes: &[
            "MetagenomeAssembly",
            "MetagenomeAnnotation",
            "MagsAnalysis",
            "ReadQcAnalysis",
            "ReadBasedTaxonomyAnalysis",
            "MetabolomicsAnalysis",
            "MetaproteomicsAnalysis",
            "NomAnalysis",
            "MetatranscriptomeAssembly",
            "MetatranscriptomeAnnotation",
            "MetatranscriptomeExpressionAnalysis",
        ],
    },
    CollectionSpec {
        name: "data_generation_set",
        classes: &["NucleotideSequencing", "MassSpectrometry"],
    },
    CollectionSpec {
        name: "omics_processing_set",
        classes: &["OmicsProcessing"],
    },
    CollectionSpec {
        name: "material_processing_set",
        classes: &[
            "Extraction",
            "LibraryPreparation",
            "Pooling",
            "SubSamplingProcess",
            "FiltrationProcess",
        ],
    },
    CollectionSpec {
        name: "processed_sample_set",
        classes: &["ProcessedSample"],
    },
    CollectionSpec {
        name: "field_research_site_set",
        classes: &["FieldResearchSite"],
    },
    CollectionSpec {
        name: "calibration_set",
        classes: &["CalibrationInformation"],
    },
];

static TYPE_COLLECTIONS: LazyLock<HashMap<String, &'static str>> = LazyLock::new(|| {
    let mut map = HashMap::new();
    for spec in COLLECTIONS {
        for class in spec.classes {
            map.entry(format!("{SCHEMA_PREFIX}:{class}"))
                .or_insert(spec.name);
        }
    }
    map
});

pub fn type_collections() -> &'static HashMap<String, &'static str> {
    &TYPE_COLLECTIONS
}

pub fn collection_spec(name: &str) -> Option<&'static CollectionSpec> {
    COLLECTIONS.iter().find(|spec| spec.name == name)
}

pub fn is_queryable(name: &str) -> bool {
    collection_spec(name).is_some()
}
