use std::collections::HashMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

pub const DATA_OBJECT_CLASS: &str = "DataObject";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypecodeEntry {
    pub name: String,
    pub schema_class: String,
}

impl TypecodeEntry {
    fn new(name: &str, schema_class: &str) -> Self {
        Self {
            name: name.to_string(),
            schema_class: schema_class.to_string(),
        }
    }
}

pub trait TypecodeRegistry: Send + Sync {
    fn typecodes(&self) -> Vec<TypecodeEntry>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinTypecodes;

const BUILTIN_TYPECODES: &[(&str, &str)] = &[
    ("sty", "nmdc:Study"),
    ("bsm", "nmdc:Biosample"),
    ("dobj", "nmdc:DataObject"),
    ("procsm", "nmdc:ProcessedSample"),
    ("extrp", "nmdc:Extraction"),
    ("libprp", "nmdc:LibraryPreparation"),
    ("poolp", "nmdc:Pooling"),
    ("subspr", "nmdc:SubSamplingProcess"),
    ("filtpr", "nmdc:FiltrationProcess"),
    ("dgns", "nmdc:NucleotideSequencing"),
    ("dgms", "nmdc:MassSpectrometry"),
    ("omprc", "nmdc:OmicsProcessing"),
    ("wfmgas", "nmdc:MetagenomeAssembly"),
    ("wfmgan", "nmdc:MetagenomeAnnotation"),
    ("wfmag", "nmdc:MagsAnalysis"),
    ("wfrqc", "nmdc:ReadQcAnalysis"),
    ("wfrbt", "nmdc:ReadBasedTaxonomyAnalysis"),
    ("wfmb", "nmdc:MetabolomicsAnalysis"),
    ("wfmp", "nmdc:MetaproteomicsAnalysis"),
    ("wfnom", "nmdc:NomAnalysis"),
    ("wfmtas", "nmdc:MetatranscriptomeAssembly"),
    ("wfmtan", "nmdc:MetatranscriptomeAnnotation"),
    ("wfmtex", "nmdc:MetatranscriptomeExpressionAnalysis"),
    ("frsite", "nmdc:FieldResearchSite"),
    ("calib", "nmdc:CalibrationInformation"),
];

impl TypecodeRegistry for BuiltinTypecodes {
    fn typecodes(&self) -> Vec<TypecodeEntry> {
        BUILTIN_TYPECODES
            .iter()
            .map(|(name, class)| TypecodeEntry::new(name, class))
            .collect()
    }
}

static BUILTIN_CLASSIFIER: LazyLock<TypecodeClassifier> =
    LazyLock::new(|| TypecodeClassifier::from_registry(&BuiltinTypecodes));

#[derive(Debug, Clone, Default)]
pub struct TypecodeClassifier {
    classes: HashMap<String, String>,
}

impl TypecodeClassifier {
    pub fn builtin() -> &'static TypecodeClassifier {
        &BUILTIN_CLASSIFIER
    }

    pub fn from_registry(registry: &dyn TypecodeRegistry) -> Self {
        let classes = registry
            .typecodes()
            .into_iter()
            .map(|entry| {
                let class = match entry.schema_class.split_once(':') {
                    Some((_, local)) => local.to_string(),
                    None => entry.schema_class,
                };
                (entry.name, class)
            })
            .collect();
        Self { classes }
    }

    pub fn class_for_typecode(&self, typecode: &str) -> Option<&str> {
        self.classes.get(typecode).map(String::as_str)
    }

    pub fn classify(&self, id: &str) -> Option<&str> {
        self.class_for_typecode(typecode_of(id)?)
    }

    pub fn is_data_object(&self, id: &str) -> bool {
        self.classify(id) == Some(DATA_OBJECT_CLASS)
    }
}

/// Splits `prefix:typecode-rest` into `typecode`.
pub fn typecode_of(id: &str) -> Option<&str> {
    let (_, local) = id.split_once(':')?;
    let typecode = local.split_once('-').map_or(local, |(head, _)| head);
    (!typecode.is_empty()).then_some(typecode)
}

pub fn classname_from_typecode(id: &str) -> Option<&'static str> {
    TypecodeClassifier::builtin().classify(id)
}
