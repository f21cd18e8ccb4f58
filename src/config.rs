use std::fs;
use std::path::Path;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;
use crate::query::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, QueryLimits};
use crate::registration::DEFAULT_FETCH_TIMEOUT_SECS;
use crate::typecode::{BuiltinTypecodes, TypecodeEntry, TypecodeRegistry};

pub const CONFIG_FILE_NAME: &str = "kira-md.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub default_page_size: Option<usize>,
    #[serde(default)]
    pub max_page_size: Option<usize>,
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_traversal_depth: Option<usize>,
    #[serde(default)]
    pub drs_base_url: Option<String>,
    #[serde(default)]
    pub typecodes: Vec<TypecodeEntry>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub data_dir: Utf8PathBuf,
    pub limits: QueryLimits,
    pub fetch_timeout: Duration,
    pub max_traversal_depth: Option<usize>,
    pub drs_base_url: Option<String>,
    pub extra_typecodes: Vec<TypecodeEntry>,
}

impl TypecodeRegistry for ResolvedConfig {
    fn typecodes(&self) -> Vec<TypecodeEntry> {
        let mut entries = BuiltinTypecodes.typecodes();
        for extra in &self.extra_typecodes {
            entries.retain(|entry| entry.name != extra.name);
            entries.push(extra.clone());
        }
        entries
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = Path::new(path.unwrap_or(CONFIG_FILE_NAME));
        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.to_path_buf()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let max_page_size = config.max_page_size.unwrap_or(MAX_PAGE_SIZE);
        let default_page_size = config
            .default_page_size
            .unwrap_or(DEFAULT_PAGE_SIZE.min(max_page_size));
        if max_page_size == 0 {
            return Err(KiraError::ConfigParse(
                "max_page_size must be positive".to_string(),
            ));
        }
        if default_page_size == 0 || default_page_size > max_page_size {
            return Err(KiraError::ConfigParse(format!(
                "default_page_size must be between 1 and {max_page_size}"
            )));
        }

        let fetch_timeout_secs = config
            .fetch_timeout_secs
            .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS);
        if fetch_timeout_secs == 0 {
            return Err(KiraError::ConfigParse(
                "fetch_timeout_secs must be positive".to_string(),
            ));
        }

        let data_dir = match config.data_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => default_data_dir()?,
        };

        let drs_base_url = config
            .drs_base_url
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());

        for entry in &config.typecodes {
            if entry.name.is_empty() || entry.name.contains(['-', ':']) {
                return Err(KiraError::ConfigParse(format!(
                    "invalid typecode `{}`",
                    entry.name
                )));
            }
        }

        Ok(ResolvedConfig {
            schema_version,
            data_dir,
            limits: QueryLimits {
                default_page_size,
                max_page_size,
            },
            fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            max_traversal_depth: config.max_traversal_depth,
            drs_base_url,
            extra_typecodes: config.typecodes,
        })
    }
}

/// Per-user data directory, or `./kira-md-data` when the platform has none.
pub fn default_data_dir() -> Result<Utf8PathBuf, KiraError> {
    let Some(dirs) = ProjectDirs::from("org", "kira", "kira-md") else {
        return Ok(Utf8PathBuf::from("kira-md-data"));
    };
    Utf8PathBuf::from_path_buf(dirs.data_dir().to_path_buf()).map_err(|path| {
        KiraError::Filesystem(format!("data directory is not UTF-8: {}", path.display()))
    })
}
