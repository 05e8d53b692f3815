use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::NaiveDate;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{Dataset, EntityName, Sample};
use crate::error::LabFilesError;

pub const CONFIG_FILENAME: &str = "kira-lf.json";
pub const DEFAULT_PUBLIC_PREFIX: &str = "dataset-file";
pub const DEFAULT_GRANTS_FILENAME: &str = ".public-grants.json";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_DELETE_AGE_HOURS: u64 = 48;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    pub storage: StorageConfig,
    #[serde(default)]
    pub public_prefix: Option<String>,
    #[serde(default)]
    pub grants_file: Option<Utf8PathBuf>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub upload_delete_age_hours: Option<u64>,
    #[serde(default)]
    pub analysis_delete_age_hours: Option<u64>,
    #[serde(default)]
    pub analysis_symlinks: Option<bool>,
    #[serde(default)]
    pub samples: Vec<SampleEntry>,
    #[serde(default)]
    pub datasets: Vec<DatasetEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StorageConfig {
    pub home: LocationEntry,
    #[serde(default)]
    pub archives: Vec<LocationEntry>,
    pub upload: LocationEntry,
    pub analysis: LocationEntry,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum LocationEntry {
    Shorthand(Utf8PathBuf),
    Detailed(LocationConfig),
}

/// One storage root and how it is presented to users.
///
/// `label` is the folder as seen from the client share, for example
/// `lanaseq/upload`. The shares are prepended according to the client
/// platform: `smb://server/share` for POSIX clients and `\\server\share`
/// for Windows clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LocationConfig {
    pub folder: Utf8PathBuf,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub unix_share: Option<String>,
    #[serde(default)]
    pub windows_share: Option<String>,
}

impl LocationConfig {
    pub fn new(folder: impl Into<Utf8PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            label: None,
            unix_share: None,
            windows_share: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SampleEntry {
    pub id: u64,
    pub name: String,
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DatasetEntry {
    pub id: u64,
    pub name: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub samples: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub home: LocationConfig,
    pub archives: Vec<LocationConfig>,
    pub upload: LocationConfig,
    pub analysis: LocationConfig,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub storage: StorageLayout,
    pub public_prefix: String,
    pub grants_file: Utf8PathBuf,
    pub poll_interval: Duration,
    pub upload_delete_age: Duration,
    pub analysis_delete_age: Duration,
    pub analysis_symlinks: bool,
    pub samples: Vec<Sample>,
    pub datasets: Vec<Dataset>,
}

impl ResolvedConfig {
    pub fn dataset(&self, name: &str) -> Result<&Dataset, LabFilesError> {
        self.datasets
            .iter()
            .find(|dataset| dataset.name.as_str() == name)
            .ok_or_else(|| LabFilesError::NotFound(format!("dataset {name}")))
    }

    pub fn sample(&self, name: &str) -> Result<&Sample, LabFilesError> {
        self.samples
            .iter()
            .find(|sample| sample.name.as_str() == name)
            .ok_or_else(|| LabFilesError::NotFound(format!("sample {name}")))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, else `kira-lf.json` in the current directory, else the
    /// user's config directory.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, LabFilesError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => default_config_path().ok_or(LabFilesError::MissingConfig)?,
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| LabFilesError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| LabFilesError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, LabFilesError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let storage = StorageLayout {
            home: location(config.storage.home),
            archives: config.storage.archives.into_iter().map(location).collect(),
            upload: location(config.storage.upload),
            analysis: location(config.storage.analysis),
        };

        let public_prefix = config
            .public_prefix
            .map(|prefix| prefix.trim_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_PUBLIC_PREFIX.to_string());
        if public_prefix.is_empty() {
            return Err(LabFilesError::InvalidConfig(
                "public_prefix cannot be empty".to_string(),
            ));
        }

        let grants_file = config
            .grants_file
            .unwrap_or_else(|| storage.home.folder.join(DEFAULT_GRANTS_FILENAME));

        let poll_interval = config.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        if poll_interval == 0 {
            return Err(LabFilesError::InvalidConfig(
                "poll_interval_ms must be positive".to_string(),
            ));
        }

        let samples = config
            .samples
            .into_iter()
            .map(|entry| {
                Ok(Sample {
                    id: entry.id,
                    name: entry.name.parse::<EntityName>()?,
                    date: entry.date,
                })
            })
            .collect::<Result<Vec<_>, LabFilesError>>()?;

        let by_id = samples
            .iter()
            .map(|sample| (sample.id, sample))
            .collect::<HashMap<_, _>>();
        let datasets = config
            .datasets
            .into_iter()
            .map(|entry| {
                let samples = entry
                    .samples
                    .iter()
                    .map(|id| {
                        by_id.get(id).map(|sample| (*sample).clone()).ok_or_else(|| {
                            LabFilesError::InvalidConfig(format!(
                                "dataset {} references unknown sample {id}",
                                entry.name
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, LabFilesError>>()?;
                Ok(Dataset {
                    id: entry.id,
                    name: entry.name.parse::<EntityName>()?,
                    date: entry.date,
                    samples,
                })
            })
            .collect::<Result<Vec<_>, LabFilesError>>()?;

        Ok(ResolvedConfig {
            schema_version,
            storage,
            public_prefix,
            grants_file,
            poll_interval: Duration::from_millis(poll_interval),
            upload_delete_age: hours(
                "upload_delete_age_hours",
                config
                    .upload_delete_age_hours
                    .unwrap_or(DEFAULT_DELETE_AGE_HOURS),
            )?,
            analysis_delete_age: hours(
                "analysis_delete_age_hours",
                config
                    .analysis_delete_age_hours
                    .unwrap_or(DEFAULT_DELETE_AGE_HOURS),
            )?,
            analysis_symlinks: config.analysis_symlinks.unwrap_or(false),
            samples,
            datasets,
        })
    }
}

fn location(entry: LocationEntry) -> LocationConfig {
    match entry {
        LocationEntry::Shorthand(folder) => LocationConfig::new(folder),
        LocationEntry::Detailed(config) => config,
    }
}

fn hours(field: &str, value: u64) -> Result<Duration, LabFilesError> {
    value
        .checked_mul(3600)
        .map(Duration::from_secs)
        .ok_or_else(|| LabFilesError::InvalidConfig(format!("{field} is too large: {value}")))
}

fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILENAME);
    if local.exists() {
        return Some(local);
    }
    BaseDirs::new()
        .map(|dirs| dirs.config_dir().join("kira-lab-files").join(CONFIG_FILENAME))
        .filter(|path| path.exists())
}
