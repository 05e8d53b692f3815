use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use camino::Utf8PathBuf;
use chrono::{Datelike, NaiveDate};
use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::LabFilesError;

static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("valid name regex"));

/// Returns true when `value` only uses the characters allowed in dataset,
/// sample and file names.
pub fn is_allowed_name(value: &str) -> bool {
    NAME_REGEX.is_match(value) && value != "." && value != ".."
}

/// Client operating system, resolved once at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ClientPlatform {
    Windows,
    Posix,
}

impl ClientPlatform {
    pub fn from_user_agent(user_agent: &str) -> Self {
        if user_agent.contains("Windows") {
            ClientPlatform::Windows
        } else {
            ClientPlatform::Posix
        }
    }

    pub fn separator(self) -> char {
        match self {
            ClientPlatform::Windows => '\\',
            ClientPlatform::Posix => '/',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "location", content = "index")]
pub enum StorageLocation {
    Home,
    Archive(usize),
    Upload,
    Analysis,
}

impl StorageLocation {
    pub fn is_writable(self) -> bool {
        matches!(self, StorageLocation::Home | StorageLocation::Upload)
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageLocation::Home => write!(f, "home"),
            StorageLocation::Archive(index) => write!(f, "archive[{index}]"),
            StorageLocation::Upload => write!(f, "upload"),
            StorageLocation::Analysis => write!(f, "analysis"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityName(String);

impl EntityName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityName {
    type Err = LabFilesError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if !is_allowed_name(normalized) {
            return Err(LabFilesError::InvalidName(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

impl TryFrom<String> for EntityName {
    type Error = LabFilesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntityName> for String {
    fn from(value: EntityName) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerKind {
    Dataset,
    Sample,
}

impl OwnerKind {
    pub fn folder_name(self) -> &'static str {
        match self {
            OwnerKind::Dataset => "datasets",
            OwnerKind::Sample => "samples",
        }
    }
}

/// Anything that owns a folder in each storage location.
pub trait FileOwner {
    fn kind(&self) -> OwnerKind;
    fn id(&self) -> u64;
    fn name(&self) -> &EntityName;
    fn date(&self) -> NaiveDate;

    fn year(&self) -> i32 {
        self.date().year()
    }

    fn owner_ref(&self) -> OwnerRef {
        OwnerRef {
            kind: self.kind(),
            id: self.id(),
            name: self.name().clone(),
            date: self.date(),
        }
    }
}

/// Snapshot of the identifiers needed to resolve an owner's folders.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: OwnerKind,
    pub id: u64,
    pub name: EntityName,
    pub date: NaiveDate,
}

impl FileOwner for OwnerRef {
    fn kind(&self) -> OwnerKind {
        self.kind
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &EntityName {
        &self.name
    }

    fn date(&self) -> NaiveDate {
        self.date
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub id: u64,
    pub name: EntityName,
    pub date: NaiveDate,
}

impl FileOwner for Sample {
    fn kind(&self) -> OwnerKind {
        OwnerKind::Sample
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &EntityName {
        &self.name
    }

    fn date(&self) -> NaiveDate {
        self.date
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: u64,
    pub name: EntityName,
    pub date: NaiveDate,
    #[serde(default)]
    pub samples: Vec<Sample>,
}

impl FileOwner for Dataset {
    fn kind(&self) -> OwnerKind {
        OwnerKind::Dataset
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &EntityName {
        &self.name
    }

    fn date(&self) -> NaiveDate {
        self.date
    }
}

/// A committed or staged file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagedFile {
    pub path: Utf8PathBuf,
    pub filename: String,
    pub location: StorageLocation,
}

impl ManagedFile {
    pub fn new(path: Utf8PathBuf, location: StorageLocation) -> Self {
        let filename = path.file_name().unwrap_or_default().to_string();
        Self {
            path,
            filename,
            location,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_reject_separators() {
        assert!("ChIPseq_Spt16_yFR101_G24D_JS1-JS2_20181022"
            .parse::<EntityName>()
            .is_ok());
        assert!("a/b".parse::<EntityName>().is_err());
        assert!("..".parse::<EntityName>().is_err());
        assert!("".parse::<EntityName>().is_err());
        assert!("FRé1".parse::<EntityName>().is_err());
        assert!("样本1".parse::<EntityName>().is_err());
    }

    #[test]
    fn platform_from_user_agent() {
        let windows = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Gecko/20100101 Firefox/115.0";
        let linux = "Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/115.0";
        assert_eq!(
            ClientPlatform::from_user_agent(windows),
            ClientPlatform::Windows
        );
        assert_eq!(ClientPlatform::from_user_agent(linux), ClientPlatform::Posix);
    }
}
