//! Maps owners to their folder in every storage location.
//!
//! Layout on disk:
//!
//! ```text
//! <home>/<datasets|samples>/<year>/<name>
//! <archive>/<datasets|samples>/<year>/<name>
//! <upload>/<datasets|samples>/<name>
//! <analysis>/<name>                  one dataset or one sample
//! <analysis>/datasets-<id>-<id>...   several datasets, ids sorted
//! <analysis>/samples-<id>-<id>...    several samples, ids sorted
//! ```
//!
//! A single owner whose name has the shape of a collection key cannot have an
//! analysis folder.

use std::sync::LazyLock;

use camino::Utf8PathBuf;
use regex::Regex;

use crate::config::{LocationConfig, StorageLayout};
use crate::domain::{ClientPlatform, FileOwner, StorageLocation};
use crate::error::LabFilesError;

static COLLECTION_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(datasets|samples)(-[0-9]+)+$").expect("valid key regex"));

#[derive(Debug, Clone)]
pub struct LocationResolver {
    layout: StorageLayout,
}

impl LocationResolver {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn archive_count(&self) -> usize {
        self.layout.archives.len()
    }

    fn location_config(&self, location: StorageLocation) -> Result<&LocationConfig, LabFilesError> {
        match location {
            StorageLocation::Home => Ok(&self.layout.home),
            StorageLocation::Upload => Ok(&self.layout.upload),
            StorageLocation::Analysis => Ok(&self.layout.analysis),
            StorageLocation::Archive(index) => {
                self.layout
                    .archives
                    .get(index)
                    .ok_or(LabFilesError::UnknownArchive {
                        index,
                        count: self.layout.archives.len(),
                    })
            }
        }
    }

    fn segments(location: StorageLocation, owner: &(impl FileOwner + ?Sized)) -> Vec<String> {
        match location {
            StorageLocation::Home | StorageLocation::Archive(_) => vec![
                owner.kind().folder_name().to_string(),
                owner.year().to_string(),
                owner.name().to_string(),
            ],
            StorageLocation::Upload => vec![
                owner.kind().folder_name().to_string(),
                owner.name().to_string(),
            ],
            StorageLocation::Analysis => vec![owner.name().to_string()],
        }
    }

    pub fn folder(
        &self,
        location: StorageLocation,
        owner: &(impl FileOwner + ?Sized),
    ) -> Result<Utf8PathBuf, LabFilesError> {
        let config = self.location_config(location)?;
        let mut folder = config.folder.clone();
        for segment in Self::segments(location, owner) {
            folder.push(segment);
        }
        Ok(folder)
    }

    pub fn label(
        &self,
        location: StorageLocation,
        owner: &(impl FileOwner + ?Sized),
        platform: ClientPlatform,
    ) -> Result<String, LabFilesError> {
        let config = self.location_config(location)?;
        Ok(render_label(
            config,
            &Self::segments(location, owner),
            platform,
        ))
    }

    pub fn home_folder(&self, owner: &(impl FileOwner + ?Sized)) -> Utf8PathBuf {
        let mut folder = self.layout.home.folder.clone();
        for segment in Self::segments(StorageLocation::Home, owner) {
            folder.push(segment);
        }
        folder
    }

    pub fn upload_folder(&self, owner: &(impl FileOwner + ?Sized)) -> Utf8PathBuf {
        let mut folder = self.layout.upload.folder.clone();
        for segment in Self::segments(StorageLocation::Upload, owner) {
            folder.push(segment);
        }
        folder
    }

    pub fn archive_folders(&self, owner: &(impl FileOwner + ?Sized)) -> Vec<Utf8PathBuf> {
        let segments = Self::segments(StorageLocation::Archive(0), owner);
        self.layout
            .archives
            .iter()
            .map(|archive| {
                let mut folder = archive.folder.clone();
                for segment in &segments {
                    folder.push(segment);
                }
                folder
            })
            .collect()
    }

    /// One label per configured archive; empty when no archive is configured.
    pub fn archive_labels(
        &self,
        owner: &(impl FileOwner + ?Sized),
        platform: ClientPlatform,
    ) -> Vec<String> {
        let segments = Self::segments(StorageLocation::Archive(0), owner);
        self.layout
            .archives
            .iter()
            .map(|archive| render_label(archive, &segments, platform))
            .collect()
    }

    /// Archive labels for several owners, archive by archive, owners sorted by id.
    pub fn archive_collection_labels<T: FileOwner>(
        &self,
        owners: &[T],
        platform: ClientPlatform,
    ) -> Vec<String> {
        let mut sorted = owners.iter().collect::<Vec<_>>();
        sorted.sort_by_key(|owner| owner.id());
        sorted.dedup_by_key(|owner| owner.id());
        self.layout
            .archives
            .iter()
            .flat_map(|archive| {
                sorted.iter().map(move |owner| {
                    render_label(
                        archive,
                        &Self::segments(StorageLocation::Archive(0), *owner),
                        platform,
                    )
                })
            })
            .collect()
    }

    /// Home label followed by every archive label.
    pub fn folder_labels(
        &self,
        owner: &(impl FileOwner + ?Sized),
        platform: ClientPlatform,
    ) -> Vec<String> {
        let mut labels = vec![render_label(
            &self.layout.home,
            &Self::segments(StorageLocation::Home, owner),
            platform,
        )];
        labels.extend(self.archive_labels(owner, platform));
        labels
    }

    pub fn analysis_folder<T: FileOwner>(&self, owners: &[T]) -> Result<Utf8PathBuf, LabFilesError> {
        Ok(self.layout.analysis.folder.join(analysis_key(owners)?))
    }

    pub fn analysis_label<T: FileOwner>(
        &self,
        owners: &[T],
        platform: ClientPlatform,
    ) -> Result<String, LabFilesError> {
        Ok(render_label(
            &self.layout.analysis,
            &[analysis_key(owners)?],
            platform,
        ))
    }
}

fn analysis_key<T: FileOwner>(owners: &[T]) -> Result<String, LabFilesError> {
    let Some(first) = owners.first() else {
        return Err(LabFilesError::InvalidName(
            "analysis needs at least one dataset or sample".to_string(),
        ));
    };
    let kind = first.kind();
    if owners.iter().any(|owner| owner.kind() != kind) {
        return Err(LabFilesError::InvalidName(
            "analysis cannot mix datasets and samples".to_string(),
        ));
    }

    let mut ids = owners.iter().map(|owner| owner.id()).collect::<Vec<_>>();
    ids.sort_unstable();
    ids.dedup();
    if ids.len() == 1 {
        let name = first.name().as_str();
        if COLLECTION_KEY.is_match(name) {
            return Err(LabFilesError::InvalidName(format!(
                "{name} is reserved for analysis of several {}",
                kind.folder_name()
            )));
        }
        return Ok(name.to_string());
    }
    let ids = ids.iter().map(u64::to_string).collect::<Vec<_>>();
    Ok(format!("{}-{}", kind.folder_name(), ids.join("-")))
}

fn render_label(config: &LocationConfig, segments: &[String], platform: ClientPlatform) -> String {
    let separator = platform.separator().to_string();
    let Some(label) = config.label.as_deref() else {
        let mut folder = config.folder.clone();
        for segment in segments {
            folder.push(segment);
        }
        return match platform {
            ClientPlatform::Posix => folder.to_string(),
            ClientPlatform::Windows => folder.as_str().replace('/', "\\"),
        };
    };

    let share = match platform {
        ClientPlatform::Posix => config
            .unix_share
            .as_deref()
            .map(|share| share.trim_end_matches('/').to_string()),
        ClientPlatform::Windows => config
            .windows_share
            .as_deref()
            .map(|share| share.trim_end_matches('\\').to_string()),
    };
    let label = label
        .split(['/', '\\'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(&separator);

    let mut parts = Vec::with_capacity(segments.len() + 2);
    if let Some(share) = share {
        parts.push(share);
    }
    if !label.is_empty() {
        parts.push(label);
    }
    parts.extend(segments.iter().cloned());
    parts.join(&separator)
}
