use std::fs;
use std::time::{Duration, SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{FileOwner, OwnerKind};
use crate::error::LabFilesError;
use crate::fs_util::{self, fs_error};
use crate::location::LocationResolver;

/// One file waiting in an upload folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedFile {
    pub path: Utf8PathBuf,
    /// Path relative to the upload folder, `/` separated.
    pub relative: String,
    pub size: u64,
    #[serde(skip)]
    pub modified: Option<SystemTime>,
}

/// Upload folders live until a commit succeeds or housekeeping removes them.
///
/// Files dropped directly in the upload root also belong to an owner when
/// their name contains the owner's name.
#[derive(Debug, Clone)]
pub struct StagingArea {
    resolver: LocationResolver,
}

impl StagingArea {
    pub fn new(resolver: LocationResolver) -> Self {
        Self { resolver }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.resolver.layout().upload.folder
    }

    pub fn folder(&self, owner: &(impl FileOwner + ?Sized)) -> Utf8PathBuf {
        self.resolver.upload_folder(owner)
    }

    pub fn ensure_exists(
        &self,
        owner: &(impl FileOwner + ?Sized),
    ) -> Result<Utf8PathBuf, LabFilesError> {
        let folder = self.folder(owner);
        if !folder.as_std_path().is_dir() {
            debug!("creating upload folder {folder} for {}", owner.name());
        }
        fs::create_dir_all(folder.as_std_path()).map_err(|err| fs_error("create", &folder, err))?;
        Ok(folder)
    }

    pub fn exists(&self, owner: &(impl FileOwner + ?Sized)) -> bool {
        self.folder(owner).as_std_path().is_dir()
    }

    /// Loose files of the upload root naming `owner`, then the owner's upload folder.
    ///
    /// A loose file is left out when the upload folder has a file with the same
    /// relative path.
    pub fn files(&self, owner: &(impl FileOwner + ?Sized)) -> Result<Vec<StagedFile>, LabFilesError> {
        let folder = list_staged(&self.folder(owner))?;
        let mut files = Vec::with_capacity(folder.len());
        for file in self.loose_files(owner)? {
            if folder.iter().any(|staged| staged.relative == file.relative) {
                debug!(
                    "{} is also in the upload folder of {}, leaving it in place",
                    file.path,
                    owner.name()
                );
                continue;
            }
            files.push(file);
        }
        files.extend(folder);
        Ok(files)
    }

    fn loose_files(
        &self,
        owner: &(impl FileOwner + ?Sized),
    ) -> Result<Vec<StagedFile>, LabFilesError> {
        let name = owner.name().as_str();
        let mut files = Vec::new();
        for path in fs_util::list_files(self.root())? {
            let Some(filename) = path.file_name() else {
                continue;
            };
            if !filename.contains(name) {
                continue;
            }
            let metadata =
                fs::metadata(path.as_std_path()).map_err(|err| fs_error("read", &path, err))?;
            files.push(StagedFile {
                relative: filename.to_string(),
                size: metadata.len(),
                modified: metadata.modified().ok(),
                path,
            });
        }
        Ok(files)
    }

    /// Removes the whole upload folder of `owner`.
    pub(crate) fn remove(&self, owner: &(impl FileOwner + ?Sized)) -> Result<(), LabFilesError> {
        let folder = self.folder(owner);
        debug!("deleting upload folder {folder}");
        fs_util::remove_dir_if_exists(&folder)
    }

    /// Deletes owner upload folders untouched for longer than `max_age`.
    /// Loose files in the upload root are left alone.
    pub fn sweep_older_than(&self, max_age: Duration) -> Result<Vec<Utf8PathBuf>, LabFilesError> {
        let now = SystemTime::now();
        let mut deleted = Vec::new();
        for kind in [OwnerKind::Dataset, OwnerKind::Sample] {
            let folder = self.root().join(kind.folder_name());
            deleted.extend(fs_util::sweep_older_than(&folder, max_age, now)?);
        }
        if !deleted.is_empty() {
            info!("deleted {} old upload folders", deleted.len());
        }
        Ok(deleted)
    }
}

pub fn list_staged(folder: &Utf8Path) -> Result<Vec<StagedFile>, LabFilesError> {
    let mut staged = Vec::new();
    for path in fs_util::walk_files(folder)? {
        let metadata =
            fs::metadata(path.as_std_path()).map_err(|err| fs_error("read", &path, err))?;
        let relative = path
            .strip_prefix(folder)
            .map(|rel| rel.components().map(|c| c.as_str()).collect::<Vec<_>>().join("/"))
            .unwrap_or_else(|_| path.file_name().unwrap_or_default().to_string());
        staged.push(StagedFile {
            relative,
            size: metadata.len(),
            modified: metadata.modified().ok(),
            path,
        });
    }
    Ok(staged)
}
