use std::collections::HashMap;
use std::fs;

use camino::Utf8Path;
use tracing::{debug, info};

use crate::domain::FileOwner;
use crate::error::LabFilesError;
use crate::fs_util::{self, fs_error};
use crate::location::LocationResolver;
use crate::staging::{StagedFile, StagingArea};

/// Per-file overwrite permission, keyed by path relative to the upload folder.
pub type OverwriteDecisions = HashMap<String, bool>;

/// Moves staged uploads into the owner's home folder.
#[derive(Debug, Clone)]
pub struct FileCommitEngine {
    resolver: LocationResolver,
    staging: StagingArea,
}

impl FileCommitEngine {
    pub fn new(resolver: LocationResolver, staging: StagingArea) -> Self {
        Self { resolver, staging }
    }

    /// Staged files that would replace a file already in the home folder.
    pub fn conflicts(&self, owner: &(impl FileOwner + ?Sized)) -> Result<Vec<String>, LabFilesError> {
        let home = self.resolver.home_folder(owner);
        Ok(self
            .staging
            .files(owner)?
            .into_iter()
            .filter(|file| home.join(&file.relative).as_std_path().exists())
            .map(|file| file.relative)
            .collect())
    }

    /// Moves every staged file into home and deletes the upload folder.
    ///
    /// Nothing is moved when a staged file would land on a folder or under a
    /// file in home, or when a staged file exists in home without an overwrite
    /// decision set to true; the error lists all such files. Returns the number
    /// of files moved.
    pub fn commit(
        &self,
        owner: &(impl FileOwner + ?Sized),
        decisions: &OverwriteDecisions,
    ) -> Result<usize, LabFilesError> {
        let home = self.resolver.home_folder(owner);
        let staged = self.staging.files(owner)?;

        let blocked = blocked_targets(&home, &staged);
        if !blocked.is_empty() {
            debug!(
                "home entries block {blocked:?} in {home}, nothing moved for {}",
                owner.name()
            );
            return Err(LabFilesError::CommitBlocked { filenames: blocked });
        }

        let unresolved = staged
            .iter()
            .filter(|file| home.join(&file.relative).as_std_path().exists())
            .filter(|file| !decisions.get(&file.relative).copied().unwrap_or(false))
            .map(|file| file.relative.clone())
            .collect::<Vec<_>>();
        if !unresolved.is_empty() {
            debug!(
                "overwrite not allowed for {unresolved:?} in {home}, nothing moved for {}",
                owner.name()
            );
            return Err(LabFilesError::OverwriteNotAllowed {
                filenames: unresolved,
            });
        }

        if !staged.is_empty() {
            fs::create_dir_all(home.as_std_path()).map_err(|err| fs_error("create", &home, err))?;
        }
        for file in &staged {
            let target = home.join(&file.relative);
            debug!("moving file {} to {target} for {}", file.path, owner.name());
            fs_util::move_file(&file.path, &target)?;
        }
        self.staging.remove(owner)?;

        info!(
            "saved {} new files for {} in {home}",
            staged.len(),
            owner.name()
        );
        Ok(staged.len())
    }
}

/// Staged files whose target in home is a folder, or has a file where one of
/// its parent folders should be.
fn blocked_targets(home: &Utf8Path, staged: &[StagedFile]) -> Vec<String> {
    staged
        .iter()
        .filter(|file| {
            let target = home.join(&file.relative);
            if target.as_std_path().is_dir() {
                return true;
            }
            target
                .ancestors()
                .skip(1)
                .take_while(|parent| parent.starts_with(home))
                .any(|parent| parent.as_std_path().exists() && !parent.as_std_path().is_dir())
        })
        .map(|file| file.relative.clone())
        .collect()
}
