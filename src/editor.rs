use std::fs::{self, File};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local};
use tracing::{debug, info};

use crate::audit::{AuditLog, AuditRecord, DELETED_FILENAME};
use crate::domain::{FileOwner, ManagedFile, StorageLocation, is_allowed_name};
use crate::error::{FilenameError, LabFilesError};
use crate::fs_util::{self, fs_error};
use crate::location::LocationResolver;

/// Checks a new filename without touching the filesystem.
pub fn validate_filename(name: &str) -> Result<(), FilenameError> {
    if name.is_empty() {
        return Err(FilenameError::Empty);
    }
    if !is_allowed_name(name) {
        return Err(FilenameError::InvalidCharacters);
    }
    if name == DELETED_FILENAME {
        return Err(FilenameError::Reserved);
    }
    Ok(())
}

/// Rename, delete and download of committed files, and moves of a whole
/// owner folder after the owner is renamed.
///
/// Callers are expected to have checked write permission on the owner.
#[derive(Debug, Clone)]
pub struct FileEditor {
    resolver: LocationResolver,
}

impl FileEditor {
    pub fn new(resolver: LocationResolver) -> Self {
        Self { resolver }
    }

    /// Files in the home folder followed by files in each archive.
    pub fn files(&self, owner: &(impl FileOwner + ?Sized)) -> Result<Vec<ManagedFile>, LabFilesError> {
        let mut files = listing(&self.resolver.home_folder(owner), StorageLocation::Home)?;
        for (index, folder) in self.resolver.archive_folders(owner).iter().enumerate() {
            files.extend(listing(folder, StorageLocation::Archive(index))?);
        }
        Ok(files)
    }

    pub fn file(
        &self,
        owner: &(impl FileOwner + ?Sized),
        location: StorageLocation,
        filename: &str,
    ) -> Result<ManagedFile, LabFilesError> {
        let folder = self.resolver.folder(location, owner)?;
        let path = folder.join(filename);
        if path.parent() != Some(folder.as_path()) || filename == DELETED_FILENAME {
            return Err(LabFilesError::OutsideFolder {
                file: path.into_std_path_buf(),
                folder: folder.into_std_path_buf(),
            });
        }
        if !path.as_std_path().is_file() {
            return Err(LabFilesError::NotFound(format!("file {path}")));
        }
        Ok(ManagedFile::new(path, location))
    }

    /// Renames `file` inside its folder. Renaming a file to its own name is a no-op.
    pub fn rename(&self, file: &ManagedFile, new_name: &str) -> Result<ManagedFile, LabFilesError> {
        ensure_writable(file)?;
        validate_filename(new_name)
            .map_err(|reason| LabFilesError::invalid_filename(new_name, reason))?;
        if new_name == file.filename {
            return Ok(file.clone());
        }

        let folder = file
            .path
            .parent()
            .ok_or_else(|| LabFilesError::Filesystem(format!("{} has no folder", file.path)))?;
        if sibling_exists(folder, &file.filename, new_name)? {
            return Err(LabFilesError::invalid_filename(
                new_name,
                FilenameError::AlreadyExists,
            ));
        }

        let target = folder.join(new_name);
        debug!("rename file {} to {target}", file.path);
        fs::rename(file.path.as_std_path(), target.as_std_path())
            .map_err(|err| fs_error("rename", &file.path, err))?;
        Ok(ManagedFile::new(target, file.location))
    }

    /// Records the deletion in the folder's audit log, then deletes the file.
    pub fn delete(&self, file: &ManagedFile) -> Result<AuditRecord, LabFilesError> {
        ensure_writable(file)?;
        if file.filename == DELETED_FILENAME {
            return Err(LabFilesError::invalid_filename(
                &file.filename,
                FilenameError::Reserved,
            ));
        }
        let folder = file
            .path
            .parent()
            .ok_or_else(|| LabFilesError::Filesystem(format!("{} has no folder", file.path)))?;

        let modified = fs_util::modified(&file.path)?;
        let record = AuditRecord::new(file.filename.clone(), DateTime::<Local>::from(modified));
        AuditLog::append(folder, &record)?;
        debug!("delete file {}", file.path);
        fs::remove_file(file.path.as_std_path()).map_err(|err| fs_error("delete", &file.path, err))?;
        Ok(record)
    }

    /// Moves the home and upload folders of `old` to the folders of `new`, then
    /// renames the home files whose name contains the old owner name.
    ///
    /// Only the first occurrence of the old name is replaced, in filenames and
    /// in each line of `.md5` files. Archives are never touched. Nothing moves
    /// when a target folder or a renamed file already exists. Returns the new
    /// home folder.
    pub fn rename_owner(
        &self,
        old: &(impl FileOwner + ?Sized),
        new: &(impl FileOwner + ?Sized),
    ) -> Result<Utf8PathBuf, LabFilesError> {
        if old.kind() != new.kind() || old.id() != new.id() {
            return Err(LabFilesError::InvalidName(format!(
                "{} and {} are not the same {}",
                old.name(),
                new.name(),
                old.kind().folder_name()
            )));
        }
        let moves = [
            (self.resolver.home_folder(old), self.resolver.home_folder(new)),
            (
                self.resolver.upload_folder(old),
                self.resolver.upload_folder(new),
            ),
        ];
        for (from, to) in &moves {
            if from != to && from.as_std_path().is_dir() && to.as_std_path().exists() {
                return Err(LabFilesError::FolderExists(to.clone().into_std_path_buf()));
            }
        }

        let old_name = old.name().as_str();
        let new_name = new.name().as_str();
        let home = &moves[0].0;
        let renames = if old_name == new_name {
            Vec::new()
        } else {
            fs_util::list_files(home)?
                .into_iter()
                .filter_map(|path| {
                    let filename = path.file_name()?;
                    filename
                        .contains(old_name)
                        .then(|| filename.replacen(old_name, new_name, 1))
                        .map(|renamed| (path.clone(), renamed))
                })
                .collect::<Vec<_>>()
        };
        for (path, renamed) in &renames {
            if home.join(renamed).as_std_path().exists() {
                return Err(LabFilesError::invalid_filename(
                    renamed,
                    FilenameError::AlreadyExists,
                ));
            }
            if !is_allowed_name(renamed) {
                return Err(LabFilesError::invalid_filename(
                    path.file_name().unwrap_or_default(),
                    FilenameError::InvalidCharacters,
                ));
            }
        }

        for (from, to) in &moves {
            move_folder(from, to)?;
        }
        let home = &moves[0].1;
        if old_name != new_name {
            for path in fs_util::list_files(home)? {
                if path.extension() == Some("md5") {
                    rewrite_checksums(&path, old_name, new_name)?;
                }
            }
            for (path, renamed) in &renames {
                let Some(filename) = path.file_name() else {
                    continue;
                };
                let source = home.join(filename);
                let target = home.join(renamed);
                debug!("rename file {source} to {target}");
                fs::rename(source.as_std_path(), target.as_std_path())
                    .map_err(|err| fs_error("rename", &source, err))?;
            }
        }
        info!(
            "moved files of {} to {home}, {} renamed",
            old.name(),
            renames.len()
        );
        Ok(home.clone())
    }

    /// Opens the file read-only; nothing is locked while the caller streams it.
    pub fn download(&self, file: &ManagedFile) -> Result<File, LabFilesError> {
        File::open(file.path.as_std_path()).map_err(|err| fs_error("open", &file.path, err))
    }
}

fn ensure_writable(file: &ManagedFile) -> Result<(), LabFilesError> {
    if file.location.is_writable() {
        Ok(())
    } else {
        Err(LabFilesError::ReadOnlyLocation(
            file.path.clone().into_std_path_buf(),
        ))
    }
}

fn move_folder(from: &Utf8Path, to: &Utf8Path) -> Result<(), LabFilesError> {
    if from == to || !from.as_std_path().is_dir() {
        return Ok(());
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent.as_std_path()).map_err(|err| fs_error("create", parent, err))?;
    }
    debug!("move folder {from} to {to}");
    fs::rename(from.as_std_path(), to.as_std_path()).map_err(|err| fs_error("move", from, err))
}

/// Replaces the first occurrence of `old` on every line of a checksum file.
fn rewrite_checksums(path: &Utf8Path, old: &str, new: &str) -> Result<(), LabFilesError> {
    let content =
        fs::read_to_string(path.as_std_path()).map_err(|err| fs_error("read", path, err))?;
    if !content.contains(old) {
        return Ok(());
    }
    let mut rewritten = content
        .lines()
        .map(|line| line.replacen(old, new, 1))
        .collect::<Vec<_>>()
        .join("\n");
    if content.ends_with('\n') {
        rewritten.push('\n');
    }
    debug!("rewrite checksums in {path}");
    fs_util::write_bytes_atomic(path, rewritten.as_bytes())
}

fn listing(
    folder: &Utf8Path,
    location: StorageLocation,
) -> Result<Vec<ManagedFile>, LabFilesError> {
    Ok(fs_util::list_files(folder)?
        .into_iter()
        .filter(|path| path.file_name() != Some(DELETED_FILENAME))
        .map(|path| ManagedFile::new(path, location))
        .collect())
}

/// Case-sensitive check against the other entries of `folder`.
fn sibling_exists(
    folder: &Utf8Path,
    current: &str,
    candidate: &str,
) -> Result<bool, LabFilesError> {
    let entries = fs::read_dir(folder.as_std_path()).map_err(|err| fs_error("list", folder, err))?;
    for entry in entries {
        let entry = entry.map_err(|err| fs_error("list", folder, err))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name != current && name == candidate {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_rules() {
        assert_eq!(validate_filename(""), Err(FilenameError::Empty));
        assert_eq!(validate_filename("R1.fastq.gz"), Ok(()));
        assert_eq!(validate_filename("sample_01-R2.bam"), Ok(()));
        for bad in [
            "a b", "a#b", "a%b", "a&b", "a{b", "a}b", "a\\b", "a<b", "a>b", "a*b", "a?b", "a/b",
            "a$b", "a!b", "a'b", "a\"b", "a:b", "a@b", "a+b", "a`b", "a|b", "a=b", "..",
            "é.fastq", "数据.txt", "R1\u{00a0}.fastq",
        ] {
            assert_eq!(
                validate_filename(bad),
                Err(FilenameError::InvalidCharacters),
                "{bad}"
            );
        }
        assert_eq!(validate_filename(DELETED_FILENAME), Err(FilenameError::Reserved));
    }
}
