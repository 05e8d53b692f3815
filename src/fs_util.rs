use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;
use tracing::{debug, warn};

use crate::error::LabFilesError;

pub(crate) fn fs_error(action: &str, path: &Utf8Path, err: io::Error) -> LabFilesError {
    LabFilesError::Filesystem(format!("{action} {path}: {err}"))
}

/// Dotfiles everywhere, plus the hidden attribute on Windows.
pub fn is_hidden(path: &Path) -> bool {
    let dotfile = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false);
    dotfile || has_hidden_attribute(path)
}

#[cfg(windows)]
fn has_hidden_attribute(path: &Path) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    fs::metadata(path)
        .map(|meta| meta.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0)
        .unwrap_or(false)
}

#[cfg(not(windows))]
fn has_hidden_attribute(_path: &Path) -> bool {
    false
}

/// Regular, non-hidden files directly inside `folder`. A missing folder is empty.
pub fn list_files(folder: &Utf8Path) -> Result<Vec<Utf8PathBuf>, LabFilesError> {
    if !folder.as_std_path().exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    let entries = fs::read_dir(folder.as_std_path()).map_err(|err| fs_error("list", folder, err))?;
    for entry in entries {
        let entry = entry.map_err(|err| fs_error("list", folder, err))?;
        let path = entry.path();
        if !path.is_file() || is_hidden(&path) {
            continue;
        }
        match Utf8PathBuf::from_path_buf(path) {
            Ok(path) => files.push(path),
            Err(path) => warn!("skipping non UTF-8 file {}", path.display()),
        }
    }
    files.sort();
    Ok(files)
}

/// Regular, non-hidden files under `root`, recursively. Hidden folders are not entered.
pub fn walk_files(root: &Utf8Path) -> Result<Vec<Utf8PathBuf>, LabFilesError> {
    let mut items = Vec::new();
    if !root.as_std_path().exists() {
        return Ok(items);
    }
    let mut stack = vec![root.as_std_path().to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries =
            fs::read_dir(&path).map_err(|err| LabFilesError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| LabFilesError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if is_hidden(&path) {
                continue;
            }
            if path.is_dir() {
                stack.push(path);
            } else if path.is_file() {
                match Utf8PathBuf::from_path_buf(path) {
                    Ok(path) => items.push(path),
                    Err(path) => warn!("skipping non UTF-8 file {}", path.display()),
                }
            }
        }
    }
    items.sort();
    Ok(items)
}

pub fn modified(path: &Utf8Path) -> Result<SystemTime, LabFilesError> {
    fs::metadata(path.as_std_path())
        .and_then(|meta| meta.modified())
        .map_err(|err| fs_error("read modification time of", path, err))
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), LabFilesError> {
    let parent = path
        .parent()
        .ok_or_else(|| LabFilesError::Filesystem(format!("invalid destination path {path}")))?;
    fs::create_dir_all(parent.as_std_path()).map_err(|err| fs_error("create", parent, err))?;
    let mut temp = Builder::new()
        .prefix(".kira-lf")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| fs_error("create temp file in", parent, err))?;
    io::Write::write_all(&mut temp, content).map_err(|err| fs_error("write", path, err))?;
    temp.persist(path.as_std_path())
        .map_err(|err| fs_error("persist", path, err.error))?;
    Ok(())
}

/// Copies `source` next to `dest` under a temporary name, then renames it in place.
pub fn copy_file_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<u64, LabFilesError> {
    let parent = dest
        .parent()
        .ok_or_else(|| LabFilesError::Filesystem(format!("invalid destination path {dest}")))?;
    fs::create_dir_all(parent.as_std_path()).map_err(|err| fs_error("create", parent, err))?;
    let temp = Builder::new()
        .prefix(".kira-lf-copy")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| fs_error("create temp file in", parent, err))?;
    let copied =
        fs::copy(source.as_std_path(), temp.path()).map_err(|err| fs_error("copy", source, err))?;
    temp.persist(dest.as_std_path())
        .map_err(|err| fs_error("persist", dest, err.error))?;
    Ok(copied)
}

/// Moves a file, replacing `target` if it exists.
///
/// Same-volume moves are a single rename. Across volumes the file is copied
/// under a temporary name, its size checked against the source, renamed into
/// place, and only then is the source removed.
pub fn move_file(source: &Utf8Path, target: &Utf8Path) -> Result<(), LabFilesError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent.as_std_path()).map_err(|err| fs_error("create", parent, err))?;
    }
    match fs::rename(source.as_std_path(), target.as_std_path()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
            debug!("{source} and {target} are on different volumes, copying");
            copy_then_delete(source, target)
        }
        Err(err) => Err(fs_error("move", source, err)),
    }
}

fn copy_then_delete(source: &Utf8Path, target: &Utf8Path) -> Result<(), LabFilesError> {
    let expected = fs::metadata(source.as_std_path())
        .map_err(|err| fs_error("read", source, err))?
        .len();
    let copied = copy_file_atomic(source, target)?;
    let written = fs::metadata(target.as_std_path())
        .map_err(|err| fs_error("read", target, err))?
        .len();
    if copied != expected || written != expected {
        return Err(LabFilesError::Filesystem(format!(
            "copy of {source} to {target} is incomplete: {written} of {expected} bytes"
        )));
    }
    fs::remove_file(source.as_std_path()).map_err(|err| fs_error("delete", source, err))
}

pub fn remove_dir_if_exists(path: &Utf8Path) -> Result<(), LabFilesError> {
    if path.as_std_path().exists() {
        fs::remove_dir_all(path.as_std_path()).map_err(|err| fs_error("delete", path, err))?;
    }
    Ok(())
}

/// Deletes top-level folders of `root` last modified before `now - max_age`.
/// Returns the deleted folders; folders that cannot be inspected or deleted are logged and kept.
pub fn sweep_older_than(
    root: &Utf8Path,
    max_age: std::time::Duration,
    now: SystemTime,
) -> Result<Vec<Utf8PathBuf>, LabFilesError> {
    let mut deleted = Vec::new();
    if !root.as_std_path().exists() {
        return Ok(deleted);
    }
    let entries = fs::read_dir(root.as_std_path()).map_err(|err| fs_error("list", root, err))?;
    for entry in entries.flatten() {
        let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
            continue;
        };
        if !path.as_std_path().is_dir() {
            continue;
        }
        let expired = modified(&path)
            .ok()
            .and_then(|time| now.duration_since(time).ok())
            .map(|age| age > max_age)
            .unwrap_or(false);
        if !expired {
            continue;
        }
        debug!("deleting old folder {path}");
        match fs::remove_dir_all(path.as_std_path()) {
            Ok(()) => deleted.push(path),
            Err(err) => warn!("could not delete folder {path}: {err}"),
        }
    }
    deleted.sort();
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn utf8(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn walk_skips_hidden_entries() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("R1.fastq"), b"@r1").unwrap();
        fs::write(root.join("nested/R2.fastq"), b"@r2").unwrap();
        fs::write(root.join(".DS_Store"), b"").unwrap();
        fs::write(root.join(".git/HEAD"), b"").unwrap();

        let files = walk_files(&root).unwrap();
        assert_eq!(files, vec![root.join("R1.fastq"), root.join("nested/R2.fastq")]);
    }

    #[test]
    fn move_replaces_existing_target() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        fs::write(root.join("a.txt"), b"new").unwrap();
        fs::create_dir_all(root.join("home")).unwrap();
        fs::write(root.join("home/a.txt"), b"old").unwrap();

        move_file(&root.join("a.txt"), &root.join("home/a.txt")).unwrap();
        assert!(!root.join("a.txt").exists());
        assert_eq!(fs::read(root.join("home/a.txt")).unwrap(), b"new");
    }

    #[test]
    fn sweep_keeps_recent_folders() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        fs::create_dir_all(root.join("recent")).unwrap();

        let now = SystemTime::now();
        let deleted = sweep_older_than(&root, Duration::from_secs(3600), now).unwrap();
        assert!(deleted.is_empty());

        let later = now + Duration::from_secs(7200);
        let deleted = sweep_older_than(&root, Duration::from_secs(3600), later).unwrap();
        assert_eq!(deleted, vec![root.join("recent")]);
        assert!(!root.join("recent").exists());
    }
}
