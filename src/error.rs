use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FilenameError {
    #[error("filename is empty")]
    Empty,

    #[error("filename contains invalid characters")]
    InvalidCharacters,

    #[error("filename is reserved")]
    Reserved,

    #[error("a file with this name already exists in the folder")]
    AlreadyExists,
}

#[derive(Debug, Error, Diagnostic)]
pub enum LabFilesError {
    #[error("invalid filename {name:?}: {reason}")]
    #[diagnostic(help("filenames may only contain letters, digits, '_', '-' and '.'"))]
    InvalidFilename { name: String, reason: FilenameError },

    #[error("overwrite not allowed for: {}", filenames.join(", "))]
    #[diagnostic(help("allow overwrite for these files or remove them from the upload folder"))]
    OverwriteNotAllowed { filenames: Vec<String> },

    #[error("existing entries in home block: {}", filenames.join(", "))]
    #[diagnostic(help("a staged file cannot replace a folder or be placed under a file"))]
    CommitBlocked { filenames: Vec<String> },

    #[error("folder {0} already exists")]
    FolderExists(PathBuf),

    #[error("file {0} is in a read-only location")]
    ReadOnlyLocation(PathBuf),

    #[error("file {file} is not in folder {folder}")]
    OutsideFolder { file: PathBuf, folder: PathBuf },

    #[error("archive location {index} is not configured ({count} configured)")]
    UnknownArchive { index: usize, count: usize },

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid filename pattern: {0}")]
    InvalidPattern(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("missing config file kira-lf.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("failed to read public grants: {0}")]
    GrantsParse(String),

    #[error("analysis folder cannot be built: {}", errors.join("; "))]
    AnalysisInvalid { errors: Vec<String> },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl LabFilesError {
    pub fn invalid_filename(name: &str, reason: FilenameError) -> Self {
        Self::InvalidFilename {
            name: name.to_string(),
            reason,
        }
    }
}
