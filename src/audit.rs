//! Deletion audit trail kept next to the files it tracks.
//!
//! One record per line, tab separated: filename, last modification time and
//! deletion time, both ISO-8601 local date-times. Backslash, tab, carriage
//! return and newline in the filename are written as `\\`, `\t`, `\r` and `\n`.

use std::fs::{self, OpenOptions};
use std::io::Write;

use camino::Utf8Path;
use chrono::{DateTime, Local, NaiveDateTime};
use serde::Serialize;
use tracing::warn;

use crate::error::LabFilesError;
use crate::fs_util::fs_error;

/// Reserved filename of the audit log inside every owner folder.
pub const DELETED_FILENAME: &str = ".deleted";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub filename: String,
    pub last_modified: NaiveDateTime,
    pub deleted: NaiveDateTime,
}

impl AuditRecord {
    pub fn new(filename: impl Into<String>, last_modified: DateTime<Local>) -> Self {
        Self {
            filename: filename.into(),
            last_modified: last_modified.naive_local(),
            deleted: Local::now().naive_local(),
        }
    }

    pub fn to_line(&self) -> String {
        format!(
            "{}\t{}\t{}\n",
            escape(&self.filename),
            self.last_modified.format(TIMESTAMP_FORMAT),
            self.deleted.format(TIMESTAMP_FORMAT)
        )
    }

    pub fn parse_line(line: &str) -> Option<Self> {
        let mut columns = line.trim_end_matches(['\r', '\n']).split('\t');
        let filename = columns
            .next()
            .filter(|name| !name.is_empty())
            .and_then(unescape)?;
        let last_modified = NaiveDateTime::parse_from_str(columns.next()?, TIMESTAMP_FORMAT).ok()?;
        let deleted = NaiveDateTime::parse_from_str(columns.next()?, TIMESTAMP_FORMAT).ok()?;
        if columns.next().is_some() {
            return None;
        }
        Some(Self {
            filename,
            last_modified,
            deleted,
        })
    }
}

fn escape(filename: &str) -> String {
    let mut escaped = String::with_capacity(filename.len());
    for c in filename.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\t' => escaped.push_str("\\t"),
            '\r' => escaped.push_str("\\r"),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn unescape(column: &str) -> Option<String> {
    let mut filename = String::with_capacity(column.len());
    let mut chars = column.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            filename.push(c);
            continue;
        }
        match chars.next()? {
            '\\' => filename.push('\\'),
            't' => filename.push('\t'),
            'r' => filename.push('\r'),
            'n' => filename.push('\n'),
            _ => return None,
        }
    }
    Some(filename)
}

/// A line of the audit log that is not a valid record, numbered from 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MalformedLine {
    pub line: usize,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditTrail {
    pub records: Vec<AuditRecord>,
    pub malformed: Vec<MalformedLine>,
}

pub struct AuditLog;

impl AuditLog {
    pub fn path(folder: &Utf8Path) -> camino::Utf8PathBuf {
        folder.join(DELETED_FILENAME)
    }

    /// Appends one record; the log is created on first use and never truncated.
    pub fn append(folder: &Utf8Path, record: &AuditRecord) -> Result<(), LabFilesError> {
        let path = Self::path(folder);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_std_path())
            .map_err(|err| fs_error("open", &path, err))?;
        file.write_all(record.to_line().as_bytes())
            .map_err(|err| fs_error("write", &path, err))?;
        file.sync_data().map_err(|err| fs_error("sync", &path, err))
    }

    /// Records in file order, with every line that could not be parsed.
    pub fn read(folder: &Utf8Path) -> Result<AuditTrail, LabFilesError> {
        let path = Self::path(folder);
        let mut trail = AuditTrail::default();
        if !path.as_std_path().exists() {
            return Ok(trail);
        }
        let content =
            fs::read_to_string(path.as_std_path()).map_err(|err| fs_error("read", &path, err))?;
        for (index, line) in content.lines().enumerate() {
            match AuditRecord::parse_line(line) {
                Some(record) => trail.records.push(record),
                None => {
                    warn!("malformed line {} in audit log {path}", index + 1);
                    trail.malformed.push(MalformedLine {
                        line: index + 1,
                        content: line.to_string(),
                    });
                }
            }
        }
        Ok(trail)
    }

    /// Records in file order; malformed lines are logged and left out.
    pub fn records(folder: &Utf8Path) -> Result<Vec<AuditRecord>, LabFilesError> {
        Ok(Self::read(folder)?.records)
    }
}
