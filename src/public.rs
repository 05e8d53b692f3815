//! Time-limited anonymous access to single committed files.
//!
//! Grants are stored as JSON in one file, rewritten atomically on every
//! change. Expiry is a calendar date and a grant stays valid for the whole of
//! that day. Expired grants are ignored when read, never swept.

use std::fs::{self, File};
use std::io::Read;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{FileOwner, OwnerKind, OwnerRef, is_allowed_name};
use crate::error::LabFilesError;
use crate::fs_util::{self, fs_error};
use crate::location::LocationResolver;

pub const DEFAULT_SAMPLE_PUBLIC_PREFIX: &str = "sample-file";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicGrant {
    pub owner: OwnerRef,
    /// Path relative to the owner's home folder, `/` separated.
    pub path: String,
    pub expiry: NaiveDate,
}

impl PublicGrant {
    fn is_for(&self, kind: OwnerKind, name: &str, path: &str) -> bool {
        self.owner.kind == kind && self.owner.name.as_str() == name && self.path == path
    }

    pub fn is_valid_on(&self, today: NaiveDate) -> bool {
        self.expiry >= today
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GrantsFile {
    #[serde(default)]
    grants: Vec<PublicGrant>,
}

#[derive(Debug, Clone)]
pub struct PublicAccessManager {
    resolver: LocationResolver,
    grants_file: Utf8PathBuf,
}

impl PublicAccessManager {
    pub fn new(resolver: LocationResolver, grants_file: Utf8PathBuf) -> Self {
        Self {
            resolver,
            grants_file,
        }
    }

    /// Grants access to `path` until `expiry`, replacing the expiry of an existing grant.
    pub fn grant(
        &self,
        owner: &(impl FileOwner + ?Sized),
        path: &str,
        expiry: NaiveDate,
    ) -> Result<PublicGrant, LabFilesError> {
        let path = normalize_relative(path)
            .ok_or_else(|| LabFilesError::InvalidName(path.to_string()))?;
        let mut grants = self.load()?;
        let owner = owner.owner_ref();
        let grant = PublicGrant {
            owner,
            path,
            expiry,
        };
        match grants
            .iter_mut()
            .find(|existing| existing.is_for(grant.owner.kind, grant.owner.name.as_str(), &grant.path))
        {
            Some(existing) => *existing = grant.clone(),
            None => grants.push(grant.clone()),
        }
        self.save(grants)?;
        info!(
            "public access to {} of {} granted until {}",
            grant.path, grant.owner.name, grant.expiry
        );
        Ok(grant)
    }

    /// Returns false when there was no grant to revoke.
    pub fn revoke(&self, owner: &(impl FileOwner + ?Sized), path: &str) -> Result<bool, LabFilesError> {
        let Some(path) = normalize_relative(path) else {
            return Ok(false);
        };
        let mut grants = self.load()?;
        let before = grants.len();
        grants.retain(|grant| !grant.is_for(owner.kind(), owner.name().as_str(), &path));
        if grants.len() == before {
            return Ok(false);
        }
        self.save(grants)?;
        info!("public access to {path} of {} revoked", owner.name());
        Ok(true)
    }

    /// Real path of a publicly shared file, if a grant is valid today and the file exists.
    pub fn resolve(&self, kind: OwnerKind, name: &str, path: &str) -> Option<Utf8PathBuf> {
        self.resolve_on(kind, name, path, Local::now().date_naive())
    }

    pub fn resolve_on(
        &self,
        kind: OwnerKind,
        name: &str,
        path: &str,
        today: NaiveDate,
    ) -> Option<Utf8PathBuf> {
        let path = normalize_relative(path)?;
        let grants = match self.load() {
            Ok(grants) => grants,
            Err(err) => {
                warn!("could not read public grants: {err}");
                return None;
            }
        };
        let grant = grants
            .into_iter()
            .find(|grant| grant.is_for(kind, name, &path) && grant.is_valid_on(today))?;
        let file = self.resolver.home_folder(&grant.owner).join(&grant.path);
        file.as_std_path().is_file().then_some(file)
    }

    /// Grants still valid today.
    pub fn grants(&self) -> Result<Vec<PublicGrant>, LabFilesError> {
        self.grants_on(Local::now().date_naive())
    }

    pub fn grants_on(&self, today: NaiveDate) -> Result<Vec<PublicGrant>, LabFilesError> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|grant| grant.is_valid_on(today))
            .collect())
    }

    fn load(&self) -> Result<Vec<PublicGrant>, LabFilesError> {
        if !self.grants_file.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(self.grants_file.as_std_path())
            .map_err(|err| fs_error("read", &self.grants_file, err))?;
        let file: GrantsFile = serde_json::from_str(&content)
            .map_err(|err| LabFilesError::GrantsParse(format!("{}: {err}", self.grants_file)))?;
        Ok(file.grants)
    }

    fn save(&self, grants: Vec<PublicGrant>) -> Result<(), LabFilesError> {
        let content = serde_json::to_vec_pretty(&GrantsFile { grants })
            .map_err(|err| LabFilesError::Filesystem(err.to_string()))?;
        fs_util::write_bytes_atomic(&self.grants_file, &content)
    }
}

/// Relative path made of allowed names only, or `None`.
fn normalize_relative(path: &str) -> Option<String> {
    let parts = path
        .split(['/', '\\'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>();
    if parts.is_empty() || !parts.iter().all(|part| is_allowed_name(part)) {
        return None;
    }
    Some(parts.join("/"))
}

/// A file answered by the anonymous endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicFile {
    pub path: Utf8PathBuf,
    pub content_type: String,
}

/// `GET /<prefix>/<name>/<path>` for anonymous users.
///
/// Anything that cannot be served, for whatever reason, is `None` so callers
/// answer "not found".
#[derive(Debug, Clone)]
pub struct PublicEndpoint {
    access: PublicAccessManager,
    dataset_prefix: String,
    sample_prefix: String,
}

impl PublicEndpoint {
    pub fn new(access: PublicAccessManager, dataset_prefix: impl Into<String>) -> Self {
        Self {
            access,
            dataset_prefix: dataset_prefix.into(),
            sample_prefix: DEFAULT_SAMPLE_PUBLIC_PREFIX.to_string(),
        }
    }

    pub fn url_path(&self, owner: &(impl FileOwner + ?Sized), path: &str) -> String {
        let prefix = match owner.kind() {
            OwnerKind::Dataset => &self.dataset_prefix,
            OwnerKind::Sample => &self.sample_prefix,
        };
        format!("/{prefix}/{}/{}", owner.name(), path.trim_start_matches('/'))
    }

    pub fn lookup(&self, request_path: &str) -> Option<PublicFile> {
        let request_path = request_path.split(['?', '#']).next().unwrap_or_default();
        let (prefix, rest) = request_path.trim_start_matches('/').split_once('/')?;
        let kind = if prefix == self.dataset_prefix {
            OwnerKind::Dataset
        } else if prefix == self.sample_prefix {
            OwnerKind::Sample
        } else {
            return None;
        };
        let (name, path) = rest.split_once('/')?;
        debug!("trying to access public file {path} of {name}");
        let file = self.access.resolve(kind, name, path)?;
        let content_type = content_type(&file);
        Some(PublicFile {
            path: file,
            content_type,
        })
    }

    pub fn open(&self, file: &PublicFile) -> Result<File, LabFilesError> {
        File::open(file.path.as_std_path()).map_err(|err| fs_error("open", &file.path, err))
    }
}

pub fn content_type(path: &Utf8Path) -> String {
    if let Ok(Some(kind)) = infer::get_from_path(path.as_std_path()) {
        return kind.mime_type().to_string();
    }
    let mut head = Vec::with_capacity(8192);
    let readable = File::open(path.as_std_path())
        .and_then(|file| file.take(8192).read_to_end(&mut head))
        .is_ok();
    if readable && is_text(&head) {
        "text/plain; charset=utf-8".to_string()
    } else {
        "application/octet-stream".to_string()
    }
}

fn is_text(head: &[u8]) -> bool {
    match std::str::from_utf8(head) {
        Ok(text) => !text.contains('\0'),
        // The sample may cut a multi-byte character in half.
        Err(err) => err.error_len().is_none() && err.valid_up_to() + 4 > head.len(),
    }
}
