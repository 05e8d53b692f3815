use camino::Utf8PathBuf;
use serde::Serialize;

use crate::analysis::AnalysisFolderBuilder;
use crate::commit::FileCommitEngine;
use crate::config::ResolvedConfig;
use crate::domain::{ClientPlatform, Dataset, FileOwner, OwnerRef, Sample, StorageLocation};
use crate::editor::FileEditor;
use crate::error::LabFilesError;
use crate::location::LocationResolver;
use crate::monitor::UploadMonitor;
use crate::public::{PublicAccessManager, PublicEndpoint};
use crate::staging::StagingArea;

#[derive(Debug, Clone, Serialize)]
pub struct LocationsResult {
    pub owner: String,
    pub home: String,
    pub home_label: String,
    pub archives: Vec<String>,
    pub archive_labels: Vec<String>,
    pub upload: String,
    pub upload_label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HousekeepingResult {
    pub uploads: Vec<Utf8PathBuf>,
    pub analyses: Vec<Utf8PathBuf>,
}

/// All file lifecycle services wired from one configuration.
#[derive(Debug, Clone)]
pub struct App {
    config: ResolvedConfig,
    resolver: LocationResolver,
    staging: StagingArea,
    commit: FileCommitEngine,
    editor: FileEditor,
    public: PublicAccessManager,
    analysis: AnalysisFolderBuilder,
}

impl App {
    pub fn new(config: ResolvedConfig) -> Self {
        let resolver = LocationResolver::new(config.storage.clone());
        let staging = StagingArea::new(resolver.clone());
        let commit = FileCommitEngine::new(resolver.clone(), staging.clone());
        let editor = FileEditor::new(resolver.clone());
        let public = PublicAccessManager::new(resolver.clone(), config.grants_file.clone());
        let analysis =
            AnalysisFolderBuilder::new(resolver.clone()).with_symlinks(config.analysis_symlinks);
        Self {
            config,
            resolver,
            staging,
            commit,
            editor,
            public,
            analysis,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn resolver(&self) -> &LocationResolver {
        &self.resolver
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn commit_engine(&self) -> &FileCommitEngine {
        &self.commit
    }

    pub fn editor(&self) -> &FileEditor {
        &self.editor
    }

    pub fn public_access(&self) -> &PublicAccessManager {
        &self.public
    }

    pub fn analysis(&self) -> &AnalysisFolderBuilder {
        &self.analysis
    }

    pub fn public_endpoint(&self) -> PublicEndpoint {
        PublicEndpoint::new(self.public.clone(), self.config.public_prefix.clone())
    }

    /// A stopped monitor polling at the configured interval.
    pub fn upload_monitor(&self) -> UploadMonitor {
        UploadMonitor::new(self.staging.clone(), self.config.poll_interval)
    }

    /// Looks up a dataset, or a sample when `sample` is set, in the catalog.
    pub fn owner(&self, name: &str, sample: bool) -> Result<OwnerRef, LabFilesError> {
        if sample {
            Ok(self.config.sample(name)?.owner_ref())
        } else {
            Ok(self.config.dataset(name)?.owner_ref())
        }
    }

    pub fn datasets(&self, names: &[String]) -> Result<Vec<Dataset>, LabFilesError> {
        names
            .iter()
            .map(|name| self.config.dataset(name).cloned())
            .collect()
    }

    pub fn samples(&self, names: &[String]) -> Result<Vec<Sample>, LabFilesError> {
        names
            .iter()
            .map(|name| self.config.sample(name).cloned())
            .collect()
    }

    pub fn locations(
        &self,
        owner: &(impl FileOwner + ?Sized),
        platform: ClientPlatform,
    ) -> Result<LocationsResult, LabFilesError> {
        Ok(LocationsResult {
            owner: owner.name().to_string(),
            home: self.resolver.home_folder(owner).to_string(),
            home_label: self.resolver.label(StorageLocation::Home, owner, platform)?,
            archives: self
                .resolver
                .archive_folders(owner)
                .iter()
                .map(ToString::to_string)
                .collect(),
            archive_labels: self.resolver.archive_labels(owner, platform),
            upload: self.resolver.upload_folder(owner).to_string(),
            upload_label: self.resolver.label(StorageLocation::Upload, owner, platform)?,
        })
    }

    /// Deletes upload and analysis folders older than their configured age.
    pub fn housekeeping(&self) -> Result<HousekeepingResult, LabFilesError> {
        Ok(HousekeepingResult {
            uploads: self
                .staging
                .sweep_older_than(self.config.upload_delete_age)?,
            analyses: self
                .analysis
                .sweep_older_than(self.config.analysis_delete_age)?,
        })
    }
}
