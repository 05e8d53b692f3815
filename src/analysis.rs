//! Consolidated analysis folders built from the samples of one or more
//! datasets, or from a plain set of samples.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::time::{Duration, SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use crate::domain::{Dataset, FileOwner, Sample};
use crate::error::LabFilesError;
use crate::fs_util::{self, fs_error};
use crate::glob::GlobPattern;
use crate::location::LocationResolver;

pub const SAMPLES_FILENAME: &str = "samples.txt";
pub const DATASET_FILENAME: &str = "dataset.txt";

#[derive(Debug, Clone)]
pub struct AnalysisFolderBuilder {
    resolver: LocationResolver,
    symlinks: bool,
}

impl AnalysisFolderBuilder {
    pub fn new(resolver: LocationResolver) -> Self {
        Self {
            resolver,
            symlinks: false,
        }
    }

    /// Link sample files into the analysis folder instead of copying them (Unix only).
    pub fn with_symlinks(mut self, symlinks: bool) -> Self {
        self.symlinks = symlinks;
        self
    }

    pub fn folder(&self, datasets: &[Dataset]) -> Result<Utf8PathBuf, LabFilesError> {
        self.resolver.analysis_folder(datasets)
    }

    pub fn samples_folder(&self, samples: &[Sample]) -> Result<Utf8PathBuf, LabFilesError> {
        self.resolver.analysis_folder(samples)
    }

    /// Home files of `sample` matching any of `patterns`, sorted, without duplicates.
    pub fn sample_files(
        &self,
        sample: &Sample,
        patterns: &[GlobPattern],
    ) -> Result<Vec<Utf8PathBuf>, LabFilesError> {
        let files = fs_util::list_files(&self.resolver.home_folder(sample))?;
        let mut matching = BTreeSet::new();
        for pattern in patterns {
            for file in &files {
                if file
                    .file_name()
                    .map(|name| pattern.matches(name))
                    .unwrap_or(false)
                {
                    matching.insert(file.clone());
                }
            }
        }
        Ok(matching.into_iter().collect())
    }

    /// Problems that prevent a build, as user-facing messages. Empty when the build can run.
    pub fn validate(&self, datasets: &[Dataset], patterns: &[GlobPattern]) -> Vec<String> {
        let mut errors = Vec::new();
        if datasets.is_empty() {
            errors.push("no dataset selected".to_string());
        }
        if patterns.is_empty() {
            errors.push("no filename pattern given".to_string());
        }
        for dataset in datasets {
            if dataset.samples.is_empty() {
                errors.push(format!("dataset {} has no samples", dataset.name));
                continue;
            }
            for sample in &dataset.samples {
                self.check_sample(
                    sample,
                    patterns,
                    &[SAMPLES_FILENAME, DATASET_FILENAME],
                    &mut errors,
                );
            }
        }
        errors
    }

    /// Same as [`validate`](Self::validate) for a build from samples only.
    pub fn validate_samples(&self, samples: &[Sample], patterns: &[GlobPattern]) -> Vec<String> {
        let mut errors = Vec::new();
        if samples.is_empty() {
            errors.push("no sample selected".to_string());
        }
        if patterns.is_empty() {
            errors.push("no filename pattern given".to_string());
        }
        for sample in samples {
            self.check_sample(sample, patterns, &[SAMPLES_FILENAME], &mut errors);
        }
        errors
    }

    fn check_sample(
        &self,
        sample: &Sample,
        patterns: &[GlobPattern],
        manifests: &[&str],
        errors: &mut Vec<String>,
    ) {
        match self.sample_files(sample, patterns) {
            Ok(files) if files.is_empty() => {
                let described = patterns
                    .iter()
                    .map(GlobPattern::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                errors.push(format!(
                    "sample {} has no file matching {described}",
                    sample.name
                ));
            }
            Ok(files) => {
                for file in files {
                    let name = file.file_name().unwrap_or_default();
                    if manifests.contains(&name) {
                        errors.push(format!(
                            "file {name} of sample {} conflicts with the analysis manifest",
                            sample.name
                        ));
                    }
                }
            }
            Err(err) => errors.push(format!(
                "cannot list files of sample {}: {err}",
                sample.name
            )),
        }
    }

    /// Rebuilds the analysis folder of `datasets` from scratch and returns it.
    ///
    /// Expects [`validate`](Self::validate) to have passed. Files with the
    /// same name in different samples overwrite each other; the last sample
    /// in dataset order wins and a warning is logged.
    pub fn build(
        &self,
        datasets: &[Dataset],
        patterns: &[GlobPattern],
    ) -> Result<Utf8PathBuf, LabFilesError> {
        let folder = self.folder(datasets)?;
        let samples = datasets
            .iter()
            .flat_map(|dataset| dataset.samples.iter())
            .collect::<Vec<_>>();
        let copied = self.fill(&folder, &samples, patterns)?;

        write_manifest(&folder.join(SAMPLES_FILENAME), &samples_lines(&samples))?;
        write_manifest(&folder.join(DATASET_FILENAME), &dataset_lines(datasets))?;
        info!(
            "built analysis folder {folder} with {copied} files from {} datasets",
            datasets.len()
        );
        Ok(folder)
    }

    /// Rebuilds the analysis folder of `samples` with a `samples.txt` manifest only.
    ///
    /// Same collision rule as [`build`](Self::build), in sample order.
    pub fn build_samples(
        &self,
        samples: &[Sample],
        patterns: &[GlobPattern],
    ) -> Result<Utf8PathBuf, LabFilesError> {
        let folder = self.samples_folder(samples)?;
        let samples = samples.iter().collect::<Vec<_>>();
        let copied = self.fill(&folder, &samples, patterns)?;

        write_manifest(&folder.join(SAMPLES_FILENAME), &samples_lines(&samples))?;
        info!(
            "built analysis folder {folder} with {copied} files from {} samples",
            samples.len()
        );
        Ok(folder)
    }

    /// Recreates `folder` empty and places the matching files of every sample in it.
    fn fill(
        &self,
        folder: &Utf8Path,
        samples: &[&Sample],
        patterns: &[GlobPattern],
    ) -> Result<usize, LabFilesError> {
        fs_util::remove_dir_if_exists(folder)?;
        fs::create_dir_all(folder.as_std_path()).map_err(|err| fs_error("create", folder, err))?;

        let mut origins = HashMap::<String, String>::new();
        let mut copied = 0usize;
        for sample in samples {
            for file in self.sample_files(sample, patterns)? {
                let name = file.file_name().unwrap_or_default().to_string();
                if let Some(previous) = origins.insert(name.clone(), sample.name.to_string()) {
                    warn!(
                        "{name} of sample {} replaces the one of sample {previous} in {folder}",
                        sample.name
                    );
                }
                self.place(&file, &folder.join(&name))?;
                copied += 1;
            }
        }
        Ok(copied)
    }

    /// Deletes analysis folders untouched for longer than `max_age`.
    pub fn sweep_older_than(&self, max_age: Duration) -> Result<Vec<Utf8PathBuf>, LabFilesError> {
        let root = &self.resolver.layout().analysis.folder;
        let deleted = fs_util::sweep_older_than(root, max_age, SystemTime::now())?;
        if !deleted.is_empty() {
            info!("deleted {} old analysis folders", deleted.len());
        }
        Ok(deleted)
    }

    fn place(&self, source: &Utf8Path, destination: &Utf8Path) -> Result<(), LabFilesError> {
        if self.symlinks {
            if let Some(result) = symlink(source, destination) {
                return result;
            }
            warn!("symbolic links are not supported here, copying {source}");
        }
        debug!("copying {source} to {destination}");
        fs_util::copy_file_atomic(source, destination).map(|_| ())
    }
}

#[cfg(unix)]
fn symlink(source: &Utf8Path, destination: &Utf8Path) -> Option<Result<(), LabFilesError>> {
    debug!("linking {source} to {destination}");
    let result = (|| {
        if destination.as_std_path().symlink_metadata().is_ok() {
            fs::remove_file(destination.as_std_path())?;
        }
        std::os::unix::fs::symlink(source.as_std_path(), destination.as_std_path())
    })();
    Some(result.map_err(|err| fs_error("link", destination, err)))
}

#[cfg(not(unix))]
fn symlink(_source: &Utf8Path, _destination: &Utf8Path) -> Option<Result<(), LabFilesError>> {
    None
}

fn samples_lines(samples: &[&Sample]) -> Vec<String> {
    let mut lines = vec!["#sample".to_string()];
    lines.extend(samples.iter().map(|sample| sample.name().to_string()));
    lines
}

fn dataset_lines(datasets: &[Dataset]) -> Vec<String> {
    let mut lines = vec!["#merge\tsamples".to_string()];
    for dataset in datasets {
        let mut columns = vec![dataset.name.to_string()];
        columns.extend(dataset.samples.iter().map(|sample| sample.name.to_string()));
        lines.push(columns.join("\t"));
    }
    lines
}

fn write_manifest(path: &Utf8Path, lines: &[String]) -> Result<(), LabFilesError> {
    let mut content = lines.join("\n");
    content.push('\n');
    fs::write(path.as_std_path(), content).map_err(|err| fs_error("write", path, err))
}
