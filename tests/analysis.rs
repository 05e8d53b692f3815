use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use tempfile::TempDir;

use kira_lab_files::analysis::{AnalysisFolderBuilder, DATASET_FILENAME, SAMPLES_FILENAME};
use kira_lab_files::config::{LocationConfig, StorageLayout};
use kira_lab_files::domain::{Dataset, Sample};
use kira_lab_files::glob::GlobPattern;
use kira_lab_files::location::LocationResolver;

struct Fixture {
    _dir: TempDir,
    root: Utf8PathBuf,
    resolver: LocationResolver,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let layout = StorageLayout {
        home: LocationConfig::new(root.join("home")),
        archives: Vec::new(),
        upload: LocationConfig::new(root.join("upload")),
        analysis: LocationConfig::new(root.join("analysis")),
    };
    Fixture {
        _dir: dir,
        resolver: LocationResolver::new(layout),
        root,
    }
}

fn sample(id: u64, name: &str) -> Sample {
    Sample {
        id,
        name: name.parse().unwrap(),
        date: NaiveDate::from_ymd_opt(2018, 10, 20).unwrap(),
    }
}

fn dataset(id: u64, name: &str, samples: Vec<Sample>) -> Dataset {
    Dataset {
        id,
        name: name.parse().unwrap(),
        date: NaiveDate::from_ymd_opt(2018, 10, 20).unwrap(),
        samples,
    }
}

fn write(path: &Utf8Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn patterns(values: &[&str]) -> Vec<GlobPattern> {
    values.iter().map(|value| value.parse().unwrap()).collect()
}

/// Two datasets, three samples, two fastq files and one bam per sample.
fn populated(fx: &Fixture) -> Vec<Dataset> {
    let datasets = vec![
        dataset(
            2,
            "MNaseseq_IP_polr2a_yFR100_WT_Rappa_FR1-FR2_20181020",
            vec![sample(1, "FR1"), sample(2, "FR2")],
        ),
        dataset(
            6,
            "ChIPseq_Spt16_yFR101_G24D_JS1_20181022",
            vec![sample(4, "JS1")],
        ),
    ];
    for sample in datasets.iter().flat_map(|dataset| &dataset.samples) {
        let home = fx.resolver.home_folder(sample);
        write(&home.join(format!("{}_R1.fastq", sample.name)), "@r1");
        write(&home.join(format!("{}_R2.fastq", sample.name)), "@r2");
        write(&home.join(format!("{}.bam", sample.name)), "bam");
    }
    datasets
}

fn entries(folder: &Utf8Path) -> Vec<String> {
    let mut names = fs::read_dir(folder)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect::<Vec<_>>();
    names.sort();
    names
}

#[test]
fn build_copies_matching_files_and_writes_manifests() {
    let fx = fixture();
    let datasets = populated(&fx);
    let builder = AnalysisFolderBuilder::new(fx.resolver.clone());
    let patterns = patterns(&["*.fastq"]);

    assert!(builder.validate(&datasets, &patterns).is_empty());
    let folder = builder.build(&datasets, &patterns).unwrap();

    assert_eq!(folder, fx.root.join("analysis/datasets-2-6"));
    let names = entries(&folder);
    let fastq = names
        .iter()
        .filter(|name| name.ends_with(".fastq"))
        .collect::<Vec<_>>();
    assert_eq!(fastq.len(), 6);
    assert_eq!(names.len(), 8);
    assert!(!names.iter().any(|name| name.ends_with(".bam")));

    let samples = fs::read_to_string(folder.join(SAMPLES_FILENAME)).unwrap();
    assert_eq!(samples.lines().collect::<Vec<_>>(), vec!["#sample", "FR1", "FR2", "JS1"]);

    let dataset = fs::read_to_string(folder.join(DATASET_FILENAME)).unwrap();
    let lines = dataset.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "#merge\tsamples");
    assert_eq!(
        lines[1],
        "MNaseseq_IP_polr2a_yFR100_WT_Rappa_FR1-FR2_20181020\tFR1\tFR2"
    );
    assert_eq!(lines[2], "ChIPseq_Spt16_yFR101_G24D_JS1_20181022\tJS1");
}

#[test]
fn single_dataset_folder_is_named_after_the_dataset() {
    let fx = fixture();
    let datasets = populated(&fx);
    let builder = AnalysisFolderBuilder::new(fx.resolver.clone());

    let folder = builder
        .build(&datasets[1..], &patterns(&["*.bam"]))
        .unwrap();

    assert_eq!(
        folder,
        fx.root
            .join("analysis/ChIPseq_Spt16_yFR101_G24D_JS1_20181022")
    );
    assert_eq!(
        entries(&folder),
        vec!["JS1.bam", DATASET_FILENAME, SAMPLES_FILENAME]
    );
}

#[test]
fn rebuild_starts_from_an_empty_folder() {
    let fx = fixture();
    let datasets = populated(&fx);
    let builder = AnalysisFolderBuilder::new(fx.resolver.clone());
    let folder = builder.build(&datasets, &patterns(&["*.bam"])).unwrap();
    write(&folder.join("notes.txt"), "stale");

    builder
        .build(&datasets, &patterns(&["*_R1.fastq"]))
        .unwrap();

    let names = entries(&folder);
    assert!(!names.contains(&"notes.txt".to_string()));
    assert!(!names.contains(&"FR1.bam".to_string()));
    assert!(names.contains(&"FR1_R1.fastq".to_string()));
}

#[test]
fn validate_reports_missing_inputs() {
    let fx = fixture();
    let mut datasets = populated(&fx);
    datasets.push(dataset(9, "EMPTY", Vec::new()));
    let builder = AnalysisFolderBuilder::new(fx.resolver.clone());

    let errors = builder.validate(&datasets, &patterns(&["*.bw"]));
    assert_eq!(errors.len(), 4);
    assert!(errors.iter().any(|error| error.contains("EMPTY")));
    assert!(errors.iter().any(|error| error.contains("sample JS1")));

    let errors = builder.validate(&[], &[]);
    assert_eq!(errors.len(), 2);
}

#[test]
fn validate_reports_manifest_name_conflicts() {
    let fx = fixture();
    let datasets = populated(&fx);
    let fr1 = &datasets[0].samples[0];
    write(&fx.resolver.home_folder(fr1).join(SAMPLES_FILENAME), "x");
    let builder = AnalysisFolderBuilder::new(fx.resolver.clone());

    let errors = builder.validate(&datasets, &patterns(&["*.txt"]));
    assert!(
        errors
            .iter()
            .any(|error| error.contains(SAMPLES_FILENAME) && error.contains("FR1"))
    );
}

#[test]
fn same_filename_in_two_samples_keeps_the_last_one() {
    let fx = fixture();
    let first = sample(1, "FR1");
    let second = sample(2, "FR2");
    write(&fx.resolver.home_folder(&first).join("x.fastq"), "@first");
    write(&fx.resolver.home_folder(&second).join("x.fastq"), "@second");
    let datasets = vec![dataset(3, "DS3", vec![first, second])];
    let builder = AnalysisFolderBuilder::new(fx.resolver.clone());

    let folder = builder.build(&datasets, &patterns(&["x.fastq"])).unwrap();

    assert_eq!(fs::read_to_string(folder.join("x.fastq")).unwrap(), "@second");
    assert_eq!(
        entries(&folder),
        vec![DATASET_FILENAME, SAMPLES_FILENAME, "x.fastq"]
    );
}

#[test]
fn samples_build_writes_only_the_samples_manifest() {
    let fx = fixture();
    let datasets = populated(&fx);
    let samples = vec![
        datasets[1].samples[0].clone(),
        datasets[0].samples[0].clone(),
    ];
    let builder = AnalysisFolderBuilder::new(fx.resolver.clone());
    let patterns = patterns(&["*_R1.fastq"]);

    assert!(builder.validate_samples(&samples, &patterns).is_empty());
    let folder = builder.build_samples(&samples, &patterns).unwrap();

    assert_eq!(folder, fx.root.join("analysis/samples-1-4"));
    assert_eq!(
        entries(&folder),
        vec!["FR1_R1.fastq", "JS1_R1.fastq", SAMPLES_FILENAME]
    );
    let manifest = fs::read_to_string(folder.join(SAMPLES_FILENAME)).unwrap();
    assert_eq!(manifest.lines().collect::<Vec<_>>(), vec!["#sample", "JS1", "FR1"]);

    let single = builder
        .build_samples(&samples[..1], &patterns)
        .unwrap();
    assert_eq!(single, fx.root.join("analysis/JS1"));
}

#[test]
fn validate_samples_reports_missing_inputs() {
    let fx = fixture();
    let datasets = populated(&fx);
    let builder = AnalysisFolderBuilder::new(fx.resolver.clone());

    let errors = builder.validate_samples(&datasets[0].samples, &patterns(&["*.bw"]));
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().any(|error| error.contains("sample FR2")));

    let errors = builder.validate_samples(&[], &[]);
    assert_eq!(errors.len(), 2);
}

#[cfg(unix)]
#[test]
fn symlinks_point_at_home_files() {
    let fx = fixture();
    let datasets = populated(&fx);
    let builder = AnalysisFolderBuilder::new(fx.resolver.clone()).with_symlinks(true);

    let folder = builder
        .build(&datasets[1..], &patterns(&["*.fastq"]))
        .unwrap();

    let link = folder.join("JS1_R1.fastq");
    let target = fs::read_link(&link).unwrap();
    let expected = fx
        .resolver
        .home_folder(&datasets[1].samples[0])
        .join("JS1_R1.fastq");
    assert_eq!(target, expected.as_std_path());
    assert_eq!(fs::read_to_string(&link).unwrap(), "@r1");
}
