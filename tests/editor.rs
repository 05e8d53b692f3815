use std::fs;
use std::io::{Read, Write};

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use tempfile::TempDir;

use kira_lab_files::audit::{AuditLog, DELETED_FILENAME};
use kira_lab_files::config::{LocationConfig, StorageLayout};
use kira_lab_files::domain::{Sample, StorageLocation};
use kira_lab_files::editor::FileEditor;
use kira_lab_files::error::{FilenameError, LabFilesError};
use kira_lab_files::location::LocationResolver;

struct Fixture {
    _dir: TempDir,
    resolver: LocationResolver,
    editor: FileEditor,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let layout = StorageLayout {
        home: LocationConfig::new(root.join("home")),
        archives: vec![LocationConfig::new(root.join("archive"))],
        upload: LocationConfig::new(root.join("upload")),
        analysis: LocationConfig::new(root.join("analysis")),
    };
    let resolver = LocationResolver::new(layout);
    Fixture {
        _dir: dir,
        editor: FileEditor::new(resolver.clone()),
        resolver,
    }
}

fn sample() -> Sample {
    Sample {
        id: 4,
        name: "JS1".parse().unwrap(),
        date: NaiveDate::from_ymd_opt(2018, 10, 22).unwrap(),
    }
}

fn write(path: &Utf8Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn files_lists_home_then_archives() {
    let fx = fixture();
    let owner = sample();
    let home = fx.resolver.home_folder(&owner);
    let archive = fx.resolver.archive_folders(&owner).remove(0);
    write(&home.join("R1.fastq"), "@r1");
    write(&home.join(DELETED_FILENAME), "");
    write(&archive.join("old.bam"), "bam");

    let files = fx.editor.files(&owner).unwrap();

    let listed = files
        .iter()
        .map(|file| (file.filename.as_str(), file.location))
        .collect::<Vec<_>>();
    assert_eq!(
        listed,
        vec![
            ("R1.fastq", StorageLocation::Home),
            ("old.bam", StorageLocation::Archive(0)),
        ]
    );
}

#[test]
fn rename_moves_the_file() {
    let fx = fixture();
    let owner = sample();
    let home = fx.resolver.home_folder(&owner);
    write(&home.join("R1.fastq"), "@r1");

    let file = fx.editor.file(&owner, StorageLocation::Home, "R1.fastq").unwrap();
    let renamed = fx.editor.rename(&file, "JS1_R1.fastq").unwrap();

    assert_eq!(renamed.filename, "JS1_R1.fastq");
    assert_eq!(renamed.path, home.join("JS1_R1.fastq"));
    assert!(!home.join("R1.fastq").exists());
    assert_eq!(fs::read_to_string(&renamed.path).unwrap(), "@r1");
}

#[test]
fn rename_to_own_name_is_a_no_op() {
    let fx = fixture();
    let owner = sample();
    let home = fx.resolver.home_folder(&owner);
    write(&home.join("R1.fastq"), "@r1");

    let file = fx.editor.file(&owner, StorageLocation::Home, "R1.fastq").unwrap();
    let renamed = fx.editor.rename(&file, "R1.fastq").unwrap();

    assert_eq!(renamed, file);
    assert!(home.join("R1.fastq").exists());
}

#[test]
fn rename_refuses_existing_sibling() {
    let fx = fixture();
    let owner = sample();
    let home = fx.resolver.home_folder(&owner);
    write(&home.join("R1.fastq"), "@r1");
    write(&home.join("R2.fastq"), "@r2");

    let file = fx.editor.file(&owner, StorageLocation::Home, "R1.fastq").unwrap();
    let err = fx.editor.rename(&file, "R2.fastq").unwrap_err();

    assert_matches!(
        err,
        LabFilesError::InvalidFilename {
            reason: FilenameError::AlreadyExists,
            ..
        }
    );
    assert_eq!(fs::read_to_string(home.join("R2.fastq")).unwrap(), "@r2");
}

#[test]
fn rename_refuses_invalid_names() {
    let fx = fixture();
    let owner = sample();
    write(&fx.resolver.home_folder(&owner).join("R1.fastq"), "@r1");
    let file = fx.editor.file(&owner, StorageLocation::Home, "R1.fastq").unwrap();

    assert_matches!(
        fx.editor.rename(&file, "").unwrap_err(),
        LabFilesError::InvalidFilename {
            reason: FilenameError::Empty,
            ..
        }
    );
    assert_matches!(
        fx.editor.rename(&file, "R1 copy.fastq").unwrap_err(),
        LabFilesError::InvalidFilename {
            reason: FilenameError::InvalidCharacters,
            ..
        }
    );
    assert_matches!(
        fx.editor.rename(&file, "../R1.fastq").unwrap_err(),
        LabFilesError::InvalidFilename {
            reason: FilenameError::InvalidCharacters,
            ..
        }
    );
    assert_matches!(
        fx.editor.rename(&file, DELETED_FILENAME).unwrap_err(),
        LabFilesError::InvalidFilename {
            reason: FilenameError::Reserved,
            ..
        }
    );
}

#[test]
fn archive_files_are_read_only() {
    let fx = fixture();
    let owner = sample();
    let archive = fx.resolver.archive_folders(&owner).remove(0);
    write(&archive.join("old.bam"), "bam");

    let file = fx
        .editor
        .file(&owner, StorageLocation::Archive(0), "old.bam")
        .unwrap();

    assert_matches!(
        fx.editor.rename(&file, "new.bam").unwrap_err(),
        LabFilesError::ReadOnlyLocation(_)
    );
    assert_matches!(
        fx.editor.delete(&file).unwrap_err(),
        LabFilesError::ReadOnlyLocation(_)
    );
    assert!(archive.join("old.bam").exists());
}

#[test]
fn delete_appends_to_the_audit_log() {
    let fx = fixture();
    let owner = sample();
    let home = fx.resolver.home_folder(&owner);
    write(&home.join("R1.fastq"), "@r1");
    write(&home.join("R2.fastq"), "@r2");

    let first = fx.editor.file(&owner, StorageLocation::Home, "R1.fastq").unwrap();
    let record = fx.editor.delete(&first).unwrap();
    let second = fx.editor.file(&owner, StorageLocation::Home, "R2.fastq").unwrap();
    fx.editor.delete(&second).unwrap();

    assert!(!home.join("R1.fastq").exists());
    assert!(!home.join("R2.fastq").exists());
    assert_eq!(record.filename, "R1.fastq");
    assert!(record.deleted >= record.last_modified);

    let log = fs::read_to_string(AuditLog::path(&home)).unwrap();
    let lines = log.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], record.to_line().trim_end());
    assert!(lines[1].starts_with("R2.fastq\t"));
    assert_eq!(lines[1].split('\t').count(), 3);

    let records = AuditLog::records(&home).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].filename, "R1.fastq");
    assert_eq!(records[1].filename, "R2.fastq");
}

#[cfg(unix)]
#[test]
fn audit_log_keeps_control_characters_inside_the_filename() {
    let fx = fixture();
    let owner = sample();
    let home = fx.resolver.home_folder(&owner);
    write(&home.join("a\tb.fastq"), "@tab");
    write(&home.join("c\nd.fastq"), "@newline");

    for name in ["a\tb.fastq", "c\nd.fastq"] {
        let file = fx.editor.file(&owner, StorageLocation::Home, name).unwrap();
        fx.editor.delete(&file).unwrap();
    }
    let mut log = fs::OpenOptions::new()
        .append(true)
        .open(AuditLog::path(&home))
        .unwrap();
    log.write_all(b"truncated\n").unwrap();

    let trail = AuditLog::read(&home).unwrap();
    let names = trail
        .records
        .iter()
        .map(|record| record.filename.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["a\tb.fastq", "c\nd.fastq"]);
    assert_eq!(trail.malformed.len(), 1);
    assert_eq!(trail.malformed[0].line, 3);
    assert_eq!(trail.malformed[0].content, "truncated");
}

#[test]
fn file_lookup_stays_inside_the_folder() {
    let fx = fixture();
    let owner = sample();
    write(&fx.resolver.home_folder(&owner).join("R1.fastq"), "@r1");

    assert_matches!(
        fx.editor
            .file(&owner, StorageLocation::Home, "../JS2/R1.fastq")
            .unwrap_err(),
        LabFilesError::OutsideFolder { .. }
    );
    assert_matches!(
        fx.editor
            .file(&owner, StorageLocation::Home, DELETED_FILENAME)
            .unwrap_err(),
        LabFilesError::OutsideFolder { .. }
    );
    assert_matches!(
        fx.editor
            .file(&owner, StorageLocation::Home, "missing.fastq")
            .unwrap_err(),
        LabFilesError::NotFound(_)
    );
    assert_matches!(
        fx.editor
            .file(&owner, StorageLocation::Archive(5), "R1.fastq")
            .unwrap_err(),
        LabFilesError::UnknownArchive { index: 5, count: 1 }
    );
}

#[test]
fn download_streams_file_content() {
    let fx = fixture();
    let owner = sample();
    write(&fx.resolver.home_folder(&owner).join("R1.fastq"), "@r1\nACGT\n");

    let file = fx.editor.file(&owner, StorageLocation::Home, "R1.fastq").unwrap();
    let mut content = String::new();
    fx.editor
        .download(&file)
        .unwrap()
        .read_to_string(&mut content)
        .unwrap();
    assert_eq!(content, "@r1\nACGT\n");
}

#[test]
fn renamed_owner_takes_its_folders_and_files_along() {
    let fx = fixture();
    let old = sample();
    let new = Sample {
        name: "JS1b".parse().unwrap(),
        date: NaiveDate::from_ymd_opt(2019, 2, 1).unwrap(),
        ..old.clone()
    };
    let home = fx.resolver.home_folder(&old);
    write(&home.join("JS1_R1.fastq"), "@r1");
    write(&home.join("notes.txt"), "JS1 notes");
    write(
        &home.join("JS1.md5"),
        "d41d8cd9  JS1_R1.fastq\n0cc175b9  JS1_JS1.bam\n",
    );
    write(&home.join(DELETED_FILENAME), "");
    let upload = fx.resolver.upload_folder(&old);
    write(&upload.join("R2.fastq"), "@r2");
    let archive = fx.resolver.archive_folders(&old).remove(0);
    write(&archive.join("JS1_old.bam"), "bam");

    let moved = fx.editor.rename_owner(&old, &new).unwrap();

    assert_eq!(moved, fx.resolver.home_folder(&new));
    assert!(!home.exists());
    assert_eq!(fs::read_to_string(moved.join("JS1b_R1.fastq")).unwrap(), "@r1");
    assert_eq!(fs::read_to_string(moved.join("notes.txt")).unwrap(), "JS1 notes");
    assert_eq!(
        fs::read_to_string(moved.join("JS1b.md5")).unwrap(),
        "d41d8cd9  JS1b_R1.fastq\n0cc175b9  JS1b_JS1.bam\n"
    );
    assert!(moved.join(DELETED_FILENAME).exists());
    assert!(fx.resolver.upload_folder(&new).join("R2.fastq").exists());
    assert!(!upload.exists());
    assert!(archive.join("JS1_old.bam").exists());
}

#[test]
fn renamed_owner_refuses_an_existing_target() {
    let fx = fixture();
    let old = sample();
    let new = Sample {
        name: "JS2".parse().unwrap(),
        ..old.clone()
    };
    let home = fx.resolver.home_folder(&old);
    write(&home.join("JS1_R1.fastq"), "@r1");
    write(&home.join("JS2_R1.fastq"), "@other");

    assert_matches!(
        fx.editor.rename_owner(&old, &new).unwrap_err(),
        LabFilesError::InvalidFilename { reason: FilenameError::AlreadyExists, .. }
    );
    assert!(home.join("JS1_R1.fastq").exists());

    write(&fx.resolver.home_folder(&new).join("taken.txt"), "");
    assert_matches!(
        fx.editor.rename_owner(&old, &new).unwrap_err(),
        LabFilesError::FolderExists(_)
    );
    assert!(home.join("JS1_R1.fastq").exists());
}
