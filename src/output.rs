use std::io::{self, Write};

use serde::Serialize;

use crate::app::{HousekeepingResult, LocationsResult};
use crate::audit::AuditTrail;
use crate::domain::ManagedFile;
use crate::public::PublicGrant;
use crate::staging::StagedFile;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_locations(result: &LocationsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_staged(files: &[StagedFile]) -> io::Result<()> {
        Self::print_json(&files)
    }

    pub fn print_files(files: &[ManagedFile]) -> io::Result<()> {
        Self::print_json(&files)
    }

    pub fn print_audit(trail: &AuditTrail) -> io::Result<()> {
        Self::print_json(trail)
    }

    pub fn print_grants(grants: &[PublicGrant]) -> io::Result<()> {
        Self::print_json(&grants)
    }

    pub fn print_housekeeping(result: &HousekeepingResult) -> io::Result<()> {
        Self::print_json(result)
    }

    /// Any other command result.
    pub fn print_value<T: Serialize>(value: &T) -> io::Result<()> {
        Self::print_json(value)
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout().lock();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Plain text rendering for terminals.
pub struct HumanOutput;

impl HumanOutput {
    pub fn print_locations(result: &LocationsResult) {
        println!("{}", result.owner);
        println!("  home:    {}", result.home_label);
        for label in &result.archive_labels {
            println!("  archive: {label}");
        }
        println!("  upload:  {}", result.upload_label);
    }

    pub fn print_staged(files: &[StagedFile]) {
        if files.is_empty() {
            println!("no files in upload folder");
            return;
        }
        for file in files {
            println!("{:>12}  {}", file.size, file.relative);
        }
    }

    pub fn print_files(files: &[ManagedFile]) {
        for file in files {
            println!("{:<12} {}", file.location.to_string(), file.filename);
        }
    }

    pub fn print_audit(trail: &AuditTrail) {
        for record in &trail.records {
            print!("{}", record.to_line());
        }
        for malformed in &trail.malformed {
            eprintln!("malformed line {}: {}", malformed.line, malformed.content);
        }
    }

    pub fn print_grants(grants: &[PublicGrant]) {
        for grant in grants {
            println!(
                "{} {}  {}  until {}",
                grant.owner.kind.folder_name(),
                grant.owner.name,
                grant.path,
                grant.expiry
            );
        }
    }

    pub fn print_housekeeping(result: &HousekeepingResult) {
        println!(
            "deleted {} upload folders and {} analysis folders",
            result.uploads.len(),
            result.analyses.len()
        );
        for folder in result.uploads.iter().chain(&result.analyses) {
            println!("  {folder}");
        }
    }
}
