use std::fs::File;
use std::io::{self, BufRead};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use chrono::{Days, Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use kira_lab_files::app::App;
use kira_lab_files::audit::AuditLog;
use kira_lab_files::commit::OverwriteDecisions;
use kira_lab_files::config::ConfigLoader;
use kira_lab_files::domain::{ClientPlatform, FileOwner, ManagedFile, OwnerRef, StorageLocation};
use kira_lab_files::error::LabFilesError;
use kira_lab_files::glob::GlobPattern;
use kira_lab_files::monitor::SessionToken;
use kira_lab_files::output::{HumanOutput, JsonOutput, OutputMode};

#[derive(Parser)]
#[command(name = "kira-lf")]
#[command(about = "Upload, commit, share and analyze the files of sequencing datasets")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    json: bool,

    /// Render folder labels for Windows clients
    #[arg(long, global = true)]
    windows: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Show the home, archive and upload folders of a dataset or sample")]
    Locations(OwnerArgs),
    #[command(about = "Create the upload folder and print where to put files")]
    Stage(OwnerArgs),
    #[command(about = "Follow the upload folder until Enter is pressed")]
    Watch(OwnerArgs),
    #[command(about = "Move uploaded files into the home folder")]
    Commit(CommitArgs),
    #[command(about = "List committed files")]
    Files(OwnerArgs),
    #[command(about = "Rename a committed file")]
    Rename(RenameArgs),
    #[command(about = "Move the folders of a renamed dataset or sample")]
    MoveOwner(MoveOwnerArgs),
    #[command(about = "Delete a committed file")]
    Delete(FileArgs),
    #[command(about = "Copy a committed file to a path or stdout")]
    Download(DownloadArgs),
    #[command(about = "Show deleted files of the home folder")]
    Audit(OwnerArgs),
    #[command(about = "Share a file anonymously until a date")]
    Grant(GrantArgs),
    #[command(about = "Stop sharing a file")]
    Revoke(PathArgs),
    #[command(about = "List active public grants")]
    Grants,
    #[command(about = "Resolve a public URL path to a file")]
    Public(PublicArgs),
    #[command(about = "Analysis folders")]
    Analysis(AnalysisArgs),
    #[command(about = "Delete old upload and analysis folders")]
    Housekeeping,
}

#[derive(Args, Clone)]
struct OwnerArgs {
    /// Dataset name, or sample name with --sample
    name: String,

    #[arg(long)]
    sample: bool,
}

#[derive(Args)]
struct CommitArgs {
    #[command(flatten)]
    owner: OwnerArgs,

    /// Allow replacing this file in the home folder (repeatable)
    #[arg(long = "overwrite", value_name = "PATH")]
    overwrite: Vec<String>,

    #[arg(long, conflicts_with = "overwrite")]
    overwrite_all: bool,
}

#[derive(Args)]
struct FileArgs {
    #[command(flatten)]
    owner: OwnerArgs,

    filename: String,

    /// Archive index instead of the home folder
    #[arg(long)]
    archive: Option<usize>,
}

#[derive(Args)]
struct RenameArgs {
    #[command(flatten)]
    file: FileArgs,

    new_name: String,
}

#[derive(Args)]
struct MoveOwnerArgs {
    #[command(flatten)]
    owner: OwnerArgs,

    new_name: String,

    /// New date, when it changed along with the name
    #[arg(long)]
    date: Option<NaiveDate>,
}

#[derive(Args)]
struct DownloadArgs {
    #[command(flatten)]
    file: FileArgs,

    #[arg(long, short)]
    output: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct PathArgs {
    #[command(flatten)]
    owner: OwnerArgs,

    /// Path relative to the home folder
    path: String,
}

#[derive(Args)]
struct GrantArgs {
    #[command(flatten)]
    target: PathArgs,

    /// Last day of access, inclusive
    #[arg(long)]
    until: Option<NaiveDate>,

    #[arg(long, default_value_t = 7, conflicts_with = "until")]
    days: u64,
}

#[derive(Args)]
struct PublicArgs {
    /// For example /dataset-file/<dataset>/<filename>
    request_path: String,

    #[arg(long, short)]
    output: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct AnalysisArgs {
    #[command(subcommand)]
    command: AnalysisCommand,
}

#[derive(Subcommand)]
enum AnalysisCommand {
    #[command(about = "Check that an analysis folder can be built")]
    Validate(AnalysisBuildArgs),
    #[command(about = "Build the analysis folder of one or more datasets or samples")]
    Build(AnalysisBuildArgs),
}

#[derive(Args)]
struct AnalysisBuildArgs {
    /// Dataset names, or sample names with --samples
    #[arg(required = true)]
    names: Vec<String>,

    #[arg(long)]
    samples: bool,

    /// Filename pattern such as '*.bw' (repeatable)
    #[arg(long = "pattern", short = 'p', required = true)]
    patterns: Vec<GlobPattern>,
}

#[derive(Serialize)]
struct FolderResult {
    folder: Utf8PathBuf,
    label: String,
}

#[derive(Serialize)]
struct CommitResult {
    moved: usize,
    home: Utf8PathBuf,
}

#[derive(Serialize)]
struct PublicResult {
    path: Utf8PathBuf,
    content_type: String,
}

#[derive(Serialize)]
struct ValidationResult {
    errors: Vec<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<LabFilesError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &LabFilesError) -> u8 {
    match error {
        LabFilesError::NotFound(_) | LabFilesError::MissingConfig => 2,
        LabFilesError::InvalidFilename { .. }
        | LabFilesError::InvalidName(_)
        | LabFilesError::InvalidPattern(_)
        | LabFilesError::ReadOnlyLocation(_)
        | LabFilesError::OutsideFolder { .. }
        | LabFilesError::UnknownArchive { .. }
        | LabFilesError::AnalysisInvalid { .. } => 4,
        LabFilesError::OverwriteNotAllowed { .. }
        | LabFilesError::CommitBlocked { .. }
        | LabFilesError::FolderExists(_) => 5,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let platform = if cli.windows {
        ClientPlatform::Windows
    } else {
        ClientPlatform::Posix
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let app = App::new(config);

    match cli.command {
        Commands::Locations(args) => run_locations(&app, args, platform, output_mode),
        Commands::Stage(args) => run_stage(&app, args, platform, output_mode),
        Commands::Watch(args) => run_watch(&app, args, output_mode),
        Commands::Commit(args) => run_commit(&app, args, output_mode),
        Commands::Files(args) => run_files(&app, args, output_mode),
        Commands::Rename(args) => run_rename(&app, args, output_mode),
        Commands::MoveOwner(args) => run_move_owner(&app, args, output_mode),
        Commands::Delete(args) => run_delete(&app, args, output_mode),
        Commands::Download(args) => run_download(&app, args),
        Commands::Audit(args) => run_audit(&app, args, output_mode),
        Commands::Grant(args) => run_grant(&app, args, output_mode),
        Commands::Revoke(args) => run_revoke(&app, args, output_mode),
        Commands::Grants => run_grants(&app, output_mode),
        Commands::Public(args) => run_public(&app, args, output_mode),
        Commands::Analysis(args) => run_analysis(&app, args, platform, output_mode),
        Commands::Housekeeping => run_housekeeping(&app, output_mode),
    }
}

fn owner(app: &App, args: &OwnerArgs) -> Result<OwnerRef, LabFilesError> {
    app.owner(&args.name, args.sample)
}

fn run_locations(
    app: &App,
    args: OwnerArgs,
    platform: ClientPlatform,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let owner = owner(app, &args)?;
    let result = app.locations(&owner, platform)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_locations(&result).into_diagnostic(),
        OutputMode::Human => {
            HumanOutput::print_locations(&result);
            Ok(())
        }
    }
}

fn run_stage(
    app: &App,
    args: OwnerArgs,
    platform: ClientPlatform,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let owner = owner(app, &args)?;
    let folder = app.staging().ensure_exists(&owner)?;
    let label = app
        .resolver()
        .label(StorageLocation::Upload, &owner, platform)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_value(&FolderResult { folder, label }).into_diagnostic(),
        OutputMode::Human => {
            println!("put files for {} in {label}", owner.name());
            Ok(())
        }
    }
}

fn run_watch(app: &App, args: OwnerArgs, output_mode: OutputMode) -> miette::Result<()> {
    let owner = owner(app, &args)?;
    app.staging().ensure_exists(&owner)?;

    let session = SessionToken::new();
    let mut monitor = app.upload_monitor();
    monitor.start(&owner, session.clone(), move |files| match output_mode {
        OutputMode::Json => {
            if let Err(err) = JsonOutput::print_staged(files) {
                tracing::warn!("could not print upload listing: {err}");
            }
        }
        OutputMode::Human => {
            println!("--");
            HumanOutput::print_staged(files);
        }
    })?;

    eprintln!("watching {}, press Enter to stop", app.staging().folder(&owner));
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).into_diagnostic()?;
    session.cancel();
    monitor.stop();
    Ok(())
}

fn run_commit(app: &App, args: CommitArgs, output_mode: OutputMode) -> miette::Result<()> {
    let owner = owner(app, &args.owner)?;
    let mut decisions = OverwriteDecisions::new();
    if args.overwrite_all {
        for relative in app.commit_engine().conflicts(&owner)? {
            decisions.insert(relative, true);
        }
    }
    for relative in args.overwrite {
        decisions.insert(relative.replace('\\', "/"), true);
    }

    let moved = app.commit_engine().commit(&owner, &decisions)?;
    let home = app.resolver().home_folder(&owner);
    match output_mode {
        OutputMode::Json => JsonOutput::print_value(&CommitResult { moved, home }).into_diagnostic(),
        OutputMode::Human => {
            println!("saved {moved} files in {home}");
            Ok(())
        }
    }
}

fn run_files(app: &App, args: OwnerArgs, output_mode: OutputMode) -> miette::Result<()> {
    let owner = owner(app, &args)?;
    let files = app.editor().files(&owner)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_files(&files).into_diagnostic(),
        OutputMode::Human => {
            HumanOutput::print_files(&files);
            Ok(())
        }
    }
}

fn managed_file(app: &App, args: &FileArgs) -> Result<ManagedFile, LabFilesError> {
    let owner = owner(app, &args.owner)?;
    let location = args
        .archive
        .map(StorageLocation::Archive)
        .unwrap_or(StorageLocation::Home);
    app.editor().file(&owner, location, &args.filename)
}

fn run_rename(app: &App, args: RenameArgs, output_mode: OutputMode) -> miette::Result<()> {
    let file = managed_file(app, &args.file)?;
    let renamed = app.editor().rename(&file, &args.new_name)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_value(&renamed).into_diagnostic(),
        OutputMode::Human => {
            println!("renamed {} to {}", file.filename, renamed.filename);
            Ok(())
        }
    }
}

fn run_move_owner(app: &App, args: MoveOwnerArgs, output_mode: OutputMode) -> miette::Result<()> {
    let old = owner(app, &args.owner)?;
    let new = OwnerRef {
        name: args.new_name.parse()?,
        date: args.date.unwrap_or(old.date),
        ..old.clone()
    };
    let home = app.editor().rename_owner(&old, &new)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_value(&FolderResult {
            label: home.to_string(),
            folder: home,
        })
        .into_diagnostic(),
        OutputMode::Human => {
            println!(
                "files of {} moved to {home}, rename it in the catalog too",
                old.name()
            );
            Ok(())
        }
    }
}

fn run_delete(app: &App, args: FileArgs, output_mode: OutputMode) -> miette::Result<()> {
    let file = managed_file(app, &args)?;
    let record = app.editor().delete(&file)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_value(&record).into_diagnostic(),
        OutputMode::Human => {
            println!("deleted {}", file.path);
            Ok(())
        }
    }
}

fn run_download(app: &App, args: DownloadArgs) -> miette::Result<()> {
    let file = managed_file(app, &args.file)?;
    let mut source = app.editor().download(&file)?;
    copy_out(&mut source, args.output.as_ref())
}

fn run_audit(app: &App, args: OwnerArgs, output_mode: OutputMode) -> miette::Result<()> {
    let owner = owner(app, &args)?;
    let trail = AuditLog::read(&app.resolver().home_folder(&owner))?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_audit(&trail).into_diagnostic(),
        OutputMode::Human => {
            HumanOutput::print_audit(&trail);
            Ok(())
        }
    }
}

fn run_grant(app: &App, args: GrantArgs, output_mode: OutputMode) -> miette::Result<()> {
    let owner = owner(app, &args.target.owner)?;
    let expiry = match args.until {
        Some(until) => until,
        None => Local::now()
            .date_naive()
            .checked_add_days(Days::new(args.days))
            .ok_or_else(|| miette::Report::msg("expiry date out of range"))?,
    };
    let grant = app
        .public_access()
        .grant(&owner, &args.target.path, expiry)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_value(&grant).into_diagnostic(),
        OutputMode::Human => {
            let url = app.public_endpoint().url_path(&owner, &grant.path);
            println!("{url} is public until {}", grant.expiry);
            Ok(())
        }
    }
}

fn run_revoke(app: &App, args: PathArgs, output_mode: OutputMode) -> miette::Result<()> {
    let owner = owner(app, &args.owner)?;
    let revoked = app.public_access().revoke(&owner, &args.path)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_value(&revoked).into_diagnostic(),
        OutputMode::Human => {
            if revoked {
                println!("{} of {} is no longer public", args.path, owner.name());
            } else {
                println!("{} of {} was not public", args.path, owner.name());
            }
            Ok(())
        }
    }
}

fn run_grants(app: &App, output_mode: OutputMode) -> miette::Result<()> {
    let grants = app.public_access().grants()?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_grants(&grants).into_diagnostic(),
        OutputMode::Human => {
            HumanOutput::print_grants(&grants);
            Ok(())
        }
    }
}

fn run_public(app: &App, args: PublicArgs, output_mode: OutputMode) -> miette::Result<()> {
    let endpoint = app.public_endpoint();
    let file = endpoint
        .lookup(&args.request_path)
        .ok_or_else(|| LabFilesError::NotFound(args.request_path.clone()))?;
    if args.output.is_some() {
        let mut source = endpoint.open(&file)?;
        return copy_out(&mut source, args.output.as_ref());
    }
    match output_mode {
        OutputMode::Json => JsonOutput::print_value(&PublicResult {
            path: file.path,
            content_type: file.content_type,
        })
        .into_diagnostic(),
        OutputMode::Human => {
            println!("{} ({})", file.path, file.content_type);
            Ok(())
        }
    }
}

fn run_analysis(
    app: &App,
    args: AnalysisArgs,
    platform: ClientPlatform,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match args.command {
        AnalysisCommand::Validate(args) => {
            let errors = if args.samples {
                app.analysis()
                    .validate_samples(&app.samples(&args.names)?, &args.patterns)
            } else {
                app.analysis()
                    .validate(&app.datasets(&args.names)?, &args.patterns)
            };
            if let OutputMode::Json = output_mode {
                JsonOutput::print_value(&ValidationResult {
                    errors: errors.clone(),
                })
                .into_diagnostic()?;
            }
            if !errors.is_empty() {
                return Err(LabFilesError::AnalysisInvalid { errors }.into());
            }
            if let OutputMode::Human = output_mode {
                println!("analysis folder can be built");
            }
            Ok(())
        }
        AnalysisCommand::Build(args) => {
            let (folder, label) = if args.samples {
                let samples = app.samples(&args.names)?;
                let errors = app.analysis().validate_samples(&samples, &args.patterns);
                if !errors.is_empty() {
                    return Err(LabFilesError::AnalysisInvalid { errors }.into());
                }
                (
                    app.analysis().build_samples(&samples, &args.patterns)?,
                    app.resolver().analysis_label(&samples, platform)?,
                )
            } else {
                let datasets = app.datasets(&args.names)?;
                let errors = app.analysis().validate(&datasets, &args.patterns);
                if !errors.is_empty() {
                    return Err(LabFilesError::AnalysisInvalid { errors }.into());
                }
                (
                    app.analysis().build(&datasets, &args.patterns)?,
                    app.resolver().analysis_label(&datasets, platform)?,
                )
            };
            match output_mode {
                OutputMode::Json => {
                    JsonOutput::print_value(&FolderResult { folder, label }).into_diagnostic()
                }
                OutputMode::Human => {
                    println!("analysis folder ready in {label}");
                    Ok(())
                }
            }
        }
    }
}

fn run_housekeeping(app: &App, output_mode: OutputMode) -> miette::Result<()> {
    let result = app.housekeeping()?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_housekeeping(&result).into_diagnostic(),
        OutputMode::Human => {
            HumanOutput::print_housekeeping(&result);
            Ok(())
        }
    }
}

fn copy_out(source: &mut File, output: Option<&Utf8PathBuf>) -> miette::Result<()> {
    match output {
        Some(path) => {
            let mut target = File::create(path.as_std_path()).into_diagnostic()?;
            io::copy(source, &mut target).into_diagnostic()?;
        }
        None => {
            io::copy(source, &mut io::stdout().lock()).into_diagnostic()?;
        }
    }
    Ok(())
}
