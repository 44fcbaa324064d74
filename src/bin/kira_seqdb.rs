use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_seqdb::app::{App, ExportResult, ProjectOptions, Settings, SyncOptions};
use kira_seqdb::config::{ConfigLoader, ResolvedConfig};
use kira_seqdb::db::SeqDbHttpClient;
use kira_seqdb::domain::ProjectRef;
use kira_seqdb::error::KiraError;
use kira_seqdb::export::{ExportOptions, LabelFilters, read_replicate_list};
use kira_seqdb::filenames::FilenameConvention;
use kira_seqdb::import::RunMatchOptions;
use kira_seqdb::ncbi::EutilsHttpClient;
use kira_seqdb::output::{JsonOutput, OutputMode};
use kira_seqdb::store::ProjectStore;

#[derive(Parser)]
#[command(name = "kira-seqdb")]
#[command(about = "Sequencing run bookkeeping against SRA and a LabxDB metadata store")]
#[command(version, author)]
struct Cli {
    /// Config file or directory of JSON files
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(subcommand, about = "Local FASTQ runs")]
    Runs(RunsCommand),
    #[command(subcommand, about = "SRA projects")]
    Sra(SraCommand),
}

#[derive(Subcommand)]
enum RunsCommand {
    #[command(about = "Group read files and inspect their headers")]
    Scan(ScanArgs),
    #[command(about = "Add runs found on disk to the staging table")]
    Stage(StageArgs),
    #[command(about = "Find the local runs matching each run group")]
    Import(ImportRunsArgs),
}

#[derive(Args)]
struct RunsDir {
    /// Root of the read files, defaults to `path_seq_raw` from the config
    dir: Option<PathBuf>,

    /// Filename conventions to try, in order
    #[arg(long, value_delimiter = ',', value_enum)]
    conventions: Vec<FilenameConvention>,
}

impl RunsDir {
    fn resolve(&self, config: &ResolvedConfig) -> Result<PathBuf, KiraError> {
        self.dir
            .clone()
            .or_else(|| config.path_seq_raw.clone())
            .ok_or_else(|| KiraError::MissingConfig("path_seq_raw (or a DIR argument)".to_string()))
    }
}

#[derive(Args)]
struct ScanArgs {
    #[command(flatten)]
    target: RunsDir,

    /// Count spots and the longest read
    #[arg(long)]
    spots: bool,
}

#[derive(Args)]
struct StageArgs {
    #[command(flatten)]
    target: RunsDir,

    #[arg(long)]
    ref_prefix: Option<String>,

    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct ImportRunsArgs {
    #[command(flatten)]
    target: RunsDir,

    #[arg(long)]
    with_second_barcode: bool,

    #[arg(long, value_delimiter = ',')]
    input_run_refs: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    exclude_run_refs: Vec<String>,
}

#[derive(Subcommand)]
enum SraCommand {
    #[command(about = "Fetch an SRA project")]
    Fetch(ProjectArgs),
    #[command(about = "Create project, runs and replicates from an SRA project")]
    Import(ImportSraArgs),
    #[command(about = "Attach SRA accessions of a publication to local records")]
    Link(LinkArgs),
    #[command(about = "Write SRA submission tables for local replicates")]
    Export(ExportArgs),
}

#[derive(Args)]
struct ProjectArgs {
    project: String,

    /// Keep only these runs
    #[arg(long, value_delimiter = ',')]
    runs: Vec<String>,

    #[arg(long)]
    save_xml: bool,

    #[arg(long)]
    save_json: bool,

    #[arg(long)]
    from_json: Option<PathBuf>,

    /// Ignore the project cache
    #[arg(long)]
    refresh: bool,
}

#[derive(Args)]
struct ImportSraArgs {
    #[command(flatten)]
    project: ProjectArgs,

    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct LinkArgs {
    #[arg(long)]
    publication_ref: String,

    /// Link samples and runs
    #[arg(long)]
    update: bool,

    /// Verify existing links
    #[arg(long)]
    check: bool,

    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct ExportArgs {
    #[arg(long, value_delimiter = ',')]
    replicates: Vec<String>,

    /// File listing replicate references, one per line
    #[arg(long)]
    replicates_file: Option<PathBuf>,

    /// CSV of `pattern,replacement` applied to labels
    #[arg(long)]
    label_filters: Option<PathBuf>,

    /// Move replicates already carrying an SRA accession to sra_exported.tsv
    #[arg(long)]
    exclude_exported: bool,

    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
}

impl ExportArgs {
    fn options(&self) -> Result<ExportOptions, KiraError> {
        let mut replicate_refs: Vec<String> = self
            .replicates
            .iter()
            .map(|reference| reference.trim().to_string())
            .filter(|reference| !reference.is_empty())
            .collect();
        if let Some(path) = &self.replicates_file {
            replicate_refs.extend(read_replicate_list(path)?);
        }
        let label_filters = match &self.label_filters {
            Some(path) => LabelFilters::from_path(path)?,
            None => LabelFilters::default(),
        };
        Ok(ExportOptions {
            replicate_refs,
            label_filters,
            exclude_exported: self.exclude_exported,
        })
    }
}

impl Commands {
    /// Conventions given on the command line, if any.
    fn conventions(&self) -> Option<&[FilenameConvention]> {
        let target = match self {
            Commands::Runs(RunsCommand::Scan(args)) => &args.target,
            Commands::Runs(RunsCommand::Stage(args)) => &args.target,
            Commands::Runs(RunsCommand::Import(args)) => &args.target,
            _ => return None,
        };
        (!target.conventions.is_empty()).then_some(target.conventions.as_slice())
    }
}

impl ProjectArgs {
    fn options(&self) -> ProjectOptions {
        ProjectOptions {
            runs: self
                .runs
                .iter()
                .map(|run| run.trim().to_string())
                .filter(|run| !run.is_empty())
                .collect::<BTreeSet<_>>(),
            save_xml: self.save_xml,
            save_json: self.save_json,
            from_json: self.from_json.clone(),
            refresh: self.refresh,
        }
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::PublicationNotFound(_)
        | KiraError::MissingConfig(_)
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_) => 2,
        KiraError::NcbiHttp(_)
        | KiraError::NcbiStatus { .. }
        | KiraError::DbHttp(_)
        | KiraError::DbStatus { .. }
        | KiraError::DbQuery(_) => 3,
        KiraError::SpotMismatch { .. } => 4,
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
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let mut settings = Settings::from(&config);
    if let Some(conventions) = cli.command.conventions() {
        settings.conventions = conventions.to_vec();
    }
    let app = build_app(&config, settings)?;
    let progress = output_mode.sink();
    let sink = &*progress;

    match cli.command {
        Commands::Runs(RunsCommand::Scan(args)) => {
            let dir = args.target.resolve(&config)?;
            let result = app.scan(&dir, args.spots, sink)?;
            JsonOutput::print_scan(&result).into_diagnostic()?;
        }
        Commands::Runs(RunsCommand::Stage(args)) => {
            let dir = args.target.resolve(&config)?;
            let result = app.stage(&dir, args.ref_prefix.as_deref(), args.dry_run, sink)?;
            JsonOutput::print_stage(&result).into_diagnostic()?;
        }
        Commands::Runs(RunsCommand::Import(args)) => {
            let dir = args.target.resolve(&config)?;
            let options = RunMatchOptions {
                with_second_barcode: args.with_second_barcode,
                include_run_refs: args.input_run_refs,
                exclude_run_refs: args.exclude_run_refs,
            };
            let result = app.import_runs(&dir, &options, sink)?;
            JsonOutput::print_import_runs(&result).into_diagnostic()?;
        }
        Commands::Sra(SraCommand::Fetch(args)) => {
            let project: ProjectRef = args.project.parse()?;
            let result = app.load_project(&project, &args.options(), sink)?;
            JsonOutput::print_project(&result).into_diagnostic()?;
        }
        Commands::Sra(SraCommand::Import(args)) => {
            let project: ProjectRef = args.project.project.parse()?;
            let result =
                app.import_sra(&project, &args.project.options(), args.dry_run, sink)?;
            JsonOutput::print_import_sra(&result).into_diagnostic()?;
        }
        Commands::Sra(SraCommand::Link(args)) => {
            let options = SyncOptions {
                update: args.update,
                check: args.check,
                dry_run: args.dry_run,
            };
            let result = app.sync_accessions(&args.publication_ref, options, sink)?;
            JsonOutput::print_sync(&result).into_diagnostic()?;
        }
        Commands::Sra(SraCommand::Export(args)) => {
            let export = app.export_sra(&args.options()?, sink)?;
            let written = export.write_to(&args.out_dir)?;
            let result = ExportResult::new(&args.out_dir, &written, export);
            JsonOutput::print_export(&result).into_diagnostic()?;
        }
    }
    Ok(())
}

fn build_app(
    config: &ResolvedConfig,
    settings: Settings,
) -> miette::Result<App<SeqDbHttpClient, EutilsHttpClient>> {
    let store = match &config.project_cache {
        Some(path) => ProjectStore::with_root(
            Utf8PathBuf::from_path_buf(path.clone())
                .map_err(|_| KiraError::Filesystem("non-utf8 project cache path".to_string()))?,
        ),
        None => ProjectStore::new()?,
    };
    let db = SeqDbHttpClient::new(config.db.clone())?;
    let sra = EutilsHttpClient::new()?;
    Ok(App::new(store, db, sra, settings))
}
