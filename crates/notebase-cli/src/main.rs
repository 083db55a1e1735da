use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use notebase_core::batch::BatchReport;
use notebase_core::changes::{ChangeSet, UpdatePlan};
use notebase_core::engine::{Engine, RebuildReport};
use notebase_core::error::is_fatal_error;
use notebase_core::history::GitHistory;
use notebase_core::note_config::{ConfigPatch, RepairOptions};
use notebase_core::settings::load_settings;
use notebase_core::watch::{run_watch_loop, NoteWatcher};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "notebase", version, about = "Keeps note outlines, the master index, the outline document and the sidebar in sync")]
struct Cli {
    /// Knowledge base root (defaults to current directory)
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Repair metadata and regenerate every derived document
    Build,
    /// Update from changed paths or from the changes since a revision
    Update(UpdateArgs),
    /// Validate and repair every metadata record
    Validate(ValidateArgs),
    /// Watch the knowledge base and update on change
    Watch,
    /// Create a new note
    New(NewArgs),
    /// Change the status or category of a note
    Set(SetArgs),
    /// Rename a note, keeping its id
    Rename(RenameArgs),
    /// Give a note another numeric id
    Renumber(RenumberArgs),
}

#[derive(Args)]
struct UpdateArgs {
    /// Revision to diff against (uses `git diff --name-only`)
    #[arg(long, conflicts_with = "paths")]
    since: Option<String>,
    /// Changed paths, relative to the root
    paths: Vec<PathBuf>,
}

#[derive(Args)]
struct ValidateArgs {
    /// Overwrite timestamps with version-control history where available
    #[arg(long)]
    refresh_timestamps: bool,
}

#[derive(Args)]
struct NewArgs {
    title: String,
}

#[derive(Args)]
struct SetArgs {
    id: String,
    #[arg(long, conflicts_with = "undone")]
    done: bool,
    #[arg(long)]
    undone: bool,
    #[arg(long, conflicts_with = "active")]
    deprecated: bool,
    #[arg(long)]
    active: bool,
    #[arg(long)]
    category: Option<String>,
    /// Remove the category
    #[arg(long, conflicts_with = "category")]
    no_category: bool,
}

#[derive(Args)]
struct RenameArgs {
    id: String,
    title: String,
}

#[derive(Args)]
struct RenumberArgs {
    id: String,
    new_id: String,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match run(cli) {
        Ok(code) => code,
        // Ambiguous note identity needs a human before anything runs again.
        Err(err) if is_fatal_error(&err) => {
            tracing::error!(error = %format!("{err:#}"), "stopping: note identity is ambiguous");
            3
        }
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "command failed");
            2
        }
    };
    std::process::exit(code);
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "notebase=debug,notebase_core=debug"
    } else {
        "notebase=info,notebase_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn open_engine(root: &Path) -> Result<Engine> {
    let settings = load_settings(root)?;
    let history = GitHistory::new(root);
    Engine::open(root, settings, Box::new(history))
}

fn run(cli: Cli) -> Result<i32> {
    let mut engine = open_engine(&cli.root)?;

    match cli.command {
        Command::Build => {
            let mut units = engine.validate_all(RepairOptions::default())?;
            let report = engine.full_rebuild("build requested")?;
            log_report(&report);
            units.merge(report.notes);
            Ok(exit_code(&units))
        }
        Command::Update(args) => {
            let report = match args.since {
                Some(rev) => engine.update_since(&rev)?,
                None => {
                    let root = engine.root().to_path_buf();
                    let paths = args.paths.into_iter().map(|p| root.join(p));
                    engine.apply_changes(&ChangeSet::from_paths(paths))?
                }
            };
            log_report(&report);
            Ok(exit_code(&report.notes))
        }
        Command::Validate(args) => {
            let report = engine.validate_all(RepairOptions {
                refresh_timestamps: args.refresh_timestamps,
            })?;
            tracing::info!(
                ok = report.succeeded,
                failed = report.failed_count(),
                "metadata records validated"
            );
            log_failures(&report);
            Ok(exit_code(&report))
        }
        Command::Watch => {
            engine.full_rebuild("watch started")?;
            let watcher = NoteWatcher::new(engine.root(), engine.settings())
                .context("start file watcher")?;
            run_watch_loop(&mut engine, &watcher)?;
            Ok(0)
        }
        Command::New(args) => {
            let (record, report) = engine.create_note(&args.title)?;
            println!("created {}", record.doc_path.display());
            log_report(&report);
            Ok(0)
        }
        Command::Set(args) => {
            let patch = ConfigPatch {
                done: flag_pair(args.done, args.undone),
                deprecated: flag_pair(args.deprecated, args.active),
                category: match (args.category, args.no_category) {
                    (Some(category), _) => Some(Some(category)),
                    (None, true) => Some(None),
                    (None, false) => None,
                },
                ..ConfigPatch::default()
            };
            if patch.is_empty() {
                anyhow::bail!("nothing to set; pass --done, --undone, --deprecated, --active or --category");
            }
            let report = engine.set_status(&args.id, &patch)?;
            log_report(&report);
            Ok(0)
        }
        Command::Rename(args) => {
            let report = engine.rename_note(&args.id, &args.title)?;
            log_report(&report);
            Ok(0)
        }
        Command::Renumber(args) => {
            let report = engine.renumber_note(&args.id, &args.new_id)?;
            log_report(&report);
            Ok(0)
        }
    }
}

fn flag_pair(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (false, true) => Some(false),
        (false, false) => None,
    }
}

fn exit_code(units: &BatchReport) -> i32 {
    if units.is_clean() {
        0
    } else {
        1
    }
}

fn log_failures(units: &BatchReport) {
    for (unit, err) in &units.failed {
        tracing::warn!(unit = %unit, error = %err, "failed");
    }
}

fn log_report(report: &RebuildReport) {
    match &report.plan {
        UpdatePlan::Nothing => tracing::info!("nothing to update"),
        UpdatePlan::Local { ids } => tracing::info!(
            notes = %ids.iter().cloned().collect::<Vec<_>>().join(", "),
            "local update"
        ),
        UpdatePlan::Full { reason } => tracing::info!(reason = %reason, "full rebuild"),
    }
    tracing::info!(
        ok = report.notes.succeeded,
        failed = report.notes.failed_count(),
        written = report.written.len(),
        "update finished"
    );
    log_failures(&report.notes);
    for id in &report.orphans {
        tracing::warn!(id = %id, "added under the catch-all heading");
    }
    for id in &report.dropped {
        tracing::warn!(id = %id, "dropped reference to missing note");
    }
}
