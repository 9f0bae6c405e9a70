use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tally::config::{Overrides, RunSettings, StorageKind, TallyConfig};
use tally::inventory::{Inventory, InventoryError};
use tally::policy::PolicyKind;
use tally::report::LineReporter;
use tally::{BucketReconciler, ReconcileError};
use tally_storage::FileSystemStorage;
use tracing::error;

mod telemetry;

use telemetry::LogFormat;

/// `EX_TEMPFAIL` from sysexits.h: a later run may succeed.
const EXIT_TRANSIENT: u8 = 75;

#[derive(Parser)]
#[command(name = "tally")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'tally <command> --help' for more information on a specific command.")]
struct Cli {
    /// Log format on stderr.
    #[arg(long, value_enum, global = true, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// More log output (-v debug, -vv trace). Ignored when RUST_LOG is set.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile one bucket against the inventory
    ///
    /// Prints one audit line per comparison on stdout, then a run summary on
    /// stderr. Exits 75 when the failure looks transient (busy database,
    /// storage timeout) and 1 for any other failure.
    Reconcile(ReconcileArgs),

    /// Create an empty inventory database
    InitDb {
        /// Path of the database file to create.
        #[arg(long)]
        database: PathBuf,
    },
}

#[derive(Args)]
struct ReconcileArgs {
    /// Configuration file. A missing file means all values come from flags.
    #[arg(long, short, env = "TALLY_CONFIG", default_value = "tally.toml")]
    config: PathBuf,

    /// Bucket to reconcile (overrides `reconcile.bucket`).
    #[arg(long)]
    bucket: Option<String>,

    /// Resolution policy (overrides `reconcile.policy`).
    #[arg(long, value_enum)]
    policy: Option<PolicyKind>,

    /// Report decisions without applying any correction.
    #[arg(long)]
    report_only: bool,

    /// Inventory database (overrides `inventory.database`).
    #[arg(long)]
    database: Option<PathBuf>,

    /// Storage root directory (overrides `storage.root`).
    #[arg(long)]
    storage_root: Option<PathBuf>,

    /// Principal to run storage requests as (overrides `reconcile.run_as`).
    #[arg(long)]
    run_as: Option<String>,

    /// Run summary format.
    #[arg(long, value_enum, default_value_t = SummaryFormat::Text)]
    summary: SummaryFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SummaryFormat {
    Text,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init(cli.log_format, cli.verbose);

    let result = match cli.command {
        Commands::Reconcile(args) => reconcile(&args),
        Commands::InitDb { database } => init_db(&database),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let transient = is_transient(&err);
            error!(transient, "{err:#}");
            eprintln!("error: {err:#}");
            if transient {
                ExitCode::from(EXIT_TRANSIENT)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<ReconcileError>()
            .is_some_and(ReconcileError::is_transient)
            || cause
                .downcast_ref::<InventoryError>()
                .is_some_and(InventoryError::is_transient)
    })
}

fn settings(args: &ReconcileArgs) -> Result<RunSettings> {
    let mut config = TallyConfig::load(&args.config)?;
    config.apply(Overrides {
        bucket: args.bucket.clone(),
        policy: args.policy,
        report_only: args.report_only,
        database: args.database.clone(),
        storage_root: args.storage_root.clone(),
        run_as: args.run_as.clone(),
    });
    Ok(config.resolve()?)
}

fn reconcile(args: &ReconcileArgs) -> Result<()> {
    let settings = settings(args)?;
    let mut inventory = Inventory::open(&settings.database)
        .with_context(|| format!("opening inventory {}", settings.database.display()))?;
    let storage = match settings.storage {
        StorageKind::Filesystem => FileSystemStorage::new(&settings.storage_root),
    };

    let stdout = io::stdout().lock();
    let summary = BucketReconciler::new(&storage, &mut inventory, &settings.bucket, settings.policy)
        .report_only(settings.report_only)
        .run_as(settings.subject.clone())
        .page_size(settings.page_size)
        .run(LineReporter::new(stdout))
        .with_context(|| format!("reconciling bucket {}", settings.bucket))?;

    match args.summary {
        SummaryFormat::Text => eprintln!("{}", summary.render_text()),
        SummaryFormat::Json => eprintln!("{}", serde_json::to_string(&summary)?),
    }
    Ok(())
}

fn init_db(database: &Path) -> Result<()> {
    let inventory = Inventory::open(database)
        .with_context(|| format!("creating inventory {}", database.display()))?;
    eprintln!("inventory ready at {}", inventory.path().display());
    Ok(())
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn reconcile_flags_parse() {
        let cli = Cli::try_parse_from([
            "tally",
            "reconcile",
            "--bucket",
            "a1",
            "--policy",
            "inventory-is-always-right",
            "--report-only",
            "--summary",
            "json",
        ])
        .unwrap();
        let Commands::Reconcile(args) = cli.command else {
            panic!("expected reconcile");
        };
        assert_eq!(args.policy, Some(PolicyKind::InventoryIsAlwaysRight));
        assert!(args.report_only);
        assert_eq!(args.summary, SummaryFormat::Json);
    }

    #[test]
    fn missing_bucket_is_reported_with_its_key() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from([
            "tally",
            "reconcile",
            "--config",
            dir.path().join("none.toml").to_str().unwrap(),
            "--policy",
            "storage-is-always-right",
        ])
        .unwrap();
        let Commands::Reconcile(args) = cli.command else {
            panic!("expected reconcile");
        };
        let err = settings(&args).unwrap_err();
        assert!(format!("{err:#}").contains("reconcile.bucket"));
        assert!(!is_transient(&err));
    }

    #[test]
    fn init_db_creates_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inv.db");
        init_db(&path).unwrap();
        assert!(path.exists());
    }
}
