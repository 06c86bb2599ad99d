//! Command-line interface.
//!
//! One subcommand per pipeline stage; flags override the `KENSHIN_*`
//! environment (precedence: flags > env > defaults). Every invocation
//! opens a run row, executes the stage, and closes the run with the
//! stage's single-line summary.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};

use kenshin_config::{
    CopySettings, DbSettings, HashSettings, ImportMode, ImportSettings, ItemExtractSettings,
    JudgeSettings, NormalizeSettings, ProbeSettings, ScanSettings, load_dotenv,
};
use kenshin_db::catalog::Catalog;
use kenshin_db::pool;
use kenshin_ledger::runs::{finish_run, insert_run};
use kenshin_stages::{copy, hash, item_extract, judge, normalize, probe, scan, xml_extract, zip_import};
use kenshin_utils::exit_codes::ExitCode;
use kenshin_utils::logging::init_tracing;

/// kenshin - ingestion pipeline for health-checkup CDA deliverables
#[derive(Parser)]
#[command(name = "kenshin")]
#[command(about = "Ingest health-checkup ZIP/CDA deliverables into the ledger")]
#[command(long_about = r#"
kenshin ingests statutory health-checkup deliverables (password-protected
ZIP archives of HL7 CDA XML) from a shared filesystem into a relational
ledger, stage by stage. Stages communicate only through ledger state and
are safe to re-run at any time.

EXAMPLES:
  # Observe the share (KENSHIN_SHARED_ROOT) into shared_files
  kenshin scan --limit 0

  # Fill content hashes, probe archives, judge and stage them
  kenshin hash --limit 200
  kenshin judge
  kenshin copy --dry-run

  # Import staged archives and extract their XML members
  kenshin import --mode full --limit 500

  # Walk observations and normalize values against the dictionary
  kenshin items --limit 200
  kenshin normalize

CONFIGURATION:
  All roots, toggles and database URLs come from KENSHIN_* environment
  variables (a .env in the working directory is loaded first). Flags
  override the environment.

EXIT CODES:
  0 success, 2 partial (some rows failed), 1 fatal
"#)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print the stage summary as JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands, one per pipeline stage.
#[derive(Subcommand)]
pub enum Commands {
    /// Scan the shared filesystem into the observation ledger
    Scan {
        /// Maximum files to process (0 = unbounded)
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Compute content hashes for observed archives
    Hash {
        /// Maximum rows to hash (0 = unbounded)
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Probe archive central directories for XML members
    Probe {
        /// Maximum rows to probe (0 = unbounded)
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Classify observed archives (KENSHIN / UNKNOWN)
    Judge {
        /// Maximum rows to judge (0 = unbounded)
        #[arg(long)]
        limit: Option<i64>,

        /// Re-probe even when zip_has_xml is already recorded
        #[arg(long)]
        probe_always: bool,
    },

    /// Copy judged archives into the staging input tree
    Copy {
        /// Maximum rows to copy (0 = unbounded)
        #[arg(long)]
        limit: Option<i64>,

        /// Overwrite files already present in the input tree
        #[arg(long)]
        overwrite: bool,

        /// Show what would be copied without touching anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Import staged archives (ZIP receipts, XML inventory, extraction)
    Import {
        /// What to run: zip_import, xml_extract, or full
        #[arg(long)]
        mode: Option<String>,

        /// Batch cap for the extraction phase (0 = unbounded)
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Extract observation values from extracted XML receipts
    Items {
        /// Maximum receipts to process (0 = unbounded)
        #[arg(long)]
        limit: Option<i64>,

        /// Attach to an existing run id instead of opening a new run
        #[arg(long)]
        run_id: Option<i64>,
    },

    /// Normalize raw item values against the variant dictionary
    Normalize {
        /// Maximum rows to normalize (0 = unbounded)
        #[arg(long)]
        limit: Option<i64>,

        /// Decide without writing
        #[arg(long)]
        dry_run: bool,
    },
}

/// Parse arguments, set up the runtime, execute the selected stage.
///
/// All output (including errors) happens here; the caller only maps the
/// returned exit code onto the process exit.
pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();

    if init_tracing(cli.verbose).is_err() {
        // A second init in the same process; logging still works.
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            return Err(ExitCode::Fatal);
        }
    };

    match runtime.block_on(dispatch(cli)) {
        Ok(code) => {
            if code == ExitCode::Success {
                Ok(())
            } else {
                Err(code)
            }
        }
        Err(e) => {
            error!(error = ?e, "stage failed");
            eprintln!("error: {e:#}");
            Err(ExitCode::Fatal)
        }
    }
}

fn emit_summary<S: Serialize>(json: bool, summary: &S) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(summary).context("serialize summary")?
        );
    }
    Ok(())
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    if let Some(env_path) = load_dotenv() {
        info!(path = %env_path.display(), ".env loaded");
    }

    let db = DbSettings::from_env().context("database settings")?;
    let work_pool = pool::connect(&db.url).await.context("connect work database")?;
    let catalog = Catalog::new(work_pool.clone());

    match cli.command {
        Commands::Scan { limit } => {
            let mut settings = ScanSettings::from_env().context("scan settings")?;
            if let Some(limit) = limit {
                settings.limit = limit;
            }
            let run_id = insert_run(&work_pool, settings.shared_root.as_str(), None).await?;
            info!(run_id, "run started");
            let summary = scan::run(&work_pool, &catalog, &settings).await?;
            finish_run(&work_pool, run_id, &summary.note()).await?;
            info!(run_id, note = %summary.note(), "run finished");
            emit_summary(cli.json, &summary)?;
            Ok(ExitCode::Success)
        }

        Commands::Hash { limit } => {
            let mut settings = HashSettings::from_env().context("hash settings")?;
            if let Some(limit) = limit {
                settings.limit = limit;
            }
            let run_id = insert_run(&work_pool, "-", None).await?;
            info!(run_id, "run started");
            let summary = hash::run(&work_pool, &catalog, &settings).await?;
            finish_run(&work_pool, run_id, &summary.note()).await?;
            info!(run_id, note = %summary.note(), "run finished");
            emit_summary(cli.json, &summary)?;
            Ok(ExitCode::Success)
        }

        Commands::Probe { limit } => {
            let mut settings = ProbeSettings::from_env().context("probe settings")?;
            if let Some(limit) = limit {
                settings.limit = limit;
            }
            let run_id = insert_run(&work_pool, "-", None).await?;
            info!(run_id, "run started");
            let summary = probe::run(&work_pool, &catalog, &settings).await?;
            finish_run(&work_pool, run_id, &summary.note()).await?;
            info!(run_id, note = %summary.note(), "run finished");
            emit_summary(cli.json, &summary)?;
            Ok(ExitCode::Success)
        }

        Commands::Judge { limit, probe_always } => {
            let mut settings = JudgeSettings::from_env().context("judge settings")?;
            if let Some(limit) = limit {
                settings.limit = limit;
            }
            if probe_always {
                settings.probe_always = true;
            }
            let run_id = insert_run(&work_pool, "-", None).await?;
            info!(run_id, "run started");
            let summary = judge::run(&work_pool, &catalog, &settings).await?;
            finish_run(&work_pool, run_id, &summary.note()).await?;
            info!(run_id, note = %summary.note(), "run finished");
            emit_summary(cli.json, &summary)?;
            Ok(ExitCode::Success)
        }

        Commands::Copy {
            limit,
            overwrite,
            dry_run,
        } => {
            let mut settings = CopySettings::from_env().context("copy settings")?;
            if let Some(limit) = limit {
                settings.limit = limit;
            }
            if overwrite {
                settings.overwrite = true;
            }
            let run_id = insert_run(&work_pool, settings.input_root.as_str(), None).await?;
            info!(run_id, "run started");
            let summary = copy::run(&work_pool, &catalog, &settings, dry_run).await?;
            finish_run(&work_pool, run_id, &summary.note()).await?;
            info!(run_id, note = %summary.note(), "run finished");
            emit_summary(cli.json, &summary)?;
            Ok(ExitCode::Success)
        }

        Commands::Import { mode, limit } => {
            let mut settings = ImportSettings::from_env().context("import settings")?;
            if let Some(mode) = mode {
                settings.mode = ImportMode::parse(&mode)?;
            }
            if let Some(limit) = limit {
                settings.extract_limit = limit;
            }
            run_import(&work_pool, &catalog, cli.json, settings).await
        }

        Commands::Items { limit, run_id } => {
            let mut settings = ItemExtractSettings::from_env().context("items settings")?;
            if let Some(limit) = limit {
                settings.limit = limit;
            }
            if let Some(run_id) = run_id {
                settings.run_id = run_id;
            }
            let master_pool = pool::connect_master(&db.master_url)
                .await
                .context("connect master database")?;

            let run_id = if settings.run_id > 0 {
                settings.run_id
            } else {
                let id = insert_run(
                    &work_pool,
                    "-",
                    Some(settings.note.as_deref().unwrap_or("item_extract")),
                )
                .await?;
                info!(run_id = id, "run started");
                id
            };

            let summary =
                item_extract::run(&work_pool, &master_pool, &catalog, run_id, &settings).await?;
            finish_run(&work_pool, run_id, &summary.note()).await?;
            info!(run_id, note = %summary.note(), "run finished");
            emit_summary(cli.json, &summary)?;
            if summary.error > 0 || summary.zero_hit > 0 {
                Ok(ExitCode::Partial)
            } else {
                Ok(ExitCode::Success)
            }
        }

        Commands::Normalize { limit, dry_run } => {
            let mut settings = NormalizeSettings::from_env().context("normalize settings")?;
            if let Some(limit) = limit {
                settings.limit = limit;
            }
            let master_pool = pool::connect_master(&db.master_url)
                .await
                .context("connect master database")?;
            let run_id = insert_run(&work_pool, "-", None).await?;
            info!(run_id, "run started");
            let summary = normalize::run(&work_pool, &master_pool, &settings, dry_run).await?;
            finish_run(&work_pool, run_id, &summary.note()).await?;
            info!(run_id, note = %summary.note(), "run finished");
            emit_summary(cli.json, &summary)?;
            Ok(ExitCode::from_error_count(summary.error))
        }
    }
}

/// The import command: ZIP receipt pass, extraction pass, or both in
/// one run with a combined note.
async fn run_import(
    work_pool: &sqlx::MySqlPool,
    catalog: &Catalog,
    json: bool,
    settings: ImportSettings,
) -> Result<ExitCode> {
    let note_prefix = settings.note.clone();
    let run_id = insert_run(
        work_pool,
        settings.input_root.as_str(),
        note_prefix.as_deref(),
    )
    .await?;
    info!(run_id, mode = settings.mode.as_str(), "run started");

    let summary_line = match settings.mode {
        ImportMode::ZipImport => {
            let s = zip_import::run(work_pool, catalog, run_id, &settings).await?;
            emit_summary(json, &s)?;
            s.note()
        }
        ImportMode::XmlExtract => {
            let s = xml_extract::run(work_pool, catalog, run_id, &settings).await?;
            emit_summary(json, &s)?;
            s.note()
        }
        ImportMode::Full => {
            let zip_summary = zip_import::run(work_pool, catalog, run_id, &settings).await?;
            let extract_summary = xml_extract::run(work_pool, catalog, run_id, &settings).await?;
            emit_summary(json, &(&zip_summary, &extract_summary))?;
            format!("{} | {}", zip_summary.note(), extract_summary.note())
        }
    };

    let final_note = match note_prefix {
        Some(prefix) => format!("{prefix} | {summary_line}"),
        None => summary_line,
    };
    finish_run(work_pool, run_id, &final_note).await?;
    info!(run_id, note = %final_note, "run finished");
    Ok(ExitCode::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_stage_subcommands() {
        let cli = Cli::parse_from(["kenshin", "import", "--mode", "full", "--limit", "10"]);
        match cli.command {
            Commands::Import { mode, limit } => {
                assert_eq!(mode.as_deref(), Some("full"));
                assert_eq!(limit, Some(10));
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn global_flags_work_after_subcommand() {
        let cli = Cli::parse_from(["kenshin", "normalize", "--dry-run", "--json"]);
        assert!(cli.json);
        match cli.command {
            Commands::Normalize { dry_run, .. } => assert!(dry_run),
            _ => panic!("wrong subcommand"),
        }
    }
}
