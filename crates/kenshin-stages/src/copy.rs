//! Stage E — copy judged archives into the staging input tree.
//!
//! Copy only: no judging, no probing. Every eligibility condition lives
//! in the selection SQL (judged KENSHIN, probe-confirmed, active alias,
//! no receipt yet); this loop handles only filesystem facts. The
//! destination file name comes from the DB `file_name` column, which is
//! the authority on what the file should be called in the input tree.

use std::path::Path;

use anyhow::{Context as _, Result};
use filetime::FileTime;
use serde::Serialize;
use sqlx::mysql::MySqlPool;
use tracing::{info, warn};

use kenshin_config::CopySettings;
use kenshin_db::catalog::Catalog;
use kenshin_ledger::codes::StageStatus;
use kenshin_ledger::shared_files::{mark_stage_status, select_copy_targets};
use kenshin_utils::fsops::ensure_dir;

/// Copy counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CopySummary {
    pub copied: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl CopySummary {
    #[must_use]
    pub fn note(&self) -> String {
        format!(
            "copy copied={} skipped={} failed={}",
            self.copied, self.skipped, self.failed
        )
    }
}

/// Copy contents and carry the source mtime over, the way operators
/// expect staged files to look.
fn copy_preserving_mtime(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::copy(src, dst)?;
    let meta = std::fs::metadata(src)?;
    filetime::set_file_mtime(dst, FileTime::from_last_modification_time(&meta))
}

/// Run the copy batch.
pub async fn run(
    pool: &MySqlPool,
    catalog: &Catalog,
    settings: &CopySettings,
    dry_run: bool,
) -> Result<CopySummary> {
    let input_root = settings.input_root.as_std_path();
    ensure_dir(input_root).context("create input root")?;

    let targets = select_copy_targets(pool, settings.limit)
        .await
        .context("select copy targets")?;
    info!(
        targets = targets.len(),
        overwrite = settings.overwrite,
        dry_run,
        "copy started"
    );

    let mut summary = CopySummary::default();
    let mut since_commit = 0usize;

    for target in targets {
        let src = Path::new(&target.path);
        let file_name = target.file_name.trim();

        if dry_run {
            info!(
                src = %target.path,
                dst_folder = %target.dst_folder_norm,
                "dry-run: would copy"
            );
            summary.skipped += 1;
            continue;
        }

        if file_name.is_empty() {
            mark_stage_status(
                pool,
                catalog,
                target.shared_file_id,
                StageStatus::New,
                Some("fail: file_name is empty in DB"),
            )
            .await?;
            summary.failed += 1;
            continue;
        }

        // DB says copyable; the share may still disagree.
        if !src.exists() {
            mark_stage_status(
                pool,
                catalog,
                target.shared_file_id,
                StageStatus::Skipped,
                Some("skip: source missing"),
            )
            .await?;
            summary.skipped += 1;
            continue;
        }

        let dst_dir = input_root.join(&target.dst_folder_norm);
        if let Err(e) = ensure_dir(&dst_dir) {
            mark_stage_status(
                pool,
                catalog,
                target.shared_file_id,
                StageStatus::New,
                Some(&format!("fail: mkdir error: {} {e}", dst_dir.display())),
            )
            .await?;
            summary.failed += 1;
            continue;
        }

        let dst_path = dst_dir.join(file_name);

        if dst_path.exists() && !settings.overwrite {
            // Closed state: present in input already, do not retry.
            mark_stage_status(
                pool,
                catalog,
                target.shared_file_id,
                StageStatus::InputCopied,
                Some(&format!(
                    "skip: already exists in input (no overwrite) dst={}",
                    dst_path.display()
                )),
            )
            .await?;
            summary.skipped += 1;
            continue;
        }

        match copy_preserving_mtime(src, &dst_path) {
            Ok(()) => {
                mark_stage_status(
                    pool,
                    catalog,
                    target.shared_file_id,
                    StageStatus::InputCopied,
                    Some(&format!("copied to {}", target.dst_folder_norm)),
                )
                .await?;
                summary.copied += 1;
            }
            Err(e) => {
                warn!(src = %target.path, dst = %dst_path.display(), error = %e, "copy failed");
                mark_stage_status(
                    pool,
                    catalog,
                    target.shared_file_id,
                    StageStatus::New,
                    Some(&format!("fail: copy error: {e}")),
                )
                .await?;
                summary.failed += 1;
            }
        }

        since_commit += 1;
        if since_commit >= 100 {
            // Writes autocommit; this is just an operator progress beat.
            info!(
                copied = summary.copied,
                skipped = summary.skipped,
                failed = summary.failed,
                "copy progress"
            );
            since_commit = 0;
        }
    }

    info!(
        copied = summary.copied,
        skipped = summary.skipped,
        failed = summary.failed,
        "copy finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_preserves_source_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.zip");
        let dst = dir.path().join("dst.zip");
        std::fs::write(&src, b"payload").unwrap();
        let old = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&src, old).unwrap();

        copy_preserving_mtime(&src, &dst).unwrap();

        let copied = std::fs::metadata(&dst).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&copied), old);
        assert_eq!(std::fs::read(&dst).unwrap(), b"payload");
    }
}
