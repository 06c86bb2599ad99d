//! Stage A — shared-filesystem scan.
//!
//! Enumerates files under the scan root whose extension is in the
//! allow-list and upserts one observation row per hit. The walk is the
//! only unbounded part of the pipeline, so the allow-list defaults to
//! `zip` and stat failures degrade to a logged warning with zero size
//! (UNC shares fail stat calls routinely).

use std::path::Path;

use anyhow::{Context as _, Result, bail};
use serde::Serialize;
use sqlx::mysql::MySqlPool;
use tracing::{info, warn};
use walkdir::WalkDir;

use kenshin_config::ScanSettings;
use kenshin_db::catalog::Catalog;
use kenshin_ledger::codes::{AutoJudgement, StageStatus};
use kenshin_ledger::shared_files::{SharedFileRow, upsert_shared_file};
use kenshin_utils::clock::{from_system_time, now_micro};
use kenshin_utils::paths::norm_ext;

const SCAN_COMMIT_EVERY: usize = 2000;

/// Scan counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    pub processed: u64,
    pub upserted: u64,
}

impl ScanSummary {
    #[must_use]
    pub fn note(&self) -> String {
        format!("scan processed={} upserted={}", self.processed, self.upserted)
    }
}

/// Share-root-relative top-level folder name; `None` for files sitting
/// directly under the root.
fn src_folder_raw(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel.components().collect();
    if parts.len() >= 2 {
        Some(parts[0].as_os_str().to_string_lossy().into_owned())
    } else {
        None
    }
}

/// The N nearest ancestor directory names joined by `/`, outermost
/// first.
fn facility_hint(path: &Path, depth: usize) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    let mut cur = path.parent();
    for _ in 0..depth {
        let Some(dir) = cur else { break };
        let Some(name) = dir.file_name() else { break };
        parts.push(name.to_string_lossy().into_owned());
        cur = dir.parent();
    }
    if parts.is_empty() {
        return None;
    }
    parts.reverse();
    Some(parts.join("/"))
}

/// Run the scan.
pub async fn run(
    pool: &MySqlPool,
    catalog: &Catalog,
    settings: &ScanSettings,
) -> Result<ScanSummary> {
    let root = settings.shared_root.as_std_path();
    if !root.exists() {
        bail!("scan root does not exist: {}", settings.shared_root);
    }

    info!(
        root = %settings.shared_root,
        exts = ?settings.exts,
        limit = settings.limit,
        "scan started"
    );

    let mut summary = ScanSummary::default();
    let ts = now_micro();

    let mut tx = pool.begin().await.context("open scan transaction")?;
    let mut pending = 0usize;

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "walk error; subtree skipped");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let ext = norm_ext(path);
        if !settings.exts.iter().any(|allowed| allowed == &ext) {
            continue;
        }

        summary.processed += 1;
        if settings.limit > 0 && summary.processed > settings.limit as u64 {
            summary.processed -= 1;
            break;
        }

        let (file_size, mtime) = match entry.metadata() {
            Ok(meta) => (
                i64::try_from(meta.len()).unwrap_or(i64::MAX),
                meta.modified().ok().map(from_system_time),
            ),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "stat failed");
                (0, None)
            }
        };

        let row = SharedFileRow {
            path: path.to_string_lossy().into_owned(),
            src_folder_raw: src_folder_raw(root, path),
            facility_hint: facility_hint(path, settings.hint_depth),
            file_name: entry.file_name().to_string_lossy().into_owned(),
            ext,
            file_size,
            mtime,
            // Heavy work belongs to later stages.
            sha256: None,
            auto_judgement: AutoJudgement::Unknown,
            stage_status: StageStatus::New,
            note: None,
            first_seen_at: ts,
            last_seen_at: ts,
        };

        upsert_shared_file(&mut *tx, catalog, &row)
            .await
            .with_context(|| format!("upsert shared file {}", row.path))?;
        summary.upserted += 1;
        pending += 1;

        if pending >= SCAN_COMMIT_EVERY {
            tx.commit().await.context("commit scan batch")?;
            tx = pool.begin().await.context("reopen scan transaction")?;
            pending = 0;
            info!(
                processed = summary.processed,
                upserted = summary.upserted,
                "scan progress"
            );
        }
    }
    tx.commit().await.context("commit final scan batch")?;

    info!(
        processed = summary.processed,
        upserted = summary.upserted,
        "scan finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn src_folder_raw_wants_depth_two() {
        let root = Path::new("/share");
        assert_eq!(
            src_folder_raw(root, Path::new("/share/fac_a/z.zip")).as_deref(),
            Some("fac_a")
        );
        assert_eq!(
            src_folder_raw(root, Path::new("/share/fac_a/sub/z.zip")).as_deref(),
            Some("fac_a")
        );
        assert_eq!(src_folder_raw(root, Path::new("/share/z.zip")), None);
        assert_eq!(src_folder_raw(root, Path::new("/elsewhere/z.zip")), None);
    }

    #[test]
    fn facility_hint_joins_outermost_first() {
        let p = Path::new("/share/fac_a/2025/z.zip");
        assert_eq!(facility_hint(p, 2).as_deref(), Some("fac_a/2025"));
        assert_eq!(facility_hint(p, 1).as_deref(), Some("2025"));
        assert_eq!(facility_hint(p, 0), None);
    }
}
