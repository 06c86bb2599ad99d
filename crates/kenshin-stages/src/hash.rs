//! Stage B — content hashing.
//!
//! Fills `sha256` for zip rows that lack one. Reads are streamed in
//! 1 MiB chunks (share reads dominate the cost). A read failure leaves
//! `sha256` NULL with the reason in `note`, so the next run retries.

use std::path::Path;

use anyhow::{Context as _, Result};
use serde::Serialize;
use sqlx::mysql::MySqlPool;
use tracing::{info, warn};

use kenshin_config::HashSettings;
use kenshin_db::catalog::Catalog;
use kenshin_ledger::shared_files::{select_for_hash, update_note, update_sha256};
use kenshin_utils::hash::sha256_file;

use crate::COMMIT_EVERY;

/// Hash counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HashSummary {
    pub processed: u64,
    pub hashed: u64,
    pub failed: u64,
}

impl HashSummary {
    #[must_use]
    pub fn note(&self) -> String {
        format!(
            "hash processed={} hashed={} failed={}",
            self.processed, self.hashed, self.failed
        )
    }
}

/// Run the hashing batch.
pub async fn run(
    pool: &MySqlPool,
    catalog: &Catalog,
    settings: &HashSettings,
) -> Result<HashSummary> {
    let targets = select_for_hash(pool, settings.limit, settings.only_stage.as_deref())
        .await
        .context("select rows to hash")?;
    info!(targets = targets.len(), "hash started");

    let mut summary = HashSummary::default();
    let mut tx = pool.begin().await.context("open hash transaction")?;
    let mut pending = 0usize;

    for target in targets {
        summary.processed += 1;

        match sha256_file(Path::new(&target.path)) {
            Ok(digest) => {
                update_sha256(&mut *tx, catalog, target.shared_file_id, &digest)
                    .await
                    .with_context(|| format!("store sha256 for {}", target.path))?;
                summary.hashed += 1;
            }
            Err(e) => {
                warn!(path = %target.path, error = %e, "hash read failed");
                update_note(
                    &mut *tx,
                    catalog,
                    target.shared_file_id,
                    &format!("hash failed: {e}"),
                )
                .await
                .with_context(|| format!("store hash failure for {}", target.path))?;
                summary.failed += 1;
            }
        }

        pending += 1;
        if pending >= COMMIT_EVERY {
            tx.commit().await.context("commit hash batch")?;
            tx = pool.begin().await.context("reopen hash transaction")?;
            pending = 0;
        }
    }
    tx.commit().await.context("commit final hash batch")?;

    info!(
        processed = summary.processed,
        hashed = summary.hashed,
        failed = summary.failed,
        "hash finished"
    );
    Ok(summary)
}
