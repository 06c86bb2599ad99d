//! Stage C — central-directory probe.
//!
//! Fills the `zip_has_xml` / `zip_xml_count` pair for rows that have
//! never been probed. The probe never decrypts and never extracts; a
//! failed probe records its reason and leaves `zip_has_xml` unknown.

use std::path::Path;

use anyhow::{Context as _, Result};
use serde::Serialize;
use sqlx::mysql::MySqlPool;
use tracing::info;

use kenshin_archive::probe::probe_zip_has_xml;
use kenshin_config::ProbeSettings;
use kenshin_db::catalog::Catalog;
use kenshin_ledger::shared_files::{select_for_probe, update_zip_probe};

/// Probe counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProbeSummary {
    pub processed: u64,
    pub ok: u64,
    pub failed: u64,
}

impl ProbeSummary {
    #[must_use]
    pub fn note(&self) -> String {
        format!(
            "probe processed={} ok={} failed={}",
            self.processed, self.ok, self.failed
        )
    }
}

/// Run the probe batch.
pub async fn run(
    pool: &MySqlPool,
    catalog: &Catalog,
    settings: &ProbeSettings,
) -> Result<ProbeSummary> {
    let targets = select_for_probe(pool, settings.limit)
        .await
        .context("select rows to probe")?;
    info!(targets = targets.len(), "probe started");

    let mut summary = ProbeSummary::default();
    for target in targets {
        summary.processed += 1;
        let probe = probe_zip_has_xml(Path::new(&target.path));
        if probe.ok {
            summary.ok += 1;
        } else {
            summary.failed += 1;
        }
        update_zip_probe(
            pool,
            catalog,
            target.shared_file_id,
            probe.ok.then_some(probe.has_xml),
            probe.ok.then_some(probe.xml_count),
            probe.note.as_deref(),
        )
        .await
        .with_context(|| format!("store probe result for {}", target.path))?;
    }

    info!(
        processed = summary.processed,
        ok = summary.ok,
        failed = summary.failed,
        "probe finished"
    );
    Ok(summary)
}
