//! Stage D — automatic judgement.
//!
//! Policy: an archive with at least one XML member is a check-up
//! deliverable (`KENSHIN`); anything else stays `UNKNOWN`. A probe that
//! found nothing says "nothing detected", not "not a check-up", so the
//! judge never writes `NON_KENSHIN` on its own. Rows with a manual
//! judgement are excluded in SQL and never touched.

use std::path::Path;

use anyhow::{Context as _, Result};
use serde::Serialize;
use sqlx::mysql::MySqlPool;
use tracing::info;

use kenshin_archive::probe::probe_zip_has_xml;
use kenshin_config::JudgeSettings;
use kenshin_db::catalog::Catalog;
use kenshin_ledger::codes::AutoJudgement;
use kenshin_ledger::shared_files::{select_for_judge, update_auto_judgement, update_zip_probe};

/// Judge counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JudgeSummary {
    pub processed: u64,
    pub probed: u64,
    pub kenshin: u64,
    pub unknown: u64,
}

impl JudgeSummary {
    #[must_use]
    pub fn note(&self) -> String {
        format!(
            "judge processed={} probed={} kenshin={} unknown={}",
            self.processed, self.probed, self.kenshin, self.unknown
        )
    }
}

/// Run the judgement batch.
pub async fn run(
    pool: &MySqlPool,
    catalog: &Catalog,
    settings: &JudgeSettings,
) -> Result<JudgeSummary> {
    let targets = select_for_judge(pool, settings.limit, "NEW")
        .await
        .context("select rows to judge")?;
    info!(
        targets = targets.len(),
        probe_always = settings.probe_always,
        "judge started"
    );

    let mut summary = JudgeSummary::default();
    for target in targets {
        summary.processed += 1;

        let mut has_xml = target.zip_has_xml;
        let mut probe_note: Option<String> = None;

        if has_xml.is_none() || settings.probe_always {
            let probe = probe_zip_has_xml(Path::new(&target.path));
            summary.probed += 1;
            probe_note = probe.note.clone();
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
            has_xml = probe.ok.then_some(i64::from(probe.has_xml));
        }

        let judgement = if has_xml == Some(1) {
            summary.kenshin += 1;
            AutoJudgement::Kenshin
        } else {
            summary.unknown += 1;
            AutoJudgement::Unknown
        };

        update_auto_judgement(
            pool,
            catalog,
            target.shared_file_id,
            judgement,
            probe_note.as_deref(),
        )
        .await
        .with_context(|| format!("store judgement for {}", target.path))?;
    }

    info!(
        processed = summary.processed,
        kenshin = summary.kenshin,
        unknown = summary.unknown,
        "judge finished"
    );
    Ok(summary)
}
