//! Stage H — observation-value extraction.
//!
//! Base extraction first: every `observation` with an identifiable
//! `code/@code` becomes a row, refined by item-master hints when the
//! namecode is known. A document that is not a `ClinicalDocument` is a
//! SKIP; a document yielding zero rows is an ERROR (something was
//! expected and nothing came out).

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use anyhow::{Context as _, Result, bail};
use serde::Serialize;
use sqlx::mysql::MySqlPool;
use tracing::{info, warn};
use zip::ZipArchive;

use kenshin_archive::member::{open_archive, read_member_bytes};
use kenshin_cda::document::{is_clinical_document, parse_xml};
use kenshin_cda::observations::{ValueHints, ValueMethod, ValueType, collect_observations};
use kenshin_config::ItemExtractSettings;
use kenshin_db::catalog::Catalog;
use kenshin_ledger::codes::{Step, StepResult};
use kenshin_ledger::item_values::{
    XmlItemValueUpsert, upsert_exam_result_item_value, upsert_xml_item_value,
};
use kenshin_ledger::masters::{ItemMasterRow, load_item_master_map};
use kenshin_ledger::passwords::{PasswordScope, get_password_candidates};
use kenshin_ledger::process_logs::insert_process_log;
use kenshin_ledger::runs::run_exists;
use kenshin_ledger::xml_receipts::{
    select_item_extract_targets, update_items_extract_fields,
};
use kenshin_ledger::zip_receipts::{ZipReceiptRow, get_zip_receipt_row_by_sha};
use kenshin_utils::hash::sha256_text;
use kenshin_utils::paths::norm_inner_path;
use kenshin_utils::text::shorten;

/// Item-extract counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ItemExtractSummary {
    pub processed: u64,
    pub ok: u64,
    pub error: u64,
    pub zero_hit: u64,
    pub limit: i64,
}

impl ItemExtractSummary {
    #[must_use]
    pub fn note(&self) -> String {
        let limit = if self.limit > 0 {
            self.limit.to_string()
        } else {
            "FULL".to_string()
        };
        format!(
            "item_extract processed={} ok={} err={} zero_hit={} limit={limit}",
            self.processed, self.ok, self.error, self.zero_hit
        )
    }
}

/// Map master rows onto the walk's extraction hints.
pub(crate) fn hints_from_masters(
    masters: &HashMap<String, ItemMasterRow>,
) -> HashMap<String, ValueHints> {
    masters
        .iter()
        .map(|(namecode, master)| {
            (
                namecode.clone(),
                ValueHints {
                    value_type: master
                        .xml_value_type
                        .as_deref()
                        .and_then(ValueType::parse),
                    value_method: ValueMethod::parse(
                        master.value_method.as_deref().unwrap_or(""),
                    ),
                },
            )
        })
        .collect()
}

async fn mark_items_error(
    pool: &MySqlPool,
    catalog: &Catalog,
    run_id: i64,
    xml_receipt_id: i64,
    xml_sha256: &str,
    message: Option<&str>,
) -> Result<()> {
    if let Some(message) = message {
        insert_process_log(
            pool,
            catalog,
            run_id,
            xml_sha256,
            Step::ExtractItems,
            StepResult::Error,
            Some(message),
        )
        .await?;
    }
    update_items_extract_fields(pool, catalog, xml_receipt_id, "ERROR", run_id).await?;
    Ok(())
}

/// Run the item-extraction batch.
///
/// `run_id` semantics follow the settings: 0 means the caller opened a
/// fresh run for us; a positive id attaches to an existing run (the id
/// must exist — foreign keys on the logs are real).
pub async fn run(
    pool: &MySqlPool,
    master_pool: &MySqlPool,
    catalog: &Catalog,
    run_id: i64,
    settings: &ItemExtractSettings,
) -> Result<ItemExtractSummary> {
    if settings.run_id > 0 && !run_exists(pool, settings.run_id).await? {
        bail!("run_id {} does not exist in import_runs", settings.run_id);
    }

    let masters = load_item_master_map(master_pool)
        .await
        .context("load item master")?;
    let hints = hints_from_masters(&masters);
    info!(namecodes = masters.len(), "item master loaded");

    let mut summary = ItemExtractSummary {
        limit: settings.limit,
        ..ItemExtractSummary::default()
    };

    let targets = select_item_extract_targets(pool, "OK", settings.limit)
        .await
        .context("select item extract targets")?;
    if targets.is_empty() {
        info!("no targets");
        return Ok(summary);
    }
    info!(targets = targets.len(), "item extract started");

    let mut zip_archives: HashMap<String, ZipArchive<File>> = HashMap::new();
    let mut zip_rows: HashMap<String, ZipReceiptRow> = HashMap::new();
    let mut zip_passwords: HashMap<String, Vec<String>> = HashMap::new();

    for target in targets {
        summary.processed += 1;

        let xml_sha = target.xml_sha256.trim().to_string();
        let zip_sha = target.zip_sha256.trim().to_string();
        let inner = norm_inner_path(&target.zip_inner_path);

        if xml_sha.is_empty() || zip_sha.is_empty() || inner.is_empty() {
            mark_items_error(pool, catalog, run_id, target.xml_receipt_id, &xml_sha, None)
                .await?;
            summary.error += 1;
            continue;
        }
        let inner_sha = sha256_text(&inner);

        if !zip_rows.contains_key(&zip_sha) {
            match get_zip_receipt_row_by_sha(pool, &zip_sha).await? {
                Some(row) if !row.zip_path.is_empty() => {
                    zip_rows.insert(zip_sha.clone(), row);
                }
                _ => {
                    mark_items_error(
                        pool,
                        catalog,
                        run_id,
                        target.xml_receipt_id,
                        &xml_sha,
                        Some("item_extract: parent zip missing in zip_receipts"),
                    )
                    .await?;
                    summary.error += 1;
                    continue;
                }
            }
        }
        let Some(zrow) = zip_rows.get(&zip_sha).cloned() else {
            continue;
        };

        if !zip_archives.contains_key(&zip_sha) {
            match open_archive(Path::new(&zrow.zip_path)) {
                Ok(archive) => {
                    zip_archives.insert(zip_sha.clone(), archive);
                }
                Err(e) => {
                    mark_items_error(
                        pool,
                        catalog,
                        run_id,
                        target.xml_receipt_id,
                        &xml_sha,
                        Some(&format!("item_extract: zip open failed: {e}")),
                    )
                    .await?;
                    summary.error += 1;
                    continue;
                }
            }
        }

        let candidates = if settings.zip_password_enabled {
            if !zip_passwords.contains_key(&zip_sha) {
                let resolved = get_password_candidates(
                    pool,
                    &PasswordScope {
                        facility_code: zrow.facility_code.as_deref().unwrap_or(""),
                        facility_folder_name: zrow.facility_folder_name.as_deref().unwrap_or(""),
                        zip_name: &zrow.zip_name,
                        zip_sha256: &zip_sha,
                    },
                )
                .await
                .unwrap_or_default();
                zip_passwords.insert(zip_sha.clone(), resolved);
            }
            zip_passwords.get(&zip_sha).cloned().unwrap_or_default()
        } else {
            Vec::new()
        };

        let Some(archive) = zip_archives.get_mut(&zip_sha) else {
            continue;
        };

        let bytes = match read_member_bytes(archive, &inner, &candidates) {
            Ok(b) => b,
            Err(e) => {
                mark_items_error(
                    pool,
                    catalog,
                    run_id,
                    target.xml_receipt_id,
                    &xml_sha,
                    Some(&shorten(&format!("item_extract: zip open failed: {e}"), 1500)),
                )
                .await?;
                summary.error += 1;
                continue;
            }
        };

        let doc = match parse_xml(&bytes) {
            Ok(doc) => doc,
            Err(e) => {
                mark_items_error(
                    pool,
                    catalog,
                    run_id,
                    target.xml_receipt_id,
                    &xml_sha,
                    Some(&shorten(&format!("item_extract: parse failed: {e}"), 1500)),
                )
                .await?;
                summary.error += 1;
                continue;
            }
        };

        if !is_clinical_document(&doc) {
            insert_process_log(
                pool,
                catalog,
                run_id,
                &xml_sha,
                Step::ExtractItems,
                StepResult::Skip,
                Some("item_extract: not CDA ClinicalDocument"),
            )
            .await?;
            update_items_extract_fields(pool, catalog, target.xml_receipt_id, "SKIP", run_id)
                .await?;
            continue;
        }

        let rows = collect_observations(&doc, &hints);

        let write_result: Result<usize> = async {
            let mut tx = pool.begin().await.context("open item transaction")?;
            let mut written = 0usize;
            for item in &rows {
                let row = XmlItemValueUpsert {
                    xml_sha256: xml_sha.clone(),
                    zip_sha256: zip_sha.clone(),
                    zip_inner_path: inner.clone(),
                    zip_inner_path_sha256: inner_sha.clone(),
                    namecode: item.namecode.clone(),
                    occurrence_no: item.occurrence_no,
                    value_raw: item.value_raw.clone(),
                    value_type: item.value_type.clone(),
                    unit: item.unit.clone(),
                    code_system: item.code_system.clone(),
                    code_value: item.code_value.clone(),
                    code_display: item.code_display.clone(),
                    extracted_run_id: run_id,
                };
                upsert_xml_item_value(&mut *tx, catalog, &row).await?;
                upsert_exam_result_item_value(
                    &mut *tx,
                    &xml_sha,
                    &item.namecode,
                    item.occurrence_no,
                    item.value_raw.as_deref(),
                )
                .await?;
                written += 1;
            }
            tx.commit().await.context("commit item transaction")?;
            Ok(written)
        }
        .await;

        match write_result {
            Ok(written) if written > 0 => {
                insert_process_log(
                    pool,
                    catalog,
                    run_id,
                    &xml_sha,
                    Step::ExtractItems,
                    StepResult::Ok,
                    Some(&format!("item_extract: written={written}")),
                )
                .await?;
                update_items_extract_fields(pool, catalog, target.xml_receipt_id, "OK", run_id)
                    .await?;
                summary.ok += 1;
            }
            Ok(_) => {
                // Zero rows out of a ClinicalDocument: the measurement
                // layer is missing or unrecognizable.
                summary.zero_hit += 1;
                mark_items_error(
                    pool,
                    catalog,
                    run_id,
                    target.xml_receipt_id,
                    &xml_sha,
                    Some("item_extract: written=0"),
                )
                .await?;
            }
            Err(e) => {
                warn!(xml_sha256 = %xml_sha, error = %e, "item write failed");
                mark_items_error(
                    pool,
                    catalog,
                    run_id,
                    target.xml_receipt_id,
                    &xml_sha,
                    Some(&shorten(&format!("item_extract exception: {e}"), 1500)),
                )
                .await?;
                summary.error += 1;
            }
        }
    }

    info!(note = %summary.note(), "item extract finished");
    Ok(summary)
}
