//! Stage G — per-XML extraction.
//!
//! For each receipt in the target status: reopen the parent archive
//! (cached per zip for the run), read the member, well-form it, pull the
//! CDA document id, run the schema step, extract the header, and upsert
//! the ledger row. Only then does the receipt become `OK`.
//!
//! Two rules shape every branch:
//! - the archive is the system of record, so header gaps and schema
//!   failures are warnings, not errors;
//! - every failure is both a process-log event and a status/error triple
//!   on the receipt, and the loop always moves on to the next row.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use anyhow::{Context as _, Result};
use serde::Serialize;
use sqlx::mysql::MySqlPool;
use tracing::{info, warn};
use zip::ZipArchive;

use kenshin_archive::member::{MemberError, open_archive, read_member_bytes};
use kenshin_cda::document::{IndexOutcome, extract_document_id, parse_xml};
use kenshin_cda::header::{extract_header, missing_field_warnings};
use kenshin_cda::schema_check::{SchemaCheck, check_against_schema};
use kenshin_config::ImportSettings;
use kenshin_db::catalog::Catalog;
use kenshin_ledger::codes::{ErrorCode, ReceiptStatus, Step, StepResult};
use kenshin_ledger::passwords::{PasswordScope, get_password_candidates};
use kenshin_ledger::process_logs::insert_process_log;
use kenshin_ledger::xml_ledger::{XmlLedgerUpsert, upsert_xml_ledger};
use kenshin_ledger::xml_receipts::{
    XmlIndexUpdate, select_extract_targets, update_xml_index_fields,
};
use kenshin_ledger::zip_receipts::{ZipReceiptRow, get_zip_receipt_row_by_sha};
use kenshin_utils::hash::{sha256_text, zero_sha256};
use kenshin_utils::paths::{inner_file_name, norm_inner_path};
use kenshin_utils::text::shorten;

/// Extract counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct XmlExtractSummary {
    pub processed: u64,
    pub ok: u64,
    pub error: u64,
    pub target_status: String,
    pub limit: i64,
}

impl XmlExtractSummary {
    #[must_use]
    pub fn note(&self) -> String {
        format!(
            "xml_extract processed={} ok={} error={} target_status={} limit={}",
            self.processed, self.ok, self.error, self.target_status, self.limit
        )
    }
}

/// Write the failure pair: a process-log event plus the receipt's
/// status/error triple.
#[allow(clippy::too_many_arguments)]
async fn fail_target(
    pool: &MySqlPool,
    catalog: &Catalog,
    run_id: i64,
    xml_sha256: &str,
    step: Step,
    log_message: &str,
    error_code: ErrorCode,
    document_id: Option<String>,
) -> Result<()> {
    insert_process_log(
        pool,
        catalog,
        run_id,
        xml_sha256,
        step,
        StepResult::Error,
        Some(log_message),
    )
    .await?;
    update_xml_index_fields(
        pool,
        catalog,
        &XmlIndexUpdate {
            xml_sha256: xml_sha256.to_string(),
            status: ReceiptStatus::Error,
            error_code: Some(error_code.as_str().to_string()),
            error_message: Some(shorten(log_message, 1000)),
            document_id,
            extracted_run_id: None,
            stamp_extracted_at: false,
        },
    )
    .await?;
    Ok(())
}

/// Run the extraction batch.
pub async fn run(
    pool: &MySqlPool,
    catalog: &Catalog,
    run_id: i64,
    settings: &ImportSettings,
) -> Result<XmlExtractSummary> {
    let mut summary = XmlExtractSummary {
        target_status: settings.target_status.clone(),
        limit: settings.extract_limit,
        ..XmlExtractSummary::default()
    };

    let targets = select_extract_targets(pool, &settings.target_status, settings.extract_limit)
        .await
        .context("select extract targets")?;
    if targets.is_empty() {
        info!("no target rows");
        return Ok(summary);
    }
    info!(targets = targets.len(), "xml extract started");

    // Per-run caches, bound to this invocation and dropped with it.
    let mut zip_archives: HashMap<String, ZipArchive<File>> = HashMap::new();
    let mut zip_rows: HashMap<String, ZipReceiptRow> = HashMap::new();
    let mut zip_passwords: HashMap<String, Vec<String>> = HashMap::new();

    for target in targets {
        summary.processed += 1;

        let xml_sha = target.xml_sha256.trim().to_string();
        let zip_sha = target.zip_sha256.trim().to_string();
        let inner = norm_inner_path(&target.zip_inner_path);

        if xml_sha.is_empty() || zip_sha.is_empty() || inner.is_empty() {
            let msg = format!(
                "row missing key(s): xml_sha={} zip_sha={} inner={}",
                !xml_sha.is_empty(),
                !zip_sha.is_empty(),
                !inner.is_empty()
            );
            let log_sha = if xml_sha.is_empty() {
                zero_sha256().to_string()
            } else {
                xml_sha.clone()
            };
            fail_target(
                pool,
                catalog,
                run_id,
                &log_sha,
                Step::Wellformed,
                &msg,
                ErrorCode::RowKeyMissing,
                None,
            )
            .await?;
            summary.error += 1;
            continue;
        }

        let inner_sha = target
            .zip_inner_path_sha256
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| sha256_text(&inner));

        // Parent zip receipt, cached per zip within the run.
        if !zip_rows.contains_key(&zip_sha) {
            match get_zip_receipt_row_by_sha(pool, &zip_sha).await? {
                Some(row) if !row.zip_path.is_empty() => {
                    zip_rows.insert(zip_sha.clone(), row);
                }
                _ => {
                    fail_target(
                        pool,
                        catalog,
                        run_id,
                        &xml_sha,
                        Step::Wellformed,
                        "parent zip not found in zip_receipts",
                        ErrorCode::ParentZipMissing,
                        None,
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

        // Open archive handle, cached per zip within the run.
        if !zip_archives.contains_key(&zip_sha) {
            match open_archive(Path::new(&zrow.zip_path)) {
                Ok(archive) => {
                    zip_archives.insert(zip_sha.clone(), archive);
                }
                Err(e) => {
                    fail_target(
                        pool,
                        catalog,
                        run_id,
                        &xml_sha,
                        Step::Wellformed,
                        &format!("zip open failed: {e}"),
                        ErrorCode::ZipOpen,
                        None,
                    )
                    .await?;
                    summary.error += 1;
                    continue;
                }
            }
        }

        // Password candidates, resolved once per zip.
        if !zip_passwords.contains_key(&zip_sha) {
            let candidates = get_password_candidates(
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
            zip_passwords.insert(zip_sha.clone(), candidates);
        }
        let candidates = zip_passwords.get(&zip_sha).cloned().unwrap_or_default();

        let Some(archive) = zip_archives.get_mut(&zip_sha) else {
            continue;
        };

        // Member bytes, password-aware with suffix rescue.
        let bytes = match read_member_bytes(archive, &inner, &candidates) {
            Ok(b) => b,
            Err(e) => {
                let (code, step_msg) = match &e {
                    MemberError::Password { .. } => {
                        (ErrorCode::ZipPassword, format!("zip open failed: {e}"))
                    }
                    MemberError::NotFound { .. } => {
                        (ErrorCode::ZipMemberNotFound, format!("zip member not found: {inner}"))
                    }
                    MemberError::Open { .. } => {
                        (ErrorCode::ZipOpen, format!("zip open failed: {e}"))
                    }
                };
                fail_target(
                    pool,
                    catalog,
                    run_id,
                    &xml_sha,
                    Step::Wellformed,
                    &step_msg,
                    code,
                    None,
                )
                .await?;
                summary.error += 1;
                continue;
            }
        };

        // 1) well-formed
        let doc = match parse_xml(&bytes) {
            Ok(doc) => {
                insert_process_log(
                    pool,
                    catalog,
                    run_id,
                    &xml_sha,
                    Step::Wellformed,
                    StepResult::Ok,
                    None,
                )
                .await?;
                doc
            }
            Err(e) => {
                fail_target(
                    pool,
                    catalog,
                    run_id,
                    &xml_sha,
                    Step::Wellformed,
                    &shorten(&e.to_string(), 1000),
                    ErrorCode::XmlParse,
                    None,
                )
                .await?;
                summary.error += 1;
                continue;
            }
        };

        // 2) CDA index
        let (document_id, index_outcome) = extract_document_id(&doc);
        match index_outcome {
            IndexOutcome::Ok => {
                insert_process_log(
                    pool,
                    catalog,
                    run_id,
                    &xml_sha,
                    Step::CdaIndex,
                    StepResult::Ok,
                    None,
                )
                .await?;
            }
            IndexOutcome::Skip => {
                insert_process_log(
                    pool,
                    catalog,
                    run_id,
                    &xml_sha,
                    Step::CdaIndex,
                    StepResult::Skip,
                    Some("id nullFlavor (allowed)"),
                )
                .await?;
            }
            IndexOutcome::Error => {
                // Recorded, not fatal; later steps still run.
                insert_process_log(
                    pool,
                    catalog,
                    run_id,
                    &xml_sha,
                    Step::CdaIndex,
                    StepResult::Error,
                    Some("document id missing or carries neither root nor nullFlavor"),
                )
                .await?;
            }
        }

        // 3) schema step (never fails the extract)
        let mut xsd_valid: Option<i64> = None;
        let mut xsd_note: Option<String> = None;
        match settings.xsd_root.as_ref().filter(|r| r.as_std_path().exists()) {
            Some(xsd_root) => {
                let check =
                    check_against_schema(&doc, xsd_root.as_std_path(), &settings.xsd_main);
                xsd_valid = check.xsd_valid();
                match check {
                    SchemaCheck::Skipped { note, .. } => {
                        xsd_note = Some(shorten(&note, 1500));
                        insert_process_log(
                            pool,
                            catalog,
                            run_id,
                            &xml_sha,
                            Step::XsdValidate,
                            StepResult::Skip,
                            xsd_note.as_deref(),
                        )
                        .await?;
                    }
                    SchemaCheck::Valid { used } => {
                        xsd_note = Some(format!("used={used}"));
                        insert_process_log(
                            pool,
                            catalog,
                            run_id,
                            &xml_sha,
                            Step::XsdValidate,
                            StepResult::Ok,
                            xsd_note.as_deref(),
                        )
                        .await?;
                    }
                    SchemaCheck::Invalid { used, message } => {
                        xsd_note = Some(shorten(&format!("used={used} {message}"), 1500));
                        insert_process_log(
                            pool,
                            catalog,
                            run_id,
                            &xml_sha,
                            Step::XsdValidate,
                            StepResult::Error,
                            xsd_note.as_deref(),
                        )
                        .await?;
                    }
                }
            }
            None => {
                insert_process_log(
                    pool,
                    catalog,
                    run_id,
                    &xml_sha,
                    Step::XsdValidate,
                    StepResult::Skip,
                    Some("xsd_root not set or not exists"),
                )
                .await?;
            }
        }

        // 4) header extract — gaps are warnings only
        let header = extract_header(&doc);
        let warnings = missing_field_warnings(&header);
        let warning_message = if warnings.is_empty() {
            None
        } else {
            Some(shorten(&warnings.join("; "), 1000))
        };
        insert_process_log(
            pool,
            catalog,
            run_id,
            &xml_sha,
            Step::ExtractItems,
            StepResult::Ok,
            warning_message.as_deref(),
        )
        .await?;

        // 5) ledger upsert
        let ledger_row = XmlLedgerUpsert {
            run_id,
            zip_receipt_id: zrow.zip_receipt_id,
            facility_folder_name: zrow.facility_folder_name.clone(),
            facility_code: zrow.facility_code.clone(),
            facility_name: zrow.facility_name.clone(),
            zip_name: zrow.zip_name.clone(),
            zip_sha256: zip_sha.clone(),
            xml_filename: inner_file_name(&inner),
            zip_inner_path: inner.clone(),
            zip_inner_path_sha256: inner_sha,
            insurer_number: header.insurer_number.clone(),
            insurance_symbol: header.insurance_symbol.clone(),
            insurance_number: header.insurance_number.clone(),
            insurance_branch_number: header.insurance_branch_number.clone(),
            birth_date: header.birth_date,
            exam_date: header.exam_date,
            gender_code: header.gender_code.clone(),
            name_kana: header.patient_name.clone(),
            postal_code: header.postal_code.clone(),
            address: header.address.clone(),
            org_name_in_xml: header.facility_name.clone(),
            org_code_in_xml: header.facility_code.clone(),
            report_category_code: None,
            program_type_code: None,
            guidance_level_code: None,
            metabo_code: None,
            xsd_valid,
            error_content: xsd_note.clone(),
        };

        match upsert_xml_ledger(pool, catalog, &ledger_row).await {
            Ok(_) => {
                insert_process_log(
                    pool,
                    catalog,
                    run_id,
                    &xml_sha,
                    Step::Ledger,
                    StepResult::Ok,
                    None,
                )
                .await?;
            }
            Err(e) => {
                let msg = shorten(&e.to_string(), 1200);
                insert_process_log(
                    pool,
                    catalog,
                    run_id,
                    &xml_sha,
                    Step::Ledger,
                    StepResult::Error,
                    Some(&msg),
                )
                .await?;
                update_xml_index_fields(
                    pool,
                    catalog,
                    &XmlIndexUpdate {
                        xml_sha256: xml_sha.clone(),
                        status: ReceiptStatus::Error,
                        error_code: Some(ErrorCode::LedgerUpsert.as_str().to_string()),
                        error_message: Some(msg),
                        document_id: document_id.clone(),
                        extracted_run_id: None,
                        stamp_extracted_at: false,
                    },
                )
                .await?;
                summary.error += 1;
                continue;
            }
        }

        // 6) transition to OK; warnings live in the process logs only
        update_xml_index_fields(
            pool,
            catalog,
            &XmlIndexUpdate {
                xml_sha256: xml_sha.clone(),
                status: ReceiptStatus::Ok,
                error_code: None,
                error_message: None,
                document_id,
                extracted_run_id: Some(run_id),
                stamp_extracted_at: true,
            },
        )
        .await?;
        summary.ok += 1;
    }

    if summary.error > 0 {
        warn!(note = %summary.note(), "xml extract finished with errors");
    } else {
        info!(note = %summary.note(), "xml extract finished");
    }
    Ok(summary)
}
