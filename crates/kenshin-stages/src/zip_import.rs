//! Stage F — ZIP import.
//!
//! For every facility folder under the ingest root, for every zip:
//! hash, resolve passwords, extract into a per-run scratch directory,
//! classify the structure, upsert the ZIP receipt, and (when enabled)
//! inventory the XML members as `PENDING` receipts. The receipt is
//! written on success and on failure alike — the ledger records the
//! fact of observation, not just the happy path.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use serde::Serialize;
use sqlx::mysql::MySqlPool;
use tracing::{info, warn};
use walkdir::WalkDir;

use kenshin_archive::extract::{ExtractFailure, extract_zip_to_temp};
use kenshin_cda::document::parse_xml;
use kenshin_config::ImportSettings;
use kenshin_db::catalog::Catalog;
use kenshin_ledger::codes::{ErrorCode, ReceiptAction, ReceiptStatus, StructureStatus};
use kenshin_ledger::passwords::{PasswordScope, get_password_candidates};
use kenshin_ledger::xml_receipts::{
    XmlReceiptUpsert, get_xml_receipt_id_by_sha, insert_xml_receipt_run, upsert_xml_receipt,
};
use kenshin_ledger::zip_receipts::{
    ZipReceiptUpsert, get_zip_receipt_id_by_sha, insert_zip_receipt_run, upsert_zip_receipt,
};
use kenshin_utils::clock::from_system_time;
use kenshin_utils::fsops::{ensure_dir, has_any_file, safe_rmtree};
use kenshin_utils::hash::{sha256_file, sha256_text, zero_sha256};
use kenshin_utils::paths::norm_inner_path;
use kenshin_utils::text::{join_messages, shorten};

/// Import counters, aggregated into the run note.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ZipImportSummary {
    pub facility: u64,
    pub zips_found: u64,
    pub zip_new: u64,
    pub zip_seen: u64,
    pub zip_ok: u64,
    pub zip_error: u64,
    pub zip_skipped: u64,
    pub xml_total: u64,
    pub xml_new: u64,
    pub xml_seen: u64,
    pub xml_error: u64,
    pub xml_skipped_zip: u64,
    pub xml_enabled: bool,
}

impl ZipImportSummary {
    #[must_use]
    pub fn note(&self) -> String {
        let zip_part = format!(
            "facility={}, zips_found={}, new={}, seen={}, ok={}, error={}, skipped={}",
            self.facility,
            self.zips_found,
            self.zip_new,
            self.zip_seen,
            self.zip_ok,
            self.zip_error,
            self.zip_skipped
        );
        if self.xml_enabled {
            format!(
                "{zip_part} | xml_total={}, new={}, seen={}, error={}, xml_skipped_zip={}",
                self.xml_total, self.xml_new, self.xml_seen, self.xml_error, self.xml_skipped_zip
            )
        } else {
            zip_part
        }
    }
}

/// Facility folders follow `"<code>_<name>"`; the code portion may be
/// empty and a folder without an underscore is all code.
#[must_use]
pub fn parse_facility_folder_name(folder_name: &str) -> (String, String) {
    match folder_name.split_once('_') {
        Some((code, name)) => (code.trim().to_string(), name.trim().to_string()),
        None => (folder_name.trim().to_string(), String::new()),
    }
}

fn list_facility_dirs(input_root: &Path) -> Result<Vec<PathBuf>> {
    if !input_root.exists() {
        bail!("input root does not exist: {}", input_root.display());
    }
    if !input_root.is_dir() {
        bail!("input root is not a directory: {}", input_root.display());
    }
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(input_root)
        .with_context(|| format!("read input root {}", input_root.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_dir()
                && !p
                    .file_name()
                    .map(|n| n.to_string_lossy().starts_with('.'))
                    .unwrap_or(true)
        })
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn zip_files_in(facility_dir: &Path) -> Vec<PathBuf> {
    let mut zips: Vec<PathBuf> = std::fs::read_dir(facility_dir)
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .map(|e| e.eq_ignore_ascii_case("zip"))
                    .unwrap_or(false)
        })
        .collect();
    zips.sort();
    zips
}

/// Directories named `DATA` anywhere under the scratch root, shallowest
/// first.
pub(crate) fn find_data_dirs(root: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && e.file_name() == "DATA")
        .map(|e| e.into_path())
        .collect();
    dirs.sort_by_key(|p| (p.components().count(), p.to_string_lossy().into_owned()));
    dirs
}

fn xml_files_under(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = roots
        .iter()
        .flat_map(|root| {
            WalkDir::new(root)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| {
                    p.extension()
                        .map(|e| e.eq_ignore_ascii_case("xml"))
                        .unwrap_or(false)
                })
        })
        .collect();
    files.sort();
    files.dedup();
    files
}

struct StructureVerdict {
    status: StructureStatus,
    error_code: Option<ErrorCode>,
    messages: Vec<String>,
    data_dir_count: i64,
    data_xml_count: i64,
    xml_files: Vec<PathBuf>,
}

/// Classify an extracted tree. Warnings (`STRUCT_NO_DATA_DIR`,
/// `STRUCT_MULTI_DATA_DIR`) coexist with an OK status as long as XMLs
/// were found.
fn classify_structure(scratch: &Path) -> StructureVerdict {
    if !has_any_file(scratch) {
        return StructureVerdict {
            status: StructureStatus::Error,
            error_code: Some(ErrorCode::ZipEmptyContent),
            messages: vec!["no files after extraction (empty zip or zero-byte members)".into()],
            data_dir_count: 0,
            data_xml_count: 0,
            xml_files: Vec::new(),
        };
    }

    let data_dirs = find_data_dirs(scratch);
    let data_dir_count = data_dirs.len() as i64;
    let mut error_code: Option<ErrorCode> = None;
    let mut messages: Vec<String> = Vec::new();

    let xml_files = if data_dir_count >= 1 {
        if data_dir_count >= 2 {
            // Anomalous but the content is still scooped; the operator
            // decides what to do with it.
            error_code = Some(ErrorCode::StructMultiDataDir);
            let sample: Vec<String> = data_dirs
                .iter()
                .take(5)
                .map(|d| {
                    d.strip_prefix(scratch)
                        .unwrap_or(d)
                        .to_string_lossy()
                        .into_owned()
                })
                .collect();
            messages.push(format!(
                "multiple DATA directories detected: count={data_dir_count}"
            ));
            messages.push(format!("DATA candidates (first 5): {}", sample.join(", ")));
        }
        xml_files_under(&data_dirs)
    } else {
        error_code = Some(ErrorCode::StructNoDataDir);
        messages.push("no DATA directory; scooping XML from the whole archive".into());
        xml_files_under(&[scratch.to_path_buf()])
    };

    let data_xml_count = xml_files.len() as i64;
    let status = if data_xml_count > 0 {
        StructureStatus::Ok
    } else {
        if data_dir_count == 1 {
            error_code = Some(ErrorCode::StructZeroXml);
            messages.push("DATA contains no XML".into());
        } else {
            error_code = error_code.or(Some(ErrorCode::StructZeroXml));
            messages.push("no XML anywhere in the archive".into());
        }
        StructureStatus::Error
    };

    StructureVerdict {
        status,
        error_code,
        messages,
        data_dir_count,
        data_xml_count,
        xml_files,
    }
}

#[derive(Default)]
struct XmlInventoryCounts {
    total: u64,
    new: u64,
    seen: u64,
    error: u64,
}

/// Inventory the XML members of one extracted zip: hash, receipt upsert
/// (`PENDING`), receipt-run event, optional light well-formed check.
#[allow(clippy::too_many_arguments)]
async fn inventory_xmls(
    pool: &MySqlPool,
    catalog: &Catalog,
    run_id: i64,
    zip_sha256: &str,
    scratch: &Path,
    xml_files: &[PathBuf],
    facility_code: &str,
    facility_name: &str,
    wellformed_check: bool,
) -> Result<XmlInventoryCounts> {
    let mut counts = XmlInventoryCounts::default();
    let mut tx = pool.begin().await.context("open inventory transaction")?;

    for xml_path in xml_files {
        counts.total += 1;

        let inner = norm_inner_path(
            &xml_path
                .strip_prefix(scratch)
                .unwrap_or(xml_path)
                .to_string_lossy(),
        );
        let inner_sha = sha256_text(&inner);

        let (xml_sha, read_error) = match sha256_file(xml_path) {
            Ok(digest) => (digest, None),
            Err(e) => (zero_sha256().to_string(), Some(e.to_string())),
        };

        if let Some(err) = read_error {
            counts.error += 1;
            warn!(path = %xml_path.display(), error = %err, "xml inventory read failed");
            let row = XmlReceiptUpsert {
                zip_sha256: zip_sha256.to_string(),
                zip_inner_path: inner.clone(),
                zip_inner_path_sha256: inner_sha,
                xml_sha256: xml_sha.clone(),
                file_size: None,
                file_mtime: None,
                status: ReceiptStatus::Error,
                error_code: Some(ErrorCode::ZipUnexpected.as_str().to_string()),
                error_message: Some(shorten(&err, 1000)),
                facility_code: facility_code.to_string(),
                facility_name: facility_name.to_string(),
            };
            let id = upsert_xml_receipt(&mut *tx, catalog, &row).await?;
            insert_xml_receipt_run(
                &mut *tx,
                catalog,
                run_id,
                &xml_sha,
                Some(id),
                ReceiptAction::Seen,
                Some(&format!("{}:{err}", ErrorCode::ZipUnexpected.as_str())),
            )
            .await?;
            continue;
        }

        let existing = get_xml_receipt_id_by_sha(pool, &xml_sha).await?;
        let action = if existing.is_none() {
            counts.new += 1;
            ReceiptAction::New
        } else {
            counts.seen += 1;
            ReceiptAction::Seen
        };

        let meta = std::fs::metadata(xml_path).ok();
        let file_size = meta.as_ref().map(|m| i64::try_from(m.len()).unwrap_or(i64::MAX));
        let file_mtime = meta.and_then(|m| m.modified().ok()).map(from_system_time);

        let mut status = ReceiptStatus::Pending;
        let mut error_code = None;
        let mut error_message = None;
        if wellformed_check {
            let bytes = std::fs::read(xml_path).unwrap_or_default();
            if let Err(e) = parse_xml(&bytes) {
                // Failure closes the receipt; success leaves PENDING for
                // the extract stage.
                status = ReceiptStatus::Error;
                error_code = Some(ErrorCode::XmlParse.as_str().to_string());
                error_message = Some(shorten(&e.to_string(), 1000));
                counts.error += 1;
            }
        }

        let row = XmlReceiptUpsert {
            zip_sha256: zip_sha256.to_string(),
            zip_inner_path: inner,
            zip_inner_path_sha256: inner_sha,
            xml_sha256: xml_sha.clone(),
            file_size,
            file_mtime,
            status,
            error_code: error_code.clone(),
            error_message: error_message.clone(),
            facility_code: facility_code.to_string(),
            facility_name: facility_name.to_string(),
        };
        let id = upsert_xml_receipt(&mut *tx, catalog, &row).await?;

        let message = error_code
            .as_deref()
            .map(|code| format!("{code}:{}", error_message.as_deref().unwrap_or("error")));
        insert_xml_receipt_run(
            &mut *tx,
            catalog,
            run_id,
            &xml_sha,
            Some(id),
            action,
            message.as_deref(),
        )
        .await?;
    }

    tx.commit().await.context("commit inventory transaction")?;
    Ok(counts)
}

/// Run the ZIP import for every facility folder under the ingest root.
pub async fn run(
    pool: &MySqlPool,
    catalog: &Catalog,
    run_id: i64,
    settings: &ImportSettings,
) -> Result<ZipImportSummary> {
    info!(
        xml_enabled = settings.xml_enabled,
        wellformed = settings.wellformed_check,
        "zip import started"
    );

    let mut summary = ZipImportSummary {
        xml_enabled: settings.xml_enabled,
        ..ZipImportSummary::default()
    };

    let run_temp_base = settings
        .temp_root
        .as_std_path()
        .join(format!("run_{run_id:06}"));
    ensure_dir(&run_temp_base).context("create run scratch base")?;

    let facility_dirs = list_facility_dirs(settings.input_root.as_std_path())?;
    summary.facility = facility_dirs.len() as u64;
    info!(facilities = summary.facility, "facility folders found");

    for facility_dir in facility_dirs {
        let facility_folder_name = facility_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (facility_code, facility_name) = parse_facility_folder_name(&facility_folder_name);

        let zips = zip_files_in(&facility_dir);
        info!(facility = %facility_folder_name, zip_count = zips.len(), "facility");
        if zips.is_empty() {
            summary.zip_skipped += 1;
            continue;
        }

        for zip_path in zips {
            summary.zips_found += 1;
            let zip_name = zip_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let zip_abs = std::path::absolute(&zip_path)
                .unwrap_or_else(|_| zip_path.clone())
                .to_string_lossy()
                .into_owned();

            let zip_sha = match sha256_file(&zip_path) {
                Ok(digest) => digest,
                Err(e) => {
                    summary.zip_error += 1;
                    warn!(zip = %zip_name, error = %e, "sha256 failed");
                    continue;
                }
            };
            info!(zip = %zip_name, sha256 = %zip_sha, "zip");

            let action = if get_zip_receipt_id_by_sha(pool, &zip_sha).await?.is_none() {
                summary.zip_new += 1;
                ReceiptAction::New
            } else {
                summary.zip_seen += 1;
                ReceiptAction::Seen
            };

            let scratch = run_temp_base.join(&zip_sha);
            let mut messages: Vec<String> = Vec::new();

            // 1) extract, password-aware
            let candidates = get_password_candidates(
                pool,
                &PasswordScope {
                    facility_code: &facility_code,
                    facility_folder_name: &facility_folder_name,
                    zip_name: &zip_name,
                    zip_sha256: &zip_sha,
                },
            )
            .await?;

            let extraction = extract_zip_to_temp(&zip_path, &scratch, &candidates);

            // 2) classify
            let verdict = match &extraction {
                Ok(_) => classify_structure(&scratch),
                Err(e) => {
                    let code = match e.kind {
                        ExtractFailure::Password => ErrorCode::ZipPassword,
                        ExtractFailure::LongPath => ErrorCode::ZipLongPath,
                        ExtractFailure::Unexpected => ErrorCode::ZipUnexpected,
                    };
                    messages.push(format!("zip extraction failed: {}", code.as_str()));
                    messages.push(e.message.clone());
                    StructureVerdict {
                        status: StructureStatus::Error,
                        error_code: Some(code),
                        messages: Vec::new(),
                        data_dir_count: 0,
                        data_xml_count: 0,
                        xml_files: Vec::new(),
                    }
                }
            };
            messages.extend(verdict.messages.iter().cloned());

            // 3) receipt, success and failure alike
            let receipt = ZipReceiptUpsert {
                run_id,
                facility_folder_name: facility_folder_name.clone(),
                facility_code: facility_code.clone(),
                facility_name: facility_name.clone(),
                zip_name: zip_name.clone(),
                zip_path: zip_abs,
                zip_sha256: zip_sha.clone(),
                structure_status: verdict.status,
                structure_message: join_messages(&messages),
                data_dir_count: Some(verdict.data_dir_count),
                data_xml_count: Some(verdict.data_xml_count),
                error_code: verdict.error_code.map(|c| c.as_str().to_string()),
                error_message: extraction.as_ref().err().map(|e| e.message.clone()),
            };

            let receipt_result: Result<()> = async {
                let mut tx = pool.begin().await.context("open receipt transaction")?;
                let zip_receipt_id = upsert_zip_receipt(&mut *tx, catalog, &receipt).await?;
                insert_zip_receipt_run(
                    &mut *tx,
                    catalog,
                    run_id,
                    zip_receipt_id,
                    &zip_sha,
                    action,
                    None,
                )
                .await?;
                tx.commit().await.context("commit receipt transaction")?;
                Ok(())
            }
            .await;

            if let Err(e) = receipt_result {
                summary.zip_error += 1;
                warn!(zip = %zip_name, error = %e, "receipt upsert failed");
                safe_rmtree(&scratch);
                continue;
            }

            if verdict.status == StructureStatus::Ok {
                summary.zip_ok += 1;
            } else {
                summary.zip_error += 1;
            }
            info!(
                zip = %zip_name,
                status = verdict.status.as_str(),
                error_code = receipt.error_code.as_deref().unwrap_or("-"),
                data_dir_count = verdict.data_dir_count,
                data_xml_count = verdict.data_xml_count,
                "structure"
            );

            // 4) XML inventory (only when the structure yielded XMLs)
            if settings.xml_enabled && verdict.status == StructureStatus::Ok {
                match inventory_xmls(
                    pool,
                    catalog,
                    run_id,
                    &zip_sha,
                    &scratch,
                    &verdict.xml_files,
                    &facility_code,
                    &facility_name,
                    settings.wellformed_check,
                )
                .await
                {
                    Ok(counts) => {
                        summary.xml_total += counts.total;
                        summary.xml_new += counts.new;
                        summary.xml_seen += counts.seen;
                        summary.xml_error += counts.error;
                        info!(
                            total = counts.total,
                            new = counts.new,
                            seen = counts.seen,
                            error = counts.error,
                            "xml inventory"
                        );
                    }
                    Err(e) => {
                        warn!(zip_sha256 = %zip_sha, error = %e, "xml inventory failed");
                    }
                }
            } else if settings.xml_enabled {
                summary.xml_skipped_zip += 1;
            }

            // 5) scratch cleanup
            safe_rmtree(&scratch);
        }
    }

    info!(note = %summary.note(), "zip import finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kenshin_utils::fsops::ensure_dir;

    #[test]
    fn facility_folder_name_splits_on_first_underscore() {
        assert_eq!(
            parse_facility_folder_name("1311234567_健診センター"),
            ("1311234567".to_string(), "健診センター".to_string())
        );
        assert_eq!(
            parse_facility_folder_name("_nameonly"),
            (String::new(), "nameonly".to_string())
        );
        assert_eq!(
            parse_facility_folder_name("codeonly"),
            ("codeonly".to_string(), String::new())
        );
        assert_eq!(
            parse_facility_folder_name("a_b_c"),
            ("a".to_string(), "b_c".to_string())
        );
    }

    #[test]
    fn structure_empty_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let v = classify_structure(dir.path());
        assert_eq!(v.status, StructureStatus::Error);
        assert_eq!(v.error_code, Some(ErrorCode::ZipEmptyContent));
        assert_eq!(v.data_xml_count, 0);
    }

    #[test]
    fn structure_single_data_dir_with_xml_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("DATA");
        ensure_dir(&data).unwrap();
        std::fs::write(data.join("a.xml"), b"<a/>").unwrap();

        let v = classify_structure(dir.path());
        assert_eq!(v.status, StructureStatus::Ok);
        assert_eq!(v.error_code, None);
        assert_eq!(v.data_dir_count, 1);
        assert_eq!(v.data_xml_count, 1);
    }

    #[test]
    fn structure_multi_data_dir_is_ok_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["one/DATA", "two/DATA"] {
            let d = dir.path().join(sub);
            ensure_dir(&d).unwrap();
            std::fs::write(d.join("a.xml"), b"<a/>").unwrap();
        }
        let v = classify_structure(dir.path());
        assert_eq!(v.status, StructureStatus::Ok);
        assert_eq!(v.error_code, Some(ErrorCode::StructMultiDataDir));
        assert_eq!(v.data_dir_count, 2);
        assert_eq!(v.data_xml_count, 2);
        assert!(v.messages.iter().any(|m| m.contains("count=2")));
    }

    #[test]
    fn structure_no_data_dir_falls_back_to_anywhere() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("misc");
        ensure_dir(&sub).unwrap();
        std::fs::write(sub.join("a.xml"), b"<a/>").unwrap();

        let v = classify_structure(dir.path());
        assert_eq!(v.status, StructureStatus::Ok);
        // The warning survives even though the status is OK.
        assert_eq!(v.error_code, Some(ErrorCode::StructNoDataDir));
        assert_eq!(v.data_dir_count, 0);
        assert_eq!(v.data_xml_count, 1);
    }

    #[test]
    fn structure_data_dir_without_xml_is_zero_xml() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("DATA");
        ensure_dir(&data).unwrap();
        std::fs::write(data.join("readme.txt"), b"x").unwrap();

        let v = classify_structure(dir.path());
        assert_eq!(v.status, StructureStatus::Error);
        assert_eq!(v.error_code, Some(ErrorCode::StructZeroXml));
    }

    #[test]
    fn data_dirs_sort_shallowest_first() {
        let dir = tempfile::tempdir().unwrap();
        ensure_dir(&dir.path().join("deep/nested/DATA")).unwrap();
        ensure_dir(&dir.path().join("DATA")).unwrap();
        std::fs::write(dir.path().join("DATA/.keep"), b"").unwrap();

        let dirs = find_data_dirs(dir.path());
        assert_eq!(dirs.len(), 2);
        assert!(dirs[0].ends_with("DATA"));
        assert!(dirs[0].components().count() < dirs[1].components().count());
    }
}
