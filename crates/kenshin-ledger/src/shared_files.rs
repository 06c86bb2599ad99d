//! `shared_files` — the observation ledger for the shared filesystem.
//!
//! One row per observed path, keyed by `path_hash` = SHA-1(path).
//! Column ownership: the scan stage owns the descriptive columns, the
//! hash stage owns `sha256`, the probe/judge stages own the
//! `zip_has_xml`/`auto_judgement` block, the copy stage owns
//! `stage_status`. `manual_judgement` belongs to human operators and is
//! never overwritten by any writer here.

use chrono::NaiveDateTime;
use sqlx::mysql::MySqlPool;
use sqlx::{Executor, MySql};

use kenshin_db::DbError;
use kenshin_db::catalog::Catalog;
use kenshin_db::upsert::{OnDuplicate, Param, UpdateBuilder, UpsertBuilder};
use kenshin_utils::hash::sha1_text;
use kenshin_utils::text::clip;

use crate::codes::{AutoJudgement, StageStatus};
use crate::effective_limit;

const TABLE: &str = "shared_files";

/// Scan-stage upsert adapter. One instance per observed file.
#[derive(Debug, Clone)]
pub struct SharedFileRow {
    pub path: String,
    pub src_folder_raw: Option<String>,
    pub facility_hint: Option<String>,
    pub file_name: String,
    pub ext: String,
    pub file_size: i64,
    pub mtime: Option<NaiveDateTime>,
    pub sha256: Option<String>,
    pub auto_judgement: AutoJudgement,
    pub stage_status: StageStatus,
    pub note: Option<String>,
    pub first_seen_at: NaiveDateTime,
    pub last_seen_at: NaiveDateTime,
}

/// Upsert one observation keyed by `path_hash`.
///
/// Re-scan semantics: `first_seen_at` is insert-only, `sha256` is never
/// clobbered with NULL, `manual_judgement` is never touched (the row
/// adapter cannot even carry one).
pub async fn upsert_shared_file<'e, E>(
    executor: E,
    catalog: &Catalog,
    row: &SharedFileRow,
) -> Result<i64, DbError>
where
    E: Executor<'e, Database = MySql>,
{
    let has_facility_hint = catalog.has_column(TABLE, "facility_hint").await?;

    let id = UpsertBuilder::new(TABLE)
        .id_column("shared_file_id")
        .col("path_hash", Param::Str(sha1_text(&row.path)))
        .col("path", Param::Str(row.path.clone()))
        .col("src_folder_raw", Param::OptStr(row.src_folder_raw.clone()))
        .col_if(
            has_facility_hint,
            "facility_hint",
            Param::OptStr(row.facility_hint.clone()),
        )
        .col("file_name", Param::Str(row.file_name.clone()))
        .col("ext", Param::Str(row.ext.clone()))
        .col("file_size", Param::I64(row.file_size))
        .col("mtime", Param::OptDateTime(row.mtime))
        .col_with(
            "sha256",
            Param::OptStr(row.sha256.clone()),
            OnDuplicate::CoalesceNew,
        )
        .col("auto_judgement", Param::Str(row.auto_judgement.as_str().to_string()))
        .col("stage_status", Param::Str(row.stage_status.as_str().to_string()))
        .col(
            "note",
            Param::OptStr(row.note.as_deref().map(|n| clip(n, 1024))),
        )
        .col_with(
            "first_seen_at",
            Param::DateTime(row.first_seen_at),
            OnDuplicate::InsertOnly,
        )
        .col("last_seen_at", Param::DateTime(row.last_seen_at))
        .execute(executor)
        .await?;
    Ok(id as i64)
}

/// A row awaiting its content hash.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HashTarget {
    pub shared_file_id: i64,
    pub path: String,
}

/// Rows with `ext='zip'` and no `sha256` yet, oldest first.
pub async fn select_for_hash(
    pool: &MySqlPool,
    limit: i64,
    only_stage: Option<&str>,
) -> Result<Vec<HashTarget>, DbError> {
    let rows = match only_stage {
        Some(stage) => {
            sqlx::query_as::<_, HashTarget>(
                "SELECT shared_file_id, path FROM shared_files \
                 WHERE ext = 'zip' AND (sha256 IS NULL OR sha256 = '') \
                   AND stage_status = ? \
                 ORDER BY first_seen_at ASC, shared_file_id ASC LIMIT ?",
            )
            .bind(stage)
            .bind(effective_limit(limit))
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, HashTarget>(
                "SELECT shared_file_id, path FROM shared_files \
                 WHERE ext = 'zip' AND (sha256 IS NULL OR sha256 = '') \
                 ORDER BY first_seen_at ASC, shared_file_id ASC LIMIT ?",
            )
            .bind(effective_limit(limit))
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows)
}

/// Record a freshly computed content hash.
pub async fn update_sha256<'e, E>(
    executor: E,
    catalog: &Catalog,
    shared_file_id: i64,
    sha256: &str,
) -> Result<(), DbError>
where
    E: Executor<'e, Database = MySql>,
{
    let has_updated_at = catalog.has_column(TABLE, "updated_at").await?;
    UpdateBuilder::new(TABLE)
        .set("sha256", Param::Str(sha256.to_string()))
        .set_now_if(has_updated_at, "updated_at")
        .key("shared_file_id", Param::I64(shared_file_id))
        .execute(executor)
        .await?;
    Ok(())
}

/// Record why a row could not be hashed; `sha256` stays NULL so the next
/// run retries it.
pub async fn update_note<'e, E>(
    executor: E,
    catalog: &Catalog,
    shared_file_id: i64,
    note: &str,
) -> Result<(), DbError>
where
    E: Executor<'e, Database = MySql>,
{
    let has_updated_at = catalog.has_column(TABLE, "updated_at").await?;
    UpdateBuilder::new(TABLE)
        .set("note", Param::Str(clip(note, 1024)))
        .set_now_if(has_updated_at, "updated_at")
        .key("shared_file_id", Param::I64(shared_file_id))
        .execute(executor)
        .await?;
    Ok(())
}

/// A judged candidate: zip with a hash, no manual override.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JudgeTarget {
    pub shared_file_id: i64,
    pub path: String,
    pub file_name: String,
    pub zip_has_xml: Option<i64>,
    pub zip_xml_count: Option<i64>,
}

/// Rows eligible for auto-judgement. Manual judgements are excluded in
/// SQL: the judge must never even see an operator-owned row.
pub async fn select_for_judge(
    pool: &MySqlPool,
    limit: i64,
    only_stage: &str,
) -> Result<Vec<JudgeTarget>, DbError> {
    let rows = sqlx::query_as::<_, JudgeTarget>(
        "SELECT shared_file_id, path, file_name, zip_has_xml, zip_xml_count \
         FROM shared_files \
         WHERE ext = 'zip' AND stage_status = ? \
           AND (sha256 IS NOT NULL AND sha256 <> '') \
           AND manual_judgement IS NULL \
         ORDER BY first_seen_at ASC, shared_file_id ASC LIMIT ?",
    )
    .bind(only_stage)
    .bind(effective_limit(limit))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Rows whose archives have never been probed for XML members.
pub async fn select_for_probe(pool: &MySqlPool, limit: i64) -> Result<Vec<JudgeTarget>, DbError> {
    let rows = sqlx::query_as::<_, JudgeTarget>(
        "SELECT shared_file_id, path, file_name, zip_has_xml, zip_xml_count \
         FROM shared_files \
         WHERE ext = 'zip' AND zip_has_xml IS NULL \
         ORDER BY first_seen_at ASC, shared_file_id ASC LIMIT ?",
    )
    .bind(effective_limit(limit))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Persist a probe result; `zip_xml_checked_at` is always stamped, the
/// note only replaces an existing one when the probe produced one.
pub async fn update_zip_probe<'e, E>(
    executor: E,
    catalog: &Catalog,
    shared_file_id: i64,
    zip_has_xml: Option<bool>,
    zip_xml_count: Option<i64>,
    note: Option<&str>,
) -> Result<(), DbError>
where
    E: Executor<'e, Database = MySql>,
{
    let has_updated_at = catalog.has_column(TABLE, "updated_at").await?;
    UpdateBuilder::new(TABLE)
        .set("zip_has_xml", Param::OptI64(zip_has_xml.map(i64::from)))
        .set("zip_xml_count", Param::OptI64(zip_xml_count))
        .set_now("zip_xml_checked_at")
        .set_coalesce("note", Param::OptStr(note.map(|n| clip(n, 1024))))
        .set_now_if(has_updated_at, "updated_at")
        .key("shared_file_id", Param::I64(shared_file_id))
        .execute(executor)
        .await?;
    Ok(())
}

/// Overwrite the automatic judgement. Callers must have excluded rows
/// with a manual judgement (see [`select_for_judge`]).
pub async fn update_auto_judgement<'e, E>(
    executor: E,
    catalog: &Catalog,
    shared_file_id: i64,
    judgement: AutoJudgement,
    note: Option<&str>,
) -> Result<(), DbError>
where
    E: Executor<'e, Database = MySql>,
{
    let has_updated_at = catalog.has_column(TABLE, "updated_at").await?;
    UpdateBuilder::new(TABLE)
        .set("auto_judgement", Param::Str(judgement.as_str().to_string()))
        .set("note", Param::OptStr(note.map(|n| clip(n, 1024))))
        .set_now_if(has_updated_at, "updated_at")
        .key("shared_file_id", Param::I64(shared_file_id))
        .execute(executor)
        .await?;
    Ok(())
}

/// Transition `stage_status`, optionally replacing the note.
pub async fn mark_stage_status<'e, E>(
    executor: E,
    catalog: &Catalog,
    shared_file_id: i64,
    status: StageStatus,
    note: Option<&str>,
) -> Result<(), DbError>
where
    E: Executor<'e, Database = MySql>,
{
    let has_updated_at = catalog.has_column(TABLE, "updated_at").await?;
    UpdateBuilder::new(TABLE)
        .set("stage_status", Param::Str(status.as_str().to_string()))
        .set_coalesce("note", Param::OptStr(note.map(|n| clip(n, 1024))))
        .set_now_if(has_updated_at, "updated_at")
        .key("shared_file_id", Param::I64(shared_file_id))
        .execute(executor)
        .await?;
    Ok(())
}

/// A row that satisfies every copy precondition.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CopyTarget {
    pub shared_file_id: i64,
    pub path: String,
    pub file_name: String,
    pub sha256: String,
    pub src_folder_raw: Option<String>,
    pub dst_folder_norm: String,
}

/// Rows eligible for Stage-Copy. Every precondition is in SQL so the
/// stage body only handles filesystem facts:
/// NEW zips with a hash, judged KENSHIN (manual wins via COALESCE),
/// probe-confirmed XML content, an active alias with a destination, and
/// no ZIP receipt yet.
pub async fn select_copy_targets(pool: &MySqlPool, limit: i64) -> Result<Vec<CopyTarget>, DbError> {
    let rows = sqlx::query_as::<_, CopyTarget>(
        "SELECT \
           sf.shared_file_id, sf.path, sf.file_name, sf.sha256, \
           sf.src_folder_raw, a.dst_folder_norm \
         FROM shared_files sf \
         JOIN shared_folder_aliases a \
           ON a.is_active = 1 AND a.src_folder_raw = sf.src_folder_raw \
         LEFT JOIN zip_receipts zr ON zr.zip_sha256 = sf.sha256 \
         WHERE sf.stage_status = 'NEW' \
           AND sf.ext = 'zip' \
           AND sf.sha256 IS NOT NULL AND sf.sha256 <> '' \
           AND COALESCE(sf.manual_judgement, sf.auto_judgement) = 'KENSHIN' \
           AND sf.zip_has_xml = 1 \
           AND a.dst_folder_norm IS NOT NULL AND a.dst_folder_norm <> '' \
           AND zr.zip_receipt_id IS NULL \
         ORDER BY sf.first_seen_at ASC, sf.shared_file_id ASC \
         LIMIT ?",
    )
    .bind(effective_limit(limit))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
