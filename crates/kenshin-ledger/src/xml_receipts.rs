//! `xml_receipts` / `xml_receipt_runs` — one receipt per XML content hash,
//! with the secondary identity (`zip_sha256`, `zip_inner_path_sha256`).
//!
//! Status discipline: the inventory upsert never regresses an existing
//! status (`PENDING` from a re-import cannot clobber an earlier `OK`);
//! only the extract stage's explicit index update advances it.

use chrono::NaiveDateTime;
use sqlx::Row as _;
use sqlx::mysql::MySqlPool;
use sqlx::{Executor, MySql};

use kenshin_db::DbError;
use kenshin_db::catalog::Catalog;
use kenshin_db::upsert::{OnDuplicate, Param, UpdateBuilder, UpsertBuilder};
use kenshin_utils::clock::now_micro;
use kenshin_utils::text::shorten;

use crate::codes::{ReceiptAction, ReceiptStatus};
use crate::effective_limit;

const TABLE: &str = "xml_receipts";
const RUNS_TABLE: &str = "xml_receipt_runs";

/// Inventory-time upsert adapter for one XML member.
#[derive(Debug, Clone)]
pub struct XmlReceiptUpsert {
    pub zip_sha256: String,
    pub zip_inner_path: String,
    pub zip_inner_path_sha256: String,
    pub xml_sha256: String,
    pub file_size: Option<i64>,
    pub file_mtime: Option<NaiveDateTime>,
    pub status: ReceiptStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub facility_code: String,
    pub facility_name: String,
}

/// Upsert keyed by `xml_sha256`; returns `xml_receipt_id` on both paths.
pub async fn upsert_xml_receipt<'e, E>(
    executor: E,
    catalog: &Catalog,
    row: &XmlReceiptUpsert,
) -> Result<i64, DbError>
where
    E: Executor<'e, Database = MySql>,
{
    let has_inner_sha = catalog.has_column(TABLE, "zip_inner_path_sha256").await?;
    let has_error_message = catalog.has_column(TABLE, "error_message").await?;
    let now = now_micro();

    let mut builder = UpsertBuilder::new(TABLE)
        .id_column("xml_receipt_id")
        .col("xml_sha256", Param::Str(row.xml_sha256.clone()))
        .col("zip_sha256", Param::Str(row.zip_sha256.clone()))
        .col("zip_inner_path", Param::Str(row.zip_inner_path.clone()))
        .col_if(
            has_inner_sha,
            "zip_inner_path_sha256",
            Param::Str(row.zip_inner_path_sha256.clone()),
        )
        .col("file_size", Param::OptI64(row.file_size))
        .col("file_mtime", Param::OptDateTime(row.file_mtime))
        .col_with(
            "status",
            Param::Str(row.status.as_str().to_string()),
            OnDuplicate::KeepExisting,
        )
        .col_with(
            "error_code",
            Param::OptStr(row.error_code.clone()),
            OnDuplicate::KeepExisting,
        );
    if has_error_message {
        builder = builder.col_with(
            "error_message",
            Param::OptStr(row.error_message.as_deref().map(|m| shorten(m, 1000))),
            OnDuplicate::KeepExisting,
        );
    }
    let id = builder
        .col("facility_code", Param::Str(row.facility_code.clone()))
        .col("facility_name", Param::Str(row.facility_name.clone()))
        .col_with("first_seen_at", Param::DateTime(now), OnDuplicate::InsertOnly)
        .col("last_seen_at", Param::DateTime(now))
        .execute(executor)
        .await?;
    Ok(id as i64)
}

/// `xml_receipt_id` for a content hash, when the receipt exists.
pub async fn get_xml_receipt_id_by_sha(
    pool: &MySqlPool,
    xml_sha256: &str,
) -> Result<Option<i64>, DbError> {
    let row = sqlx::query("SELECT xml_receipt_id FROM xml_receipts WHERE xml_sha256 = ?")
        .bind(xml_sha256)
        .fetch_optional(pool)
        .await?;
    Ok(match row {
        Some(r) => Some(r.try_get::<i64, _>("xml_receipt_id")?),
        None => None,
    })
}

/// A receipt selected for per-XML extraction.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExtractTarget {
    pub xml_receipt_id: i64,
    pub xml_sha256: String,
    pub zip_sha256: String,
    pub zip_inner_path: String,
    pub zip_inner_path_sha256: Option<String>,
}

/// Receipts whose `status` matches the target, oldest first.
pub async fn select_extract_targets(
    pool: &MySqlPool,
    target_status: &str,
    limit: i64,
) -> Result<Vec<ExtractTarget>, DbError> {
    let rows = sqlx::query_as::<_, ExtractTarget>(
        "SELECT xml_receipt_id, xml_sha256, zip_sha256, \
                zip_inner_path, zip_inner_path_sha256 \
         FROM xml_receipts \
         WHERE status = ? \
         ORDER BY xml_receipt_id ASC LIMIT ?",
    )
    .bind(target_status)
    .bind(effective_limit(limit))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Explicit index update written by the extract stage.
#[derive(Debug, Clone)]
pub struct XmlIndexUpdate {
    pub xml_sha256: String,
    pub status: ReceiptStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub document_id: Option<String>,
    pub extracted_run_id: Option<i64>,
    /// Stamp `extracted_at` with the current wall clock.
    pub stamp_extracted_at: bool,
}

/// Apply an [`XmlIndexUpdate`] keyed by content hash.
pub async fn update_xml_index_fields<'e, E>(
    executor: E,
    catalog: &Catalog,
    update: &XmlIndexUpdate,
) -> Result<(), DbError>
where
    E: Executor<'e, Database = MySql>,
{
    let has_error_message = catalog.has_column(TABLE, "error_message").await?;
    let has_extracted_at = catalog.has_column(TABLE, "extracted_at").await?;

    UpdateBuilder::new(TABLE)
        .set("status", Param::Str(update.status.as_str().to_string()))
        .set("error_code", Param::OptStr(update.error_code.clone()))
        .set_if(
            has_error_message,
            "error_message",
            Param::OptStr(update.error_message.as_deref().map(|m| shorten(m, 1000))),
        )
        .set("document_id", Param::OptStr(update.document_id.clone()))
        .set("extracted_run_id", Param::OptI64(update.extracted_run_id))
        .set_now_if(
            has_extracted_at && update.stamp_extracted_at,
            "extracted_at",
        )
        .key("xml_sha256", Param::Str(update.xml_sha256.clone()))
        .execute(executor)
        .await?;
    Ok(())
}

/// A receipt selected for observation-value extraction: extracted OK and
/// not yet visited by the items stage.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ItemExtractTarget {
    pub xml_receipt_id: i64,
    pub xml_sha256: String,
    pub zip_sha256: String,
    pub zip_inner_path: String,
}

pub async fn select_item_extract_targets(
    pool: &MySqlPool,
    target_status: &str,
    limit: i64,
) -> Result<Vec<ItemExtractTarget>, DbError> {
    let rows = sqlx::query_as::<_, ItemExtractTarget>(
        "SELECT xml_receipt_id, xml_sha256, zip_sha256, zip_inner_path \
         FROM xml_receipts \
         WHERE status = ? \
           AND (items_extract_status IS NULL OR items_extract_status = '') \
         ORDER BY xml_receipt_id ASC LIMIT ?",
    )
    .bind(target_status)
    .bind(effective_limit(limit))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Record the items-stage outcome triple on a receipt.
pub async fn update_items_extract_fields<'e, E>(
    executor: E,
    catalog: &Catalog,
    xml_receipt_id: i64,
    items_extract_status: &str,
    items_extracted_run_id: i64,
) -> Result<(), DbError>
where
    E: Executor<'e, Database = MySql>,
{
    let has_at = catalog.has_column(TABLE, "items_extracted_at").await?;
    UpdateBuilder::new(TABLE)
        .set(
            "items_extract_status",
            Param::Str(items_extract_status.to_string()),
        )
        .set(
            "items_extracted_run_id",
            Param::I64(items_extracted_run_id),
        )
        .set_now_if(has_at, "items_extracted_at")
        .key("xml_receipt_id", Param::I64(xml_receipt_id))
        .execute(executor)
        .await?;
    Ok(())
}

/// Append the per-run observation event for an XML receipt.
pub async fn insert_xml_receipt_run<'e, E>(
    executor: E,
    catalog: &Catalog,
    run_id: i64,
    xml_sha256: &str,
    xml_receipt_id: Option<i64>,
    action: ReceiptAction,
    message: Option<&str>,
) -> Result<(), DbError>
where
    E: Executor<'e, Database = MySql>,
{
    let action = catalog
        .guard_enum(RUNS_TABLE, "action", action.as_str())
        .await?;
    // The FK to xml_receipts arrived late in the schema's life; bind it
    // only where the column exists.
    let has_receipt_id = catalog.has_column(RUNS_TABLE, "xml_receipt_id").await?;
    let has_created_at = catalog.has_column(RUNS_TABLE, "created_at").await?;

    let mut cols = String::from("run_id, xml_sha256, action, message");
    let mut marks = String::from("?, ?, ?, ?");
    if has_receipt_id {
        cols.push_str(", xml_receipt_id");
        marks.push_str(", ?");
    }
    if has_created_at {
        cols.push_str(", created_at");
        marks.push_str(", ?");
    }
    let sql = format!("INSERT INTO xml_receipt_runs ({cols}) VALUES ({marks})");

    let mut q = sqlx::query(&sql)
        .bind(run_id)
        .bind(xml_sha256)
        .bind(action)
        .bind(message.map(|m| shorten(m, 1500)));
    if has_receipt_id {
        q = q.bind(xml_receipt_id);
    }
    if has_created_at {
        q = q.bind(now_micro());
    }
    q.execute(executor).await?;
    Ok(())
}
