//! `zip_receipts` / `zip_receipt_runs` — one receipt per ZIP content hash.

use sqlx::Row as _;
use sqlx::mysql::MySqlPool;
use sqlx::{Executor, MySql};

use kenshin_db::DbError;
use kenshin_db::catalog::Catalog;
use kenshin_db::upsert::{OnDuplicate, Param, UpsertBuilder};
use kenshin_utils::clock::now_micro;
use kenshin_utils::text::shorten;

use crate::codes::{ReceiptAction, StructureStatus};

const TABLE: &str = "zip_receipts";
const RUNS_TABLE: &str = "zip_receipt_runs";

/// Upsert adapter for one imported ZIP.
#[derive(Debug, Clone)]
pub struct ZipReceiptUpsert {
    pub run_id: i64,
    pub facility_folder_name: String,
    pub facility_code: String,
    pub facility_name: String,
    pub zip_name: String,
    pub zip_path: String,
    pub zip_sha256: String,
    pub structure_status: StructureStatus,
    pub structure_message: Option<String>,
    pub data_dir_count: Option<i64>,
    pub data_xml_count: Option<i64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// Upsert keyed by `zip_sha256`; returns `zip_receipt_id` on both paths.
///
/// `first_seen_run_id`/`first_seen_at` stick to the run that first
/// observed the content; the `last_seen_*` pair always advances.
pub async fn upsert_zip_receipt<'e, E>(
    executor: E,
    catalog: &Catalog,
    row: &ZipReceiptUpsert,
) -> Result<i64, DbError>
where
    E: Executor<'e, Database = MySql>,
{
    let has_error_message = catalog.has_column(TABLE, "error_message").await?;
    let now = now_micro();

    let id = UpsertBuilder::new(TABLE)
        .id_column("zip_receipt_id")
        .col("zip_sha256", Param::Str(row.zip_sha256.clone()))
        .col("zip_path", Param::Str(row.zip_path.clone()))
        .col("zip_name", Param::Str(row.zip_name.clone()))
        .col(
            "facility_folder_name",
            Param::Str(row.facility_folder_name.clone()),
        )
        .col("facility_code", Param::Str(row.facility_code.clone()))
        .col("facility_name", Param::Str(row.facility_name.clone()))
        .col(
            "structure_status",
            Param::Str(row.structure_status.as_str().to_string()),
        )
        .col(
            "structure_message",
            Param::OptStr(row.structure_message.as_deref().map(|m| shorten(m, 2000))),
        )
        .col("data_dir_count", Param::OptI64(row.data_dir_count))
        .col("data_xml_count", Param::OptI64(row.data_xml_count))
        .col("error_code", Param::OptStr(row.error_code.clone()))
        .col_if(
            has_error_message,
            "error_message",
            Param::OptStr(row.error_message.as_deref().map(|m| shorten(m, 2000))),
        )
        .col_with(
            "first_seen_run_id",
            Param::I64(row.run_id),
            OnDuplicate::InsertOnly,
        )
        .col("last_seen_run_id", Param::I64(row.run_id))
        .col_with("first_seen_at", Param::DateTime(now), OnDuplicate::InsertOnly)
        .col("last_seen_at", Param::DateTime(now))
        .execute(executor)
        .await?;
    Ok(id as i64)
}

/// `zip_receipt_id` for a content hash, when the receipt exists.
pub async fn get_zip_receipt_id_by_sha(
    pool: &MySqlPool,
    zip_sha256: &str,
) -> Result<Option<i64>, DbError> {
    let row = sqlx::query("SELECT zip_receipt_id FROM zip_receipts WHERE zip_sha256 = ?")
        .bind(zip_sha256)
        .fetch_optional(pool)
        .await?;
    Ok(match row {
        Some(r) => Some(r.try_get::<i64, _>("zip_receipt_id")?),
        None => None,
    })
}

/// The receipt columns the extract stages need to reopen the archive.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ZipReceiptRow {
    pub zip_receipt_id: i64,
    pub zip_path: String,
    pub zip_name: String,
    pub facility_folder_name: Option<String>,
    pub facility_code: Option<String>,
    pub facility_name: Option<String>,
}

/// Fetch the reopen view of a receipt by content hash.
pub async fn get_zip_receipt_row_by_sha(
    pool: &MySqlPool,
    zip_sha256: &str,
) -> Result<Option<ZipReceiptRow>, DbError> {
    let row = sqlx::query_as::<_, ZipReceiptRow>(
        "SELECT zip_receipt_id, zip_path, zip_name, \
                facility_folder_name, facility_code, facility_name \
         FROM zip_receipts WHERE zip_sha256 = ?",
    )
    .bind(zip_sha256)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Append the per-run observation event for a ZIP receipt.
pub async fn insert_zip_receipt_run<'e, E>(
    executor: E,
    catalog: &Catalog,
    run_id: i64,
    zip_receipt_id: i64,
    zip_sha256: &str,
    action: ReceiptAction,
    message: Option<&str>,
) -> Result<(), DbError>
where
    E: Executor<'e, Database = MySql>,
{
    let action = catalog
        .guard_enum(RUNS_TABLE, "action", action.as_str())
        .await?;
    let has_seen_at = catalog.has_column(RUNS_TABLE, "seen_at").await?;

    let mut sql = String::from(
        "INSERT INTO zip_receipt_runs (run_id, zip_receipt_id, zip_sha256, action, message",
    );
    sql.push_str(if has_seen_at { ", seen_at)" } else { ")" });
    sql.push_str(" VALUES (?, ?, ?, ?, ?");
    sql.push_str(if has_seen_at { ", ?)" } else { ")" });

    let mut q = sqlx::query(&sql)
        .bind(run_id)
        .bind(zip_receipt_id)
        .bind(zip_sha256)
        .bind(action)
        .bind(message.map(|m| shorten(m, 1500)));
    if has_seen_at {
        q = q.bind(now_micro());
    }
    q.execute(executor).await?;
    Ok(())
}
