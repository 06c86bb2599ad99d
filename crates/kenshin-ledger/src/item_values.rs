//! `xml_item_values` and its normalization projection
//! `exam_result_item_values`.
//!
//! The raw table holds everything the observation walk produced, keyed by
//! (`xml_sha256`, `namecode`, `occurrence_no`). The projection carries
//! the same key plus the normalization triple; extraction seeds it with
//! `normalize_status='RAW'` and the normalize stage owns the rest.

use sqlx::mysql::MySqlPool;
use sqlx::{Executor, MySql};

use kenshin_db::DbError;
use kenshin_db::catalog::Catalog;
use kenshin_db::upsert::{OnDuplicate, Param, UpsertBuilder};
use kenshin_utils::clock::now_micro;
use kenshin_utils::text::shorten;

use crate::codes::NormalizeStatus;
use crate::effective_limit;

const RAW_TABLE: &str = "xml_item_values";

/// Upsert adapter for one observed value.
#[derive(Debug, Clone)]
pub struct XmlItemValueUpsert {
    pub xml_sha256: String,
    pub zip_sha256: String,
    pub zip_inner_path: String,
    pub zip_inner_path_sha256: String,
    pub namecode: String,
    pub occurrence_no: i64,
    pub value_raw: Option<String>,
    pub value_type: Option<String>,
    pub unit: Option<String>,
    pub code_system: Option<String>,
    pub code_value: Option<String>,
    pub code_display: Option<String>,
    pub extracted_run_id: i64,
}

/// Upsert one raw observation row; returns `xml_item_value_id`.
pub async fn upsert_xml_item_value<'e, E>(
    executor: E,
    catalog: &Catalog,
    row: &XmlItemValueUpsert,
) -> Result<i64, DbError>
where
    E: Executor<'e, Database = MySql>,
{
    let has_inner_sha = catalog
        .has_column(RAW_TABLE, "zip_inner_path_sha256")
        .await?;

    let id = UpsertBuilder::new(RAW_TABLE)
        .id_column("xml_item_value_id")
        .col("xml_sha256", Param::Str(row.xml_sha256.clone()))
        .col("zip_sha256", Param::Str(row.zip_sha256.clone()))
        .col("zip_inner_path", Param::Str(row.zip_inner_path.clone()))
        .col_if(
            has_inner_sha,
            "zip_inner_path_sha256",
            Param::Str(row.zip_inner_path_sha256.clone()),
        )
        .col("namecode", Param::Str(row.namecode.clone()))
        .col("occurrence_no", Param::I64(row.occurrence_no))
        .col("value_raw", Param::OptStr(row.value_raw.clone()))
        .col("value_type", Param::OptStr(row.value_type.clone()))
        .col("unit", Param::OptStr(row.unit.clone()))
        .col("code_system", Param::OptStr(row.code_system.clone()))
        .col("code_value", Param::OptStr(row.code_value.clone()))
        .col("code_display", Param::OptStr(row.code_display.clone()))
        .col("extracted_run_id", Param::I64(row.extracted_run_id))
        .execute(executor)
        .await?;
    Ok(id as i64)
}

/// Seed (or refresh the raw side of) the normalization projection.
///
/// `normalize_status` is insert-only: a re-extract never resets a row
/// the normalize stage already settled.
pub async fn upsert_exam_result_item_value<'e, E>(
    executor: E,
    xml_sha256: &str,
    namecode: &str,
    occurrence_no: i64,
    raw_value: Option<&str>,
) -> Result<i64, DbError>
where
    E: Executor<'e, Database = MySql>,
{
    let id = UpsertBuilder::new("exam_result_item_values")
        .id_column("item_value_id")
        .col("xml_sha256", Param::Str(xml_sha256.to_string()))
        .col("namecode", Param::Str(namecode.to_string()))
        .col("occurrence_no", Param::I64(occurrence_no))
        .col("raw_value", Param::OptStr(raw_value.map(str::to_string)))
        .col_with(
            "normalize_status",
            Param::Str(NormalizeStatus::Raw.as_str().to_string()),
            OnDuplicate::InsertOnly,
        )
        .execute(executor)
        .await?;
    Ok(id as i64)
}

/// A projection row still awaiting normalization.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NormalizeTarget {
    pub item_value_id: i64,
    pub namecode: String,
    pub raw_value: Option<String>,
}

/// Rows with `normalize_status='RAW'` and no committed value yet.
pub async fn select_normalize_targets(
    pool: &MySqlPool,
    limit: i64,
) -> Result<Vec<NormalizeTarget>, DbError> {
    let rows = sqlx::query_as::<_, NormalizeTarget>(
        "SELECT item_value_id, namecode, raw_value \
         FROM exam_result_item_values \
         WHERE normalize_status = 'RAW' AND (value IS NULL OR value = '') \
         ORDER BY item_value_id ASC LIMIT ?",
    )
    .bind(effective_limit(limit))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Commit a normalized value.
pub async fn update_normalize_ok<'e, E>(
    executor: E,
    item_value_id: i64,
    value: &str,
) -> Result<(), DbError>
where
    E: Executor<'e, Database = MySql>,
{
    sqlx::query(
        "UPDATE exam_result_item_values \
         SET value = ?, normalize_status = 'OK', normalized_at = ?, normalize_error = NULL \
         WHERE item_value_id = ?",
    )
    .bind(value)
    .bind(now_micro())
    .bind(item_value_id)
    .execute(executor)
    .await?;
    Ok(())
}

/// Record a normalization failure with its precise reason; `value`
/// stays NULL.
pub async fn update_normalize_error<'e, E>(
    executor: E,
    item_value_id: i64,
    message: &str,
) -> Result<(), DbError>
where
    E: Executor<'e, Database = MySql>,
{
    sqlx::query(
        "UPDATE exam_result_item_values \
         SET normalize_status = 'ERROR', normalized_at = ?, normalize_error = ? \
         WHERE item_value_id = ?",
    )
    .bind(now_micro())
    .bind(shorten(message, 1000))
    .bind(item_value_id)
    .execute(executor)
    .await?;
    Ok(())
}
