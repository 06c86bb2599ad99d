//! Per-XML, per-step process log.
//!
//! `step` and `result` are ENUM columns in most deployments and the
//! member lists differ between them; both values pass through the enum
//! guard so a new step name can never abort a run (unknown members are
//! remapped to `OTHER` / `UNKNOWN` / the first declared member).

use sqlx::mysql::MySqlPool;

use kenshin_db::DbError;
use kenshin_db::catalog::Catalog;
use kenshin_utils::clock::now_micro;
use kenshin_utils::text::shorten;

use crate::codes::{Step, StepResult};

const TABLE: &str = "xml_process_logs";

/// Insert one step event. Committed on the caller's autocommit
/// connection so the log survives a rollback of the row's data writes.
pub async fn insert_process_log(
    pool: &MySqlPool,
    catalog: &Catalog,
    run_id: i64,
    xml_sha256: &str,
    step: Step,
    result: StepResult,
    message: Option<&str>,
) -> Result<(), DbError> {
    insert_process_log_raw(
        pool,
        catalog,
        run_id,
        xml_sha256,
        step.as_str(),
        result.as_str(),
        message,
    )
    .await
}

/// As [`insert_process_log`] but with free-form step/result spellings.
/// Exists so callers with vocabulary the ledger does not know yet still
/// get their event recorded (the guard remaps as needed).
pub async fn insert_process_log_raw(
    pool: &MySqlPool,
    catalog: &Catalog,
    run_id: i64,
    xml_sha256: &str,
    step: &str,
    result: &str,
    message: Option<&str>,
) -> Result<(), DbError> {
    let step = catalog.guard_enum(TABLE, "step", step).await?;
    let result = catalog.guard_enum(TABLE, "result", result).await?;
    let has_processed_at = catalog.has_column(TABLE, "processed_at").await?;

    let mut sql = String::from(
        "INSERT INTO xml_process_logs (run_id, xml_sha256, step, result, message",
    );
    sql.push_str(if has_processed_at { ", processed_at)" } else { ")" });
    sql.push_str(" VALUES (?, ?, ?, ?, ?");
    sql.push_str(if has_processed_at { ", ?)" } else { ")" });

    let mut q = sqlx::query(&sql)
        .bind(run_id)
        .bind(xml_sha256)
        .bind(step)
        .bind(result)
        .bind(message.map(|m| shorten(m, 1500)));
    if has_processed_at {
        q = q.bind(now_micro());
    }
    q.execute(pool).await?;
    Ok(())
}
