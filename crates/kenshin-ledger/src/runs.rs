//! `import_runs` lifecycle.
//!
//! A run row brackets one stage invocation. The row is committed on its
//! own (autocommit) connection so it survives even when per-row data
//! writes are rolled back.

use sqlx::Row as _;
use sqlx::mysql::MySqlPool;

use kenshin_db::DbError;
use kenshin_utils::clock::now_micro;
use kenshin_utils::text::clip;

/// Open a run and return its id.
pub async fn insert_run(
    pool: &MySqlPool,
    input_root: &str,
    note: Option<&str>,
) -> Result<i64, DbError> {
    let result = sqlx::query(
        "INSERT INTO import_runs (started_at, input_root, note) VALUES (?, ?, ?)",
    )
    .bind(now_micro())
    .bind(input_root)
    .bind(note.map(|n| clip(n, 1024)))
    .execute(pool)
    .await?;
    Ok(result.last_insert_id() as i64)
}

/// Close a run with its single-line summary note.
pub async fn finish_run(pool: &MySqlPool, run_id: i64, note: &str) -> Result<(), DbError> {
    sqlx::query("UPDATE import_runs SET finished_at = ?, note = ? WHERE run_id = ?")
        .bind(now_micro())
        .bind(clip(note, 2000))
        .bind(run_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Whether a run id exists (used when a stage attaches to an existing run).
pub async fn run_exists(pool: &MySqlPool, run_id: i64) -> Result<bool, DbError> {
    let row = sqlx::query("SELECT 1 AS ok FROM import_runs WHERE run_id = ?")
        .bind(run_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.try_get::<i64, _>("ok").unwrap_or(0) == 1).unwrap_or(false))
}
