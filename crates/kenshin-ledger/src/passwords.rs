//! `zip_passwords` — password candidate resolution.
//!
//! Scope precedence is encoded in SQL so the database orders candidates:
//! `ZIP_SHA256` (10) beats `ZIP_NAME` (20) beats `FACILITY` (30); within
//! a scope, `priority ASC`, then `zip_password_id ASC`. The facility
//! scope matches on either the facility code or the folder name so a
//! folder without a code portion still resolves.

use sqlx::Row as _;
use sqlx::mysql::MySqlPool;

use kenshin_db::DbError;

/// Lookup key for one archive.
#[derive(Debug, Clone, Default)]
pub struct PasswordScope<'a> {
    pub facility_code: &'a str,
    pub facility_folder_name: &'a str,
    pub zip_name: &'a str,
    pub zip_sha256: &'a str,
}

/// Priority-ordered, de-duplicated plaintext candidates. Blank and
/// inactive entries are excluded; an empty result means callers should
/// attempt "no password" only.
pub async fn get_password_candidates(
    pool: &MySqlPool,
    scope: &PasswordScope<'_>,
) -> Result<Vec<String>, DbError> {
    let rows = sqlx::query(
        "SELECT password_text \
         FROM zip_passwords \
         WHERE is_active = 1 \
           AND ( \
             (scope_type = 'ZIP_SHA256' AND zip_sha256 = ?) \
             OR (scope_type = 'ZIP_NAME' AND zip_name = ?) \
             OR (scope_type = 'FACILITY' \
                 AND (facility_code = ? OR facility_folder_name = ?)) \
           ) \
         ORDER BY \
           CASE scope_type \
             WHEN 'ZIP_SHA256' THEN 10 \
             WHEN 'ZIP_NAME' THEN 20 \
             WHEN 'FACILITY' THEN 30 \
             ELSE 99 \
           END, \
           priority ASC, \
           zip_password_id ASC",
    )
    .bind(scope.zip_sha256)
    .bind(scope.zip_name)
    .bind(scope.facility_code)
    .bind(scope.facility_folder_name)
    .fetch_all(pool)
    .await?;

    let mut out: Vec<String> = Vec::new();
    for row in rows {
        let pw: Option<String> = row.try_get("password_text")?;
        let Some(pw) = pw else { continue };
        let pw = pw.trim();
        if pw.is_empty() || out.iter().any(|seen| seen == pw) {
            continue;
        }
        out.push(pw.to_string());
    }
    Ok(out)
}
