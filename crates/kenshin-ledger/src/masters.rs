//! Read-only dictionary access: `item_master` and `norm_variants`.
//!
//! These live in the master database and are pure lookups; nothing in
//! the pipeline ever writes them.

use std::collections::HashMap;

use sqlx::mysql::MySqlPool;

use kenshin_db::DbError;

/// One item-master row, keyed by `namecode`.
#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct ItemMasterRow {
    pub namecode: String,
    /// Declared value type: `ST` / `PQ` / `CD` / `CO`, or empty.
    pub xml_value_type: Option<String>,
    /// Dictionary OID for code-typed items.
    pub result_code_oid: Option<String>,
    /// Extraction hint: `""` / `@attr` / `text()` / `string()`.
    pub value_method: Option<String>,
    pub display_unit: Option<String>,
    pub ucum_unit: Option<String>,
}

/// Load the whole master into a map for the extraction walk.
pub async fn load_item_master_map(
    pool: &MySqlPool,
) -> Result<HashMap<String, ItemMasterRow>, DbError> {
    let rows = sqlx::query_as::<_, ItemMasterRow>(
        "SELECT namecode, xml_value_type, result_code_oid, value_method, \
                display_unit, ucum_unit \
         FROM item_master",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .filter(|r| !r.namecode.is_empty())
        .map(|r| (r.namecode.clone(), r))
        .collect())
}

/// Fetch one master row by `namecode`.
pub async fn get_master(
    pool: &MySqlPool,
    namecode: &str,
) -> Result<Option<ItemMasterRow>, DbError> {
    let row = sqlx::query_as::<_, ItemMasterRow>(
        "SELECT namecode, xml_value_type, result_code_oid, value_method, \
                display_unit, ucum_unit \
         FROM item_master WHERE namecode = ?",
    )
    .bind(namecode)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// A variant-dictionary hit.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VariantHit {
    pub normalized_code: String,
    pub code_system: Option<String>,
    pub display_name: Option<String>,
}

/// Exact-match dictionary lookup for a raw coded value.
///
/// Only active rows participate; canonical entries win, then lower
/// `priority`, then declaration order. No trimming, no tokenization:
/// the raw value matches verbatim or not at all.
pub async fn lookup_variant(
    pool: &MySqlPool,
    result_code_oid: &str,
    raw_value: &str,
) -> Result<Option<VariantHit>, DbError> {
    let row = sqlx::query_as::<_, VariantHit>(
        "SELECT normalized_code, code_system, display_name \
         FROM norm_variants \
         WHERE result_code_oid = ? \
           AND raw_value_utf8 = ? \
           AND is_active = 1 \
         ORDER BY is_canonical DESC, priority ASC, variant_id ASC \
         LIMIT 1",
    )
    .bind(result_code_oid)
    .bind(raw_value)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}
