//! `information_schema` catalog with process-lifetime caching.
//!
//! Answers are immutable after first read: the pipeline never issues DDL,
//! so a column set or enum member list observed once holds for the rest
//! of the process.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use sqlx::Row as _;
use sqlx::mysql::MySqlPool;

use crate::DbError;

/// Cached view of the current database's columns and enum types.
pub struct Catalog {
    pool: MySqlPool,
    columns: Mutex<HashMap<String, Arc<HashSet<String>>>>,
    enums: Mutex<HashMap<(String, String), Option<Vec<String>>>>,
}

impl Catalog {
    #[must_use]
    pub fn new(pool: MySqlPool) -> Self {
        Self {
            pool,
            columns: Mutex::new(HashMap::new()),
            enums: Mutex::new(HashMap::new()),
        }
    }

    /// Column names of `table` in the connected schema.
    ///
    /// An unknown table yields an empty set rather than an error: the
    /// writers then skip every optional column and the mandatory-column
    /// insert fails with a precise SQL error instead of a lookup panic.
    pub async fn table_columns(&self, table: &str) -> Result<Arc<HashSet<String>>, DbError> {
        if let Some(cols) = self.columns.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(table) {
            return Ok(Arc::clone(cols));
        }

        let rows = sqlx::query(
            "SELECT COLUMN_NAME FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let mut set = HashSet::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("COLUMN_NAME")?;
            set.insert(name);
        }
        let set = Arc::new(set);
        self.columns
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(table.to_string(), Arc::clone(&set));
        Ok(set)
    }

    /// Whether `table.column` exists in the connected schema.
    pub async fn has_column(&self, table: &str, column: &str) -> Result<bool, DbError> {
        Ok(self.table_columns(table).await?.contains(column))
    }

    /// Declared members of an `ENUM` column, in declaration order.
    /// `None` when the column is missing or not an enum.
    pub async fn enum_members(
        &self,
        table: &str,
        column: &str,
    ) -> Result<Option<Vec<String>>, DbError> {
        let key = (table.to_string(), column.to_string());
        if let Some(members) = self.enums.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(&key) {
            return Ok(members.clone());
        }

        let row = sqlx::query(
            "SELECT COLUMN_TYPE FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND COLUMN_NAME = ?",
        )
        .bind(table)
        .bind(column)
        .fetch_optional(&self.pool)
        .await?;

        let members = match row {
            Some(r) => {
                let column_type: String = r.try_get("COLUMN_TYPE")?;
                parse_enum_literals(&column_type)
            }
            None => None,
        };
        self.enums
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key, members.clone());
        Ok(members)
    }

    /// Substitute `value` so the insert cannot fail on an enum column.
    ///
    /// Unknown values fall back to `OTHER`, then `UNKNOWN`, then the
    /// first declared member. Non-enum columns pass the value through.
    pub async fn guard_enum(
        &self,
        table: &str,
        column: &str,
        value: &str,
    ) -> Result<String, DbError> {
        match self.enum_members(table, column).await? {
            Some(members) => Ok(guard_enum_value(&members, value)),
            None => Ok(value.to_string()),
        }
    }
}

/// Parse the member list out of a `COLUMN_TYPE` like
/// `enum('OK','SKIP','ERROR')`. Returns `None` for non-enum types.
#[must_use]
pub fn parse_enum_literals(column_type: &str) -> Option<Vec<String>> {
    let t = column_type.trim();
    let lower = t.to_ascii_lowercase();
    let body = lower
        .starts_with("enum(")
        .then(|| t.get(5..t.rfind(')')?))??;

    let mut members = Vec::new();
    let mut cur = String::new();
    let mut in_quote = false;
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quote {
            if c == '\'' {
                // '' is an escaped quote inside a literal
                if chars.peek() == Some(&'\'') {
                    cur.push('\'');
                    chars.next();
                } else {
                    in_quote = false;
                    members.push(std::mem::take(&mut cur));
                }
            } else {
                cur.push(c);
            }
        } else if c == '\'' {
            in_quote = true;
        }
    }
    if in_quote {
        return None;
    }
    Some(members)
}

/// Pick a safe value for an enum column: the value itself when declared,
/// else `OTHER`, else `UNKNOWN`, else the first declared member.
#[must_use]
pub fn guard_enum_value(members: &[String], value: &str) -> String {
    if members.iter().any(|m| m == value) {
        return value.to_string();
    }
    for fallback in ["OTHER", "UNKNOWN"] {
        if members.iter().any(|m| m == fallback) {
            return fallback.to_string();
        }
    }
    members.first().cloned().unwrap_or_else(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_enum_basic() {
        assert_eq!(
            parse_enum_literals("enum('OK','SKIP','ERROR')"),
            Some(vec!["OK".into(), "SKIP".into(), "ERROR".into()])
        );
    }

    #[test]
    fn parse_enum_with_escaped_quote() {
        assert_eq!(
            parse_enum_literals("enum('A''B','C')"),
            Some(vec!["A'B".into(), "C".into()])
        );
    }

    #[test]
    fn parse_enum_rejects_non_enum() {
        assert_eq!(parse_enum_literals("varchar(32)"), None);
        assert_eq!(parse_enum_literals("int"), None);
    }

    #[test]
    fn parse_enum_case_insensitive_keyword() {
        assert_eq!(
            parse_enum_literals("ENUM('X')"),
            Some(vec!["X".to_string()])
        );
    }

    #[test]
    fn guard_prefers_declared_value() {
        let members = vec!["WELLFORMED".to_string(), "OTHER".to_string()];
        assert_eq!(guard_enum_value(&members, "WELLFORMED"), "WELLFORMED");
    }

    #[test]
    fn guard_falls_back_other_then_unknown_then_first() {
        let with_other = vec!["A".to_string(), "OTHER".to_string()];
        assert_eq!(guard_enum_value(&with_other, "NEWSTEP"), "OTHER");

        let with_unknown = vec!["A".to_string(), "UNKNOWN".to_string()];
        assert_eq!(guard_enum_value(&with_unknown, "NEWSTEP"), "UNKNOWN");

        let plain = vec!["A".to_string(), "B".to_string()];
        assert_eq!(guard_enum_value(&plain, "NEWSTEP"), "A");
    }

    #[test]
    fn guard_on_empty_member_list_passes_through() {
        assert_eq!(guard_enum_value(&[], "X"), "X");
    }
}
