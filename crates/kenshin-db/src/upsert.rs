//! Dynamic statement builders.
//!
//! Every ledger write goes through these builders so that:
//!
//! - optional columns (schema drift) are bound only when the catalog says
//!   they exist;
//! - `INSERT ... ON DUPLICATE KEY UPDATE` statements carry per-column
//!   update policies (overwrite, keep-existing, coalesce-new, insert-only);
//! - the row's primary key comes back on both the insert and the update
//!   path via the `LAST_INSERT_ID(id)` trick.

use chrono::{NaiveDate, NaiveDateTime};
use sqlx::mysql::MySqlArguments;
use sqlx::query::Query;
use sqlx::{Executor, MySql};

use crate::DbError;

/// A bind parameter. Owned values only; `Opt*` variants bind SQL NULL.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Str(String),
    OptStr(Option<String>),
    I64(i64),
    OptI64(Option<i64>),
    U64(u64),
    Bool(bool),
    DateTime(NaiveDateTime),
    OptDateTime(Option<NaiveDateTime>),
    Date(NaiveDate),
    OptDate(Option<NaiveDate>),
}

/// Bind a [`Param`] onto a query.
pub(crate) fn bind_param<'q>(
    q: Query<'q, MySql, MySqlArguments>,
    p: Param,
) -> Query<'q, MySql, MySqlArguments> {
    match p {
        Param::Str(v) => q.bind(v),
        Param::OptStr(v) => q.bind(v),
        Param::I64(v) => q.bind(v),
        Param::OptI64(v) => q.bind(v),
        Param::U64(v) => q.bind(v),
        Param::Bool(v) => q.bind(v),
        Param::DateTime(v) => q.bind(v),
        Param::OptDateTime(v) => q.bind(v),
        Param::Date(v) => q.bind(v),
        Param::OptDate(v) => q.bind(v),
    }
}

/// What happens to a column when the row already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDuplicate {
    /// `col = VALUES(col)` — the new value wins.
    Overwrite,
    /// `col = COALESCE(col, VALUES(col))` — an existing non-NULL value is
    /// never overwritten (operator-owned columns like `manual_judgement`).
    KeepExisting,
    /// `col = COALESCE(VALUES(col), col)` — the new value wins unless it
    /// is NULL (lazily computed columns like `sha256`).
    CoalesceNew,
    /// Bound on insert, untouched on update (`first_seen_at`).
    InsertOnly,
}

/// Builder for `INSERT ... ON DUPLICATE KEY UPDATE` statements.
pub struct UpsertBuilder {
    table: String,
    id_column: Option<String>,
    cols: Vec<(String, Param, OnDuplicate)>,
}

impl UpsertBuilder {
    #[must_use]
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            id_column: None,
            cols: Vec::new(),
        }
    }

    /// Auto-increment primary key returned via `LAST_INSERT_ID(id)`.
    #[must_use]
    pub fn id_column(mut self, column: &str) -> Self {
        self.id_column = Some(column.to_string());
        self
    }

    /// Add a column with the default [`OnDuplicate::Overwrite`] policy.
    #[must_use]
    pub fn col(self, name: &str, value: Param) -> Self {
        self.col_with(name, value, OnDuplicate::Overwrite)
    }

    /// Add a column with an explicit update policy.
    #[must_use]
    pub fn col_with(mut self, name: &str, value: Param, policy: OnDuplicate) -> Self {
        self.cols.push((name.to_string(), value, policy));
        self
    }

    /// Add a column only when `present` (catalog-gated optional column).
    #[must_use]
    pub fn col_if(self, present: bool, name: &str, value: Param) -> Self {
        if present { self.col(name, value) } else { self }
    }

    /// Render the statement. Parameters bind in insertion order.
    pub fn sql(&self) -> Result<String, DbError> {
        if self.cols.is_empty() {
            return Err(DbError::Builder(format!(
                "upsert into {} has no columns",
                self.table
            )));
        }
        let names: Vec<String> = self.cols.iter().map(|(n, _, _)| format!("`{n}`")).collect();
        let placeholders: Vec<&str> = self.cols.iter().map(|_| "?").collect();

        let mut updates: Vec<String> = Vec::new();
        for (name, _, policy) in &self.cols {
            match policy {
                OnDuplicate::Overwrite => updates.push(format!("`{name}`=VALUES(`{name}`)")),
                OnDuplicate::KeepExisting => {
                    updates.push(format!("`{name}`=COALESCE(`{name}`, VALUES(`{name}`))"));
                }
                OnDuplicate::CoalesceNew => {
                    updates.push(format!("`{name}`=COALESCE(VALUES(`{name}`), `{name}`)"));
                }
                OnDuplicate::InsertOnly => {}
            }
        }
        if let Some(id) = &self.id_column {
            updates.push(format!("`{id}`=LAST_INSERT_ID(`{id}`)"));
        }
        if updates.is_empty() {
            return Err(DbError::Builder(format!(
                "upsert into {} updates no columns; add an id column or a non-insert-only column",
                self.table
            )));
        }

        Ok(format!(
            "INSERT INTO `{}` ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
            self.table,
            names.join(", "),
            placeholders.join(", "),
            updates.join(", ")
        ))
    }

    /// Execute and return the row id (insert or update path alike).
    ///
    /// # Errors
    ///
    /// Builder misuse or the underlying SQL error.
    pub async fn execute<'e, E>(self, executor: E) -> Result<u64, DbError>
    where
        E: Executor<'e, Database = MySql>,
    {
        let sql = self.sql()?;
        let mut q = sqlx::query(&sql);
        for (_, param, _) in self.cols {
            q = bind_param(q, param);
        }
        let result = q.execute(executor).await?;
        Ok(result.last_insert_id())
    }
}

/// Builder for plain `UPDATE ... SET ... WHERE key = ?` statements with
/// catalog-gated optional SET columns.
pub struct UpdateBuilder {
    table: String,
    sets: Vec<(String, SetExpr, Option<Param>)>,
    key: Option<(String, Param)>,
}

enum SetExpr {
    /// `col = ?`
    Value,
    /// `col = COALESCE(?, col)` — keep the existing value when the new
    /// one is NULL (progressive note columns).
    CoalesceParam,
    /// `col = CURRENT_TIMESTAMP(6)`
    NowMicro,
}

impl UpdateBuilder {
    #[must_use]
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            sets: Vec::new(),
            key: None,
        }
    }

    #[must_use]
    pub fn set(mut self, name: &str, value: Param) -> Self {
        self.sets.push((name.to_string(), SetExpr::Value, Some(value)));
        self
    }

    /// SET only when `present` (catalog-gated optional column).
    #[must_use]
    pub fn set_if(self, present: bool, name: &str, value: Param) -> Self {
        if present { self.set(name, value) } else { self }
    }

    /// `col = COALESCE(?, col)`.
    #[must_use]
    pub fn set_coalesce(mut self, name: &str, value: Param) -> Self {
        self.sets
            .push((name.to_string(), SetExpr::CoalesceParam, Some(value)));
        self
    }

    /// `col = CURRENT_TIMESTAMP(6)`.
    #[must_use]
    pub fn set_now(mut self, name: &str) -> Self {
        self.sets.push((name.to_string(), SetExpr::NowMicro, None));
        self
    }

    /// Conditional [`Self::set_now`].
    #[must_use]
    pub fn set_now_if(self, present: bool, name: &str) -> Self {
        if present { self.set_now(name) } else { self }
    }

    #[must_use]
    pub fn key(mut self, name: &str, value: Param) -> Self {
        self.key = Some((name.to_string(), value));
        self
    }

    /// Render the statement. SET parameters bind first, then the key.
    pub fn sql(&self) -> Result<String, DbError> {
        if self.sets.is_empty() {
            return Err(DbError::Builder(format!(
                "update of {} sets no columns",
                self.table
            )));
        }
        let Some((key_name, _)) = &self.key else {
            return Err(DbError::Builder(format!(
                "update of {} has no key predicate",
                self.table
            )));
        };
        let sets: Vec<String> = self
            .sets
            .iter()
            .map(|(name, expr, _)| match expr {
                SetExpr::Value => format!("`{name}`=?"),
                SetExpr::CoalesceParam => format!("`{name}`=COALESCE(?, `{name}`)"),
                SetExpr::NowMicro => format!("`{name}`=CURRENT_TIMESTAMP(6)"),
            })
            .collect();
        Ok(format!(
            "UPDATE `{}` SET {} WHERE `{}`=?",
            self.table,
            sets.join(", "),
            key_name
        ))
    }

    /// Execute; returns the number of affected rows.
    pub async fn execute<'e, E>(self, executor: E) -> Result<u64, DbError>
    where
        E: Executor<'e, Database = MySql>,
    {
        let sql = self.sql()?;
        let mut q = sqlx::query(&sql);
        let (sets, key) = (self.sets, self.key);
        for (_, _, param) in sets {
            if let Some(p) = param {
                q = bind_param(q, p);
            }
        }
        if let Some((_, p)) = key {
            q = bind_param(q, p);
        }
        let result = q.execute(executor).await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_sql_policies() {
        let sql = UpsertBuilder::new("shared_files")
            .id_column("shared_file_id")
            .col("path_hash", Param::Str("h".into()))
            .col_with("sha256", Param::OptStr(None), OnDuplicate::CoalesceNew)
            .col_with(
                "manual_judgement",
                Param::OptStr(None),
                OnDuplicate::KeepExisting,
            )
            .col_with(
                "first_seen_at",
                Param::Str("t".into()),
                OnDuplicate::InsertOnly,
            )
            .sql()
            .unwrap();

        assert_eq!(
            sql,
            "INSERT INTO `shared_files` \
             (`path_hash`, `sha256`, `manual_judgement`, `first_seen_at`) \
             VALUES (?, ?, ?, ?) \
             ON DUPLICATE KEY UPDATE \
             `path_hash`=VALUES(`path_hash`), \
             `sha256`=COALESCE(VALUES(`sha256`), `sha256`), \
             `manual_judgement`=COALESCE(`manual_judgement`, VALUES(`manual_judgement`)), \
             `shared_file_id`=LAST_INSERT_ID(`shared_file_id`)"
        );
    }

    #[test]
    fn upsert_col_if_skips_missing_columns() {
        let with = UpsertBuilder::new("t")
            .id_column("id")
            .col("a", Param::I64(1))
            .col_if(true, "b", Param::I64(2))
            .sql()
            .unwrap();
        assert!(with.contains("`b`"));

        let without = UpsertBuilder::new("t")
            .id_column("id")
            .col("a", Param::I64(1))
            .col_if(false, "b", Param::I64(2))
            .sql()
            .unwrap();
        assert!(!without.contains("`b`"));
    }

    #[test]
    fn upsert_requires_columns() {
        assert!(UpsertBuilder::new("t").sql().is_err());
    }

    #[test]
    fn upsert_requires_an_update_target() {
        // All-insert-only with no id column cannot render a valid ODKU.
        let r = UpsertBuilder::new("t")
            .col_with("a", Param::I64(1), OnDuplicate::InsertOnly)
            .sql();
        assert!(r.is_err());
    }

    #[test]
    fn update_sql_shapes() {
        let sql = UpdateBuilder::new("shared_files")
            .set("auto_judgement", Param::Str("KENSHIN".into()))
            .set_coalesce("note", Param::OptStr(None))
            .set_now("updated_at")
            .key("shared_file_id", Param::I64(5))
            .sql()
            .unwrap();
        assert_eq!(
            sql,
            "UPDATE `shared_files` SET \
             `auto_judgement`=?, \
             `note`=COALESCE(?, `note`), \
             `updated_at`=CURRENT_TIMESTAMP(6) \
             WHERE `shared_file_id`=?"
        );
    }

    #[test]
    fn update_requires_key() {
        let r = UpdateBuilder::new("t").set("a", Param::I64(1)).sql();
        assert!(r.is_err());
    }
}
