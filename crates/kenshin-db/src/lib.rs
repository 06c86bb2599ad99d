//! MySQL access layer.
//!
//! The ledger runs against databases whose DDL has drifted over years of
//! operation: columns appear, enum member lists grow, foreign keys get
//! renamed. This crate keeps the writers honest against whatever schema
//! is actually present:
//!
//! - [`catalog::Catalog`] answers "does this column exist" and "what are
//!   this enum's members" from `information_schema`, cached per process.
//! - [`upsert::UpsertBuilder`] / [`upsert::UpdateBuilder`] assemble
//!   column/value lists dynamically so optional columns are included
//!   exactly when present, and return primary keys on both the insert
//!   and the update path via `LAST_INSERT_ID(id)`.

pub mod catalog;
pub mod pool;
pub mod upsert;

use thiserror::Error;

/// Database-layer errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("statement builder misuse: {0}")]
    Builder(String),
}
