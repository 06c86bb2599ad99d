//! Pool construction.
//!
//! Each stage owns one pool per database. The work pool is capped at two
//! connections: one carries the stage's data transaction, the other
//! serves autocommit writes (run rows, process logs, catalog lookups)
//! that must stay durable even when the data transaction rolls back.

use sqlx::mysql::{MySqlPool, MySqlPoolOptions};

use crate::DbError;

/// Connect the work-database pool.
///
/// # Errors
///
/// Propagates connection failures.
pub async fn connect(url: &str) -> Result<MySqlPool, DbError> {
    let pool = MySqlPoolOptions::new()
        .max_connections(2)
        .connect(url)
        .await?;
    Ok(pool)
}

/// Connect the read-only master database (item master, variant
/// dictionary). One connection suffices: it only ever serves lookups.
pub async fn connect_master(url: &str) -> Result<MySqlPool, DbError> {
    let pool = MySqlPoolOptions::new()
        .max_connections(1)
        .connect(url)
        .await?;
    Ok(pool)
}
