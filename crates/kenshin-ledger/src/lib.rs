//! Typed access to the ledger tables.
//!
//! One module per table family; every writer is an explicit adapter
//! struct so the compiler enforces which fields reach which statement.
//! All writers go through the dynamic builders in `kenshin-db`, which
//! keep them tolerant of schema drift (missing optional columns,
//! enum member sets that differ between environments).

pub mod codes;
pub mod item_values;
pub mod masters;
pub mod passwords;
pub mod process_logs;
pub mod runs;
pub mod shared_files;
pub mod xml_ledger;
pub mod xml_receipts;
pub mod zip_receipts;

pub use kenshin_db::DbError;

/// Batch caps of 0 mean "unbounded"; selects still need a LIMIT term, so
/// unbounded reads use a ceiling far above any real batch.
#[must_use]
pub const fn effective_limit(limit: i64) -> i64 {
    if limit > 0 { limit } else { 1_000_000 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_limit_maps_zero_to_ceiling() {
        assert_eq!(effective_limit(0), 1_000_000);
        assert_eq!(effective_limit(-5), 1_000_000);
        assert_eq!(effective_limit(42), 42);
    }
}
