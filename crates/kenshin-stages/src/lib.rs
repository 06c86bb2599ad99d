//! Stage drivers.
//!
//! Each stage is a pull-based loop: select a bounded batch of rows whose
//! ledger state matches the stage's precondition, process them
//! sequentially, commit per file (or in small groups for write-heavy
//! loops), and return a summary whose `note()` becomes the run's
//! single-line record. A per-file failure is written to the ledger and
//! the loop moves on; stages abort only on fatal errors (configuration,
//! lost database).

pub mod copy;
pub mod hash;
pub mod item_extract;
pub mod judge;
pub mod normalize;
pub mod probe;
pub mod scan;
pub mod xml_extract;
pub mod zip_import;

/// Write-heavy loops commit in groups of this size.
pub(crate) const COMMIT_EVERY: usize = 50;
