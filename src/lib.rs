//! kenshin — ingestion pipeline for statutory health-checkup (特定健診)
//! CDA deliverables.
//!
//! The pipeline turns password-protected ZIP archives observed on a
//! shared filesystem into validated, normalized, auditable ledger rows:
//!
//! ```text
//! scan → hash → probe → judge → copy → import (zip/xml) → items → normalize
//! ```
//!
//! Stages communicate only through ledger state (the ledger *is* the
//! queue); each is independently re-runnable and idempotent. See the
//! member crates for the layers: `kenshin-ledger` (tables),
//! `kenshin-db` (schema-tolerant writers), `kenshin-archive` (ZIP),
//! `kenshin-cda` (document reads), `kenshin-stages` (drivers).

pub mod cli;
pub mod outbound;

pub use kenshin_archive as archive;
pub use kenshin_cda as cda;
pub use kenshin_config as config;
pub use kenshin_db as db;
pub use kenshin_ledger as ledger;
pub use kenshin_stages as stages;
pub use kenshin_utils::exit_codes::ExitCode;
