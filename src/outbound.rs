//! Outbound emitter interface.
//!
//! The generator that renders CDA + index XML bundles and packages them
//! for submission back to insurers is an external collaborator; this
//! module only fixes the seam it is called through. Implementations
//! read the ledger (never the scratch trees) and own their own output
//! layout.

use camino::Utf8PathBuf;
use thiserror::Error;

/// A request to emit one submission bundle for an insurer.
#[derive(Debug, Clone)]
pub struct BundleRequest {
    /// Insurer the bundle is addressed to.
    pub insurer_number: String,
    /// Ledger rows (`xml_ledger_id`) selected for submission.
    pub ledger_ids: Vec<i64>,
    /// Where the packaged archive should land.
    pub output_dir: Utf8PathBuf,
}

/// What an emitter produced.
#[derive(Debug, Clone)]
pub struct EmittedBundle {
    /// The packaged archive on disk.
    pub archive_path: Utf8PathBuf,
    /// CDA documents inside the archive.
    pub document_count: u64,
    /// Name of the index document accompanying the CDA files.
    pub index_file_name: String,
}

/// Emitter failures, as far as this side of the seam cares.
#[derive(Error, Debug)]
pub enum OutboundError {
    #[error("ledger rows missing or not in an emittable state: {0}")]
    NotEmittable(String),

    #[error("bundle generation failed: {0}")]
    Generation(String),
}

/// The seam the pipeline calls the external generator through.
pub trait OutboundEmitter {
    /// Render and package one bundle.
    ///
    /// # Errors
    ///
    /// [`OutboundError`] when the rows cannot be emitted or the
    /// generator fails; partial output must not be left behind.
    fn emit_bundle(&self, request: &BundleRequest) -> Result<EmittedBundle, OutboundError>;
}
