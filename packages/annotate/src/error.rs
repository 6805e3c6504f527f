//! Pipeline error taxonomy.
//!
//! Validation, geometry, per-task store, task, and export errors are
//! per-region: they are recorded and the batch continues. Provisioning,
//! configuration, and setup-time store errors end the run.

use ava_county_database::DbError;
use ava_county_diff::DiffError;
use ava_county_geography::GeoError;

/// Errors produced by the annotation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The region failed the input gate (unreadable file or wrong CRS).
    #[error("Validation error for {region_id}: {reason}")]
    Validation {
        /// Region id, or the file name if no id could be read.
        region_id: String,
        /// Why the region was excluded.
        reason: String,
    },

    /// The region's geometry is malformed or not polygonal.
    #[error("Geometry error for {region_id}: {message}")]
    Geometry {
        /// Region id.
        region_id: String,
        /// Description of what went wrong.
        message: String,
    },

    /// Datastore error.
    #[error("Store error: {0}")]
    Store(#[from] DbError),

    /// The region task panicked or was cancelled.
    #[error("Task for {region_id} failed: {message}")]
    Task {
        /// Region id.
        region_id: String,
        /// Panic message or cancellation note.
        message: String,
    },

    /// Writing the annotated region file failed.
    #[error("Export error for {region_id}: {message}")]
    Export {
        /// Region id.
        region_id: String,
        /// Description of what went wrong.
        message: String,
    },

    /// The reference dataset or input directory could not be provided.
    #[error("Provisioning error: {0}")]
    Provisioning(#[from] GeoError),

    /// Change detection failed.
    #[error("Diff error: {0}")]
    Diff(#[from] DiffError),

    /// The configuration is unusable.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of what went wrong.
        message: String,
    },
}
