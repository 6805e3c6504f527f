#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Region and reference boundary data management.
//!
//! Reads one AVA region per `GeoJSON` file and writes annotated regions
//! back in the same document shape, gates regions on their declared CRS,
//! and provisions the county reference dataset (download, unzip, optional
//! `ogr2ogr` conversion, reprojection to the canonical CRS).

pub mod download;
pub mod reference;
pub mod regions;
pub mod reproject;
pub mod validate;

use thiserror::Error;

/// Errors that can occur during geography operations.
#[derive(Debug, Error)]
pub enum GeoError {
    /// Downloading the reference dataset failed.
    #[error("Download error: {0}")]
    Download(#[from] download::DownloadError),

    /// JSON parsing failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The document is not valid `GeoJSON`.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// Reading the reference archive failed.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// A geometry could not be converted.
    #[error("Geometry error: {0}")]
    Spatial(#[from] ava_county_spatial::SpatialError),

    /// I/O error on a specific path.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Data conversion error.
    #[error("Conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

impl GeoError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
