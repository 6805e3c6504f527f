#![allow(clippy::module_name_repetitions)]
//! Canonical file paths for the data directory.
//!
//! All paths are relative to the working directory's `data/` directory.

use std::path::{Path, PathBuf};

/// Environment variable that overrides the configured database path.
pub const DATABASE_PATH_ENV: &str = "AVA_COUNTY_DATABASE";

/// Returns the `data/` directory path.
#[must_use]
pub fn data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Returns the `data/shared/` directory for the database and the cached
/// reference archive.
#[must_use]
pub fn shared_dir() -> PathBuf {
    data_dir().join("shared")
}

/// Returns the `data/generated/` directory for output artifacts.
#[must_use]
pub fn generated_dir() -> PathBuf {
    data_dir().join("generated")
}

/// Returns the default `DuckDB` file path.
#[must_use]
pub fn default_database_path() -> PathBuf {
    shared_dir().join("ava_county.duckdb")
}

/// Returns the default cache path for the reference archive.
#[must_use]
pub fn default_reference_cache() -> PathBuf {
    shared_dir().join("counties.zip")
}

/// Returns the database path from [`DATABASE_PATH_ENV`] if set and
/// non-empty, else `configured`.
#[must_use]
pub fn resolve_database_path(configured: &Path) -> PathBuf {
    std::env::var(DATABASE_PATH_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map_or_else(|| configured.to_path_buf(), PathBuf::from)
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
