//! Pipeline configuration.
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! the [`DATABASE_PATH_ENV`] override, then CLI flags (applied by the
//! binary). [`PipelineConfig::validate`] runs once all layers are in.

use std::path::{Path, PathBuf};

use ava_county_database::paths::{
    self, DATABASE_PATH_ENV, default_database_path, default_reference_cache,
};
use ava_county_geography::download::CENSUS_COUNTIES_URL;
use ava_county_geography::reference::ReferenceFields;
use ava_county_region_models::Crs;
use ava_county_spatial::intersect::DEFAULT_AREA_THRESHOLD_SQ_M;
use serde::{Deserialize, Serialize};

use crate::PipelineError;
use crate::worker::WorkerPool;

/// Everything a run needs to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// EPSG code every region must declare.
    pub canonical_epsg: u32,
    /// Minimum geodesic overlap, in square meters, for a county to count.
    pub area_threshold_sq_m: f64,
    /// Number of region tasks (and datastore connections) in flight.
    pub workers: usize,
    /// Where to download the reference boundaries from.
    pub reference_url: String,
    /// Local copy of the reference boundaries.
    pub reference_cache: PathBuf,
    /// Reference property holding the boundary key.
    pub reference_id_field: String,
    /// Reference property holding the boundary name.
    pub reference_name_field: String,
    /// Region property holding the region id.
    pub region_id_field: String,
    /// Directory of region `GeoJSON` files.
    pub input_dir: PathBuf,
    /// Directory the annotated regions are written to.
    pub output_dir: PathBuf,
    /// `DuckDB` file.
    pub database_path: PathBuf,
    /// Allow `output_dir` to be the input directory.
    pub in_place: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            canonical_epsg: Crs::WGS84.code(),
            area_threshold_sq_m: DEFAULT_AREA_THRESHOLD_SQ_M,
            workers: WorkerPool::DEFAULT_SIZE,
            reference_url: CENSUS_COUNTIES_URL.to_string(),
            reference_cache: default_reference_cache(),
            reference_id_field: "GEOID".to_string(),
            reference_name_field: "NAME".to_string(),
            region_id_field: "ava_id".to_string(),
            input_dir: paths::data_dir().join("avas"),
            output_dir: paths::generated_dir().join("avas"),
            database_path: default_database_path(),
            in_place: false,
        }
    }
}

impl PipelineConfig {
    /// Loads defaults, overlays `path` if given, then applies the
    /// environment override.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the file cannot be read or
    /// parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| PipelineError::Config {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };

        config.apply_env();
        Ok(config)
    }

    /// Parses a TOML document. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] on malformed TOML or unknown keys.
    pub fn from_toml_str(text: &str) -> Result<Self, PipelineError> {
        toml::from_str(text).map_err(|e| PipelineError::Config {
            message: format!("failed to parse config: {e}"),
        })
    }

    /// Replaces the database path with [`DATABASE_PATH_ENV`] when set.
    pub fn apply_env(&mut self) {
        let resolved = paths::resolve_database_path(&self.database_path);
        if resolved != self.database_path {
            log::info!("Using database {} from {DATABASE_PATH_ENV}", resolved.display());
            self.database_path = resolved;
        }
    }

    /// The CRS regions must declare.
    #[must_use]
    pub const fn canonical_crs(&self) -> Crs {
        Crs::epsg(self.canonical_epsg)
    }

    /// Property names for the reference boundaries.
    #[must_use]
    pub fn reference_fields(&self) -> ReferenceFields {
        ReferenceFields {
            id_field: self.reference_id_field.clone(),
            name_field: self.reference_name_field.clone(),
        }
    }

    /// Checks the assembled configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the worker count is zero, the
    /// threshold is negative or not finite, the canonical CRS is not
    /// geographic, or the output directory is the input directory without
    /// `in_place`.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.workers == 0 {
            return Err(config_error("workers must be at least 1"));
        }

        if !self.area_threshold_sq_m.is_finite() || self.area_threshold_sq_m < 0.0 {
            return Err(config_error(format!(
                "area threshold must be a non-negative number of square meters, got {}",
                self.area_threshold_sq_m
            )));
        }

        let canonical = self.canonical_crs();
        if canonical != Crs::WGS84 && canonical != Crs::NAD83 {
            return Err(config_error(format!(
                "canonical CRS must be geographic ({} or {}), got {canonical}",
                Crs::WGS84,
                Crs::NAD83
            )));
        }

        if self.region_id_field.trim().is_empty() {
            return Err(config_error("region id field must not be empty"));
        }

        if !self.in_place && same_dir(&self.input_dir, &self.output_dir) {
            return Err(config_error(format!(
                "output directory {} is the input directory; pass --in-place to overwrite inputs",
                self.output_dir.display()
            )));
        }

        Ok(())
    }
}

fn config_error(message: impl Into<String>) -> PipelineError {
    PipelineError::Config {
        message: message.into(),
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
