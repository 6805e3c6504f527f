//! CRS gate for regions.
//!
//! Every region must declare the canonical CRS. Regions that declare
//! nothing, or something else, are rejected and logged with their
//! bounding box. Rejection is never fatal to the run.

use ava_county_region_models::{Crs, Region};

/// Outcome of validating one region.
#[derive(Debug, Clone)]
pub struct Validated {
    /// Whether the region may proceed.
    pub valid: bool,
    /// The region, unchanged.
    pub region: Region,
}

/// A region excluded by the validator.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    /// Region identifier.
    pub region_id: String,
    /// Human-readable reason.
    pub reason: String,
    /// `[min_x, min_y, max_x, max_y]` of the geometry, if it has one.
    pub bbox: Option<[f64; 4]>,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.region_id, self.reason)?;
        match self.bbox {
            Some([min_x, min_y, max_x, max_y]) => {
                write!(f, " (bbox {min_x}, {min_y}, {max_x}, {max_y})")
            }
            None => f.write_str(" (no bbox)"),
        }
    }
}

/// Checks a region's declared CRS against `canonical`.
#[must_use]
pub fn validate(region: Region, canonical: Crs) -> Validated {
    let valid = rejection_reason(&region, canonical).is_none();
    Validated { valid, region }
}

/// Splits regions into the valid ones and rejections, logging each
/// rejection at warn level.
#[must_use]
pub fn validate_all(regions: Vec<Region>, canonical: Crs) -> (Vec<Region>, Vec<Rejection>) {
    let mut valid = Vec::with_capacity(regions.len());
    let mut rejected = Vec::new();

    for region in regions {
        match rejection_reason(&region, canonical) {
            None => valid.push(region),
            Some(reason) => {
                let rejection = Rejection {
                    region_id: region.id.clone(),
                    reason,
                    bbox: region.bbox(),
                };
                log::warn!("Rejected region {rejection}");
                rejected.push(rejection);
            }
        }
    }

    log::info!(
        "Validated {} regions against {canonical} ({} rejected)",
        valid.len(),
        rejected.len()
    );

    (valid, rejected)
}

fn rejection_reason(region: &Region, canonical: Crs) -> Option<String> {
    match region.crs {
        None => Some(format!("no CRS declared, expected {canonical}")),
        Some(crs) if crs != canonical => Some(format!("declared {crs}, expected {canonical}")),
        Some(_) => None,
    }
}
