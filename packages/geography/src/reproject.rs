//! Reprojection of the reference dataset into the canonical CRS.
//!
//! Applied once per run at load time. Only the transforms the county
//! sources actually ship in are supported: geographic WGS84/NAD83 (taken
//! as identical; the datum shift is well under a meter) and spherical Web
//! Mercator.

use std::f64::consts::FRAC_PI_2;

use ava_county_region_models::Crs;
use geo::{MapCoords as _, MultiPolygon, coord};

use crate::GeoError;

/// Sphere radius used by EPSG:3857.
const WEB_MERCATOR_RADIUS_M: f64 = 6_378_137.0;

/// A supported coordinate transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reprojection {
    /// Coordinates are already in the target CRS.
    Identity,
    /// EPSG:3857 meters to geographic degrees.
    InverseWebMercator,
}

impl Reprojection {
    /// Picks the transform from `source` to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`GeoError::Conversion`] if the pair is not supported.
    pub fn between(source: Crs, target: Crs) -> Result<Self, GeoError> {
        if !is_geographic(target) {
            return Err(GeoError::Conversion {
                message: format!("unsupported target CRS {target}"),
            });
        }

        if is_geographic(source) {
            Ok(Self::Identity)
        } else if source == Crs::WEB_MERCATOR {
            Ok(Self::InverseWebMercator)
        } else {
            Err(GeoError::Conversion {
                message: format!("cannot reproject from {source} to {target}"),
            })
        }
    }

    /// Applies the transform.
    #[must_use]
    pub fn apply(self, geometry: MultiPolygon<f64>) -> MultiPolygon<f64> {
        match self {
            Self::Identity => geometry,
            Self::InverseWebMercator => geometry.map_coords(|c| {
                let (lon, lat) = inverse_web_mercator(c.x, c.y);
                coord! { x: lon, y: lat }
            }),
        }
    }
}

fn is_geographic(crs: Crs) -> bool {
    crs == Crs::WGS84 || crs == Crs::NAD83
}

fn inverse_web_mercator(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / WEB_MERCATOR_RADIUS_M).to_degrees();
    let lat = 2.0f64
        .mul_add((y / WEB_MERCATOR_RADIUS_M).exp().atan(), -FRAC_PI_2)
        .to_degrees();
    (lon, lat)
}
