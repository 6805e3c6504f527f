//! Exact polygon intersection with a real-world area threshold.
//!
//! Overlap area is measured geodesically on the WGS84 ellipsoid, in
//! square meters. Planar area in degrees is never used: a square degree
//! near the equator is several times larger on the ground than one near
//! the pole.

use ava_county_region_models::{IntersectionResult, ReferenceBoundary};
use geo::{BooleanOps as _, GeodesicArea as _, MultiPolygon};

use crate::SpatialError;

/// Default minimum overlap (10 km^2) for a county to count.
pub const DEFAULT_AREA_THRESHOLD_SQ_M: f64 = 10_000_000.0;

/// Computes region/boundary overlaps and applies the area threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntersectionEngine {
    threshold_sq_m: f64,
}

impl Default for IntersectionEngine {
    fn default() -> Self {
        Self {
            threshold_sq_m: DEFAULT_AREA_THRESHOLD_SQ_M,
        }
    }
}

impl IntersectionEngine {
    /// Creates an engine with the given threshold in square meters.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::InvalidThreshold`] if the threshold is
    /// negative or not finite.
    pub fn new(threshold_sq_m: f64) -> Result<Self, SpatialError> {
        if !threshold_sq_m.is_finite() || threshold_sq_m < 0.0 {
            return Err(SpatialError::InvalidThreshold {
                value: threshold_sq_m,
            });
        }
        Ok(Self { threshold_sq_m })
    }

    /// The configured threshold in square meters.
    #[must_use]
    pub const fn threshold_sq_m(&self) -> f64 {
        self.threshold_sq_m
    }

    /// Whether an overlap of `area_sq_m` survives.
    ///
    /// Zero-area overlaps (shared edges or points) never survive, even
    /// with a zero threshold. An overlap exactly at the threshold does.
    #[must_use]
    pub fn passes_threshold(&self, area_sq_m: f64) -> bool {
        area_sq_m > 0.0 && area_sq_m >= self.threshold_sq_m
    }

    /// Intersects the region with every candidate and returns the
    /// overlaps that pass the threshold, in candidate order.
    #[must_use]
    pub fn intersect(
        &self,
        region_id: &str,
        region: &MultiPolygon<f64>,
        candidates: &[&ReferenceBoundary],
    ) -> Vec<IntersectionResult> {
        let mut results = Vec::new();

        for boundary in candidates {
            let area_sq_m = intersection_area_sq_m(region, &boundary.geometry);

            if !self.passes_threshold(area_sq_m) {
                log::debug!(
                    "{region_id}: dropping {} ({}), overlap {area_sq_m:.0} m^2 below {:.0} m^2",
                    boundary.name,
                    boundary.id,
                    self.threshold_sq_m
                );
                continue;
            }

            results.push(IntersectionResult {
                region_id: region_id.to_string(),
                boundary_id: boundary.id.clone(),
                boundary_name: boundary.name.clone(),
                area_sq_m,
            });
        }

        results
    }
}

/// Geodesic area in square meters of the overlap between two
/// multi-polygons. Returns `0.0` for disjoint or merely touching shapes.
#[must_use]
pub fn intersection_area_sq_m(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> f64 {
    let overlap = a.intersection(b);
    if overlap.0.is_empty() {
        return 0.0;
    }
    overlap.geodesic_area_unsigned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{boundary, rect};

    #[test]
    fn rejects_unusable_thresholds() {
        assert!(IntersectionEngine::new(-1.0).is_err());
        assert!(IntersectionEngine::new(f64::NAN).is_err());
        assert!(IntersectionEngine::new(f64::INFINITY).is_err());
        assert!(IntersectionEngine::new(0.0).is_ok());
    }

    #[test]
    fn default_threshold_is_ten_square_kilometers() {
        assert!(
            (IntersectionEngine::default().threshold_sq_m() - 10_000_000.0).abs() < f64::EPSILON
        );
    }

    #[test]
    fn threshold_is_inclusive() {
        let engine = IntersectionEngine::new(1.0e7).unwrap();
        assert!(engine.passes_threshold(1.0e7));
        assert!(!engine.passes_threshold(1.0e7 - 1.0e-3));
        assert!(engine.passes_threshold(1.0e7 + 1.0));
    }

    #[test]
    fn zero_area_never_passes() {
        let engine = IntersectionEngine::new(0.0).unwrap();
        assert!(!engine.passes_threshold(0.0));
        assert!(!engine.passes_threshold(f64::NAN));
        assert!(engine.passes_threshold(f64::MIN_POSITIVE));
    }

    #[test]
    fn shared_edge_is_discarded_even_with_zero_threshold() {
        let region = rect(0.0, 0.0, 1.0, 1.0);
        let neighbor = boundary("N", "Neighbor", rect(1.0, 0.0, 2.0, 1.0));
        let corner = boundary("C", "Corner", rect(1.0, 1.0, 2.0, 2.0));
        let engine = IntersectionEngine::new(0.0).unwrap();

        let results = engine.intersect("R", &region, &[&neighbor, &corner]);
        assert!(results.is_empty());
    }

    #[test]
    fn overlap_exactly_at_threshold_is_kept() {
        let region = rect(0.0, 0.0, 0.1, 0.1);
        let county = boundary("A", "CountyA", rect(0.05, -1.0, 1.0, 1.0));
        let area = intersection_area_sq_m(&region, &county.geometry);
        assert!(area > 0.0);

        let at = IntersectionEngine::new(area).unwrap();
        assert_eq!(at.intersect("R", &region, &[&county]).len(), 1);

        let above = IntersectionEngine::new(area * (1.0 + 1.0e-9)).unwrap();
        assert!(above.intersect("R", &region, &[&county]).is_empty());
    }

    #[test]
    fn area_is_geodesic_not_planar() {
        // The same one-degree-wide strip covers far less ground near the
        // pole than at the equator.
        let equator = rect(0.0, 0.0, 1.0, 0.1);
        let polar = rect(0.0, 80.0, 1.0, 80.1);
        let world = rect(-180.0, -85.0, 180.0, 85.0);

        let eq_area = intersection_area_sq_m(&equator, &world);
        let polar_area = intersection_area_sq_m(&polar, &world);

        assert!(eq_area > 1.2e9 && eq_area < 1.3e9, "{eq_area}");
        assert!(polar_area < eq_area / 4.0, "{polar_area}");
    }

    #[test]
    fn results_carry_region_and_boundary_identity() {
        let region = rect(0.0, 0.0, 0.5, 0.5);
        let county = boundary("06055", "Napa", rect(-1.0, -1.0, 1.0, 1.0));
        let engine = IntersectionEngine::default();

        let results = engine.intersect("oakville", &region, &[&county]);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].region_id, "oakville");
        assert_eq!(results[0].boundary_id, "06055");
        assert_eq!(results[0].boundary_name, "Napa");
    }
}
