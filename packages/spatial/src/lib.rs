#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Spatial core for county attribution.
//!
//! Three stages turn a region polygon into a county label:
//!
//! 1. [`BoundaryIndex::candidates`] prunes the reference set to the
//!    boundaries whose bounding boxes overlap the region's bounding box
//!    (R-tree lookup, conservative).
//! 2. [`intersect::IntersectionEngine`] computes the exact overlap with
//!    each candidate, measures it geodesically in square meters, and keeps
//!    only overlaps at or above the area threshold.
//! 3. [`reduce::reduce`] collapses the survivors into a sorted,
//!    de-duplicated, `|`-joined label.
//!
//! The index is built once per run and shared read-only across all
//! region tasks.

pub mod intersect;
pub mod reduce;

use ava_county_region_models::{Annotation, IntersectionResult, ReferenceBoundary};
use geo::{BoundingRect, CoordsIter, MultiPolygon};
use rstar::{AABB, RTree, RTreeObject};

pub use intersect::IntersectionEngine;

/// Errors from geometry conversion and engine configuration.
#[derive(Debug, thiserror::Error)]
pub enum SpatialError {
    /// The geometry is malformed or of the wrong type.
    #[error("Geometry error: {message}")]
    Geometry {
        /// Description of what went wrong.
        message: String,
    },

    /// The configured area threshold is unusable.
    #[error("Invalid area threshold: {value}")]
    InvalidThreshold {
        /// The rejected threshold value.
        value: f64,
    },
}

/// A boundary stored in the R-tree with its precomputed envelope.
struct BoundaryEntry {
    boundary: ReferenceBoundary,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for BoundaryEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// R-tree over the reference boundaries.
///
/// Built once from the full reference set and shared (behind an `Arc`)
/// by every region task. Never mutated after construction.
pub struct BoundaryIndex {
    tree: RTree<BoundaryEntry>,
}

impl BoundaryIndex {
    /// Bulk-loads the R-tree.
    ///
    /// Boundaries with empty geometry have no envelope and can never
    /// intersect anything, so they are left out.
    #[must_use]
    pub fn new(boundaries: Vec<ReferenceBoundary>) -> Self {
        let mut entries = Vec::with_capacity(boundaries.len());

        for boundary in boundaries {
            let Some(envelope) = compute_envelope(&boundary.geometry) else {
                log::warn!(
                    "Boundary {} ({}) has empty geometry, skipping",
                    boundary.id,
                    boundary.name
                );
                continue;
            };
            entries.push(BoundaryEntry { boundary, envelope });
        }

        let tree = RTree::bulk_load(entries);
        log::info!("Loaded {} reference boundaries into spatial index", tree.size());

        Self { tree }
    }

    /// Number of indexed boundaries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Whether the index holds no boundaries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Iterates over all indexed boundaries in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &ReferenceBoundary> {
        self.tree.iter().map(|e| &e.boundary)
    }

    /// Returns the boundaries whose envelope overlaps the region's
    /// envelope, sorted by boundary id.
    ///
    /// Touching envelopes count as overlapping. An empty region has no
    /// envelope and yields no candidates.
    #[must_use]
    pub fn candidates(&self, region: &MultiPolygon<f64>) -> Vec<&ReferenceBoundary> {
        let Some(query_env) = compute_envelope(region) else {
            return Vec::new();
        };

        let mut found: Vec<&ReferenceBoundary> = self
            .tree
            .locate_in_envelope_intersecting(&query_env)
            .map(|e| &e.boundary)
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }
}

/// Linear-scan bounding-box filter over a slice of boundaries.
///
/// Same semantics as [`BoundaryIndex::candidates`], without the index.
/// Useful for small reference sets.
#[must_use]
pub fn filter_candidates<'a>(
    region: &MultiPolygon<f64>,
    boundaries: &'a [ReferenceBoundary],
) -> Vec<&'a ReferenceBoundary> {
    let Some(region_env) = compute_envelope(region) else {
        return Vec::new();
    };

    boundaries
        .iter()
        .filter(|b| {
            compute_envelope(&b.geometry).is_some_and(|env| envelopes_overlap(&region_env, &env))
        })
        .collect()
}

/// Full filter -> intersect -> reduce output for one region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionAttribution {
    /// How many boundaries survived the bounding-box filter.
    pub candidate_count: usize,
    /// Intersections at or above the threshold.
    pub results: Vec<IntersectionResult>,
    /// The reduced label.
    pub annotation: Annotation,
}

/// Runs the candidate filter, the intersection engine, and the reducer
/// for one region.
#[must_use]
pub fn attribute_region(
    region_id: &str,
    region: &MultiPolygon<f64>,
    index: &BoundaryIndex,
    engine: &IntersectionEngine,
) -> RegionAttribution {
    let candidates = index.candidates(region);
    let results = engine.intersect(region_id, region, &candidates);
    let annotation = reduce::reduce(region_id, &results);

    RegionAttribution {
        candidate_count: candidates.len(),
        results,
        annotation,
    }
}

/// Converts a `GeoJSON` geometry into a [`MultiPolygon`].
///
/// Accepts `Polygon` and `MultiPolygon`. Everything else, empty
/// geometries, and geometries with non-finite coordinates are rejected.
///
/// # Errors
///
/// Returns [`SpatialError::Geometry`] if the geometry cannot be used for
/// intersection.
pub fn to_multipolygon(geometry: &geojson::Geometry) -> Result<MultiPolygon<f64>, SpatialError> {
    let geo_geom: geo::Geometry<f64> =
        geometry
            .clone()
            .try_into()
            .map_err(|e| SpatialError::Geometry {
                message: format!("invalid GeoJSON geometry: {e}"),
            })?;

    let multi_polygon = match geo_geom {
        geo::Geometry::MultiPolygon(mp) => mp,
        geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
        other => {
            return Err(SpatialError::Geometry {
                message: format!(
                    "expected Polygon or MultiPolygon, found {}",
                    geometry_kind(&other)
                ),
            });
        }
    };

    if multi_polygon.coords_count() == 0 {
        return Err(SpatialError::Geometry {
            message: "geometry has no coordinates".to_string(),
        });
    }

    if !multi_polygon
        .coords_iter()
        .all(|c| c.x.is_finite() && c.y.is_finite())
    {
        return Err(SpatialError::Geometry {
            message: "geometry has non-finite coordinates".to_string(),
        });
    }

    Ok(multi_polygon)
}

#[allow(unreachable_patterns)]
const fn geometry_kind(geom: &geo::Geometry<f64>) -> &'static str {
    match geom {
        geo::Geometry::Point(_) => "Point",
        geo::Geometry::Line(_) => "Line",
        geo::Geometry::LineString(_) => "LineString",
        geo::Geometry::Polygon(_) => "Polygon",
        geo::Geometry::MultiPoint(_) => "MultiPoint",
        geo::Geometry::MultiLineString(_) => "MultiLineString",
        geo::Geometry::MultiPolygon(_) => "MultiPolygon",
        geo::Geometry::GeometryCollection(_) => "GeometryCollection",
        geo::Geometry::Rect(_) => "Rect",
        geo::Geometry::Triangle(_) => "Triangle",
        _ => "Geometry",
    }
}

/// Compute the bounding box envelope for a [`MultiPolygon`].
fn compute_envelope(mp: &MultiPolygon<f64>) -> Option<AABB<[f64; 2]>> {
    mp.bounding_rect()
        .map(|rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]))
}

fn envelopes_overlap(a: &AABB<[f64; 2]>, b: &AABB<[f64; 2]>) -> bool {
    let (a_lo, a_hi) = (a.lower(), a.upper());
    let (b_lo, b_hi) = (b.lower(), b.upper());
    a_lo[0] <= b_hi[0] && b_lo[0] <= a_hi[0] && a_lo[1] <= b_hi[1] && b_lo[1] <= a_hi[1]
}
