//! Parallel per-region annotation.
//!
//! Each region runs as its own task: check out one pooled connection,
//! convert the geometry, run filter/intersect/reduce on a blocking
//! thread, then write the county label back in a transaction. A failure
//! (including a panic) is recorded for that region and the rest of the
//! batch carries on.

use std::any::Any;
use std::sync::Arc;

use ava_county_database::pool::{ConnectionPool, PooledConnection};
use ava_county_database::store;
use ava_county_region_models::progress::ProgressCallback;
use ava_county_region_models::{IntersectionResult, Region};
use ava_county_spatial::{BoundaryIndex, IntersectionEngine, attribute_region, to_multipolygon};
use serde_json::Value;

use crate::PipelineError;
use crate::worker::WorkerPool;

/// Shared, read-only state for every region task.
pub struct BatchContext {
    /// Reference boundaries, indexed.
    pub index: Arc<BoundaryIndex>,
    /// Intersection engine carrying the area threshold.
    pub engine: IntersectionEngine,
    /// Datastore connections; one per task in flight.
    pub pool: Arc<ConnectionPool>,
    /// Collection holding the regions.
    pub collection: String,
}

/// What happened to a region that completed.
#[derive(Debug, Clone, PartialEq)]
pub enum RegionStatus {
    /// The county attribute was set to `label`.
    Annotated {
        /// New county label.
        label: String,
        /// County value before the run, if any.
        previous: Option<Value>,
    },
    /// No county met the threshold; attributes were left alone.
    NoSignificantIntersections,
}

/// A region that completed, with its attributes as stored.
#[derive(Debug, Clone)]
pub struct RegionOutcome {
    /// The region after annotation.
    pub region: Region,
    /// Annotation status.
    pub status: RegionStatus,
    /// Boundaries that survived the bounding-box filter.
    pub candidate_count: usize,
    /// Intersections that met the threshold.
    pub intersections: Vec<IntersectionResult>,
}

/// A region that did not complete.
#[derive(Debug)]
pub struct RegionFailure {
    /// Region identifier.
    pub region_id: String,
    /// What went wrong.
    pub error: PipelineError,
}

impl std::fmt::Display for RegionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.region_id, self.error)
    }
}

/// Per-region results of one batch, each list sorted by region id.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Completed regions.
    pub succeeded: Vec<RegionOutcome>,
    /// Failed regions.
    pub failed: Vec<RegionFailure>,
}

impl BatchReport {
    /// Regions whose county was written.
    #[must_use]
    pub fn annotated(&self) -> usize {
        self.succeeded
            .iter()
            .filter(|o| matches!(o.status, RegionStatus::Annotated { .. }))
            .count()
    }

    /// Regions that completed without a significant intersection.
    #[must_use]
    pub fn unchanged(&self) -> usize {
        self.succeeded.len() - self.annotated()
    }
}

/// Annotates every region with at most `workers.size()` tasks in flight.
///
/// Never fails as a whole: per-region errors land in
/// [`BatchReport::failed`].
pub async fn process(
    regions: Vec<Region>,
    ctx: &BatchContext,
    workers: &WorkerPool,
    progress: &Arc<dyn ProgressCallback>,
) -> BatchReport {
    let total = regions.len();
    progress.set_total(total as u64);
    log::info!(
        "Annotating {total} regions with {} workers (threshold {} m²)",
        workers.size(),
        ctx.engine.threshold_sq_m()
    );

    let results = workers
        .run(regions, |region| async move {
            let result = process_one(region, ctx).await;
            progress.inc(1);
            result
        })
        .await;

    let mut report = BatchReport::default();
    for result in results {
        match result {
            Ok(outcome) => report.succeeded.push(outcome),
            Err(failure) => {
                log::error!("Region {failure}");
                report.failed.push(failure);
            }
        }
    }
    report
        .succeeded
        .sort_by(|a, b| a.region.id.cmp(&b.region.id));
    report.failed.sort_by(|a, b| a.region_id.cmp(&b.region_id));

    progress.finish(format!(
        "Annotated {} regions ({} without counties, {} failed)",
        report.annotated(),
        report.unchanged(),
        report.failed.len()
    ));

    report
}

async fn process_one(region: Region, ctx: &BatchContext) -> Result<RegionOutcome, RegionFailure> {
    let region_id = region.id.clone();

    let conn = ctx.pool.acquire().await.map_err(|e| RegionFailure {
        region_id: region_id.clone(),
        error: e.into(),
    })?;

    let index = Arc::clone(&ctx.index);
    let engine = ctx.engine;
    let collection = ctx.collection.clone();

    match tokio::task::spawn_blocking(move || {
        annotate_region(region, &index, &engine, conn, &collection)
    })
    .await
    {
        Ok(result) => result.map_err(|error| RegionFailure {
            region_id: region_id.clone(),
            error,
        }),
        Err(e) => {
            let message = if e.is_panic() {
                panic_message(e.into_panic().as_ref())
            } else {
                "task cancelled".to_string()
            };
            Err(RegionFailure {
                region_id: region_id.clone(),
                error: PipelineError::Task { region_id, message },
            })
        }
    }
}

fn annotate_region(
    mut region: Region,
    index: &BoundaryIndex,
    engine: &IntersectionEngine,
    mut conn: PooledConnection,
    collection: &str,
) -> Result<RegionOutcome, PipelineError> {
    let geometry = to_multipolygon(&region.geometry).map_err(|e| PipelineError::Geometry {
        region_id: region.id.clone(),
        message: e.to_string(),
    })?;

    let attribution = attribute_region(&region.id, &geometry, index, engine);

    if attribution.annotation.is_empty() {
        log::info!(
            "{}: no significant intersections ({} candidates)",
            region.id,
            attribution.candidate_count
        );
        return Ok(RegionOutcome {
            region,
            status: RegionStatus::NoSignificantIntersections,
            candidate_count: attribution.candidate_count,
            intersections: attribution.results,
        });
    }

    let label = attribution.annotation.label;
    let mut attributes = region.attributes.clone();
    let previous = attributes.set_county(&label);

    store::update_region_attributes(&mut conn, collection, &region.id, &attributes)?;
    region.attributes = attributes;

    log::debug!(
        "{}: {label} ({} of {} candidates)",
        region.id,
        attribution.results.len(),
        attribution.candidate_count
    );

    Ok(RegionOutcome {
        region,
        status: RegionStatus::Annotated { label, previous },
        candidate_count: attribution.candidate_count,
        intersections: attribution.results,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "task panicked".to_string())
}

#[cfg(test)]
mod tests {
    use ava_county_region_models::progress::null_progress;
    use ava_county_region_models::{
        Attributes, Crs, DocumentLayout, Provenance, ReferenceBoundary,
    };
    use geo::{MultiPolygon, Rect, coord};
    use serde_json::json;

    use super::*;

    fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![
            Rect::new(coord! { x: min_x, y: min_y }, coord! { x: max_x, y: max_y }).to_polygon(),
        ])
    }

    fn region(id: &str, geometry: &MultiPolygon<f64>, attributes: Value) -> Region {
        let Value::Object(map) = attributes else {
            panic!("attributes must be an object");
        };
        Region {
            id: id.to_string(),
            crs: Some(Crs::WGS84),
            geometry: geojson::Geometry::new(geojson::Value::from(geometry)),
            attributes: Attributes::from(map),
            feature_id: None,
            document_members: serde_json::Map::new(),
            layout: DocumentLayout::FeatureCollection,
            provenance: Provenance::in_memory(),
        }
    }

    fn counties() -> Vec<ReferenceBoundary> {
        vec![
            ReferenceBoundary {
                id: "06001".to_string(),
                name: "Alpha".to_string(),
                geometry: rect(0.0, 0.0, 0.1, 0.1),
            },
            ReferenceBoundary {
                id: "06002".to_string(),
                name: "Beta".to_string(),
                geometry: rect(0.1, 0.0, 0.2, 0.1),
            },
        ]
    }

    fn context(stored: &[Region], workers: usize) -> BatchContext {
        let mut conn = store::open_in_memory().unwrap();
        store::replace_regions(&mut conn, store::REGIONS, stored).unwrap();
        BatchContext {
            index: Arc::new(BoundaryIndex::new(counties())),
            engine: IntersectionEngine::default(),
            pool: ConnectionPool::new(conn, workers).unwrap(),
            collection: store::REGIONS.to_string(),
        }
    }

    #[tokio::test]
    async fn annotates_and_persists() {
        let regions = vec![
            region("span", &rect(0.05, 0.02, 0.15, 0.08), json!({"name": "Span"})),
            region("west", &rect(0.01, 0.01, 0.06, 0.06), json!({"county": "Old"})),
        ];
        let ctx = context(&regions, 2);

        let report = process(
            regions,
            &ctx,
            &WorkerPool::new(2).unwrap(),
            &null_progress(),
        )
        .await;

        assert!(report.failed.is_empty());
        assert_eq!(report.annotated(), 2);
        assert_eq!(report.succeeded[0].region.id, "span");
        assert_eq!(report.succeeded[0].region.attributes.county(), Some("Alpha|Beta"));
        assert_eq!(
            report.succeeded[1].status,
            RegionStatus::Annotated {
                label: "Alpha".to_string(),
                previous: Some(json!("Old")),
            }
        );

        let conn = ctx.pool.acquire().await.unwrap();
        let stored = store::query_regions(&conn, store::REGIONS).unwrap();
        assert_eq!(stored[0].attributes.county(), Some("Alpha|Beta"));
        assert_eq!(stored[0].attributes.get("name"), Some(&json!("Span")));
        assert_eq!(stored[1].attributes.county(), Some("Alpha"));
    }

    #[tokio::test]
    async fn empty_label_keeps_existing_county() {
        let regions = vec![region(
            "far",
            &rect(10.0, 10.0, 10.1, 10.1),
            json!({"county": "Legacy"}),
        )];
        let ctx = context(&regions, 1);

        let report = process(
            regions,
            &ctx,
            &WorkerPool::new(1).unwrap(),
            &null_progress(),
        )
        .await;

        assert_eq!(report.unchanged(), 1);
        assert_eq!(
            report.succeeded[0].status,
            RegionStatus::NoSignificantIntersections
        );
        assert_eq!(report.succeeded[0].candidate_count, 0);

        let conn = ctx.pool.acquire().await.unwrap();
        let stored = store::query_regions(&conn, store::REGIONS).unwrap();
        assert_eq!(stored[0].attributes.county(), Some("Legacy"));
    }

    #[tokio::test]
    async fn store_failure_is_isolated_to_its_region() {
        let stored = region("stored", &rect(0.01, 0.01, 0.06, 0.06), json!({}));
        let missing = region("missing", &rect(0.11, 0.01, 0.16, 0.06), json!({}));
        let ctx = context(std::slice::from_ref(&stored), 2);

        let report = process(
            vec![missing, stored],
            &ctx,
            &WorkerPool::new(2).unwrap(),
            &null_progress(),
        )
        .await;

        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.succeeded[0].region.id, "stored");
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].region_id, "missing");
        assert!(matches!(report.failed[0].error, PipelineError::Store(_)));
        assert_eq!(ctx.pool.in_use(), 0);
    }

    #[tokio::test]
    async fn bad_geometry_is_a_region_failure() {
        let mut point = region("point", &rect(0.0, 0.0, 0.1, 0.1), json!({}));
        point.geometry = geojson::Geometry::new(geojson::Value::Point(vec![0.05, 0.05]));
        let ok = region("ok", &rect(0.01, 0.01, 0.06, 0.06), json!({}));
        let ctx = context(&[point.clone(), ok.clone()], 2);

        let report = process(
            vec![point, ok],
            &ctx,
            &WorkerPool::new(2).unwrap(),
            &null_progress(),
        )
        .await;

        assert_eq!(report.annotated(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(
            report.failed[0].error,
            PipelineError::Geometry { .. }
        ));
    }

    #[test]
    fn panic_payloads_become_messages() {
        let literal: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(literal.as_ref()), "boom");

        let owned: Box<dyn Any + Send> = Box::new("region 7".to_string());
        assert_eq!(panic_message(owned.as_ref()), "region 7");

        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(other.as_ref()), "task panicked");
    }
}
