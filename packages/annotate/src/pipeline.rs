//! End-to-end annotation run.
//!
//! Ordering within a run:
//!
//! 1. provision the reference boundaries (download once, then cache)
//! 2. read every region file and snapshot the originals
//! 3. reject regions that do not declare the canonical CRS
//! 4. replace both collections in the store and index them
//! 5. annotate every valid region in parallel
//! 6. export the stored regions that completed
//! 7. diff the export against the originals
//!
//! Only provisioning, configuration, and store setup errors end the run.
//! Everything else is counted per region in the [`RunSummary`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use ava_county_database::pool::ConnectionPool;
use ava_county_database::store;
use ava_county_diff::{Snapshot, report};
use ava_county_geography::{GeoError, download, reference, regions, validate};
use ava_county_region_models::progress::ProgressCallback;
use ava_county_region_models::{ChangeRecord, ReferenceBoundary, Region};
use ava_county_spatial::{BoundaryIndex, IntersectionEngine};

use crate::batch::{self, BatchContext, RegionFailure};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::worker::WorkerPool;

/// Counts and details of one run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Region files that parsed.
    pub read: usize,
    /// Regions that passed the CRS gate.
    pub validated: usize,
    /// Regions excluded before annotation (unreadable or wrong CRS).
    pub rejected: Vec<RegionFailure>,
    /// Regions whose county attribute was written.
    pub annotated: usize,
    /// Regions without a significant intersection.
    pub unchanged: usize,
    /// Regions that failed during annotation or export.
    pub failed: Vec<RegionFailure>,
    /// Files written to the output directory.
    pub written: Vec<PathBuf>,
    /// Differences between the originals and the export.
    pub changes: Vec<ChangeRecord>,
}

impl RunSummary {
    /// Logs one summary line plus every rejection and failure.
    pub fn log(&self) {
        for failure in &self.rejected {
            log::warn!("Rejected {failure}");
        }
        for failure in &self.failed {
            log::error!("Failed {failure}");
        }
        log::info!(
            "Run complete: {} read, {} validated, {} rejected, {} annotated, {} unchanged, {} failed, {} written",
            self.read,
            self.validated,
            self.rejected.len(),
            self.annotated,
            self.unchanged,
            self.failed.len(),
            self.written.len()
        );
    }
}

/// Makes sure the reference dataset is in the local cache.
///
/// # Errors
///
/// Returns [`PipelineError::Provisioning`] if the download fails.
pub async fn fetch_reference(config: &PipelineConfig) -> Result<PathBuf, PipelineError> {
    Ok(download::ensure_cached(&config.reference_url, &config.reference_cache)
        .await
        .map_err(GeoError::from)?)
}

/// Provisions and loads the reference boundaries in the canonical CRS.
///
/// # Errors
///
/// Returns [`PipelineError::Provisioning`] if the dataset cannot be
/// downloaded, read, or reprojected.
pub async fn load_boundaries(
    config: &PipelineConfig,
) -> Result<Vec<ReferenceBoundary>, PipelineError> {
    let path = fetch_reference(config).await?;
    let fields = config.reference_fields();
    let canonical = config.canonical_crs();

    let boundaries = tokio::task::spawn_blocking(move || {
        reference::load_reference(&path, &fields, canonical)
    })
    .await
    .map_err(|e| GeoError::Conversion {
        message: format!("reference loader task failed: {e}"),
    })??;

    log::info!("Loaded {} reference boundaries", boundaries.len());
    Ok(boundaries)
}

/// Runs the whole pipeline.
///
/// # Errors
///
/// Returns [`PipelineError`] if the configuration is invalid, the
/// reference dataset cannot be provisioned, the input directory cannot be
/// listed, or the store cannot be set up.
pub async fn run(
    config: &PipelineConfig,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<RunSummary, PipelineError> {
    config.validate()?;
    let boundaries = load_boundaries(config).await?;
    run_with_boundaries(config, boundaries, progress).await
}

/// Runs everything after reference provisioning.
///
/// # Errors
///
/// See [`run`].
pub async fn run_with_boundaries(
    config: &PipelineConfig,
    boundaries: Vec<ReferenceBoundary>,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<RunSummary, PipelineError> {
    config.validate()?;
    let workers = WorkerPool::new(config.workers)?;
    let engine =
        IntersectionEngine::new(config.area_threshold_sq_m).map_err(|e| PipelineError::Config {
            message: e.to_string(),
        })?;

    let mut summary = RunSummary::default();

    let (read, unreadable) = regions::read_regions_dir(&config.input_dir, &config.region_id_field)?;
    summary.read = read.len();
    summary
        .rejected
        .extend(unreadable.into_iter().map(|(path, e)| {
            let region_id = path
                .file_name()
                .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
            RegionFailure {
                region_id: region_id.clone(),
                error: PipelineError::Validation {
                    region_id,
                    reason: e.to_string(),
                },
            }
        }));

    let before = Snapshot::from_regions(&read)?;

    let (valid, rejections) = validate::validate_all(read, config.canonical_crs());
    summary.validated = valid.len();
    summary
        .rejected
        .extend(rejections.into_iter().map(|r| RegionFailure {
            region_id: r.region_id.clone(),
            error: PipelineError::Validation {
                region_id: r.region_id.clone(),
                reason: r.to_string(),
            },
        }));

    let mut conn = store::open(&config.database_path)?;
    let loaded_boundaries = store::replace_boundaries(&mut conn, store::COUNTIES, &boundaries)?;
    store::create_bbox_index(&conn, store::COUNTIES)?;
    let loaded_regions = store::replace_regions(&mut conn, store::REGIONS, &valid)?;
    store::create_bbox_index(&conn, store::REGIONS)?;
    log::info!("Stored {loaded_boundaries} boundaries and {loaded_regions} regions");

    let index = BoundaryIndex::new(store::query_boundaries(&conn, store::COUNTIES)?);
    if index.is_empty() {
        return Err(GeoError::Conversion {
            message: "reference dataset has no usable boundaries".to_string(),
        }
        .into());
    }

    let ctx = BatchContext {
        index: Arc::new(index),
        engine,
        pool: ConnectionPool::new(conn, workers.size())?,
        collection: store::REGIONS.to_string(),
    };

    let outcome = batch::process(valid, &ctx, &workers, progress).await;
    summary.annotated = outcome.annotated();
    summary.unchanged = outcome.unchanged();
    summary.failed = outcome.failed;

    let stored: BTreeMap<String, Region> = {
        let conn = ctx.pool.acquire().await?;
        store::query_regions(&conn, store::REGIONS)?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect()
    };

    let mut exported = Vec::with_capacity(outcome.succeeded.len());
    for completed in outcome.succeeded {
        let Some(region) = stored.get(&completed.region.id) else {
            summary.failed.push(export_failure(
                &completed.region.id,
                "region missing from store after annotation".to_string(),
            ));
            continue;
        };
        match regions::write_region(&config.output_dir, region) {
            Ok(path) => {
                summary.written.push(path);
                exported.push(region.clone());
            }
            Err(e) => summary
                .failed
                .push(export_failure(&region.id, e.to_string())),
        }
    }
    summary.failed.sort_by(|a, b| a.region_id.cmp(&b.region_id));
    ctx.pool.close();

    log::info!(
        "Wrote {} regions to {}",
        summary.written.len(),
        config.output_dir.display()
    );

    let after = Snapshot::from_regions(&exported)?;
    summary.changes = ava_county_diff::diff(&before, &after);
    report::log_report(&summary.changes);

    Ok(summary)
}

fn export_failure(region_id: &str, message: String) -> RegionFailure {
    RegionFailure {
        region_id: region_id.to_string(),
        error: PipelineError::Export {
            region_id: region_id.to_string(),
            message,
        },
    }
}
