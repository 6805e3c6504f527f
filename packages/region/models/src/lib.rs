#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Region, reference boundary, and annotation types.
//!
//! A [`Region`] is one AVA polygon read from its own `GeoJSON` file. A
//! [`ReferenceBoundary`] is one county polygon from the reference
//! dataset. Intersecting the two produces [`IntersectionResult`]s, which
//! reduce to a single [`Annotation`] label per region. [`ChangeRecord`]s
//! describe how a region differs between two snapshots.

pub mod crs;
pub mod progress;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use geo::{BoundingRect as _, MultiPolygon};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use crs::Crs;

/// Attribute key that carries the county annotation.
pub const COUNTY_ATTRIBUTE: &str = "county";

/// Separator between county names in an annotation label.
pub const LABEL_DELIMITER: &str = "|";

/// Open string-keyed attribute mapping for a region.
///
/// Arbitrary keys pass through untouched. The only key the pipeline
/// interprets is [`COUNTY_ATTRIBUTE`], exposed through [`Self::county`]
/// and [`Self::set_county`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(Map<String, Value>);

impl Attributes {
    /// Creates an empty attribute set.
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Returns the current county annotation, if it is a string.
    #[must_use]
    pub fn county(&self) -> Option<&str> {
        self.0.get(COUNTY_ATTRIBUTE).and_then(Value::as_str)
    }

    /// Overwrites the county annotation and returns the previous value.
    pub fn set_county(&mut self, label: &str) -> Option<Value> {
        self.0
            .insert(COUNTY_ATTRIBUTE.to_string(), Value::String(label.to_string()))
    }

    /// Returns the value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Inserts a value and returns the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    /// Iterates over all attributes.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set has no attributes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrows the underlying JSON object.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consumes the set, returning the underlying JSON object.
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Attributes {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// How a region's `GeoJSON` document was laid out on disk.
///
/// Exports reproduce the same layout so that annotated files differ from
/// their inputs only in attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentLayout {
    /// A `FeatureCollection` holding exactly one feature.
    FeatureCollection,
    /// A single `Feature` (also used for bare geometry documents).
    Feature,
}

impl DocumentLayout {
    /// Stable string form used in storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FeatureCollection => "feature_collection",
            Self::Feature => "feature",
        }
    }

    /// Parses the storage form. Unknown strings fall back to
    /// [`Self::FeatureCollection`].
    #[must_use]
    pub fn from_storage(s: &str) -> Self {
        match s {
            "feature" => Self::Feature,
            _ => Self::FeatureCollection,
        }
    }
}

/// Where a region came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Source file path, if the region was read from disk.
    pub source_path: Option<PathBuf>,
    /// When the region was loaded.
    pub loaded_at: DateTime<Utc>,
}

impl Provenance {
    /// Provenance for a region read from `path` just now.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: Some(path.into()),
            loaded_at: Utc::now(),
        }
    }

    /// Provenance for a region constructed in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            source_path: None,
            loaded_at: Utc::now(),
        }
    }
}

/// One AVA region.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// Identifier, unique within a run.
    pub id: String,
    /// Declared CRS. `None` when the document declares none.
    pub crs: Option<Crs>,
    /// Polygon or multi-polygon geometry, exactly as read.
    pub geometry: geojson::Geometry,
    /// Region attributes (the `GeoJSON` feature properties).
    pub attributes: Attributes,
    /// Feature-level `id` member, if the document had one.
    pub feature_id: Option<Value>,
    /// Document-level foreign members (e.g. `name`), including the raw
    /// `crs` member as read.
    pub document_members: Map<String, Value>,
    /// On-disk document layout.
    pub layout: DocumentLayout,
    /// Source path and load time.
    pub provenance: Provenance,
}

impl Region {
    /// Bounding box of the geometry as `[min_x, min_y, max_x, max_y]`.
    ///
    /// `None` when the geometry is empty or cannot be converted.
    #[must_use]
    pub fn bbox(&self) -> Option<[f64; 4]> {
        let geom: geo::Geometry<f64> = self.geometry.clone().try_into().ok()?;
        geom.bounding_rect()
            .map(|r| [r.min().x, r.min().y, r.max().x, r.max().y])
    }
}

/// One county (or other administrative unit) from the reference dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceBoundary {
    /// Stable key, e.g. the Census GEOID.
    pub id: String,
    /// Display name used in annotation labels.
    pub name: String,
    /// Geometry in the canonical CRS.
    pub geometry: MultiPolygon<f64>,
}

/// A region/boundary pair whose overlap met the area threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntersectionResult {
    /// Region identifier.
    pub region_id: String,
    /// Boundary identifier.
    pub boundary_id: String,
    /// Boundary name.
    pub boundary_name: String,
    /// Geodesic overlap area in square meters.
    pub area_sq_m: f64,
}

/// The canonical county label for a region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    /// Region identifier.
    pub region_id: String,
    /// Sorted, de-duplicated, `|`-joined boundary names. Empty when no
    /// intersection survived.
    pub label: String,
}

impl Annotation {
    /// Whether no intersection survived.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.label.is_empty()
    }
}

/// Kind of difference between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Region present only in the later snapshot.
    Added,
    /// Region present only in the earlier snapshot.
    Removed,
    /// Region present in both with a differing property.
    Changed,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Changed => "changed",
        })
    }
}

/// One difference between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// Region identifier.
    pub region_id: String,
    /// What kind of difference this is.
    pub kind: ChangeKind,
    /// Property name, for [`ChangeKind::Changed`].
    pub attribute: Option<String>,
    /// Previous value (`None` when the property was absent).
    pub old: Option<Value>,
    /// New value (`None` when the property was removed).
    pub new: Option<Value>,
}

impl ChangeRecord {
    /// A region that only exists in the later snapshot.
    #[must_use]
    pub fn added(region_id: impl Into<String>) -> Self {
        Self {
            region_id: region_id.into(),
            kind: ChangeKind::Added,
            attribute: None,
            old: None,
            new: None,
        }
    }

    /// A region that only exists in the earlier snapshot.
    #[must_use]
    pub fn removed(region_id: impl Into<String>) -> Self {
        Self {
            region_id: region_id.into(),
            kind: ChangeKind::Removed,
            attribute: None,
            old: None,
            new: None,
        }
    }

    /// A property that differs between snapshots.
    #[must_use]
    pub fn changed(
        region_id: impl Into<String>,
        attribute: impl Into<String>,
        old: Option<Value>,
        new: Option<Value>,
    ) -> Self {
        Self {
            region_id: region_id.into(),
            kind: ChangeKind::Changed,
            attribute: Some(attribute.into()),
            old,
            new,
        }
    }
}
