#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Change detection between two sets of regions.
//!
//! A [`Snapshot`] holds, per region id, the canonicalized attributes and
//! the geometry's coordinates. [`diff`] compares two snapshots and emits
//! one [`ChangeRecord`] per added region, removed region, and differing
//! top-level property. Key order inside attributes never matters.

pub mod report;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use ava_county_geography::GeoError;
use ava_county_region_models::{ChangeRecord, Region};
use serde_json::{Map, Value};

/// Property name used for geometry changes.
pub const GEOMETRY_PROPERTY: &str = "geometry";

/// Errors that can occur while building snapshots.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// Reading region files failed.
    #[error("Geography error: {0}")]
    Geo(#[from] GeoError),

    /// A region's geometry could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One region as seen by the change detector.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    properties: Map<String, Value>,
    geometry: Value,
}

/// Region id to comparable content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: BTreeMap<String, Entry>,
}

impl Snapshot {
    /// Builds a snapshot from in-memory regions.
    ///
    /// # Errors
    ///
    /// Returns [`DiffError::Json`] if a geometry cannot be serialized.
    pub fn from_regions(regions: &[Region]) -> Result<Self, DiffError> {
        let mut entries = BTreeMap::new();

        for region in regions {
            let Value::Object(properties) =
                canonicalize(Value::Object(region.attributes.as_map().clone()))
            else {
                continue;
            };
            entries.insert(
                region.id.clone(),
                Entry {
                    properties,
                    geometry: geometry_coordinates(&region.geometry)?,
                },
            );
        }

        Ok(Self { entries })
    }

    /// Reads every region file in `dir` into a snapshot.
    ///
    /// Files that fail to parse are logged and left out.
    ///
    /// # Errors
    ///
    /// Returns [`DiffError`] if the directory cannot be listed.
    pub fn from_dir(dir: &Path, id_field: &str) -> Result<Self, DiffError> {
        let (regions, failures) = ava_county_geography::regions::read_regions_dir(dir, id_field)?;
        for (path, e) in &failures {
            log::warn!("Snapshot of {} skips {}: {e}", dir.display(), path.display());
        }
        Self::from_regions(&regions)
    }

    /// Number of regions in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot holds no regions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Region ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Recursively rebuilds every object with its keys in ascending order.
#[must_use]
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Compares two snapshots.
///
/// Records come out sorted by region id, then kind, then property name.
#[must_use]
pub fn diff(before: &Snapshot, after: &Snapshot) -> Vec<ChangeRecord> {
    let ids: BTreeSet<&String> = before.entries.keys().chain(after.entries.keys()).collect();
    let mut records = Vec::new();

    for id in ids {
        match (before.entries.get(id), after.entries.get(id)) {
            (None, Some(_)) => records.push(ChangeRecord::added(id.as_str())),
            (Some(_), None) => records.push(ChangeRecord::removed(id.as_str())),
            (Some(old), Some(new)) => diff_entry(id, old, new, &mut records),
            (None, None) => {}
        }
    }

    records.sort_by(|a, b| {
        (&a.region_id, a.kind, &a.attribute).cmp(&(&b.region_id, b.kind, &b.attribute))
    });
    records
}

fn diff_entry(id: &str, old: &Entry, new: &Entry, records: &mut Vec<ChangeRecord>) {
    let keys: BTreeSet<&String> = old.properties.keys().chain(new.properties.keys()).collect();

    for key in keys {
        let before = old.properties.get(key);
        let after = new.properties.get(key);
        if before != after {
            records.push(ChangeRecord::changed(
                id,
                key.as_str(),
                before.cloned(),
                after.cloned(),
            ));
        }
    }

    if old.geometry != new.geometry {
        records.push(ChangeRecord::changed(
            id,
            GEOMETRY_PROPERTY,
            Some(old.geometry.clone()),
            Some(new.geometry.clone()),
        ));
    }
}

/// Geometry type and coordinates only; `bbox` and foreign members are
/// not part of the comparison.
fn geometry_coordinates(geometry: &geojson::Geometry) -> Result<Value, DiffError> {
    let Value::Object(mut map) = serde_json::to_value(geometry)? else {
        return Ok(Value::Null);
    };
    map.retain(|k, _| matches!(k.as_str(), "type" | "coordinates" | "geometries"));
    Ok(canonicalize(Value::Object(map)))
}

#[cfg(test)]
mod tests {
    use ava_county_region_models::{Attributes, ChangeKind, DocumentLayout, Provenance};
    use serde_json::json;

    use super::*;

    fn region(id: &str, properties: Value) -> Region {
        let Value::Object(map) = properties else {
            panic!("properties must be an object");
        };
        Region {
            id: id.to_string(),
            crs: None,
            geometry: geojson::Geometry::new(geojson::Value::Polygon(vec![vec![
                vec![0.0, 0.0],
                vec![1.0, 0.0],
                vec![1.0, 1.0],
                vec![0.0, 0.0],
            ]])),
            attributes: Attributes::from(map),
            feature_id: None,
            document_members: Map::new(),
            layout: DocumentLayout::FeatureCollection,
            provenance: Provenance::in_memory(),
        }
    }

    fn snapshot(regions: &[Region]) -> Snapshot {
        Snapshot::from_regions(regions).unwrap()
    }

    #[test]
    fn new_county_attribute_is_one_change() {
        let before = snapshot(&[region("X", json!({"name": "X AVA"}))]);
        let after = snapshot(&[region("X", json!({"name": "X AVA", "county": "Alpha|Beta"}))]);

        let records = diff(&before, &after);

        assert_eq!(
            records,
            vec![ChangeRecord {
                region_id: "X".to_string(),
                kind: ChangeKind::Changed,
                attribute: Some("county".to_string()),
                old: None,
                new: Some(json!("Alpha|Beta")),
            }]
        );
    }

    #[test]
    fn identical_snapshots_have_no_changes() {
        let regions = [
            region("a", json!({"county": "Napa"})),
            region("b", json!({"county": "Lake|Napa"})),
        ];
        assert!(diff(&snapshot(&regions), &snapshot(&regions)).is_empty());
    }

    #[test]
    fn key_order_does_not_matter() {
        let before = snapshot(&[region(
            "a",
            json!({"name": "A", "meta": {"x": 1, "y": [{"q": 1, "p": 2}]}}),
        )]);
        let after = snapshot(&[region(
            "a",
            json!({"meta": {"y": [{"p": 2, "q": 1}], "x": 1}, "name": "A"}),
        )]);
        assert!(diff(&before, &after).is_empty());
    }

    #[test]
    fn added_and_removed_regions() {
        let before = snapshot(&[region("gone", json!({})), region("kept", json!({}))]);
        let after = snapshot(&[region("kept", json!({})), region("new", json!({}))]);

        let records = diff(&before, &after);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0], ChangeRecord::removed("gone"));
        assert_eq!(records[1], ChangeRecord::added("new"));
    }

    #[test]
    fn removed_property_has_no_new_value() {
        let before = snapshot(&[region("a", json!({"county": "Napa", "name": "A"}))]);
        let after = snapshot(&[region("a", json!({"name": "A"}))]);

        let records = diff(&before, &after);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attribute.as_deref(), Some("county"));
        assert_eq!(records[0].old, Some(json!("Napa")));
        assert_eq!(records[0].new, None);
    }

    #[test]
    fn geometry_change_only_on_coordinates() {
        let a = region("a", json!({}));
        let mut with_bbox = a.clone();
        with_bbox.geometry.bbox = Some(vec![0.0, 0.0, 1.0, 1.0]);
        assert!(diff(&snapshot(&[a.clone()]), &snapshot(&[with_bbox])).is_empty());

        let mut moved = a.clone();
        moved.geometry = geojson::Geometry::new(geojson::Value::Polygon(vec![vec![
            vec![0.0, 0.0],
            vec![2.0, 0.0],
            vec![2.0, 2.0],
            vec![0.0, 0.0],
        ]]));
        let records = diff(&snapshot(&[a]), &snapshot(&[moved]));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attribute.as_deref(), Some(GEOMETRY_PROPERTY));
    }

    #[test]
    fn canonicalize_sorts_nested_keys() {
        let value = canonicalize(json!({"b": {"d": 1, "c": 2}, "a": [ {"z": 0, "y": 1} ]}));
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"{"a":[{"y":1,"z":0}],"b":{"c":2,"d":1}}"#
        );
    }
}
