//! One-region-per-file `GeoJSON` I/O.
//!
//! A region file is a `FeatureCollection` with exactly one feature, a
//! single `Feature`, or a bare geometry. The document shape, feature id,
//! and document-level members (including `crs`) are kept on the
//! [`Region`] so that [`write_region`] reproduces the input with only the
//! attributes changed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ava_county_region_models::{Attributes, Crs, DocumentLayout, Provenance, Region};
use geojson::{Feature, FeatureCollection, GeoJson, feature::Id};
use serde_json::{Map, Value};

use crate::GeoError;

/// Region files are recognized by these extensions (case-insensitive).
const REGION_EXTENSIONS: &[&str] = &["geojson", "json"];

/// Reads one region file.
///
/// The region id comes from the `id_field` property (string or number),
/// then the feature `id`, then the file stem.
///
/// # Errors
///
/// Returns [`GeoError`] if the file cannot be read, is not `GeoJSON`,
/// holds more or fewer than one feature, or has no geometry.
pub fn read_region(path: &Path, id_field: &str) -> Result<Region, GeoError> {
    let text = std::fs::read_to_string(path).map_err(|e| GeoError::io(path, e))?;
    let doc: GeoJson = text.parse()?;

    let (feature, mut document_members, layout) = match doc {
        GeoJson::FeatureCollection(fc) => {
            let count = fc.features.len();
            let Some(feature) = single(fc.features) else {
                return Err(GeoError::Conversion {
                    message: format!(
                        "{}: expected exactly one feature, found {count}",
                        path.display()
                    ),
                });
            };
            (
                feature,
                fc.foreign_members.unwrap_or_default(),
                DocumentLayout::FeatureCollection,
            )
        }
        GeoJson::Feature(mut feature) => {
            let members = feature.foreign_members.take().unwrap_or_default();
            (feature, members, DocumentLayout::Feature)
        }
        GeoJson::Geometry(mut geometry) => {
            let members = geometry.foreign_members.take().unwrap_or_default();
            (Feature::from(geometry), members, DocumentLayout::Feature)
        }
    };

    if let Some(inner) = &feature.foreign_members
        && !inner.is_empty()
    {
        log::debug!(
            "{}: feature-level members {:?} are not preserved",
            path.display(),
            inner.keys().collect::<Vec<_>>()
        );
    }

    let Some(geometry) = feature.geometry else {
        return Err(GeoError::Conversion {
            message: format!("{}: feature has no geometry", path.display()),
        });
    };

    let crs = crs_from_members(&document_members)
        .or_else(|| feature.foreign_members.as_ref().and_then(crs_from_members));
    if crs.is_some()
        && !document_members.contains_key("crs")
        && let Some(member) = feature
            .foreign_members
            .as_ref()
            .and_then(|m| m.get("crs"))
    {
        document_members.insert("crs".to_string(), member.clone());
    }

    let attributes = Attributes::from(feature.properties.unwrap_or_default());
    let feature_id = feature.id.map(|id| match id {
        Id::String(s) => Value::String(s),
        Id::Number(n) => Value::Number(n),
    });

    let id = id_from_value(attributes.get(id_field))
        .or_else(|| id_from_value(feature_id.as_ref()))
        .or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .ok_or_else(|| GeoError::Conversion {
            message: format!("{}: cannot derive a region id", path.display()),
        })?;

    Ok(Region {
        id,
        crs,
        geometry,
        attributes,
        feature_id,
        document_members,
        layout,
        provenance: Provenance::from_path(path),
    })
}

/// Reads every region file in `dir`, in file name order.
///
/// Unreadable files and duplicate ids are collected as failures instead
/// of aborting. The first file to claim an id keeps it.
///
/// # Errors
///
/// Returns [`GeoError`] only if the directory itself cannot be listed.
pub fn read_regions_dir(
    dir: &Path,
    id_field: &str,
) -> Result<(Vec<Region>, Vec<(PathBuf, GeoError)>), GeoError> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| GeoError::io(dir, e))? {
        let path = entry.map_err(|e| GeoError::io(dir, e))?.path();
        if path.is_file() && is_region_file(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut regions = Vec::with_capacity(paths.len());
    let mut failures = Vec::new();
    let mut seen = HashSet::new();

    for path in paths {
        match read_region(&path, id_field) {
            Ok(region) => {
                if seen.insert(region.id.clone()) {
                    regions.push(region);
                } else {
                    let message = format!("duplicate region id {}", region.id);
                    log::warn!("{}: {message}", path.display());
                    failures.push((path, GeoError::Conversion { message }));
                }
            }
            Err(e) => {
                log::warn!("Failed to read {}: {e}", path.display());
                failures.push((path, e));
            }
        }
    }

    log::info!(
        "Read {} regions from {} ({} failed)",
        regions.len(),
        dir.display(),
        failures.len()
    );

    Ok((regions, failures))
}

/// Writes a region into `dir` in its original document shape.
///
/// The file keeps the source file name, or `{id}.geojson` for regions
/// built in memory. Output is pretty-printed with a trailing newline.
///
/// # Errors
///
/// Returns [`GeoError`] if serialization or the write fails.
pub fn write_region(dir: &Path, region: &Region) -> Result<PathBuf, GeoError> {
    std::fs::create_dir_all(dir).map_err(|e| GeoError::io(dir, e))?;

    let file_name = region
        .provenance
        .source_path
        .as_deref()
        .and_then(Path::file_name)
        .map_or_else(
            || PathBuf::from(format!("{}.geojson", region.id)),
            PathBuf::from,
        );
    let path = dir.join(file_name);

    let mut text = serde_json::to_string_pretty(&to_geojson(region))?;
    text.push('\n');
    std::fs::write(&path, text).map_err(|e| GeoError::io(&path, e))?;

    Ok(path)
}

/// Builds the `GeoJSON` document for a region.
#[must_use]
pub fn to_geojson(region: &Region) -> GeoJson {
    let mut members = region.document_members.clone();
    if !members.contains_key("crs")
        && let Some(crs) = region.crs
    {
        members.insert("crs".to_string(), crs.to_geojson_member());
    }
    let members = (!members.is_empty()).then_some(members);

    let id = region.feature_id.as_ref().and_then(|v| match v {
        Value::String(s) => Some(Id::String(s.clone())),
        Value::Number(n) => Some(Id::Number(n.clone())),
        _ => None,
    });

    let mut feature = Feature {
        bbox: None,
        geometry: Some(region.geometry.clone()),
        id,
        properties: Some(region.attributes.as_map().clone()),
        foreign_members: None,
    };

    match region.layout {
        DocumentLayout::FeatureCollection => GeoJson::FeatureCollection(FeatureCollection {
            bbox: None,
            features: vec![feature],
            foreign_members: members,
        }),
        DocumentLayout::Feature => {
            feature.foreign_members = members;
            GeoJson::Feature(feature)
        }
    }
}

fn is_region_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            REGION_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

fn single<T>(items: Vec<T>) -> Option<T> {
    if items.len() == 1 {
        items.into_iter().next()
    } else {
        None
    }
}

fn crs_from_members(members: &Map<String, Value>) -> Option<Crs> {
    members.get("crs").and_then(Crs::from_geojson_member)
}

fn id_from_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "ava_county_regions_{name}_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    const NAPA_FC: &str = r#"{
        "type": "FeatureCollection",
        "name": "oak_knoll",
        "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:OGC:1.3:CRS84"}},
        "features": [{
            "type": "Feature",
            "properties": {"ava_id": "oak_knoll", "name": "Oak Knoll District", "county": "Napa"},
            "geometry": {"type": "Polygon", "coordinates": [[[-122.3, 38.3], [-122.2, 38.3], [-122.2, 38.4], [-122.3, 38.3]]]}
        }]
    }"#;

    #[test]
    fn reads_single_feature_collection() {
        let dir = temp_dir("fc");
        let path = dir.join("oak_knoll.geojson");
        std::fs::write(&path, NAPA_FC).unwrap();

        let region = read_region(&path, "ava_id").unwrap();

        assert_eq!(region.id, "oak_knoll");
        assert_eq!(region.crs, Some(Crs::WGS84));
        assert_eq!(region.layout, DocumentLayout::FeatureCollection);
        assert_eq!(region.attributes.county(), Some("Napa"));
        assert_eq!(
            region.document_members.get("name"),
            Some(&Value::String("oak_knoll".to_string()))
        );
        assert_eq!(region.provenance.source_path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn id_falls_back_to_feature_id_then_file_stem() {
        let dir = temp_dir("ids");
        let with_id = dir.join("a.geojson");
        std::fs::write(
            &with_id,
            r#"{"type": "Feature", "id": 7, "properties": {},
                "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]}}"#,
        )
        .unwrap();
        let bare = dir.join("stags_leap.json");
        std::fs::write(
            &bare,
            r#"{"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]}"#,
        )
        .unwrap();

        assert_eq!(read_region(&with_id, "ava_id").unwrap().id, "7");
        let bare_region = read_region(&bare, "ava_id").unwrap();
        assert_eq!(bare_region.id, "stags_leap");
        assert_eq!(bare_region.crs, None);
        assert_eq!(bare_region.layout, DocumentLayout::Feature);
    }

    #[test]
    fn multi_feature_collection_is_rejected() {
        let dir = temp_dir("multi");
        let path = dir.join("two.geojson");
        std::fs::write(
            &path,
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "properties": {}, "geometry": null},
                {"type": "Feature", "properties": {}, "geometry": null}
            ]}"#,
        )
        .unwrap();

        let err = read_region(&path, "ava_id").unwrap_err();
        assert!(err.to_string().contains("exactly one feature"), "{err}");
    }

    #[test]
    fn directory_read_reports_duplicates_and_skips_other_files() {
        let dir = temp_dir("dir");
        std::fs::write(dir.join("a.geojson"), NAPA_FC).unwrap();
        std::fs::write(dir.join("b.geojson"), NAPA_FC).unwrap();
        std::fs::write(dir.join("broken.json"), "{not json").unwrap();
        std::fs::write(dir.join("README.md"), "# regions").unwrap();

        let (regions, failures) = read_regions_dir(&dir, "ava_id").unwrap();

        assert_eq!(regions.len(), 1);
        assert_eq!(
            regions[0].provenance.source_path.as_deref(),
            Some(dir.join("a.geojson").as_path())
        );
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().any(|(p, _)| p.ends_with("b.geojson")));
        assert!(failures.iter().any(|(p, _)| p.ends_with("broken.json")));
    }

    #[test]
    fn written_region_reads_back_identically() {
        let input = temp_dir("roundtrip_in");
        let output = temp_dir("roundtrip_out");
        std::fs::write(input.join("oak_knoll.geojson"), NAPA_FC).unwrap();

        let mut region = read_region(&input.join("oak_knoll.geojson"), "ava_id").unwrap();
        region.attributes.set_county("Napa|Sonoma");
        let written = write_region(&output, &region).unwrap();
        assert_eq!(written, output.join("oak_knoll.geojson"));

        let back = read_region(&written, "ava_id").unwrap();
        assert_eq!(back.id, region.id);
        assert_eq!(back.crs, region.crs);
        assert_eq!(back.geometry, region.geometry);
        assert_eq!(back.attributes, region.attributes);
        assert_eq!(back.document_members, region.document_members);
        assert_eq!(back.layout, DocumentLayout::FeatureCollection);

        let text = std::fs::read_to_string(&written).unwrap();
        assert!(text.ends_with('\n'));
        assert!(text.contains("urn:ogc:def:crs:OGC:1.3:CRS84"));
    }

    #[test]
    fn rewriting_is_byte_stable() {
        let dir = temp_dir("stable");
        std::fs::write(dir.join("oak_knoll.geojson"), NAPA_FC).unwrap();
        let region = read_region(&dir.join("oak_knoll.geojson"), "ava_id").unwrap();

        let first = write_region(&dir.join("one"), &region).unwrap();
        let reread = read_region(&first, "ava_id").unwrap();
        let second = write_region(&dir.join("two"), &reread).unwrap();

        assert_eq!(
            std::fs::read_to_string(first).unwrap(),
            std::fs::read_to_string(second).unwrap()
        );
    }
}
