//! Reference boundary (county) dataset loading.
//!
//! Accepts a zip archive, a plain `GeoJSON` file, or a shapefile. Inside
//! an archive the first `.geojson`/`.json` entry wins; otherwise the
//! `.shp` set is extracted next to the archive and converted to `GeoJSON`
//! in EPSG:4326 with `ogr2ogr`. Every feature must carry a name and a
//! polygonal geometry: the run never proceeds on partial reference data.

use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use ava_county_region_models::{Crs, ReferenceBoundary};
use geojson::{GeoJson, feature::Id};
use serde_json::Value;

use crate::GeoError;
use crate::reproject::Reprojection;

/// Property names that identify and label each reference feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceFields {
    /// Property holding the stable boundary key.
    pub id_field: String,
    /// Property holding the display name.
    pub name_field: String,
}

impl Default for ReferenceFields {
    fn default() -> Self {
        Self {
            id_field: "GEOID".to_string(),
            name_field: "NAME".to_string(),
        }
    }
}

/// Loads the reference set from `path` and reprojects it to `canonical`.
///
/// # Errors
///
/// Returns [`GeoError`] if the source cannot be read or converted, any
/// feature lacks a name or polygonal geometry, the declared CRS cannot be
/// reprojected, or the set is empty.
pub fn load_reference(
    path: &Path,
    fields: &ReferenceFields,
    canonical: Crs,
) -> Result<Vec<ReferenceBoundary>, GeoError> {
    log::info!("Loading reference boundaries from {}", path.display());

    let text = match extension(path).as_deref() {
        Some("zip") => read_archive(path)?,
        Some("shp") => {
            let converted = convert_shapefile(path)?;
            std::fs::read_to_string(&converted).map_err(|e| GeoError::io(&converted, e))?
        }
        _ => std::fs::read_to_string(path).map_err(|e| GeoError::io(path, e))?,
    };

    let boundaries = parse_reference(&text, fields, canonical)?;
    log::info!("Loaded {} reference boundaries", boundaries.len());
    Ok(boundaries)
}

/// Parses a reference `FeatureCollection`.
///
/// A collection without a `crs` member is taken to be CRS84, the
/// `GeoJSON` default.
///
/// # Errors
///
/// See [`load_reference`].
pub fn parse_reference(
    text: &str,
    fields: &ReferenceFields,
    canonical: Crs,
) -> Result<Vec<ReferenceBoundary>, GeoError> {
    let GeoJson::FeatureCollection(fc) = text.parse::<GeoJson>()? else {
        return Err(GeoError::Conversion {
            message: "reference dataset must be a FeatureCollection".to_string(),
        });
    };

    let source_crs = match fc.foreign_members.as_ref().and_then(|m| m.get("crs")) {
        None => Crs::WGS84,
        Some(member) => {
            Crs::from_geojson_member(member).ok_or_else(|| GeoError::Conversion {
                message: format!("unrecognized reference CRS {member}"),
            })?
        }
    };
    let reprojection = Reprojection::between(source_crs, canonical)?;
    if reprojection != Reprojection::Identity {
        log::info!("Reprojecting reference boundaries from {source_crs} to {canonical}");
    }

    let mut boundaries = Vec::with_capacity(fc.features.len());

    for (index, feature) in fc.features.into_iter().enumerate() {
        let properties = feature.properties.unwrap_or_default();

        let name = properties
            .get(&fields.name_field)
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| GeoError::Conversion {
                message: format!(
                    "reference feature {index} has no {} property",
                    fields.name_field
                ),
            })?
            .to_string();

        let id = match properties.get(&fields.id_field) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => match feature.id {
                Some(Id::String(s)) => s,
                Some(Id::Number(n)) => n.to_string(),
                None => name.clone(),
            },
        };

        let geometry = feature.geometry.ok_or_else(|| GeoError::Conversion {
            message: format!("reference feature {id} ({name}) has no geometry"),
        })?;
        let geometry = ava_county_spatial::to_multipolygon(&geometry).map_err(|e| {
            GeoError::Conversion {
                message: format!("reference feature {id} ({name}): {e}"),
            }
        })?;

        boundaries.push(ReferenceBoundary {
            id,
            name,
            geometry: reprojection.apply(geometry),
        });
    }

    if boundaries.is_empty() {
        return Err(GeoError::Conversion {
            message: "reference dataset has no features".to_string(),
        });
    }

    Ok(boundaries)
}

fn read_archive(path: &Path) -> Result<String, GeoError> {
    let file = std::fs::File::open(path).map_err(|e| GeoError::io(path, e))?;
    let mut archive = zip::ZipArchive::new(file)?;

    let names: Vec<String> = archive.file_names().map(str::to_string).collect();

    if let Some(name) = names
        .iter()
        .find(|n| matches!(extension(Path::new(n)).as_deref(), Some("geojson" | "json")))
    {
        log::info!("  reading {name} from archive");
        let mut entry = archive.by_name(name)?;
        let mut text = String::new();
        entry
            .read_to_string(&mut text)
            .map_err(|e| GeoError::io(path, e))?;
        return Ok(text);
    }

    let Some(shp) = names
        .iter()
        .find(|n| extension(Path::new(n)).as_deref() == Some("shp"))
    else {
        return Err(GeoError::Conversion {
            message: format!("{} holds no GeoJSON or shapefile", path.display()),
        });
    };

    let stem = Path::new(shp)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let out_dir = path.with_extension("");
    std::fs::create_dir_all(&out_dir).map_err(|e| GeoError::io(&out_dir, e))?;

    for name in &names {
        let entry_path = Path::new(name);
        if entry_path.file_stem().and_then(|s| s.to_str()) != Some(stem.as_str()) {
            continue;
        }
        let Some(file_name) = entry_path.file_name() else {
            continue;
        };
        let target = out_dir.join(file_name);
        let mut entry = archive.by_name(name)?;
        let mut out = std::fs::File::create(&target).map_err(|e| GeoError::io(&target, e))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| GeoError::io(&target, e))?;
    }

    let converted = convert_shapefile(&out_dir.join(format!("{stem}.shp")))?;
    std::fs::read_to_string(&converted).map_err(|e| GeoError::io(&converted, e))
}

/// Converts a shapefile to a sibling `GeoJSON` file in EPSG:4326.
fn convert_shapefile(shp: &Path) -> Result<PathBuf, GeoError> {
    let output = shp.with_extension("geojson");
    if output.exists() {
        std::fs::remove_file(&output).map_err(|e| GeoError::io(&output, e))?;
    }

    log::info!("Running ogr2ogr to convert {}...", shp.display());

    let status = Command::new("ogr2ogr")
        .args(["-f", "GeoJSON", "-t_srs", "EPSG:4326"])
        .arg(&output)
        .arg(shp)
        .status()
        .map_err(|e| GeoError::io(Path::new("ogr2ogr"), e))?;

    if !status.success() {
        return Err(GeoError::Conversion {
            message: format!("ogr2ogr failed on {} ({status})", shp.display()),
        });
    }

    Ok(output)
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}
