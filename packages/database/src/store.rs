//! Named feature collections in `DuckDB`.
//!
//! Geometry is stored as `GeoJSON` TEXT next to four bounding-box columns
//! (no spatial extension). Region collections also carry everything
//! needed to rebuild the region's source document.

use std::path::{Path, PathBuf};

use ava_county_region_models::{
    Attributes, Crs, DocumentLayout, Provenance, ReferenceBoundary, Region,
};
use chrono::{DateTime, Utc};
use duckdb::Connection;
use geo::BoundingRect as _;
use serde_json::{Map, Value};

use crate::DbError;

/// Collection holding the AVA regions.
pub const REGIONS: &str = "regions";

/// Collection holding the reference county boundaries.
pub const COUNTIES: &str = "counties";

const REGION_COLUMNS: &str = "id, geometry_geojson, attributes_json, crs, layout, \
     feature_id_json, document_members_json, source_path, loaded_at, \
     min_x, min_y, max_x, max_y";

const BOUNDARY_COLUMNS: &str = "id, name, geometry_geojson, min_x, min_y, max_x, max_y";

/// Opens (or creates) the database file.
///
/// # Errors
///
/// Returns [`DbError`] if the parent directory or the connection cannot
/// be created.
pub fn open(path: &Path) -> Result<Connection, DbError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        crate::paths::ensure_dir(parent)?;
    }

    let conn = Connection::open(path)?;
    log::info!("Opened database {}", path.display());
    Ok(conn)
}

/// Opens a private in-memory database.
///
/// # Errors
///
/// Returns [`DbError`] if `DuckDB` cannot start.
pub fn open_in_memory() -> Result<Connection, DbError> {
    Ok(Connection::open_in_memory()?)
}

fn check_collection(name: &str) -> Result<(), DbError> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(DbError::Conversion {
            message: format!("invalid collection name {name:?}"),
        })
    }
}

fn create_region_table(conn: &Connection, collection: &str) -> Result<(), DbError> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {collection} (
            id TEXT PRIMARY KEY,
            geometry_geojson TEXT NOT NULL,
            attributes_json TEXT NOT NULL,
            crs INTEGER,
            layout TEXT NOT NULL,
            feature_id_json TEXT,
            document_members_json TEXT NOT NULL,
            source_path TEXT,
            loaded_at TEXT NOT NULL,
            min_x DOUBLE,
            min_y DOUBLE,
            max_x DOUBLE,
            max_y DOUBLE
        );"
    ))?;
    Ok(())
}

fn create_boundary_table(conn: &Connection, collection: &str) -> Result<(), DbError> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {collection} (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            geometry_geojson TEXT NOT NULL,
            min_x DOUBLE,
            min_y DOUBLE,
            max_x DOUBLE,
            max_y DOUBLE
        );"
    ))?;
    Ok(())
}

/// Appends regions to a collection, creating it if needed.
///
/// Ids must not already exist in the collection.
///
/// # Errors
///
/// Returns [`DbError`] on an invalid collection name, a duplicate id, or
/// any insert failure.
pub fn bulk_load_regions(
    conn: &Connection,
    collection: &str,
    regions: &[Region],
) -> Result<u64, DbError> {
    check_collection(collection)?;
    create_region_table(conn, collection)?;
    insert_regions(conn, collection, regions)
}

/// Appends boundaries to a collection, creating it if needed.
///
/// # Errors
///
/// Returns [`DbError`] on an invalid collection name, a duplicate id, or
/// any insert failure.
pub fn bulk_load_boundaries(
    conn: &Connection,
    collection: &str,
    boundaries: &[ReferenceBoundary],
) -> Result<u64, DbError> {
    check_collection(collection)?;
    create_boundary_table(conn, collection)?;
    insert_boundaries(conn, collection, boundaries)
}

/// Replaces a region collection's contents in one transaction.
///
/// The table is dropped and recreated, which also drops any bounding-box
/// index; call [`create_bbox_index`] afterwards.
///
/// # Errors
///
/// Returns [`DbError`] if any step fails. Nothing changes on failure.
pub fn replace_regions(
    conn: &mut Connection,
    collection: &str,
    regions: &[Region],
) -> Result<u64, DbError> {
    check_collection(collection)?;
    let tx = conn.transaction()?;
    tx.execute_batch(&format!("DROP TABLE IF EXISTS {collection};"))?;
    create_region_table(&tx, collection)?;
    let count = insert_regions(&tx, collection, regions)?;
    tx.commit()?;
    log::info!("Replaced {collection} with {count} regions");
    Ok(count)
}

/// Replaces a boundary collection's contents in one transaction.
///
/// # Errors
///
/// Returns [`DbError`] if any step fails. Nothing changes on failure.
pub fn replace_boundaries(
    conn: &mut Connection,
    collection: &str,
    boundaries: &[ReferenceBoundary],
) -> Result<u64, DbError> {
    check_collection(collection)?;
    let tx = conn.transaction()?;
    tx.execute_batch(&format!("DROP TABLE IF EXISTS {collection};"))?;
    create_boundary_table(&tx, collection)?;
    let count = insert_boundaries(&tx, collection, boundaries)?;
    tx.commit()?;
    log::info!("Replaced {collection} with {count} boundaries");
    Ok(count)
}

/// Creates an index over the bounding-box columns of a collection.
///
/// # Errors
///
/// Returns [`DbError`] if the collection does not exist.
pub fn create_bbox_index(conn: &Connection, collection: &str) -> Result<(), DbError> {
    check_collection(collection)?;
    conn.execute_batch(&format!(
        "CREATE INDEX IF NOT EXISTS {collection}_bbox_idx \
         ON {collection} (min_x, min_y, max_x, max_y);"
    ))?;
    Ok(())
}

/// Number of rows in a collection.
///
/// # Errors
///
/// Returns [`DbError`] if the collection does not exist.
pub fn count(conn: &Connection, collection: &str) -> Result<u64, DbError> {
    check_collection(collection)?;
    let n: i64 = conn
        .prepare(&format!("SELECT COUNT(*) FROM {collection}"))?
        .query_row([], |row| row.get(0))?;
    Ok(u64::try_from(n).unwrap_or(0))
}

/// Reads every region in a collection, ordered by id.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a stored column cannot be
/// decoded.
pub fn query_regions(conn: &Connection, collection: &str) -> Result<Vec<Region>, DbError> {
    check_collection(collection)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {REGION_COLUMNS} FROM {collection} ORDER BY id"
    ))?;
    let mut rows = stmt.query([])?;
    let mut regions = Vec::new();

    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        let geometry_json: String = row.get(1)?;
        let attributes_json: String = row.get(2)?;
        let crs: Option<i64> = row.get(3)?;
        let layout: String = row.get(4)?;
        let feature_id_json: Option<String> = row.get(5)?;
        let members_json: String = row.get(6)?;
        let source_path: Option<String> = row.get(7)?;
        let loaded_at: String = row.get(8)?;

        let loaded_at = DateTime::parse_from_rfc3339(&loaded_at)
            .map_err(|e| DbError::Conversion {
                message: format!("region {id}: bad loaded_at {loaded_at:?}: {e}"),
            })?
            .with_timezone(&Utc);

        let crs = crs
            .map(|code| {
                u32::try_from(code).map(Crs::epsg).map_err(|_| DbError::Conversion {
                    message: format!("region {id}: bad EPSG code {code}"),
                })
            })
            .transpose()?;

        regions.push(Region {
            geometry: serde_json::from_str(&geometry_json)?,
            attributes: serde_json::from_str(&attributes_json)?,
            crs,
            layout: DocumentLayout::from_storage(&layout),
            feature_id: feature_id_json
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            document_members: serde_json::from_str::<Map<String, Value>>(&members_json)?,
            provenance: Provenance {
                source_path: source_path.map(PathBuf::from),
                loaded_at,
            },
            id,
        });
    }

    Ok(regions)
}

/// Reads every boundary in a collection, ordered by id.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a stored geometry is not a
/// polygon or multi-polygon.
pub fn query_boundaries(
    conn: &Connection,
    collection: &str,
) -> Result<Vec<ReferenceBoundary>, DbError> {
    check_collection(collection)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT id, name, geometry_geojson FROM {collection} ORDER BY id"
    ))?;
    let mut rows = stmt.query([])?;
    let mut boundaries = Vec::new();

    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        let name: String = row.get(1)?;
        let geometry_json: String = row.get(2)?;

        let geometry: geo::Geometry<f64> = serde_json::from_str::<geojson::Geometry>(&geometry_json)?
            .try_into()
            .map_err(|e: geojson::Error| DbError::Conversion {
                message: format!("boundary {id}: {e}"),
            })?;
        let geometry = match geometry {
            geo::Geometry::Polygon(p) => geo::MultiPolygon::new(vec![p]),
            geo::Geometry::MultiPolygon(mp) => mp,
            _ => {
                return Err(DbError::Conversion {
                    message: format!("boundary {id}: stored geometry is not polygonal"),
                });
            }
        };

        boundaries.push(ReferenceBoundary { id, name, geometry });
    }

    Ok(boundaries)
}

/// Overwrites one region's attributes inside a transaction.
///
/// # Errors
///
/// Returns [`DbError`] if the region is not in the collection or the
/// update fails. The transaction is rolled back on any error.
pub fn update_region_attributes(
    conn: &mut Connection,
    collection: &str,
    region_id: &str,
    attributes: &Attributes,
) -> Result<(), DbError> {
    check_collection(collection)?;
    let json = serde_json::to_string(attributes)?;

    let tx = conn.transaction()?;
    let updated = tx.execute(
        &format!("UPDATE {collection} SET attributes_json = ? WHERE id = ?"),
        duckdb::params![json, region_id],
    )?;

    if updated == 0 {
        return Err(DbError::Conversion {
            message: format!("region {region_id} not found in {collection}"),
        });
    }

    tx.commit()?;
    Ok(())
}

fn insert_regions(conn: &Connection, collection: &str, regions: &[Region]) -> Result<u64, DbError> {
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {collection} ({REGION_COLUMNS}) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))?;

    let mut total = 0u64;

    for region in regions {
        let bbox = region.bbox();
        let feature_id = region
            .feature_id
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let source_path = region
            .provenance
            .source_path
            .as_ref()
            .map(|p| p.display().to_string());

        let rows = stmt.execute(duckdb::params![
            region.id,
            serde_json::to_string(&region.geometry)?,
            serde_json::to_string(&region.attributes)?,
            region.crs.map(|c| i64::from(c.code())),
            region.layout.as_str(),
            feature_id,
            serde_json::to_string(&region.document_members)?,
            source_path,
            region.provenance.loaded_at.to_rfc3339(),
            bbox.map(|b| b[0]),
            bbox.map(|b| b[1]),
            bbox.map(|b| b[2]),
            bbox.map(|b| b[3]),
        ])?;
        total += u64::try_from(rows).unwrap_or(0);
    }

    Ok(total)
}

fn insert_boundaries(
    conn: &Connection,
    collection: &str,
    boundaries: &[ReferenceBoundary],
) -> Result<u64, DbError> {
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {collection} ({BOUNDARY_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
    ))?;

    let mut total = 0u64;

    for boundary in boundaries {
        let geometry = geojson::Geometry::new(geojson::Value::from(&boundary.geometry));
        let rect = boundary.geometry.bounding_rect();

        let rows = stmt.execute(duckdb::params![
            boundary.id,
            boundary.name,
            serde_json::to_string(&geometry)?,
            rect.map(|r| r.min().x),
            rect.map(|r| r.min().y),
            rect.map(|r| r.max().x),
            rect.map(|r| r.max().y),
        ])?;
        total += u64::try_from(rows).unwrap_or(0);
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use geo::{Rect, coord};

    use super::*;

    fn region(id: &str, county: Option<&str>) -> Region {
        let mut attributes = Attributes::new();
        attributes.insert("name", Value::String(format!("{id} AVA")));
        if let Some(county) = county {
            attributes.set_county(county);
        }
        let mut members = Map::new();
        members.insert("name".to_string(), Value::String(id.to_string()));

        Region {
            id: id.to_string(),
            crs: Some(Crs::WGS84),
            geometry: geojson::Geometry::new(geojson::Value::Polygon(vec![vec![
                vec![-122.4, 38.3],
                vec![-122.2, 38.3],
                vec![-122.2, 38.5],
                vec![-122.4, 38.3],
            ]])),
            attributes,
            feature_id: Some(Value::from(7)),
            document_members: members,
            layout: DocumentLayout::FeatureCollection,
            provenance: Provenance::from_path(format!("data/avas/{id}.geojson")),
        }
    }

    fn county(id: &str, name: &str) -> ReferenceBoundary {
        ReferenceBoundary {
            id: id.to_string(),
            name: name.to_string(),
            geometry: geo::MultiPolygon::new(vec![
                Rect::new(coord! { x: -123.0, y: 38.0 }, coord! { x: -122.0, y: 39.0 })
                    .to_polygon(),
            ]),
        }
    }

    #[test]
    fn regions_roundtrip_through_collection() {
        let conn = open_in_memory().unwrap();
        let input = vec![region("b", Some("Napa")), region("a", None)];

        assert_eq!(bulk_load_regions(&conn, REGIONS, &input).unwrap(), 2);
        create_bbox_index(&conn, REGIONS).unwrap();

        let out = query_regions(&conn, REGIONS).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], input[1]);
        assert_eq!(out[1], input[0]);
    }

    #[test]
    fn boundaries_roundtrip_through_collection() {
        let conn = open_in_memory().unwrap();
        let input = vec![county("06055", "Napa"), county("06097", "Sonoma")];

        bulk_load_boundaries(&conn, COUNTIES, &input).unwrap();
        assert_eq!(count(&conn, COUNTIES).unwrap(), 2);
        assert_eq!(query_boundaries(&conn, COUNTIES).unwrap(), input);
    }

    #[test]
    fn bulk_load_rejects_duplicate_ids() {
        let conn = open_in_memory().unwrap();
        bulk_load_regions(&conn, REGIONS, &[region("a", None)]).unwrap();
        assert!(bulk_load_regions(&conn, REGIONS, &[region("a", None)]).is_err());
    }

    #[test]
    fn replace_discards_previous_contents() {
        let mut conn = open_in_memory().unwrap();
        replace_regions(&mut conn, REGIONS, &[region("a", None), region("b", None)]).unwrap();
        create_bbox_index(&conn, REGIONS).unwrap();
        replace_regions(&mut conn, REGIONS, &[region("c", None)]).unwrap();
        create_bbox_index(&conn, REGIONS).unwrap();

        let ids: Vec<String> = query_regions(&conn, REGIONS)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["c".to_string()]);
    }

    #[test]
    fn failed_replace_keeps_previous_contents() {
        let mut conn = open_in_memory().unwrap();
        replace_regions(&mut conn, REGIONS, &[region("a", None)]).unwrap();

        let duplicate = vec![region("x", None), region("x", None)];
        assert!(replace_regions(&mut conn, REGIONS, &duplicate).is_err());

        let ids: Vec<String> = query_regions(&conn, REGIONS)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["a".to_string()]);
    }

    #[test]
    fn attribute_update_touches_one_region() {
        let mut conn = open_in_memory().unwrap();
        replace_regions(&mut conn, REGIONS, &[region("a", None), region("b", None)]).unwrap();
        create_bbox_index(&conn, REGIONS).unwrap();

        let mut attrs = region("a", None).attributes;
        attrs.set_county("Lake|Napa");
        update_region_attributes(&mut conn, REGIONS, "a", &attrs).unwrap();

        let out = query_regions(&conn, REGIONS).unwrap();
        assert_eq!(out[0].attributes.county(), Some("Lake|Napa"));
        assert_eq!(out[1].attributes.county(), None);
    }

    #[test]
    fn attribute_update_of_missing_region_fails() {
        let mut conn = open_in_memory().unwrap();
        replace_regions(&mut conn, REGIONS, &[region("a", None)]).unwrap();

        let err = update_region_attributes(&mut conn, REGIONS, "zzz", &Attributes::new())
            .unwrap_err();
        assert!(err.to_string().contains("zzz"), "{err}");
    }

    #[test]
    fn collection_names_must_be_identifiers() {
        let conn = open_in_memory().unwrap();
        assert!(bulk_load_regions(&conn, "regions; DROP TABLE x", &[]).is_err());
        assert!(query_boundaries(&conn, "").is_err());
        assert!(count(&conn, "1abc").is_err());
    }
}
