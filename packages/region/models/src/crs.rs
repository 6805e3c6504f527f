//! Coordinate reference system identifiers.
//!
//! Only EPSG codes are modeled. `GeoJSON` documents declare their CRS with
//! a `crs` member of type `name`; the accepted spellings are the EPSG
//! short form, the OGC URN forms, the OGC HTTP URI form, and `CRS84`
//! (which is EPSG:4326 with longitude/latitude axis order, the `GeoJSON`
//! default).

use serde::{Deserialize, Serialize};

/// An EPSG-coded coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Crs {
    epsg: u32,
}

impl Crs {
    /// WGS 84 geographic coordinates.
    pub const WGS84: Self = Self::epsg(4326);

    /// NAD83 geographic coordinates (Census TIGER/Line native CRS).
    pub const NAD83: Self = Self::epsg(4269);

    /// Spherical Web Mercator.
    pub const WEB_MERCATOR: Self = Self::epsg(3857);

    /// Creates a CRS from an EPSG code.
    #[must_use]
    pub const fn epsg(epsg: u32) -> Self {
        Self { epsg }
    }

    /// Returns the EPSG code.
    #[must_use]
    pub const fn code(self) -> u32 {
        self.epsg
    }

    /// Parses a CRS name such as `EPSG:4326` or
    /// `urn:ogc:def:crs:EPSG::4326`.
    ///
    /// Returns `None` for names that do not identify an EPSG code.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        let upper = name.to_ascii_uppercase();

        if upper == "CRS84" || upper.ends_with(":CRS84") || upper.ends_with("/CRS84") {
            return Some(Self::WGS84);
        }

        let code = if let Some(rest) = upper.strip_prefix("EPSG:") {
            rest
        } else if upper.starts_with("URN:OGC:DEF:CRS:EPSG:") {
            // urn:ogc:def:crs:EPSG::4326 or urn:ogc:def:crs:EPSG:6.6:4326
            upper.rsplit(':').next()?
        } else if upper.contains("OPENGIS.NET/DEF/CRS/EPSG/") {
            upper.trim_end_matches('/').rsplit('/').next()?
        } else {
            return None;
        };

        code.parse::<u32>().ok().map(Self::epsg)
    }

    /// Reads the CRS declared by a `GeoJSON` `crs` member.
    ///
    /// Only `{"type": "name", "properties": {"name": ...}}` members are
    /// understood. Linked CRS members yield `None`.
    #[must_use]
    pub fn from_geojson_member(member: &serde_json::Value) -> Option<Self> {
        if member.get("type").and_then(serde_json::Value::as_str) != Some("name") {
            return None;
        }
        member
            .get("properties")
            .and_then(|p| p.get("name"))
            .and_then(serde_json::Value::as_str)
            .and_then(Self::parse)
    }

    /// Builds the `GeoJSON` `crs` member for this CRS in OGC URN form.
    #[must_use]
    pub fn to_geojson_member(self) -> serde_json::Value {
        serde_json::json!({
            "type": "name",
            "properties": {
                "name": format!("urn:ogc:def:crs:EPSG::{}", self.epsg),
            },
        })
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}
