// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Geometry values as they live inside SQLite.
//!
//! Geometry columns hold extended WKT text (`SRID=4326;POLYGON((...))`).
//! The spatial SQL functions decode that text into `geo` types on demand.

use geo::{Area, BooleanOps, Intersects};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value as JsonValue, json};
use wkt::ToWkt;

use crate::error::{Error, Result};
use crate::field::GeometryType;

const SRID_PREFIX: &str = "SRID=";

/// A decoded geometry together with its spatial reference id
#[derive(Debug, Clone, PartialEq)]
pub struct StoredGeometry {
    pub srid: i32,
    pub geometry: geo::Geometry<f64>,
}

impl StoredGeometry {
    pub fn new(geometry: geo::Geometry<f64>, srid: i32) -> Self {
        Self { srid, geometry }
    }

    /// Parse plain WKT and tag it with `srid`
    pub fn from_wkt(text: &str, srid: i32) -> Result<Self> {
        Ok(Self::new(parse_wkt(text)?, srid))
    }

    /// Parse the stored representation. Plain WKT without an SRID tag is
    /// accepted and assigned SRID 0.
    pub fn decode(text: &str) -> Result<Self> {
        let text = text.trim();
        match text.strip_prefix(SRID_PREFIX) {
            Some(rest) => {
                let (srid, body) = rest
                    .split_once(';')
                    .ok_or_else(|| Error::geometry(format!("Malformed EWKT: {}", text)))?;
                let srid = srid
                    .trim()
                    .parse::<i32>()
                    .map_err(|_| Error::geometry(format!("Malformed SRID in: {}", text)))?;
                Self::from_wkt(body, srid)
            }
            None => Self::from_wkt(text, 0),
        }
    }

    /// Stored representation
    pub fn encode(&self) -> String {
        format!("{}{};{}", SRID_PREFIX, self.srid, self.to_wkt())
    }

    pub fn to_wkt(&self) -> String {
        if is_empty(&self.geometry) {
            return format!("{} EMPTY", GeometryType::of(&self.geometry));
        }
        self.geometry.wkt_string()
    }

    pub fn geometry_type(&self) -> GeometryType {
        GeometryType::of(&self.geometry)
    }

    pub fn to_geojson(&self) -> JsonValue {
        geojson_value(&self.geometry)
    }

    /// Planar area in the units of the spatial reference
    pub fn area(&self) -> f64 {
        self.geometry.unsigned_area()
    }

    pub fn intersects(&self, other: &StoredGeometry) -> bool {
        self.geometry.intersects(&other.geometry)
    }

    /// Polygonal intersection. Geometries without area intersect to an empty
    /// collection.
    pub fn intersection(&self, other: &StoredGeometry) -> StoredGeometry {
        let geometry = match (polygonal(&self.geometry), polygonal(&other.geometry)) {
            (Some(a), Some(b)) => geo::Geometry::MultiPolygon(a.intersection(&b)),
            _ => geo::Geometry::GeometryCollection(geo::GeometryCollection::default()),
        };
        StoredGeometry::new(geometry, self.srid)
    }
}

fn parse_wkt(text: &str) -> Result<geo::Geometry<f64>> {
    let text = text.trim();
    if let Some(kind) = text.strip_suffix("EMPTY") {
        return empty_geometry(kind);
    }

    let parsed: wkt::Wkt<f64> = text
        .parse()
        .map_err(|e| Error::geometry(format!("Invalid WKT '{}': {}", text, e)))?;
    geo::Geometry::try_from(parsed)
        .map_err(|e| Error::geometry(format!("Unsupported WKT '{}': {:?}", text, e)))
}

fn empty_geometry(kind: &str) -> Result<geo::Geometry<f64>> {
    let kind = GeometryType::parse(kind)
        .ok_or_else(|| Error::geometry(format!("Unknown empty geometry type: {}", kind.trim())))?;
    let geometry = match kind {
        GeometryType::MultiPoint => geo::Geometry::MultiPoint(geo::MultiPoint(vec![])),
        GeometryType::MultiLineString => {
            geo::Geometry::MultiLineString(geo::MultiLineString(vec![]))
        }
        GeometryType::MultiPolygon | GeometryType::Polygon => {
            geo::Geometry::MultiPolygon(geo::MultiPolygon(vec![]))
        }
        _ => geo::Geometry::GeometryCollection(geo::GeometryCollection::default()),
    };
    Ok(geometry)
}

fn is_empty(geometry: &geo::Geometry<f64>) -> bool {
    match geometry {
        geo::Geometry::MultiPoint(g) => g.0.is_empty(),
        geo::Geometry::MultiLineString(g) => g.0.is_empty(),
        geo::Geometry::MultiPolygon(g) => g.0.is_empty(),
        geo::Geometry::GeometryCollection(g) => g.0.is_empty(),
        _ => false,
    }
}

fn polygonal(geometry: &geo::Geometry<f64>) -> Option<geo::MultiPolygon<f64>> {
    match geometry {
        geo::Geometry::Polygon(p) => Some(geo::MultiPolygon(vec![p.clone()])),
        geo::Geometry::MultiPolygon(mp) => Some(mp.clone()),
        geo::Geometry::Rect(r) => Some(geo::MultiPolygon(vec![r.to_polygon()])),
        geo::Geometry::Triangle(t) => Some(geo::MultiPolygon(vec![t.to_polygon()])),
        geo::Geometry::GeometryCollection(collection) => {
            let mut polygons = Vec::new();
            for member in &collection.0 {
                polygons.extend(polygonal(member)?.0);
            }
            Some(geo::MultiPolygon(polygons))
        }
        _ => None,
    }
}

fn position(c: geo::Coord<f64>) -> JsonValue {
    json!([c.x, c.y])
}

fn line_positions(line: &geo::LineString<f64>) -> JsonValue {
    JsonValue::Array(line.coords().map(|c| position(*c)).collect())
}

fn polygon_positions(polygon: &geo::Polygon<f64>) -> JsonValue {
    let mut rings = vec![line_positions(polygon.exterior())];
    rings.extend(polygon.interiors().iter().map(line_positions));
    JsonValue::Array(rings)
}

fn geojson_value(geometry: &geo::Geometry<f64>) -> JsonValue {
    match geometry {
        geo::Geometry::Point(p) => json!({"type": "Point", "coordinates": position(p.0)}),
        geo::Geometry::Line(l) => json!({
            "type": "LineString",
            "coordinates": [position(l.start), position(l.end)],
        }),
        geo::Geometry::LineString(l) => {
            json!({"type": "LineString", "coordinates": line_positions(l)})
        }
        geo::Geometry::Polygon(p) => json!({"type": "Polygon", "coordinates": polygon_positions(p)}),
        geo::Geometry::Rect(r) => geojson_value(&geo::Geometry::Polygon(r.to_polygon())),
        geo::Geometry::Triangle(t) => geojson_value(&geo::Geometry::Polygon(t.to_polygon())),
        geo::Geometry::MultiPoint(mp) => json!({
            "type": "MultiPoint",
            "coordinates": mp.0.iter().map(|p| position(p.0)).collect::<Vec<_>>(),
        }),
        geo::Geometry::MultiLineString(ml) => json!({
            "type": "MultiLineString",
            "coordinates": ml.0.iter().map(line_positions).collect::<Vec<_>>(),
        }),
        geo::Geometry::MultiPolygon(mp) => json!({
            "type": "MultiPolygon",
            "coordinates": mp.0.iter().map(polygon_positions).collect::<Vec<_>>(),
        }),
        geo::Geometry::GeometryCollection(gc) => json!({
            "type": "GeometryCollection",
            "geometries": gc.0.iter().map(geojson_value).collect::<Vec<_>>(),
        }),
    }
}

pub type Point = (f64, f64);

#[derive(Debug, Deserialize)]
struct PolygonGeoJson {
    #[serde(rename = "type")]
    kind: String,
    coordinates: Vec<Vec<Vec<f64>>>,
}

/// A validated polygon: at least one ring, every ring closed with at least
/// four points (closure included).
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    rings: Vec<Vec<Point>>,
}

impl Polygon {
    pub fn new(rings: Vec<Vec<Point>>) -> Result<Self> {
        if rings.is_empty() {
            return Err(Error::validation("Polygon must have at least one ring"));
        }

        for (i, ring) in rings.iter().enumerate() {
            if ring.len() < 4 {
                return Err(Error::validation(format!(
                    "Ring {} has fewer than 4 points (including closure)",
                    i
                )));
            }
            if ring.first() != ring.last() {
                return Err(Error::validation(format!(
                    "Ring {} is not closed: first and last points differ",
                    i
                )));
            }
        }

        Ok(Self { rings })
    }

    /// Build a polygon from a GeoJSON `Polygon` geometry. Rings missing their
    /// closing point are closed; rings given with fewer than four points are
    /// rejected before closure.
    pub fn from_geojson(value: &JsonValue) -> Result<Self> {
        let parsed: PolygonGeoJson = serde_json::from_value(value.clone())
            .map_err(|e| Error::validation(format!("Invalid GeoJSON polygon: {}", e)))?;

        if parsed.kind != "Polygon" {
            return Err(Error::validation(format!(
                "Unsupported geometry type: {}",
                parsed.kind
            )));
        }

        let mut rings = Vec::with_capacity(parsed.coordinates.len());
        for ring in parsed.coordinates {
            let mut points = Vec::with_capacity(ring.len() + 1);
            for position in ring {
                match position.as_slice() {
                    [x, y, ..] => points.push((*x, *y)),
                    _ => {
                        return Err(Error::validation(
                            "GeoJSON position must have at least two coordinates",
                        ));
                    }
                }
            }

            if points.len() < 4 {
                return Err(Error::validation("GeoJSON ring must contain at least 4 points"));
            }

            if points.first() != points.last() {
                points.push(points[0]);
            }
            rings.push(points);
        }

        Self::new(rings)
    }

    /// Parse polygon WKT, with or without an `SRID=` prefix
    pub fn from_wkt(text: &str) -> Result<Self> {
        let stored = StoredGeometry::decode(text)?;
        let geo::Geometry::Polygon(polygon) = &stored.geometry else {
            return Err(Error::validation(format!(
                "Expected POLYGON, got {}",
                stored.geometry_type()
            )));
        };
        Self::new(Self::from(polygon).rings)
    }

    pub fn rings(&self) -> &[Vec<Point>] {
        &self.rings
    }

    pub fn to_wkt(&self) -> String {
        let rings: Vec<String> = self
            .rings
            .iter()
            .map(|ring| {
                let points: Vec<String> = ring.iter().map(|(x, y)| format!("{} {}", x, y)).collect();
                format!("({})", points.join(", "))
            })
            .collect();
        format!("POLYGON ({})", rings.join(", "))
    }

    pub fn to_geojson(&self) -> JsonValue {
        let rings: Vec<Vec<[f64; 2]>> = self
            .rings
            .iter()
            .map(|ring| ring.iter().map(|(x, y)| [*x, *y]).collect())
            .collect();
        json!({"type": "Polygon", "coordinates": rings})
    }
}

impl From<&geo::Polygon<f64>> for Polygon {
    fn from(polygon: &geo::Polygon<f64>) -> Self {
        let ring = |line: &geo::LineString<f64>| line.coords().map(|c| (c.x, c.y)).collect();
        let mut rings = vec![ring(polygon.exterior())];
        rings.extend(polygon.interiors().iter().map(ring));
        Self { rings }
    }
}

impl Serialize for Polygon {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_geojson().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Polygon {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        Self::from_geojson(&value).map_err(serde::de::Error::custom)
    }
}
