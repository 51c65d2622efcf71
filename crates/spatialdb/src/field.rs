// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Column-level schema metadata.
//!
//! A [`FieldDescriptor`] is declared once per column and never mutated. Besides
//! the DDL attributes it carries the [`DomainType`] of the column, which knows
//! how a stored value is presented to external (JSON) consumers and how an
//! external value is turned back into something SQLite can bind.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

/// Spatial reference id for WGS84 geographic coordinates
pub const WGS84: i32 = 4326;

/// SQLite storage class a column is declared with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Integer,
    Real,
    Text,
    Blob,
}

impl Affinity {
    pub fn sql_name(self) -> &'static str {
        match self {
            Affinity::Integer => "INTEGER",
            Affinity::Real => "REAL",
            Affinity::Text => "TEXT",
            Affinity::Blob => "BLOB",
        }
    }
}

/// OGC geometry type names accepted for geometry columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryType {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
}

impl GeometryType {
    pub fn as_str(self) -> &'static str {
        match self {
            GeometryType::Point => "POINT",
            GeometryType::LineString => "LINESTRING",
            GeometryType::Polygon => "POLYGON",
            GeometryType::MultiPoint => "MULTIPOINT",
            GeometryType::MultiLineString => "MULTILINESTRING",
            GeometryType::MultiPolygon => "MULTIPOLYGON",
            GeometryType::GeometryCollection => "GEOMETRYCOLLECTION",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let kind = match name.trim().to_ascii_uppercase().as_str() {
            "POINT" => GeometryType::Point,
            "LINESTRING" => GeometryType::LineString,
            "POLYGON" => GeometryType::Polygon,
            "MULTIPOINT" => GeometryType::MultiPoint,
            "MULTILINESTRING" => GeometryType::MultiLineString,
            "MULTIPOLYGON" => GeometryType::MultiPolygon,
            "GEOMETRYCOLLECTION" => GeometryType::GeometryCollection,
            _ => return None,
        };
        Some(kind)
    }

    /// Classify a parsed geometry. Lines, rects and triangles map onto the
    /// OGC type they are written as.
    pub fn of(geometry: &geo::Geometry<f64>) -> Self {
        match geometry {
            geo::Geometry::Point(_) => GeometryType::Point,
            geo::Geometry::Line(_) | geo::Geometry::LineString(_) => GeometryType::LineString,
            geo::Geometry::Polygon(_) | geo::Geometry::Rect(_) | geo::Geometry::Triangle(_) => {
                GeometryType::Polygon
            }
            geo::Geometry::MultiPoint(_) => GeometryType::MultiPoint,
            geo::Geometry::MultiLineString(_) => GeometryType::MultiLineString,
            geo::Geometry::MultiPolygon(_) => GeometryType::MultiPolygon,
            geo::Geometry::GeometryCollection(_) => GeometryType::GeometryCollection,
        }
    }
}

impl std::fmt::Display for GeometryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geometry type and spatial reference of a geometry column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometrySpec {
    pub kind: GeometryType,
    pub srid: i32,
}

/// What a column holds from the application's point of view.
///
/// The domain type decides the default storage affinity and the
/// storage ↔ JSON conversion used by dynamic queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainType {
    Integer,
    Real,
    Text,
    Bytes,
    /// Fixed-length content digest, stored as a BLOB, exchanged as URL-safe base64
    Digest,
    /// UTC instant stored as milliseconds since the epoch, exchanged as RFC 3339
    Timestamp,
    /// Filesystem path stored as text
    Path,
    /// Arbitrary JSON document stored as text
    Json,
    Geometry,
}

impl DomainType {
    pub fn default_affinity(self) -> Affinity {
        match self {
            DomainType::Integer | DomainType::Timestamp => Affinity::Integer,
            DomainType::Real => Affinity::Real,
            DomainType::Text | DomainType::Path | DomainType::Json | DomainType::Geometry => {
                Affinity::Text
            }
            DomainType::Bytes | DomainType::Digest => Affinity::Blob,
        }
    }
}

/// Immutable description of one column
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    name: &'static str,
    domain: DomainType,
    affinity: Affinity,
    primary_key: bool,
    nullable: bool,
    unique: bool,
    default: Option<&'static str>,
    references: Option<&'static str>,
    geometry: Option<GeometrySpec>,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, domain: DomainType, affinity: Affinity) -> Self {
        Self {
            name,
            domain,
            affinity,
            primary_key: false,
            nullable: true,
            unique: false,
            default: None,
            references: None,
            geometry: None,
        }
    }

    pub fn of(name: &'static str, domain: DomainType) -> Self {
        Self::new(name, domain, domain.default_affinity())
    }

    pub fn integer(name: &'static str) -> Self {
        Self::of(name, DomainType::Integer)
    }

    pub fn real(name: &'static str) -> Self {
        Self::of(name, DomainType::Real)
    }

    pub fn text(name: &'static str) -> Self {
        Self::of(name, DomainType::Text)
    }

    pub fn digest(name: &'static str) -> Self {
        Self::of(name, DomainType::Digest)
    }

    pub fn timestamp(name: &'static str) -> Self {
        Self::of(name, DomainType::Timestamp)
    }

    pub fn path(name: &'static str) -> Self {
        Self::of(name, DomainType::Path)
    }

    pub fn json(name: &'static str) -> Self {
        Self::of(name, DomainType::Json)
    }

    pub fn geometry(name: &'static str, kind: GeometryType, srid: i32) -> Self {
        let mut field = Self::of(name, DomainType::Geometry);
        field.geometry = Some(GeometrySpec { kind, srid });
        field
    }

    /// Primary keys are implicitly non-null
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Raw SQL literal used as the column default
    #[must_use]
    pub fn default_sql(mut self, literal: &'static str) -> Self {
        self.default = Some(literal);
        self
    }

    /// Foreign key target, e.g. `catalog(id)`
    #[must_use]
    pub fn references(mut self, target: &'static str) -> Self {
        self.references = Some(target);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn domain(&self) -> DomainType {
        self.domain
    }

    pub fn affinity(&self) -> Affinity {
        self.affinity
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn geometry_spec(&self) -> Option<GeometrySpec> {
        self.geometry
    }

    pub fn is_geometry(&self) -> bool {
        self.geometry.is_some()
    }

    /// Column definition for `CREATE TABLE`. Geometry columns are added
    /// separately and return `None`.
    pub fn column_sql(&self) -> Option<String> {
        if self.is_geometry() {
            return None;
        }

        let mut parts = vec![self.name.to_string(), self.affinity.sql_name().to_string()];
        if self.primary_key {
            parts.push("PRIMARY KEY".to_string());
        } else {
            if !self.nullable {
                parts.push("NOT NULL".to_string());
            }
            if self.unique {
                parts.push("UNIQUE".to_string());
            }
        }
        if let Some(default) = self.default {
            parts.push(format!("DEFAULT {}", default));
        }
        if let Some(target) = self.references {
            parts.push(format!("REFERENCES {}", target));
        }
        Some(parts.join(" "))
    }

    /// Check a storage value against the column's nullability and affinity
    /// before it is bound into a write.
    pub fn check_storage(&self, value: &Value) -> Result<()> {
        let ok = match (value, self.affinity) {
            (Value::Null, _) => self.nullable,
            (Value::Integer(_), Affinity::Integer | Affinity::Real) => true,
            (Value::Real(_), Affinity::Real) => true,
            (Value::Text(_), Affinity::Text) => true,
            (Value::Blob(_), Affinity::Blob) => true,
            _ => false,
        };

        if ok {
            Ok(())
        } else if matches!(value, Value::Null) {
            Err(Error::validation(format!("Column {} is not nullable", self.name)))
        } else {
            Err(Error::validation(format!(
                "Column {} expects {}, got {:?}",
                self.name,
                self.affinity.sql_name(),
                value.data_type()
            )))
        }
    }

    /// Storage value → external JSON value
    pub fn to_json(&self, value: Value) -> Result<JsonValue> {
        let json = match (self.domain, value) {
            (_, Value::Null) => JsonValue::Null,
            (DomainType::Digest | DomainType::Bytes, Value::Blob(bytes)) => {
                JsonValue::String(URL_SAFE_NO_PAD.encode(bytes))
            }
            (DomainType::Timestamp, Value::Integer(millis)) => {
                let instant = DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
                    Error::validation(format!("Column {}: timestamp out of range", self.name))
                })?;
                JsonValue::String(instant.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            (DomainType::Json, Value::Text(text)) => serde_json::from_str(&text)?,
            (_, Value::Integer(i)) => JsonValue::from(i),
            (_, Value::Real(r)) => JsonValue::from(r),
            (_, Value::Text(text)) => JsonValue::String(text),
            (_, Value::Blob(bytes)) => JsonValue::String(URL_SAFE_NO_PAD.encode(bytes)),
        };
        Ok(json)
    }

    /// External JSON value → storage value suitable for binding
    pub fn from_json(&self, value: &JsonValue) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        let mismatch = || {
            Error::validation(format!(
                "Column {} cannot accept JSON value {}",
                self.name, value
            ))
        };

        let stored = match self.domain {
            DomainType::Integer => Value::Integer(value.as_i64().ok_or_else(mismatch)?),
            DomainType::Real => Value::Real(value.as_f64().ok_or_else(mismatch)?),
            DomainType::Text | DomainType::Path | DomainType::Geometry => {
                Value::Text(value.as_str().ok_or_else(mismatch)?.to_string())
            }
            DomainType::Digest | DomainType::Bytes => {
                let encoded = value.as_str().ok_or_else(mismatch)?;
                Value::Blob(decode_base64(encoded).map_err(|_| mismatch())?)
            }
            DomainType::Timestamp => match value {
                JsonValue::Number(n) => Value::Integer(n.as_i64().ok_or_else(mismatch)?),
                JsonValue::String(s) => {
                    let instant = DateTime::parse_from_rfc3339(s).map_err(|_| mismatch())?;
                    Value::Integer(instant.with_timezone(&Utc).timestamp_millis())
                }
                _ => return Err(mismatch()),
            },
            DomainType::Json => Value::Text(serde_json::to_string(value)?),
        };

        self.check_storage(&stored)?;
        Ok(stored)
    }
}

/// Decode URL-safe base64, tolerating both padded and unpadded input
pub fn decode_base64(encoded: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('='))
}

pub fn encode_base64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_column_sql() {
        let id = FieldDescriptor::integer("id").primary_key();
        assert_eq!(id.column_sql().unwrap(), "id INTEGER PRIMARY KEY");

        let name = FieldDescriptor::text("name").not_null().unique();
        assert_eq!(name.column_sql().unwrap(), "name TEXT NOT NULL UNIQUE");

        let count = FieldDescriptor::integer("count").default_sql("0");
        assert_eq!(count.column_sql().unwrap(), "count INTEGER DEFAULT 0");

        let catalog = FieldDescriptor::integer("catalog").not_null().references("catalog(id)");
        assert_eq!(
            catalog.column_sql().unwrap(),
            "catalog INTEGER NOT NULL REFERENCES catalog(id)"
        );

        let footprint = FieldDescriptor::geometry("footprint", GeometryType::Polygon, WGS84);
        assert!(footprint.column_sql().is_none());
    }

    #[test]
    fn test_check_storage_rejects_null_and_wrong_affinity() {
        let name = FieldDescriptor::text("name").not_null();
        assert!(name.check_storage(&Value::Text("a".into())).is_ok());
        assert!(matches!(name.check_storage(&Value::Null), Err(Error::Validation(_))));
        assert!(matches!(name.check_storage(&Value::Blob(vec![1])), Err(Error::Validation(_))));

        let angle = FieldDescriptor::real("angle");
        assert!(angle.check_storage(&Value::Integer(3)).is_ok());
    }

    #[test]
    fn test_digest_json_encoding() {
        let id = FieldDescriptor::digest("id");
        let stored = Value::Blob(vec![0xfb, 0xff, 0x00]);
        let json = id.to_json(stored.clone()).unwrap();
        assert_eq!(json, json!("-_8A"));
        assert_eq!(id.from_json(&json).unwrap(), stored);
    }

    #[test]
    fn test_timestamp_json_encoding() {
        let ts = FieldDescriptor::timestamp("last_indexed");
        let json = ts.to_json(Value::Integer(1_700_000_000_123)).unwrap();
        assert_eq!(json, json!("2023-11-14T22:13:20.123Z"));
        assert_eq!(ts.from_json(&json).unwrap(), Value::Integer(1_700_000_000_123));
        assert_eq!(ts.from_json(&json!(5)).unwrap(), Value::Integer(5));
    }

    #[test]
    fn test_json_document_column() {
        let poly = FieldDescriptor::json("sigma0");
        let json = poly.to_json(Value::Text("[[1.0,2.0]]".into())).unwrap();
        assert_eq!(json, json!([[1.0, 2.0]]));
        assert_eq!(poly.from_json(&json).unwrap(), Value::Text("[[1.0,2.0]]".into()));
    }

    #[test]
    fn test_geometry_type_parse() {
        assert_eq!(GeometryType::parse("polygon"), Some(GeometryType::Polygon));
        assert_eq!(GeometryType::parse("CIRCLE"), None);
        assert_eq!(GeometryType::MultiPolygon.to_string(), "MULTIPOLYGON");
    }
}
