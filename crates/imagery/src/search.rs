// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Read-side queries over the image index.

use serde_json::Value as JsonValue;
use spatialdb::{GeoFormat, JoinType, Polygon, QueryOptions, RecordMap, SpatialDatabase, WGS84};

use crate::error::{Error, Result};
use crate::hashing::ContentDigest;
use crate::model::{IMAGES, RADIOMETRIC_PARAMS, RadiometricFactor};

/// Footprints intersecting `polygon`, each with a GeoJSON `footprint` and a
/// `coverage` fraction of the polygon's area. Rows come back unordered.
pub fn images_by_intersection(db: &SpatialDatabase, polygon: &Polygon) -> Result<Vec<RecordMap>> {
    let with_clause = format!(
        "poly AS (SELECT geom, ST_Area(geom) AS area FROM \
         (SELECT ST_GeomFromText(:polygon, {}) AS geom) AS tmp)",
        WGS84
    );
    let options = QueryOptions::new()
        .with_clause(with_clause)
        .geo_format(GeoFormat::AsGeoJson)
        .derived(
            "coverage",
            "ST_Area(ST_Intersection(images.footprint, poly.geom)) / poly.area",
        )
        .join(JoinType::Cross, "poly", None)
        .where_clause("ST_Intersects(images.footprint, poly.geom)")
        .param("polygon", polygon.to_wkt());

    Ok(db.query(&IMAGES, &options)?)
}

/// [`images_by_intersection`] for a GeoJSON Polygon geometry
pub fn images_by_geojson(db: &SpatialDatabase, geojson: &JsonValue) -> Result<Vec<RecordMap>> {
    let polygon = Polygon::from_geojson(geojson)
        .map_err(|e| Error::validation(e.to_string()))?;
    images_by_intersection(db, &polygon)
}

/// Filename and image type of one image
pub fn image_info(db: &SpatialDatabase, id: &ContentDigest) -> Result<RecordMap> {
    let options = QueryOptions::new()
        .columns(["filename", "image_type"])
        .where_clause("id = :id")
        .param("id", *id);

    db.query(&IMAGES, &options)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::not_found(format!("No image with id {}", id)))
}

/// The requested radiometric polynomials of one SLC image; every factor
/// when `factors` is empty.
pub fn radiometric_params(
    db: &SpatialDatabase,
    id: &ContentDigest,
    factors: &[RadiometricFactor],
) -> Result<RecordMap> {
    let factors = if factors.is_empty() {
        &RadiometricFactor::ALL[..]
    } else {
        factors
    };
    let mut columns: Vec<&str> = Vec::with_capacity(factors.len());
    for factor in factors {
        if !columns.contains(&factor.column()) {
            columns.push(factor.column());
        }
    }

    let options = QueryOptions::new()
        .columns(columns)
        .where_clause("id = :id")
        .param("id", *id);

    db.query(&RADIOMETRIC_PARAMS, &options)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::not_found(format!("No radiometric parameters for id {}", id)))
}

/// Full-text search over filename, sensor name and classification
pub fn search_text(db: &SpatialDatabase, query: &str, limit: Option<u64>) -> Result<Vec<RecordMap>> {
    if query.trim().is_empty() {
        return Err(Error::validation("Search text must not be empty"));
    }
    let mut options = QueryOptions::new().geo_format(GeoFormat::AsGeoJson);
    if let Some(limit) = limit {
        options = options.limit(limit);
    }
    Ok(db.search_text(&IMAGES, query, &options)?)
}
