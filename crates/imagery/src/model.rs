// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Persisted record types and their table schemas.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spatialdb::{
    FieldDescriptor, GeometryType, Polygon, Record, Row, TableSchema, Value, WGS84,
};

use crate::hashing::ContentDigest;

pub const CATALOG_TABLE: &str = "catalog";
pub const IMAGES_TABLE: &str = "images";
pub const RADIOMETRIC_TABLE: &str = "radiometric_params";

/// Columns covered by the `images_fts` full-text index
pub const IMAGE_TEXT_COLUMNS: [&str; 3] = ["filename", "sensor_name", "classification"];

/// Columns re-assigned when a known image is found at a new location
pub const IMAGE_LOCATION_COLUMNS: [&str; 4] = ["catalog", "relative_path", "filename", "filetype"];

pub static CATALOG: LazyLock<TableSchema> = LazyLock::new(|| {
    TableSchema::builder(CATALOG_TABLE)
        .field(FieldDescriptor::integer("id").primary_key())
        .field(FieldDescriptor::path("path").not_null().unique())
        .field(FieldDescriptor::text("name").not_null().unique())
        .field(FieldDescriptor::timestamp("last_indexed"))
        .build()
});

pub static IMAGES: LazyLock<TableSchema> =
    LazyLock::new(|| image_index_schema(IMAGES_TABLE, GeometryType::Polygon));

pub static RADIOMETRIC_PARAMS: LazyLock<TableSchema> = LazyLock::new(|| {
    TableSchema::builder(RADIOMETRIC_TABLE)
        .field(FieldDescriptor::digest("id").primary_key())
        .field(FieldDescriptor::json("noise"))
        .field(FieldDescriptor::json("sigma0"))
        .field(FieldDescriptor::json("beta0"))
        .field(FieldDescriptor::json("gamma0"))
        .build()
});

/// Image index layout under `table`, with a footprint column of `footprint`
/// geometry type.
pub fn image_index_schema(table: &str, footprint: GeometryType) -> TableSchema {
    TableSchema::builder(table)
        .field(FieldDescriptor::digest("id").primary_key())
        .field(
            FieldDescriptor::integer("catalog")
                .not_null()
                .references("catalog(id)"),
        )
        .field(FieldDescriptor::path("relative_path").not_null())
        .field(FieldDescriptor::text("filename").not_null())
        .field(FieldDescriptor::text("filetype").not_null())
        .field(FieldDescriptor::text("classification"))
        .field(FieldDescriptor::timestamp("datetime_collected"))
        .field(FieldDescriptor::text("sensor_name"))
        .field(FieldDescriptor::text("sensor_type"))
        .field(FieldDescriptor::text("image_type"))
        .field(FieldDescriptor::geometry("footprint", footprint, WGS84))
        .field(FieldDescriptor::real("look_angle"))
        .field(FieldDescriptor::real("azimuth_angle"))
        .field(FieldDescriptor::real("ground_sample_distance_row"))
        .field(FieldDescriptor::real("ground_sample_distance_col"))
        .field(FieldDescriptor::real("interpretation_rating"))
        .build()
}

fn conversion_error(column: &str, message: String) -> spatialdb::Error {
    spatialdb::Error::validation(format!("Column {}: {}", column, message))
}

fn millis_to_datetime(column: &str, millis: i64) -> spatialdb::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| conversion_error(column, format!("timestamp {} out of range", millis)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorType {
    Eo,
    Sar,
}

impl SensorType {
    pub fn as_str(self) -> &'static str {
        match self {
            SensorType::Eo => "eo",
            SensorType::Sar => "sar",
        }
    }
}

impl FromStr for SensorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eo" => Ok(SensorType::Eo),
            "sar" => Ok(SensorType::Sar),
            other => Err(format!("unknown sensor type {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    Grd,
    Pan,
    Ms,
    Slc,
}

impl ImageType {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageType::Grd => "grd",
            ImageType::Pan => "pan",
            ImageType::Ms => "ms",
            ImageType::Slc => "slc",
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grd" => Ok(ImageType::Grd),
            "pan" => Ok(ImageType::Pan),
            "ms" => Ok(ImageType::Ms),
            "slc" => Ok(ImageType::Slc),
            other => Err(format!("unknown image type {:?}", other)),
        }
    }
}

/// A registered root directory of imagery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub id: i64,
    pub path: PathBuf,
    pub name: String,
    pub last_indexed: Option<DateTime<Utc>>,
}

impl Record for Catalog {
    fn schema() -> &'static TableSchema {
        &CATALOG
    }

    fn to_values(&self) -> spatialdb::Result<Vec<Value>> {
        Ok(vec![
            Value::Integer(self.id),
            Value::Text(self.path.to_string_lossy().into_owned()),
            Value::Text(self.name.clone()),
            self.last_indexed
                .map_or(Value::Null, |t| Value::Integer(t.timestamp_millis())),
        ])
    }

    fn from_row(row: &Row<'_>) -> spatialdb::Result<Self> {
        let last_indexed: Option<i64> = row.get("last_indexed")?;
        Ok(Self {
            id: row.get("id")?,
            path: PathBuf::from(row.get::<_, String>("path")?),
            name: row.get("name")?,
            last_indexed: last_indexed
                .map(|ms| millis_to_datetime("last_indexed", ms))
                .transpose()?,
        })
    }
}

/// One cataloged image, identified by its content digest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageIndexRecord {
    pub id: ContentDigest,
    pub catalog: i64,
    /// Directory relative to the catalog root; `.` for the root itself
    pub relative_path: PathBuf,
    /// File stem
    pub filename: String,
    /// Extension including the leading dot
    pub filetype: String,
    pub classification: Option<String>,
    pub datetime_collected: Option<DateTime<Utc>>,
    pub sensor_name: Option<String>,
    pub sensor_type: SensorType,
    pub image_type: ImageType,
    pub footprint: Polygon,
    pub look_angle: Option<f64>,
    pub azimuth_angle: Option<f64>,
    pub ground_sample_distance_row: Option<f64>,
    pub ground_sample_distance_col: Option<f64>,
    pub interpretation_rating: Option<f64>,
}

fn opt_text(value: &Option<String>) -> Value {
    value.clone().map_or(Value::Null, Value::Text)
}

fn opt_real(value: Option<f64>) -> Value {
    value.map_or(Value::Null, Value::Real)
}

impl Record for ImageIndexRecord {
    fn schema() -> &'static TableSchema {
        &IMAGES
    }

    fn to_values(&self) -> spatialdb::Result<Vec<Value>> {
        Ok(vec![
            self.id.into(),
            Value::Integer(self.catalog),
            Value::Text(self.relative_path.to_string_lossy().into_owned()),
            Value::Text(self.filename.clone()),
            Value::Text(self.filetype.clone()),
            opt_text(&self.classification),
            self.datetime_collected
                .map_or(Value::Null, |t| Value::Integer(t.timestamp_millis())),
            opt_text(&self.sensor_name),
            Value::Text(self.sensor_type.as_str().to_string()),
            Value::Text(self.image_type.as_str().to_string()),
            Value::Text(self.footprint.to_wkt()),
            opt_real(self.look_angle),
            opt_real(self.azimuth_angle),
            opt_real(self.ground_sample_distance_row),
            opt_real(self.ground_sample_distance_col),
            opt_real(self.interpretation_rating),
        ])
    }

    fn from_row(row: &Row<'_>) -> spatialdb::Result<Self> {
        let sensor_type: String = row.get("sensor_type")?;
        let image_type: String = row.get("image_type")?;
        let footprint: String = row.get("footprint")?;
        let collected: Option<i64> = row.get("datetime_collected")?;

        Ok(Self {
            id: row.get("id")?,
            catalog: row.get("catalog")?,
            relative_path: PathBuf::from(row.get::<_, String>("relative_path")?),
            filename: row.get("filename")?,
            filetype: row.get("filetype")?,
            classification: row.get("classification")?,
            datetime_collected: collected
                .map(|ms| millis_to_datetime("datetime_collected", ms))
                .transpose()?,
            sensor_name: row.get("sensor_name")?,
            sensor_type: sensor_type
                .parse()
                .map_err(|e| conversion_error("sensor_type", e))?,
            image_type: image_type
                .parse()
                .map_err(|e| conversion_error("image_type", e))?,
            footprint: Polygon::from_wkt(&footprint)?,
            look_angle: row.get("look_angle")?,
            azimuth_angle: row.get("azimuth_angle")?,
            ground_sample_distance_row: row.get("ground_sample_distance_row")?,
            ground_sample_distance_col: row.get("ground_sample_distance_col")?,
            interpretation_rating: row.get("interpretation_rating")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NoiseLevelType {
    Absolute,
    Relative,
}

/// Noise model: level type plus a 2-D polynomial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseParameters {
    #[serde(rename = "type")]
    pub kind: NoiseLevelType,
    pub poly: Vec<Vec<f64>>,
}

/// Radiometric calibration of an SLC image, keyed by the image digest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadiometricParams {
    pub id: ContentDigest,
    pub noise: Option<NoiseParameters>,
    pub sigma0: Vec<Vec<f64>>,
    pub beta0: Vec<Vec<f64>>,
    pub gamma0: Vec<Vec<f64>>,
}

impl Record for RadiometricParams {
    fn schema() -> &'static TableSchema {
        &RADIOMETRIC_PARAMS
    }

    fn to_values(&self) -> spatialdb::Result<Vec<Value>> {
        let noise = match &self.noise {
            Some(noise) => Value::Text(serde_json::to_string(noise)?),
            None => Value::Null,
        };
        Ok(vec![
            self.id.into(),
            noise,
            Value::Text(serde_json::to_string(&self.sigma0)?),
            Value::Text(serde_json::to_string(&self.beta0)?),
            Value::Text(serde_json::to_string(&self.gamma0)?),
        ])
    }

    fn from_row(row: &Row<'_>) -> spatialdb::Result<Self> {
        let noise: Option<String> = row.get("noise")?;
        let poly = |column: &str| -> spatialdb::Result<Vec<Vec<f64>>> {
            let text: Option<String> = row.get(column)?;
            match text {
                Some(text) => Ok(serde_json::from_str(&text)?),
                None => Ok(Vec::new()),
            }
        };

        Ok(Self {
            id: row.get("id")?,
            noise: noise.map(|n| serde_json::from_str(&n)).transpose()?,
            sigma0: poly("sigma0")?,
            beta0: poly("beta0")?,
            gamma0: poly("gamma0")?,
        })
    }
}

/// Selectable radiometric polynomial columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadiometricFactor {
    Noise,
    Sigma0,
    Beta0,
    Gamma0,
}

impl RadiometricFactor {
    pub const ALL: [RadiometricFactor; 4] = [
        RadiometricFactor::Noise,
        RadiometricFactor::Sigma0,
        RadiometricFactor::Beta0,
        RadiometricFactor::Gamma0,
    ];

    pub fn column(self) -> &'static str {
        match self {
            RadiometricFactor::Noise => "noise",
            RadiometricFactor::Sigma0 => "sigma0",
            RadiometricFactor::Beta0 => "beta0",
            RadiometricFactor::Gamma0 => "gamma0",
        }
    }
}
