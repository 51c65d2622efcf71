// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Metadata extraction.
//!
//! A pure mapping from a raster-info document to an [`ImageIndexRecord`] and,
//! for SLC scenes carrying a radiometric block, a [`RadiometricParams`].
//! The sensor metadata is read from the `SICD_METADATA` item of the default
//! metadata domain; only the fields used here are modelled.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use spatialdb::Polygon;

use crate::error::{Error, Result};
use crate::hashing::ContentDigest;
use crate::model::{
    ImageIndexRecord, ImageType, NoiseLevelType, NoiseParameters, RadiometricParams, SensorType,
};
use crate::raster_tool::RasterInfo;

pub const SENSOR_METADATA_KEY: &str = "SICD_METADATA";
pub const IMAGE_DESCRIPTION_KEY: &str = "TIFFTAG_IMAGEDESCRIPTION";
const RATING_PARAMETER: &str = "PREDICTED_RNIIRS";

pub type Vec3 = [f64; 3];

#[derive(Debug, Clone, Copy, Deserialize)]
struct Xyz {
    #[serde(rename = "X")]
    x: f64,
    #[serde(rename = "Y")]
    y: f64,
    #[serde(rename = "Z")]
    z: f64,
}

impl Xyz {
    fn vec3(self) -> Vec3 {
        [self.x, self.y, self.z]
    }
}

#[derive(Debug, Deserialize)]
struct SensorDocument {
    metadata: Sicd,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Sicd {
    collection_info: CollectionInfo,
    geo_data: GeoData,
    timeline: Timeline,
    #[serde(rename = "SCPCOA")]
    scpcoa: Scpcoa,
    #[serde(default)]
    grid: Option<Grid>,
    #[serde(default)]
    radar_collection: Option<RadarCollection>,
    #[serde(default)]
    radiometric: Option<Radiometric>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CollectionInfo {
    collector_name: String,
    classification: String,
    #[serde(default)]
    parameters: HashMap<String, JsonValue>,
}

#[derive(Debug, Deserialize)]
struct Corner {
    #[serde(rename = "Lat")]
    lat: f64,
    #[serde(rename = "Lon")]
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct SceneCenter {
    #[serde(rename = "ECF")]
    ecf: Xyz,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GeoData {
    #[serde(rename = "SCP", default)]
    scp: Option<SceneCenter>,
    image_corners: Vec<Corner>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Timeline {
    collect_start: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Scpcoa {
    incidence_ang: f64,
    azim_ang: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Grid {
    #[serde(default)]
    row: Option<GridAxis>,
    #[serde(default)]
    col: Option<GridAxis>,
}

#[derive(Debug, Deserialize)]
struct GridAxis {
    #[serde(rename = "SS")]
    sample_spacing: f64,
    #[serde(rename = "UVectECF")]
    unit_vector: Xyz,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RadarCollection {
    #[serde(default)]
    area: Option<Area>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Area {
    #[serde(default)]
    plane: Option<Plane>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Plane {
    #[serde(default)]
    x_dir: Option<PlaneDirection>,
    #[serde(default)]
    y_dir: Option<PlaneDirection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PlaneDirection {
    #[serde(default)]
    line_spacing: Option<f64>,
    #[serde(default)]
    sample_spacing: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Poly2D {
    #[serde(rename = "Coefs", default)]
    coefs: Vec<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NoiseLevel {
    noise_level_type: NoiseLevelType,
    noise_poly: Poly2D,
}

#[derive(Debug, Default, Deserialize)]
struct Radiometric {
    #[serde(rename = "NoiseLevel", default)]
    noise_level: Option<NoiseLevel>,
    #[serde(rename = "SigmaZeroSFPoly", default)]
    sigma_zero: Option<Poly2D>,
    #[serde(rename = "BetaZeroSFPoly", default)]
    beta_zero: Option<Poly2D>,
    #[serde(rename = "GammaZeroSFPoly", default)]
    gamma_zero: Option<Poly2D>,
    /// Members not stored, such as `RCSSFPoly`; they still make the block present
    #[serde(flatten)]
    other: serde_json::Map<String, JsonValue>,
}

impl Radiometric {
    fn is_empty(&self) -> bool {
        self.noise_level.is_none()
            && self.sigma_zero.is_none()
            && self.beta_zero.is_none()
            && self.gamma_zero.is_none()
            && self.other.is_empty()
    }
}

/// Resolutions from the secondary image-description document
#[derive(Debug, Default, Deserialize)]
struct DescriptionImage {
    #[serde(default)]
    ground_range_resolution: Option<f64>,
    #[serde(default)]
    ground_azimuth_resolution: Option<f64>,
}

/// Output of [`extract`]
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub record: ImageIndexRecord,
    pub radiometric: Option<RadiometricParams>,
}

/// Classify a raster by its bands and metadata
pub fn detect_image_type(info: &RasterInfo) -> Result<(SensorType, ImageType)> {
    let bands = info.bands()?;

    let complex = bands.iter().any(|band| {
        band.get("type")
            .and_then(JsonValue::as_str)
            .is_some_and(|t| t.to_ascii_lowercase().starts_with('c'))
    });
    if complex {
        return Ok((SensorType::Sar, ImageType::Slc));
    }

    if info.metadata_item(SENSOR_METADATA_KEY).is_some() {
        return Ok((SensorType::Sar, ImageType::Grd));
    }

    if bands.len() == 1 {
        Ok((SensorType::Eo, ImageType::Pan))
    } else {
        Ok((SensorType::Eo, ImageType::Ms))
    }
}

pub fn dot(a: Vec3, b: Vec3) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn norm(a: Vec3) -> f64 {
    dot(a, a).sqrt()
}

/// Project a slant sample spacing onto the ground plane at `point`:
/// `n = p/‖p‖`, `c = u·n`, `s·√(1 − c²)`.
pub fn ground_sample_distance(sample_spacing: f64, unit_vector: Vec3, point: Vec3) -> Result<f64> {
    let magnitude = norm(point);
    if magnitude == 0.0 || !magnitude.is_finite() {
        return Err(Error::Domain(format!(
            "Cannot take the surface normal of point {:?}",
            point
        )));
    }

    let normal = [point[0] / magnitude, point[1] / magnitude, point[2] / magnitude];
    let c = dot(unit_vector, normal);
    if c.abs() > 1.0 {
        return Err(Error::Domain(format!(
            "|u·n| = {} exceeds 1; unit vector {:?} is not normalized",
            c.abs(),
            unit_vector
        )));
    }

    Ok(sample_spacing * (1.0 - c * c).sqrt())
}

fn parse_collect_start(text: &str) -> Result<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Ok(instant.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::metadata(format!("Invalid CollectStart {:?}: {}", text, e)))
}

fn rating(parameters: &HashMap<String, JsonValue>) -> Option<f64> {
    match parameters.get(RATING_PARAMETER)? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn footprint(corners: &[Corner]) -> Result<Polygon> {
    let mut ring: Vec<(f64, f64)> = corners.iter().map(|c| (c.lon, c.lat)).collect();
    if let Some(first) = ring.first().copied() {
        if ring.last() != Some(&first) {
            ring.push(first);
        }
    }
    Polygon::new(vec![ring])
        .map_err(|e| Error::metadata(format!("Invalid image corners: {}", e)))
}

fn axis_gsd(
    axis: Option<&GridAxis>,
    scp: Option<&SceneCenter>,
    plane_spacing: Option<f64>,
    fallback: Option<f64>,
) -> Result<Option<f64>> {
    if let (Some(axis), Some(scp)) = (axis, scp) {
        return ground_sample_distance(axis.sample_spacing, axis.unit_vector.vec3(), scp.ecf.vec3())
            .map(Some);
    }
    Ok(plane_spacing.or(fallback))
}

fn description_image(info: &RasterInfo) -> Result<DescriptionImage> {
    let Some(doc) = info.metadata_json(IMAGE_DESCRIPTION_KEY)? else {
        return Ok(DescriptionImage::default());
    };
    match doc.get("collect").and_then(|c| c.get("image")) {
        Some(image) => serde_json::from_value(image.clone())
            .map_err(|e| Error::metadata(format!("Invalid {}: {}", IMAGE_DESCRIPTION_KEY, e))),
        None => Ok(DescriptionImage::default()),
    }
}

fn coefs(poly: Option<Poly2D>) -> Vec<Vec<f64>> {
    poly.map(|p| p.coefs).unwrap_or_default()
}

/// Build the index record for `file`, found under `relative_dir` of
/// catalog `catalog_id`, from its raster-info document.
pub fn extract(
    info: &RasterInfo,
    digest: ContentDigest,
    catalog_id: i64,
    file: &Path,
    relative_dir: &Path,
) -> Result<Extraction> {
    let (sensor_type, image_type) = detect_image_type(info)?;

    let document = info.metadata_json(SENSOR_METADATA_KEY)?.ok_or_else(|| {
        Error::metadata(format!("No sensor metadata found for {}", file.display()))
    })?;
    let sicd = serde_json::from_value::<SensorDocument>(document)
        .map_err(|e| Error::metadata(format!("Invalid {}: {}", SENSOR_METADATA_KEY, e)))?
        .metadata;
    let description = description_image(info)?;

    let plane = sicd
        .radar_collection
        .as_ref()
        .and_then(|rc| rc.area.as_ref())
        .and_then(|a| a.plane.as_ref());
    let plane_row = plane
        .and_then(|p| p.x_dir.as_ref())
        .and_then(|d| d.line_spacing);
    let plane_col = plane
        .and_then(|p| p.y_dir.as_ref())
        .and_then(|d| d.sample_spacing);

    let grid = sicd.grid.as_ref();
    let scp = sicd.geo_data.scp.as_ref();
    let gsd_row = axis_gsd(
        grid.and_then(|g| g.row.as_ref()),
        scp,
        plane_row,
        description.ground_range_resolution,
    )?;
    let gsd_col = axis_gsd(
        grid.and_then(|g| g.col.as_ref()),
        scp,
        plane_col,
        description.ground_azimuth_resolution,
    )?;

    let filename = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| Error::validation(format!("No file name in {}", file.display())))?;
    let filetype = file
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let record = ImageIndexRecord {
        id: digest,
        catalog: catalog_id,
        relative_path: relative_dir.to_path_buf(),
        filename,
        filetype,
        classification: Some(sicd.collection_info.classification.clone()),
        datetime_collected: Some(parse_collect_start(&sicd.timeline.collect_start)?),
        sensor_name: Some(sicd.collection_info.collector_name.clone()),
        sensor_type,
        image_type,
        footprint: footprint(&sicd.geo_data.image_corners)?,
        look_angle: Some(90.0 - sicd.scpcoa.incidence_ang),
        azimuth_angle: Some(sicd.scpcoa.azim_ang),
        ground_sample_distance_row: gsd_row,
        ground_sample_distance_col: gsd_col,
        interpretation_rating: rating(&sicd.collection_info.parameters),
    };

    let radiometric = match (image_type, sicd.radiometric) {
        (ImageType::Slc, Some(block)) if !block.is_empty() => Some(RadiometricParams {
            id: digest,
            noise: block.noise_level.map(|n| NoiseParameters {
                kind: n.noise_level_type,
                poly: n.noise_poly.coefs,
            }),
            sigma0: coefs(block.sigma_zero),
            beta0: coefs(block.beta_zero),
            gamma0: coefs(block.gamma_zero),
        }),
        _ => None,
    };

    Ok(Extraction {
        record,
        radiometric,
    })
}
