// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use clap::ValueEnum;
use imagery::{ContentDigest, RadiometricFactor, Settings};
use serde_json::Value as JsonValue;

use crate::common::{open_index, write_json, write_rows};

/// Radiometric polynomial selectable on the command line
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FactorChoice {
    Noise,
    Sigma0,
    Beta0,
    Gamma0,
}

impl From<FactorChoice> for RadiometricFactor {
    fn from(choice: FactorChoice) -> Self {
        match choice {
            FactorChoice::Noise => RadiometricFactor::Noise,
            FactorChoice::Sigma0 => RadiometricFactor::Sigma0,
            FactorChoice::Beta0 => RadiometricFactor::Beta0,
            FactorChoice::Gamma0 => RadiometricFactor::Gamma0,
        }
    }
}

fn parse_digest(id: &str) -> Result<ContentDigest> {
    id.parse::<ContentDigest>()
        .with_context(|| format!("Invalid image id {:?}", id))
}

/// Polygon geometry from a GeoJSON geometry or Feature document
fn polygon_geometry(document: JsonValue) -> Result<JsonValue> {
    match document.get("type").and_then(JsonValue::as_str) {
        Some("Feature") => document
            .get("geometry")
            .cloned()
            .ok_or_else(|| anyhow!("GeoJSON Feature has no geometry")),
        _ => Ok(document),
    }
}

pub fn search_command<W: Write>(settings: &Settings, geojson: &Path, out: &mut W) -> Result<()> {
    let text = std::fs::read_to_string(geojson)
        .with_context(|| format!("Failed to read {}", geojson.display()))?;
    let document: JsonValue = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", geojson.display()))?;
    let geometry = polygon_geometry(document)?;

    let db = open_index(settings)?;
    let rows = imagery::images_by_geojson(&db, &geometry)?;
    write_rows(out, &rows)
}

pub fn text_command<W: Write>(
    settings: &Settings,
    query: &str,
    limit: Option<u64>,
    out: &mut W,
) -> Result<()> {
    let db = open_index(settings)?;
    let rows = imagery::search_text(&db, query, limit)?;
    write_rows(out, &rows)
}

pub fn info_command<W: Write>(settings: &Settings, id: &str, out: &mut W) -> Result<()> {
    let digest = parse_digest(id)?;
    let db = open_index(settings)?;
    let info = imagery::image_info(&db, &digest)?;
    write_json(out, &info)
}

pub fn radiometric_command<W: Write>(
    settings: &Settings,
    id: &str,
    factors: &[FactorChoice],
    out: &mut W,
) -> Result<()> {
    let digest = parse_digest(id)?;
    let factors: Vec<RadiometricFactor> = factors.iter().copied().map(Into::into).collect();
    let db = open_index(settings)?;
    let params = imagery::radiometric_params(&db, &digest, &factors)?;
    write_json(out, &params)
}

pub fn hash_command<W: Write>(file: &Path, out: &mut W) -> Result<()> {
    let digest = imagery::hash_file(file)
        .with_context(|| format!("Failed to hash {}", file.display()))?;
    writeln!(out, "{}", digest)?;
    Ok(())
}
