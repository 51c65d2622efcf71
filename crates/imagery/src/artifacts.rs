// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Derived artifacts: preview thumbnails and cloud-optimized rasters.
//!
//! Artifacts are named by file stem under the static directory. A renamed
//! source carries its artifacts along instead of regenerating them.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::model::{ImageIndexRecord, ImageType};
use crate::raster_tool::{CogOptions, RasterInfo, RasterTool, TranslateOptions, WarpOptions};
use crate::reconcile::IndexAction;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOutcome {
    Generated,
    /// Moved from the artifact of the previous file stem
    Renamed,
    AlreadyPresent,
    /// The action leaves artifacts alone
    Untouched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactReport {
    pub thumbnail: ArtifactOutcome,
    pub cog: ArtifactOutcome,
}

impl ArtifactReport {
    fn untouched() -> Self {
        Self {
            thumbnail: ArtifactOutcome::Untouched,
            cog: ArtifactOutcome::Untouched,
        }
    }
}

/// Thumbnail size preserving the ground aspect ratio. The shorter side
/// matches the configured minimum; missing or invalid GSDs count as square
/// pixels.
pub fn thumbnail_size(
    image_size: (u64, u64),
    gsd: (Option<f64>, Option<f64>),
    min_size: (u32, u32),
) -> (u32, u32) {
    let (gsd_row, gsd_col) = match gsd {
        (Some(r), Some(c)) if r.is_finite() && c.is_finite() && r > 0.0 && c > 0.0 => (r, c),
        _ => (1.0, 1.0),
    };
    let max_gsd = gsd_row.max(gsd_col);

    let width = (image_size.0.max(1) as f64) * gsd_row / max_gsd;
    let height = (image_size.1.max(1) as f64) * gsd_col / max_gsd;
    let aspect = width / height;
    let (min_width, min_height) = min_size;

    let (w, h) = if aspect >= 1.0 {
        ((f64::from(min_height) * aspect).round(), f64::from(min_height))
    } else {
        (f64::from(min_width), (f64::from(min_width) / aspect).round())
    };
    (clamp_dimension(w), clamp_dimension(h))
}

fn clamp_dimension(value: f64) -> u32 {
    if value.is_finite() {
        value.clamp(1.0, f64::from(u32::MAX)) as u32
    } else {
        1
    }
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn gcp_value(gcp: &JsonValue, key: &str) -> String {
    match gcp.get(key) {
        Some(JsonValue::String(s)) => xml_escape(s),
        Some(JsonValue::Number(n)) => n.to_string(),
        _ => "0".to_string(),
    }
}

/// VRT presenting band 1 of a complex raster as Float32 intensity
/// (`complex_magnitude_squared`), georeferenced by the source GCPs.
pub fn intensity_vrt(image_path: &Path, info: &RasterInfo) -> Result<String> {
    let (width, height) = info.size()?;
    let gcps = info.gcps().ok_or_else(|| {
        Error::metadata(format!("'gcps' not in metadata for {}", image_path.display()))
    })?;
    let srs = gcps
        .get("coordinateSystem")
        .and_then(|cs| cs.get("wkt"))
        .and_then(JsonValue::as_str)
        .filter(|wkt| !wkt.is_empty())
        .unwrap_or("EPSG:4326");
    let list = gcps
        .get("gcpList")
        .and_then(JsonValue::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut xml = format!(
        "<VRTDataset rasterXSize=\"{}\" rasterYSize=\"{}\"><SRS>{}</SRS><GCPList>",
        width,
        height,
        xml_escape(srs)
    );
    for gcp in list {
        let _ = write!(
            xml,
            "<GCP Id=\"{}\" Pixel=\"{}\" Line=\"{}\" X=\"{}\" Y=\"{}\" Z=\"{}\"/>",
            gcp_value(gcp, "id"),
            gcp_value(gcp, "pixel"),
            gcp_value(gcp, "line"),
            gcp_value(gcp, "x"),
            gcp_value(gcp, "y"),
            gcp_value(gcp, "z"),
        );
    }
    let _ = write!(
        xml,
        "</GCPList><VRTRasterBand dataType=\"Float32\" band=\"1\">\
         <PixelFunctionType>complex_magnitude_squared</PixelFunctionType>\
         <SourceTransferType>Float32</SourceTransferType>\
         <SimpleSource><SourceFilename>{}</SourceFilename><SourceBand>1</SourceBand></SimpleSource>\
         </VRTRasterBand></VRTDataset>",
        xml_escape(&image_path.to_string_lossy())
    );
    Ok(xml)
}

/// Where an artifact comes from before any generation is considered
fn place_existing(target: &Path, previous: Option<&Path>) -> Result<Option<ArtifactOutcome>> {
    if let Some(previous) = previous {
        if previous.exists() {
            std::fs::rename(previous, target)?;
            return Ok(Some(ArtifactOutcome::Renamed));
        }
    }
    if target.exists() {
        return Ok(Some(ArtifactOutcome::AlreadyPresent));
    }
    Ok(None)
}

/// Sibling scratch path; the artifact only appears under its final name
/// once the tool has succeeded.
fn partial_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.partial", name))
}

fn generate<F>(target: &Path, produce: F) -> Result<ArtifactOutcome>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let partial = partial_path(target);
    match produce(&partial) {
        Ok(()) => {
            std::fs::rename(&partial, target)?;
            Ok(ArtifactOutcome::Generated)
        }
        Err(err) => {
            if partial.exists() {
                let _ = std::fs::remove_file(&partial);
            }
            Err(err)
        }
    }
}

/// Creates, renames or keeps the artifacts of one index record
pub struct ArtifactSync<'a, T: RasterTool + ?Sized> {
    settings: &'a Settings,
    tool: &'a T,
    cog_options: CogOptions,
}

impl<'a, T: RasterTool + ?Sized> ArtifactSync<'a, T> {
    pub fn new(settings: &'a Settings, tool: &'a T) -> Self {
        Self {
            settings,
            tool,
            cog_options: CogOptions::default(),
        }
    }

    #[must_use]
    pub fn with_cog_options(mut self, options: CogOptions) -> Self {
        self.cog_options = options;
        self
    }

    /// Bring both artifacts of `record`, found at `file`, in line with `action`
    pub fn sync(
        &self,
        file: &Path,
        info: &RasterInfo,
        record: &ImageIndexRecord,
        action: &IndexAction,
    ) -> Result<ArtifactReport> {
        let old_stem = match action {
            IndexAction::NotIndexed => None,
            IndexAction::ReindexFilename { old_stem } => Some(old_stem.as_str()),
            _ => return Ok(ArtifactReport::untouched()),
        };

        let stem = record.filename.as_str();
        let thumbnail_path = self.settings.thumbnail_path(stem);
        let cog_path = self.settings.cog_path(stem);
        let old_thumbnail = old_stem.map(|s| self.settings.thumbnail_path(s));
        let old_cog = old_stem.map(|s| self.settings.cog_path(s));

        let thumbnail = place_existing(&thumbnail_path, old_thumbnail.as_deref())?;
        let cog = place_existing(&cog_path, old_cog.as_deref())?;
        // Artifacts are keyed by stem, so a new image can land on another's files
        if matches!(action, IndexAction::NotIndexed)
            && [thumbnail, cog].contains(&Some(ArtifactOutcome::AlreadyPresent))
        {
            let shown = file.display().to_string();
            let name = stem.to_string();
            diagnostics::log_debug!("New image {path} reuses existing artifacts named {name}",
                path: shown,
                name: name);
        }
        if let (Some(thumbnail), Some(cog)) = (thumbnail, cog) {
            return Ok(ArtifactReport { thumbnail, cog });
        }

        // Complex rasters are rendered from their intensity
        let scratch = tempfile::tempdir()?;
        let source = if record.image_type == ImageType::Slc {
            let vrt = scratch.path().join(format!("{}_intensity.vrt", stem));
            std::fs::write(&vrt, intensity_vrt(file, info)?)?;
            vrt
        } else {
            file.to_path_buf()
        };

        let thumbnail = match thumbnail {
            Some(outcome) => outcome,
            None => generate(&thumbnail_path, |dst| {
                let (width, height) = thumbnail_size(
                    info.size()?,
                    (
                        record.ground_sample_distance_row,
                        record.ground_sample_distance_col,
                    ),
                    self.settings.thumbnail_min_size,
                );
                let options = TranslateOptions {
                    output_type: Some("Byte".to_string()),
                    scale: Some(None),
                    ..TranslateOptions::new("PNG")
                }
                .outsize(width, height);
                self.tool.translate(&source, dst, &options)
            })?,
        };

        let cog = match cog {
            Some(outcome) => outcome,
            None => generate(&cog_path, |dst| {
                self.tool
                    .warp(&source, dst, &WarpOptions::cog(&self.cog_options))
            })?,
        };

        let name = stem.to_string();
        let thumbnail_outcome = format!("{:?}", thumbnail);
        let cog_outcome = format!("{:?}", cog);
        diagnostics::log_debug!("Artifacts for {name}: thumbnail {thumbnail}, cog {cog}",
            name: name,
            thumbnail: thumbnail_outcome,
            cog: cog_outcome);

        Ok(ArtifactReport { thumbnail, cog })
    }
}
