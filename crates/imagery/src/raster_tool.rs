// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! The external raster tool.
//!
//! Pixel work (format conversion, warping, statistics) happens in GDAL
//! executables run as subprocesses. The [`RasterTool`] trait is the seam:
//! [`GdalTool`] drives the real binaries, tests substitute a fake.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

/// Parsed `gdalinfo -json` document
#[derive(Debug, Clone, PartialEq)]
pub struct RasterInfo(JsonValue);

impl RasterInfo {
    pub fn new(document: JsonValue) -> Self {
        Self(document)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(Self(serde_json::from_str(text)?))
    }

    pub fn document(&self) -> &JsonValue {
        &self.0
    }

    /// Raster (width, height) in pixels
    pub fn size(&self) -> Result<(u64, u64)> {
        let size = self.0.get("size").and_then(JsonValue::as_array);
        match size.map(Vec::as_slice) {
            Some([w, h]) => match (w.as_u64(), h.as_u64()) {
                (Some(w), Some(h)) => Ok((w, h)),
                _ => Err(Error::metadata("'size' must hold two integers")),
            },
            _ => Err(Error::metadata("'size' missing from raster info")),
        }
    }

    pub fn bands(&self) -> Result<&[JsonValue]> {
        self.0
            .get("bands")
            .and_then(JsonValue::as_array)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::metadata("'bands' missing from raster info"))
    }

    /// Item from the default (`""`) metadata domain
    pub fn metadata_item(&self, key: &str) -> Option<&str> {
        self.0
            .get("metadata")
            .and_then(|m| m.get(""))
            .and_then(|m| m.get(key))
            .and_then(JsonValue::as_str)
    }

    /// Default-domain metadata item holding an embedded JSON document
    pub fn metadata_json(&self, key: &str) -> Result<Option<JsonValue>> {
        match self.metadata_item(key) {
            Some(text) => serde_json::from_str(text)
                .map(Some)
                .map_err(|e| Error::metadata(format!("{} is not valid JSON: {}", key, e))),
            None => Ok(None),
        }
    }

    pub fn gcps(&self) -> Option<&JsonValue> {
        self.0.get("gcps")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resampling {
    Nearest,
    Bilinear,
    Cubic,
    CubicSpline,
    Lanczos,
    Average,
    Rms,
    Mode,
}

impl Resampling {
    pub fn as_str(self) -> &'static str {
        match self {
            Resampling::Nearest => "nearest",
            Resampling::Bilinear => "bilinear",
            Resampling::Cubic => "cubic",
            Resampling::CubicSpline => "cubicspline",
            Resampling::Lanczos => "lanczos",
            Resampling::Average => "average",
            Resampling::Rms => "rms",
            Resampling::Mode => "mode",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expand {
    Gray,
    Rgb,
    Rgba,
}

impl Expand {
    fn as_str(self) -> &'static str {
        match self {
            Expand::Gray => "gray",
            Expand::Rgb => "rgb",
            Expand::Rgba => "rgba",
        }
    }
}

/// Statistics requested from `gdalinfo`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Statistics {
    #[default]
    None,
    Exact,
    Approx,
}

/// `gdal_translate` options
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TranslateOptions {
    pub output_format: String,
    pub bands: Vec<u32>,
    pub output_type: Option<String>,
    pub overview: Option<u32>,
    pub resampling: Option<Resampling>,
    /// `Some(None)` emits a bare `-scale`
    pub scale: Option<Option<(f64, f64)>>,
    pub band_scales: Vec<(f64, f64)>,
    pub exponent: Option<f64>,
    pub outsize: Option<(u32, u32)>,
    pub expand: Option<Expand>,
    pub color_interp: Option<String>,
    pub band_color_interp: Vec<String>,
    pub assign_srs: Option<String>,
    /// ulx, uly, lrx, lry
    pub assign_bounds: Option<[f64; 4]>,
    pub creation_options: Vec<(String, String)>,
    /// Keep the `.aux.xml` side file GDAL writes by default
    pub create_aux: bool,
}

impl TranslateOptions {
    pub fn new<S: Into<String>>(output_format: S) -> Self {
        Self {
            output_format: output_format.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn outsize(mut self, width: u32, height: u32) -> Self {
        self.outsize = Some((width, height));
        self
    }

    #[must_use]
    pub fn band_scales(mut self, ranges: Vec<(f64, f64)>) -> Self {
        self.band_scales = ranges;
        self
    }

    /// Arguments preceding the source and destination paths
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["-of".to_string(), self.output_format.clone()];

        if let Some(output_type) = &self.output_type {
            args.extend(["-ot".to_string(), output_type.clone()]);
        }
        if let Some(level) = self.overview {
            args.extend(["-ovr".to_string(), level.to_string()]);
        }
        if let Some(resampling) = self.resampling {
            args.extend(["-r".to_string(), resampling.as_str().to_string()]);
        }
        if let Some(scale) = self.scale {
            args.push("-scale".to_string());
            if let Some((lo, hi)) = scale {
                args.extend([lo.to_string(), hi.to_string()]);
            }
        }
        for (i, (lo, hi)) in self.band_scales.iter().enumerate() {
            args.extend([format!("-scale_{}", i + 1), lo.to_string(), hi.to_string()]);
        }
        if let Some(exponent) = self.exponent {
            args.extend(["-exponent".to_string(), exponent.to_string()]);
        }
        for band in &self.bands {
            args.extend(["-b".to_string(), band.to_string()]);
        }
        if let Some((w, h)) = self.outsize {
            args.extend(["-outsize".to_string(), w.to_string(), h.to_string()]);
        }
        if let Some(expand) = self.expand {
            args.extend(["-expand".to_string(), expand.as_str().to_string()]);
        }
        if let Some(interp) = &self.color_interp {
            args.extend(["-colorinterp".to_string(), interp.clone()]);
        }
        for (i, interp) in self.band_color_interp.iter().enumerate() {
            args.extend([format!("-colorinterp_{}", i + 1), interp.clone()]);
        }
        if let Some(srs) = &self.assign_srs {
            args.extend(["-a_srs".to_string(), srs.clone()]);
        }
        if let Some(bounds) = self.assign_bounds {
            args.push("-a_ullr".to_string());
            args.extend(bounds.iter().map(f64::to_string));
        }
        for (key, value) in &self.creation_options {
            args.extend(["-co".to_string(), format!("{}={}", key, value)]);
        }
        if !self.create_aux {
            args.extend([
                "--config".to_string(),
                "GDAL_PAM_ENABLED".to_string(),
                "NO".to_string(),
            ]);
        }
        args
    }
}

/// Creation options for the COG driver
#[derive(Debug, Clone, PartialEq)]
pub struct CogOptions {
    pub bigtiff: String,
    pub geotiff_version: String,
    pub compress: String,
    pub predictor: String,
    pub num_threads: String,
    pub resampling: String,
}

impl Default for CogOptions {
    fn default() -> Self {
        Self {
            bigtiff: "YES".to_string(),
            geotiff_version: "1.1".to_string(),
            compress: "LZW".to_string(),
            predictor: "YES".to_string(),
            num_threads: "ALL_CPUS".to_string(),
            resampling: "NEAREST".to_string(),
        }
    }
}

impl CogOptions {
    pub fn creation_options(&self) -> Vec<(String, String)> {
        vec![
            ("BIGTIFF".to_string(), self.bigtiff.clone()),
            ("GEOTIFF_VERSION".to_string(), self.geotiff_version.clone()),
            ("COMPRESS".to_string(), self.compress.clone()),
            ("PREDICTOR".to_string(), self.predictor.clone()),
            ("NUM_THREADS".to_string(), self.num_threads.clone()),
            ("RESAMPLING".to_string(), self.resampling.clone()),
        ]
    }
}

/// `gdalwarp` options
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WarpOptions {
    pub output_format: Option<String>,
    pub resampling: Option<Resampling>,
    pub creation_options: Vec<(String, String)>,
}

impl WarpOptions {
    /// Nearest-neighbour warp to a cloud-optimized GeoTIFF
    pub fn cog(options: &CogOptions) -> Self {
        Self {
            output_format: Some("COG".to_string()),
            resampling: Some(Resampling::Nearest),
            creation_options: options.creation_options(),
        }
    }

    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(format) = &self.output_format {
            args.extend(["-of".to_string(), format.clone()]);
        }
        if let Some(resampling) = self.resampling {
            args.extend(["-r".to_string(), resampling.as_str().to_string()]);
        }
        for (key, value) in &self.creation_options {
            args.extend(["-co".to_string(), format!("{}={}", key, value)]);
        }
        args
    }
}

pub trait RasterTool {
    /// Describe a raster (`gdalinfo -json`)
    fn info(&self, path: &Path, stats: Statistics) -> Result<RasterInfo>;

    fn translate(&self, src: &Path, dst: &Path, options: &TranslateOptions) -> Result<()>;

    fn warp(&self, src: &Path, dst: &Path, options: &WarpOptions) -> Result<()>;
}

/// [`RasterTool`] backed by the GDAL command-line utilities
#[derive(Debug, Clone, Default)]
pub struct GdalTool {
    bin_dir: Option<PathBuf>,
}

impl GdalTool {
    pub fn new(bin_dir: Option<PathBuf>) -> Self {
        Self { bin_dir }
    }

    fn program(&self, name: &str) -> PathBuf {
        let file = format!("{}{}", name, std::env::consts::EXE_SUFFIX);
        match &self.bin_dir {
            Some(dir) => dir.join(file),
            None => PathBuf::from(file),
        }
    }

    fn run(&self, tool: &str, args: Vec<OsString>) -> Result<Vec<u8>> {
        let program = self.program(tool);
        let command_line = format!("{} {:?}", program.display(), args);
        diagnostics::log_debug!("Running {command}", command: command_line);

        let output = Command::new(&program).args(&args).output().map_err(|e| {
            Error::ExternalTool {
                tool: tool.to_string(),
                status: "not started".to_string(),
                stderr: format!("{}: {}", program.display(), e),
            }
        })?;

        if !output.status.success() {
            return Err(Error::ExternalTool {
                tool: tool.to_string(),
                status: output.status.to_string(),
                stderr: format!(
                    "STDOUT: {}\nSTDERR: {}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }
        Ok(output.stdout)
    }
}

fn with_paths(args: Vec<String>, paths: &[&Path]) -> Vec<OsString> {
    let mut out: Vec<OsString> = args.into_iter().map(OsString::from).collect();
    out.extend(paths.iter().map(|p| p.as_os_str().to_os_string()));
    out
}

impl RasterTool for GdalTool {
    fn info(&self, path: &Path, stats: Statistics) -> Result<RasterInfo> {
        if !path.exists() {
            return Err(Error::not_found(format!("Invalid path: {}", path.display())));
        }

        let mut args = vec!["-json".to_string()];
        match stats {
            Statistics::None => {}
            Statistics::Exact => args.push("-stats".to_string()),
            Statistics::Approx => args.push("-approx_stats".to_string()),
        }
        let stdout = self.run("gdalinfo", with_paths(args, &[path]))?;
        RasterInfo::from_json_str(&String::from_utf8_lossy(&stdout))
    }

    fn translate(&self, src: &Path, dst: &Path, options: &TranslateOptions) -> Result<()> {
        self.run("gdal_translate", with_paths(options.to_args(), &[src, dst]))?;
        Ok(())
    }

    fn warp(&self, src: &Path, dst: &Path, options: &WarpOptions) -> Result<()> {
        self.run("gdalwarp", with_paths(options.to_args(), &[src, dst]))?;
        Ok(())
    }
}

fn band_stat(band: &JsonValue, metadata_key: &str, field: &str) -> Result<f64> {
    let from_metadata = band
        .get("metadata")
        .and_then(|m| m.get(""))
        .and_then(|m| m.get(metadata_key))
        .and_then(JsonValue::as_str)
        .and_then(|s| s.trim().parse::<f64>().ok());

    from_metadata
        .or_else(|| band.get(field).and_then(JsonValue::as_f64))
        .ok_or_else(|| Error::metadata(format!("Band statistic '{}' missing", field)))
}

/// Per-band scale ranges `mean ± z·σ` from a raster-info document computed
/// with statistics. With `bound`, ranges are clamped to the band min/max.
pub fn band_ranges(info: &RasterInfo, z: f64, bound: bool) -> Result<Vec<(f64, f64)>> {
    let mut ranges = Vec::new();
    for band in info.bands()? {
        let mean = band_stat(band, "STATISTICS_MEAN", "mean")?;
        let std = band_stat(band, "STATISTICS_STDDEV", "stdDev")?;
        let mut lower = mean - z * std;
        let mut upper = mean + z * std;

        if bound {
            lower = lower.max(band_stat(band, "STATISTICS_MINIMUM", "minimum")?);
            upper = upper.min(band_stat(band, "STATISTICS_MAXIMUM", "maximum")?);
        }
        ranges.push((lower, upper));
    }
    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_translate_args() {
        let options = TranslateOptions {
            bands: vec![3, 2, 1],
            output_type: Some("Byte".to_string()),
            scale: Some(None),
            band_scales: vec![(0.0, 255.0)],
            assign_bounds: Some([0.0, 1.0, 1.0, 0.0]),
            creation_options: vec![("QUALITY".to_string(), "90".to_string())],
            ..TranslateOptions::new("JPEG")
        }
        .outsize(600, 400);

        let args = options.to_args();
        assert_eq!(
            args,
            vec![
                "-of", "JPEG", "-ot", "Byte", "-scale", "-scale_1", "0", "255", "-b", "3", "-b",
                "2", "-b", "1", "-outsize", "600", "400", "-a_ullr", "0", "1", "1", "0", "-co",
                "QUALITY=90", "--config", "GDAL_PAM_ENABLED", "NO",
            ]
        );
    }

    #[test]
    fn test_cog_warp_args() {
        let args = WarpOptions::cog(&CogOptions::default()).to_args();
        assert_eq!(&args[..4], &["-of", "COG", "-r", "nearest"]);
        assert!(args.contains(&"BIGTIFF=YES".to_string()));
        assert!(args.contains(&"GEOTIFF_VERSION=1.1".to_string()));
        assert!(args.contains(&"COMPRESS=LZW".to_string()));
        assert!(args.contains(&"NUM_THREADS=ALL_CPUS".to_string()));
        assert!(args.contains(&"RESAMPLING=NEAREST".to_string()));
    }

    #[test]
    fn test_raster_info_accessors() {
        let info = RasterInfo::new(json!({
            "size": [100, 50],
            "bands": [{"band": 1, "type": "Byte"}],
            "metadata": {"": {"DOC": "{\"a\": 1}", "BAD": "{"}},
        }));
        assert_eq!(info.size().unwrap(), (100, 50));
        assert_eq!(info.bands().unwrap().len(), 1);
        assert_eq!(info.metadata_json("DOC").unwrap(), Some(json!({"a": 1})));
        assert!(info.metadata_json("MISSING").unwrap().is_none());
        assert!(matches!(info.metadata_json("BAD"), Err(Error::Metadata(_))));

        let empty = RasterInfo::new(json!({}));
        assert!(empty.size().is_err());
        assert!(empty.bands().is_err());
    }

    #[test]
    fn test_band_ranges() {
        let info = RasterInfo::new(json!({
            "bands": [
                {"mean": 100.0, "stdDev": 10.0, "minimum": 90.0, "maximum": 200.0},
                {"metadata": {"": {"STATISTICS_MEAN": "50", "STATISTICS_STDDEV": "5"}},
                 "mean": 0.0, "stdDev": 0.0, "minimum": 0.0, "maximum": 60.0},
            ]
        }));
        assert_eq!(
            band_ranges(&info, 3.0, false).unwrap(),
            vec![(70.0, 130.0), (35.0, 65.0)]
        );
        assert_eq!(
            band_ranges(&info, 3.0, true).unwrap(),
            vec![(90.0, 130.0), (35.0, 60.0)]
        );

        let missing = RasterInfo::new(json!({"bands": [{"mean": 1.0}]}));
        assert!(band_ranges(&missing, 2.0, false).is_err());
    }

    #[test]
    fn test_missing_binary_is_external_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let tool = GdalTool::new(Some(dir.path().to_path_buf()));
        let src = dir.path().join("a.tif");
        std::fs::write(&src, b"x").unwrap();
        let err = tool.info(&src, Statistics::None).unwrap_err();
        assert!(matches!(err, Error::ExternalTool { .. }));
    }
}
