// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use imagery::{GdalTool, RasterTool, Statistics, band_ranges};
use serde::Serialize;

use crate::common::write_json;

#[derive(Serialize, Debug, PartialEq)]
pub struct BandRange {
    pub band: usize,
    pub lower: f64,
    pub upper: f64,
}

/// Print per-band `mean ± z·σ` scale ranges of a raster
pub fn ranges_command<W: Write>(
    gdal_bin: Option<PathBuf>,
    file: &Path,
    z: f64,
    bound: bool,
    out: &mut W,
) -> Result<()> {
    let tool = GdalTool::new(gdal_bin);
    ranges_with_tool(&tool, file, z, bound, out)
}

pub fn ranges_with_tool<W: Write, T: RasterTool + ?Sized>(
    tool: &T,
    file: &Path,
    z: f64,
    bound: bool,
    out: &mut W,
) -> Result<()> {
    let info = tool
        .info(file, Statistics::Exact)
        .with_context(|| format!("Failed to read statistics of {}", file.display()))?;
    let ranges: Vec<BandRange> = band_ranges(&info, z, bound)?
        .into_iter()
        .enumerate()
        .map(|(i, (lower, upper))| BandRange {
            band: i + 1,
            lower,
            upper,
        })
        .collect();
    write_json(out, &ranges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use imagery::{RasterInfo, TranslateOptions, WarpOptions};
    use serde_json::json;

    struct StatsTool;

    impl RasterTool for StatsTool {
        fn info(&self, _path: &Path, stats: Statistics) -> imagery::Result<RasterInfo> {
            assert_eq!(stats, Statistics::Exact);
            Ok(RasterInfo::new(json!({
                "bands": [{"mean": 100.0, "stdDev": 10.0, "minimum": 90.0, "maximum": 200.0}],
            })))
        }

        fn translate(&self, _: &Path, _: &Path, _: &TranslateOptions) -> imagery::Result<()> {
            Err(imagery::Error::validation("unused"))
        }

        fn warp(&self, _: &Path, _: &Path, _: &WarpOptions) -> imagery::Result<()> {
            Err(imagery::Error::validation("unused"))
        }
    }

    #[test]
    fn test_ranges_with_tool() -> Result<()> {
        let mut out = Vec::new();
        ranges_with_tool(&StatsTool, Path::new("a.tif"), 3.0, false, &mut out)?;
        let printed: serde_json::Value = serde_json::from_slice(&out)?;
        assert_eq!(printed, json!([{"band": 1, "lower": 70.0, "upper": 130.0}]));

        let mut out = Vec::new();
        ranges_with_tool(&StatsTool, Path::new("a.tif"), 3.0, true, &mut out)?;
        let printed: serde_json::Value = serde_json::from_slice(&out)?;
        assert_eq!(printed, json!([{"band": 1, "lower": 90.0, "upper": 130.0}]));
        Ok(())
    }
}
