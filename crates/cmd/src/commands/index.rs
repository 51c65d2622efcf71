// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;

use anyhow::{Context, Result};
use imagery::{GdalTool, Indexer, RasterTool, Settings};

use crate::common::{open_index, write_json};

pub fn index_command<W: Write>(settings: &Settings, catalog_id: i64, out: &mut W) -> Result<()> {
    let tool = GdalTool::new(settings.gdal_bin.clone());
    index_with_tool(settings, &tool, catalog_id, out)
}

pub fn index_with_tool<W: Write, T: RasterTool + ?Sized>(
    settings: &Settings,
    tool: &T,
    catalog_id: i64,
    out: &mut W,
) -> Result<()> {
    let mut db = open_index(settings)?;
    let summary = Indexer::new(settings, tool)
        .run(&mut db, catalog_id)
        .with_context(|| format!("Index run for catalog {} failed", catalog_id))?;

    if !summary.failures.is_empty() {
        let failed = summary.failures.len();
        diagnostics::log_warn!("{failed} files could not be indexed", failed: failed);
    }
    write_json(out, &summary)
}
