// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Args;
use imagery::Settings;
use spatialdb::{RecordMap, SpatialDatabase};

/// Store locations shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct StoreArgs {
    /// Directory holding index.db
    #[arg(long, env = "RASTERCAT_DB_DIR", global = true)]
    pub db_dir: Option<PathBuf>,

    /// Directory receiving thumbnails/ and cog/
    #[arg(long, env = "RASTERCAT_STATIC_DIR", global = true)]
    pub static_dir: Option<PathBuf>,

    /// Directory containing the GDAL executables (default: PATH lookup)
    #[arg(long, env = "RASTERCAT_GDAL_BIN", global = true)]
    pub gdal_bin: Option<PathBuf>,
}

impl StoreArgs {
    /// Settings for commands that only read or write the index
    pub fn index_settings(&self) -> Result<Settings> {
        let db_dir = self.db_dir()?;
        let static_dir = self.static_dir.clone().unwrap_or_else(|| db_dir.clone());
        Ok(Settings::new(db_dir, static_dir).with_gdal_bin(self.gdal_bin.clone()))
    }

    /// Settings for commands that also produce artifacts
    pub fn artifact_settings(&self) -> Result<Settings> {
        let static_dir = self.static_dir.clone().ok_or_else(|| {
            anyhow!("Static directory not set: pass --static-dir or set RASTERCAT_STATIC_DIR")
        })?;
        Ok(Settings::new(self.db_dir()?, static_dir).with_gdal_bin(self.gdal_bin.clone()))
    }

    fn db_dir(&self) -> Result<PathBuf> {
        self.db_dir
            .clone()
            .ok_or_else(|| anyhow!("Database directory not set: pass --db-dir or set RASTERCAT_DB_DIR"))
    }
}

/// Open the index named by `settings`
pub fn open_index(settings: &Settings) -> Result<SpatialDatabase> {
    imagery::open_index(settings)
        .with_context(|| format!("Failed to open index in {}", settings.db_dir.display()))
}

pub fn write_json<W: Write, T: serde::Serialize + ?Sized>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

pub fn write_rows<W: Write>(out: &mut W, rows: &[RecordMap]) -> Result<()> {
    write_json(out, rows)
}
