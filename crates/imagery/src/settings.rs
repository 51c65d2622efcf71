// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration.
//!
//! The binary fills [`Settings`] from flags or the `RASTERCAT_*`
//! environment; library callers and tests construct it directly.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const INDEX_DB: &str = "index.db";
pub const THUMBNAIL_DIR: &str = "thumbnails";
pub const COG_DIR: &str = "cog";
pub const DEFAULT_THUMBNAIL_MIN_SIZE: (u32, u32) = (600, 400);

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Directory holding `index.db`
    pub db_dir: PathBuf,
    /// Directory holding the `thumbnails/` and `cog/` artifact trees
    pub static_dir: PathBuf,
    /// Directory containing the GDAL executables; `PATH` lookup when unset
    pub gdal_bin: Option<PathBuf>,
    /// Minimum (width, height) of generated thumbnails
    pub thumbnail_min_size: (u32, u32),
}

impl Settings {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(db_dir: P, static_dir: Q) -> Self {
        Self {
            db_dir: db_dir.into(),
            static_dir: static_dir.into(),
            gdal_bin: None,
            thumbnail_min_size: DEFAULT_THUMBNAIL_MIN_SIZE,
        }
    }

    #[must_use]
    pub fn with_gdal_bin(mut self, gdal_bin: Option<PathBuf>) -> Self {
        self.gdal_bin = gdal_bin;
        self
    }

    #[must_use]
    pub fn with_thumbnail_min_size(mut self, size: (u32, u32)) -> Self {
        self.thumbnail_min_size = size;
        self
    }

    pub fn index_db(&self) -> PathBuf {
        self.db_dir.join(INDEX_DB)
    }

    pub fn thumbnail_dir(&self) -> PathBuf {
        self.static_dir.join(THUMBNAIL_DIR)
    }

    pub fn cog_dir(&self) -> PathBuf {
        self.static_dir.join(COG_DIR)
    }

    pub fn thumbnail_path(&self, stem: &str) -> PathBuf {
        self.thumbnail_dir().join(format!("{}.png", stem))
    }

    pub fn cog_path(&self, stem: &str) -> PathBuf {
        self.cog_dir().join(format!("{}.cog.tif", stem))
    }

    /// Fail unless `db_dir` is an existing directory
    pub fn verify_db_dir(&self) -> Result<()> {
        verify_dir(&self.db_dir)
    }

    /// Create the artifact directories under an existing `static_dir`
    pub fn ensure_artifact_dirs(&self) -> Result<()> {
        verify_dir(&self.static_dir)?;
        std::fs::create_dir_all(self.thumbnail_dir())?;
        std::fs::create_dir_all(self.cog_dir())?;
        Ok(())
    }
}

pub(crate) fn verify_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "Invalid directory path: {}",
            path.display()
        )))
    }
}
