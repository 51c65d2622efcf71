// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Per-file reconciliation against the index.

use std::fmt;
use std::path::{Path, PathBuf};

use spatialdb::{JoinType, QueryOptions, SpatialDatabase};

use crate::error::Result;
use crate::hashing::ContentDigest;
use crate::model::IMAGES;

/// What an index run does with one discovered file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexAction {
    /// Digest unknown to the index
    NotIndexed,
    /// Known digest whose indexed directory no longer holds it
    ReindexParent,
    /// Known digest whose indexed file stem changed
    ReindexFilename { old_stem: String },
    /// Indexed at this exact path
    Indexed,
    /// Same content already indexed at another live path
    Duplicate { indexed_path: PathBuf },
}

impl IndexAction {
    pub fn label(&self) -> &'static str {
        match self {
            IndexAction::NotIndexed => "not_indexed",
            IndexAction::ReindexParent => "reindex_parent",
            IndexAction::ReindexFilename { .. } => "reindex_filename",
            IndexAction::Indexed => "indexed",
            IndexAction::Duplicate { .. } => "duplicate",
        }
    }

    /// Whether the file is extracted and written back
    pub fn needs_extraction(&self) -> bool {
        matches!(
            self,
            IndexAction::NotIndexed
                | IndexAction::ReindexParent
                | IndexAction::ReindexFilename { .. }
        )
    }
}

impl fmt::Display for IndexAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Absolute path the digest was last indexed at, if any
pub fn indexed_path(db: &SpatialDatabase, digest: &ContentDigest) -> Result<Option<PathBuf>> {
    let options = QueryOptions::new()
        .no_columns()
        .derived(
            "path",
            "catalog.path || '/' || images.relative_path || '/' || images.filename || images.filetype",
        )
        .join(JoinType::Inner, "catalog", Some("catalog.id = images.catalog"))
        .where_clause("images.id = :id")
        .param("id", *digest);

    let rows = db.query(&IMAGES, &options)?;
    Ok(rows
        .first()
        .and_then(|row| row.get("path"))
        .and_then(|v| v.as_str())
        .map(PathBuf::from))
}

fn resolved(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Classify `path`, whose content hashes to `digest`
pub fn check_image(db: &SpatialDatabase, path: &Path, digest: &ContentDigest) -> Result<IndexAction> {
    let Some(indexed) = indexed_path(db, digest)? else {
        return Ok(IndexAction::NotIndexed);
    };

    if !indexed.exists() {
        let old_stem = indexed
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if old_stem != stem {
            return Ok(IndexAction::ReindexFilename { old_stem });
        }
        return Ok(IndexAction::ReindexParent);
    }

    if resolved(&indexed) == resolved(path) {
        Ok(IndexAction::Indexed)
    } else {
        Ok(IndexAction::Duplicate {
            indexed_path: indexed,
        })
    }
}
