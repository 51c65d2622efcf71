// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Index runs over a registered catalog.
//!
//! One run walks the catalog root, reconciles every raster it finds against
//! the index, extracts and syncs artifacts where the action calls for it,
//! then writes all accumulated rows in one batch. A file that fails is
//! recorded in the [`IndexSummary`] and the run moves on.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use spatialdb::{OnConflict, SpatialDatabase};
use walkdir::WalkDir;

use crate::artifacts::{ArtifactOutcome, ArtifactSync};
use crate::catalog::{catalog_root, touch_last_indexed};
use crate::error::{Error, Result};
use crate::hashing::{ContentDigest, hash_file};
use crate::metadata::extract;
use crate::model::{IMAGE_LOCATION_COLUMNS, ImageIndexRecord, RadiometricParams};
use crate::raster_tool::{RasterTool, Statistics};
use crate::reconcile::{IndexAction, check_image};
use crate::settings::Settings;

const RASTER_EXTENSIONS: [&str; 2] = ["tif", "tiff"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateFile {
    pub path: PathBuf,
    pub indexed_path: PathBuf,
}

/// Outcome of one index run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexSummary {
    pub catalog: i64,
    pub not_indexed: usize,
    pub reindex_parent: usize,
    pub reindex_filename: usize,
    pub indexed: usize,
    pub duplicates: Vec<DuplicateFile>,
    pub failures: Vec<FileFailure>,
    /// Image rows inserted or re-pointed
    pub rows_written: usize,
    pub artifacts_generated: usize,
    pub artifacts_renamed: usize,
}

impl IndexSummary {
    fn count(&mut self, action: &IndexAction, path: &Path) {
        match action {
            IndexAction::NotIndexed => self.not_indexed += 1,
            IndexAction::ReindexParent => self.reindex_parent += 1,
            IndexAction::ReindexFilename { .. } => self.reindex_filename += 1,
            IndexAction::Indexed => self.indexed += 1,
            IndexAction::Duplicate { indexed_path } => self.duplicates.push(DuplicateFile {
                path: path.to_path_buf(),
                indexed_path: indexed_path.clone(),
            }),
        }
    }

    fn count_artifact(&mut self, outcome: ArtifactOutcome) {
        match outcome {
            ArtifactOutcome::Generated => self.artifacts_generated += 1,
            ArtifactOutcome::Renamed => self.artifacts_renamed += 1,
            ArtifactOutcome::AlreadyPresent | ArtifactOutcome::Untouched => {}
        }
    }

    pub fn files_seen(&self) -> usize {
        self.not_indexed
            + self.reindex_parent
            + self.reindex_filename
            + self.indexed
            + self.duplicates.len()
            + self.failures.len()
    }
}

fn is_raster(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|e| RASTER_EXTENSIONS.contains(&e.as_str()))
}

fn relative_dir(root: &Path, file: &Path) -> PathBuf {
    let parent = file.parent().unwrap_or(root);
    match parent.strip_prefix(root) {
        Ok(rel) if rel.as_os_str().is_empty() => PathBuf::from("."),
        Ok(rel) => rel.to_path_buf(),
        Err(_) => PathBuf::from("."),
    }
}

/// Rows accumulated over a run, written once at the end
#[derive(Default)]
struct PendingRows {
    images: Vec<ImageIndexRecord>,
    radiometric: Vec<RadiometricParams>,
    /// Digests claimed earlier in this run
    claimed: HashMap<ContentDigest, PathBuf>,
}

pub struct Indexer<'a, T: RasterTool + ?Sized> {
    settings: &'a Settings,
    tool: &'a T,
}

impl<'a, T: RasterTool + ?Sized> Indexer<'a, T> {
    pub fn new(settings: &'a Settings, tool: &'a T) -> Self {
        Self { settings, tool }
    }

    /// Index every `.tif`/`.tiff` under the root of catalog `catalog_id`
    pub fn run(&self, db: &mut SpatialDatabase, catalog_id: i64) -> Result<IndexSummary> {
        self.settings.ensure_artifact_dirs()?;
        let root = catalog_root(db, catalog_id)?;
        let root = root.canonicalize().unwrap_or(root);

        let shown = root.display().to_string();
        diagnostics::log_info!("Indexing catalog {catalog} at {root}", catalog: catalog_id, root: shown);

        let mut summary = IndexSummary {
            catalog: catalog_id,
            ..IndexSummary::default()
        };
        let mut pending = PendingRows::default();

        let walker = WalkDir::new(&root).sort_by_file_name().into_iter();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                    self.record_failure(&mut summary, path, err.into());
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_raster(entry.path()) {
                continue;
            }

            let file = entry.path();
            if let Err(err) = self.process_file(db, catalog_id, &root, file, &mut pending, &mut summary) {
                self.record_failure(&mut summary, file.to_path_buf(), err);
            }
        }

        if !pending.images.is_empty() {
            let on_conflict = OnConflict::update(IMAGE_LOCATION_COLUMNS).on(["id"]);
            summary.rows_written = db.upsert(&pending.images, Some(&on_conflict))?;
        }
        if !pending.radiometric.is_empty() {
            db.upsert(&pending.radiometric, Some(&OnConflict::do_nothing().on(["id"])))?;
        }
        touch_last_indexed(db, catalog_id, Utc::now())?;

        let (new, moved, renamed) = (
            summary.not_indexed,
            summary.reindex_parent,
            summary.reindex_filename,
        );
        let unchanged = summary.indexed;
        let duplicates = summary.duplicates.len();
        let failed = summary.failures.len();
        diagnostics::log_info!(
            "Indexed catalog {catalog}: {new} new, {moved} moved, {renamed} renamed, {unchanged} unchanged, {duplicates} duplicate, {failed} failed",
            catalog: catalog_id,
            new: new,
            moved: moved,
            renamed: renamed,
            unchanged: unchanged,
            duplicates: duplicates,
            failed: failed
        );
        Ok(summary)
    }

    fn process_file(
        &self,
        db: &SpatialDatabase,
        catalog_id: i64,
        root: &Path,
        file: &Path,
        pending: &mut PendingRows,
        summary: &mut IndexSummary,
    ) -> Result<()> {
        // Stored paths are text; a lossy name would never resolve again
        if file.to_str().is_none() {
            return Err(Error::validation(format!(
                "File path is not valid UTF-8: {}",
                file.display()
            )));
        }
        let digest = hash_file(file)?;
        let action = match pending.claimed.get(&digest) {
            Some(first) => IndexAction::Duplicate {
                indexed_path: first.clone(),
            },
            None => check_image(db, file, &digest)?,
        };

        let shown = file.display().to_string();
        let label = action.label();
        diagnostics::log_debug!("{path}: {action}", path: shown, action: label);

        if action.needs_extraction() {
            let info = self.tool.info(file, Statistics::None)?;
            let extraction = extract(&info, digest, catalog_id, file, &relative_dir(root, file))?;

            let report = ArtifactSync::new(self.settings, self.tool).sync(
                file,
                &info,
                &extraction.record,
                &action,
            )?;
            summary.count_artifact(report.thumbnail);
            summary.count_artifact(report.cog);

            pending.images.push(extraction.record);
            pending.radiometric.extend(extraction.radiometric);
        }

        if !matches!(action, IndexAction::Duplicate { .. }) {
            pending.claimed.insert(digest, file.to_path_buf());
        }
        summary.count(&action, file);
        Ok(())
    }

    fn record_failure(&self, summary: &mut IndexSummary, path: PathBuf, err: Error) {
        let shown = path.display().to_string();
        let message = err.to_string();
        diagnostics::log_warn!("Skipping {path}: {error}", path: shown, error: message);
        summary.failures.push(FileFailure { path, message });
    }
}
