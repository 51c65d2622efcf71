// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Geocoded raster imagery catalog.
//!
//! Files are identified by the SHA-256 of their content, so an index run
//! recognizes images that were renamed or moved and only re-extracts and
//! re-points them. Derived thumbnails and cloud-optimized rasters are kept in
//! step with the index through the external GDAL tools.

pub mod artifacts;
pub mod catalog;
pub mod error;
pub mod hashing;
pub mod indexer;
pub mod metadata;
pub mod model;
pub mod raster_tool;
pub mod reconcile;
pub mod search;
pub mod settings;

pub use artifacts::{ArtifactOutcome, ArtifactReport, ArtifactSync, thumbnail_size};
pub use catalog::{
    catalog_root, edit_catalog, ensure_schema, get_catalog, list_catalogs, open_index,
    register_catalog, touch_last_indexed,
};
pub use error::{Error, Result};
pub use hashing::{ContentDigest, hash_file};
pub use indexer::{DuplicateFile, FileFailure, IndexSummary, Indexer};
pub use metadata::{Extraction, detect_image_type, extract, ground_sample_distance};
pub use model::{
    Catalog, ImageIndexRecord, ImageType, NoiseLevelType, NoiseParameters, RadiometricFactor,
    RadiometricParams, SensorType,
};
pub use raster_tool::{
    CogOptions, GdalTool, RasterInfo, RasterTool, Statistics, TranslateOptions, WarpOptions,
    band_ranges,
};
pub use reconcile::{IndexAction, check_image};
pub use search::{image_info, images_by_geojson, images_by_intersection, radiometric_params, search_text};
pub use settings::Settings;
