// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use cmd::commands::{self, FactorChoice};
use cmd::common::StoreArgs;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "rastercat")]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage registered catalog directories
    Catalog {
        #[command(subcommand)]
        command: CatalogCommands,
    },
    /// Index every raster under a catalog root
    Index {
        /// Catalog id
        catalog: i64,

        /// Minimum thumbnail width in pixels
        #[arg(long, default_value_t = imagery::settings::DEFAULT_THUMBNAIL_MIN_SIZE.0)]
        thumbnail_min_width: u32,

        /// Minimum thumbnail height in pixels
        #[arg(long, default_value_t = imagery::settings::DEFAULT_THUMBNAIL_MIN_SIZE.1)]
        thumbnail_min_height: u32,
    },
    /// Find images whose footprint intersects a GeoJSON polygon
    Search {
        /// GeoJSON file holding a Polygon geometry or Feature
        polygon: PathBuf,
    },
    /// Full-text search over filename, sensor name and classification
    Text {
        query: String,

        #[arg(short, long)]
        limit: Option<u64>,
    },
    /// Show the filename and image type of an image
    Info {
        /// Image id (URL-safe base64 content digest)
        id: String,
    },
    /// Show radiometric calibration polynomials of an SLC image
    Radiometric {
        /// Image id (URL-safe base64 content digest)
        id: String,

        /// Polynomials to return (default: all)
        #[arg(short, long = "factor", value_enum)]
        factors: Vec<FactorChoice>,
    },
    /// Print the content digest of a file
    Hash { file: PathBuf },
    /// Print per-band scale ranges (mean ± z standard deviations) of a raster
    Ranges {
        file: PathBuf,

        /// Number of standard deviations around the mean
        #[arg(short, long, default_value_t = 3.0)]
        z: f64,

        /// Clamp ranges to the band minimum and maximum
        #[arg(long)]
        bound: bool,
    },
}

#[derive(Subcommand)]
enum CatalogCommands {
    /// Register a directory
    Add { path: PathBuf, name: String },
    /// Change the root path or name of a catalog
    Edit {
        id: i64,

        #[arg(long)]
        path: Option<PathBuf>,

        #[arg(long)]
        name: Option<String>,
    },
    /// List registered catalogs
    List,
}

fn main() -> Result<()> {
    diagnostics::init_diagnostics();

    let cli = Cli::parse();
    let store = &cli.store;
    let mut out = std::io::stdout().lock();

    match &cli.command {
        Commands::Catalog { command } => {
            let settings = store.index_settings()?;
            match command {
                CatalogCommands::Add { path, name } => {
                    commands::catalog_add_command(&settings, path, name, &mut out)
                }
                CatalogCommands::Edit { id, path, name } => commands::catalog_edit_command(
                    &settings,
                    *id,
                    path.as_deref(),
                    name.as_deref(),
                    &mut out,
                ),
                CatalogCommands::List => commands::catalog_list_command(&settings, &mut out),
            }
        }
        Commands::Index {
            catalog,
            thumbnail_min_width,
            thumbnail_min_height,
        } => {
            let settings = store
                .artifact_settings()?
                .with_thumbnail_min_size((*thumbnail_min_width, *thumbnail_min_height));
            commands::index_command(&settings, *catalog, &mut out)
        }
        Commands::Search { polygon } => {
            commands::search_command(&store.index_settings()?, polygon, &mut out)
        }
        Commands::Text { query, limit } => {
            commands::text_command(&store.index_settings()?, query, *limit, &mut out)
        }
        Commands::Info { id } => commands::info_command(&store.index_settings()?, id, &mut out),
        Commands::Radiometric { id, factors } => {
            commands::radiometric_command(&store.index_settings()?, id, factors, &mut out)
        }
        Commands::Hash { file } => commands::hash_command(file, &mut out),
        Commands::Ranges { file, z, bound } => {
            commands::ranges_command(store.gdal_bin.clone(), file, *z, *bound, &mut out)
        }
    }
}
