// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Index runs against a fake raster tool.
//!
//! Every test raster is a small text file `scene <lon> <lat> <kind>`; the
//! fake turns it into a `gdalinfo` document whose footprint is the unit
//! square at (lon, lat), and writes placeholder artifacts.

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use imagery::{
    ImageIndexRecord, ImageType, IndexAction, IndexSummary, Indexer, RadiometricFactor,
    RasterInfo, RasterTool, Settings, Statistics, TranslateOptions,
    WarpOptions, check_image, edit_catalog, hash_file, image_info, images_by_geojson,
    open_index, radiometric_params, register_catalog, search_text,
};
use serde_json::{Value as JsonValue, json};
use spatialdb::{QueryOptions, SpatialDatabase};

#[derive(Default)]
struct FakeTool {
    info_calls: Cell<usize>,
    translate_calls: Cell<usize>,
    warp_calls: Cell<usize>,
}

impl FakeTool {
    fn artifact_calls(&self) -> usize {
        self.translate_calls.get() + self.warp_calls.get()
    }
}

fn sensor_document(lon: f64, lat: f64, slc: bool) -> JsonValue {
    let mut metadata = json!({
        "CollectionInfo": {
            "CollectorName": "SAT-1",
            "Classification": "UNCLASSIFIED",
            "Parameters": {"PREDICTED_RNIIRS": 4.0},
        },
        "GeoData": {
            "ImageCorners": [
                {"Lat": lat + 1.0, "Lon": lon},
                {"Lat": lat + 1.0, "Lon": lon + 1.0},
                {"Lat": lat, "Lon": lon + 1.0},
                {"Lat": lat, "Lon": lon},
            ],
        },
        "Timeline": {"CollectStart": "2024-05-06T07:08:09Z"},
        "SCPCOA": {"IncidenceAng": 35.0, "AzimAng": 120.0},
        "RadarCollection": {"Area": {"Plane": {
            "XDir": {"LineSpacing": 0.5},
            "YDir": {"SampleSpacing": 0.5},
        }}},
    });
    if slc {
        metadata["Radiometric"] = json!({
            "NoiseLevel": {"NoiseLevelType": "RELATIVE", "NoisePoly": {"Coefs": [[0.5]]}},
            "SigmaZeroSFPoly": {"Coefs": [[1.5, 0.0]]},
            "BetaZeroSFPoly": {"Coefs": [[2.5]]},
        });
    }
    json!({"metadata": metadata})
}

impl RasterTool for FakeTool {
    fn info(&self, path: &Path, _stats: Statistics) -> imagery::Result<RasterInfo> {
        self.info_calls.set(self.info_calls.get() + 1);
        let text = fs::read_to_string(path)?;
        let parts: Vec<&str> = text.split_whitespace().collect();
        let [_, lon, lat, kind] = parts.as_slice() else {
            return Err(imagery::Error::metadata(format!("unreadable raster {}", path.display())));
        };
        let lon: f64 = lon.parse().map_err(|_| imagery::Error::metadata("bad lon"))?;
        let lat: f64 = lat.parse().map_err(|_| imagery::Error::metadata("bad lat"))?;
        let slc = *kind == "slc";

        Ok(RasterInfo::new(json!({
            "size": [2000, 1000],
            "bands": [{"band": 1, "type": if slc { "CInt16" } else { "Float32" }}],
            "metadata": {"": {"SICD_METADATA": sensor_document(lon, lat, slc).to_string()}},
            "gcps": {
                "coordinateSystem": {"wkt": ""},
                "gcpList": [{"id": "1", "pixel": 0.0, "line": 0.0, "x": lon, "y": lat, "z": 0.0}],
            },
        })))
    }

    fn translate(&self, _src: &Path, dst: &Path, options: &TranslateOptions) -> imagery::Result<()> {
        self.translate_calls.set(self.translate_calls.get() + 1);
        assert_eq!(options.output_format, "PNG");
        assert_eq!(options.outsize, Some((800, 400)));
        fs::write(dst, b"thumbnail")?;
        Ok(())
    }

    fn warp(&self, src: &Path, dst: &Path, options: &WarpOptions) -> imagery::Result<()> {
        self.warp_calls.set(self.warp_calls.get() + 1);
        assert_eq!(options.output_format.as_deref(), Some("COG"));
        assert!(src.exists());
        fs::write(dst, b"cog")?;
        Ok(())
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    settings: Settings,
    tool: FakeTool,
    db: SpatialDatabase,
    catalog: i64,
}

impl Fixture {
    fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("data").join("scenes");
        let db_dir = dir.path().join("db");
        let static_dir = dir.path().join("static");
        for d in [&root, &db_dir, &static_dir] {
            fs::create_dir_all(d)?;
        }
        let root = root.canonicalize()?;

        let settings = Settings::new(&db_dir, &static_dir);
        let mut db = open_index(&settings)?;
        let catalog = register_catalog(&mut db, &root, "scenes")?.id;

        Ok(Self {
            _dir: dir,
            root,
            settings,
            tool: FakeTool::default(),
            db,
            catalog,
        })
    }

    fn write(&self, relative: &str, content: &str) -> Result<PathBuf> {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        Ok(path)
    }

    fn index(&mut self) -> Result<IndexSummary> {
        Ok(Indexer::new(&self.settings, &self.tool).run(&mut self.db, self.catalog)?)
    }

    fn records(&self) -> Result<Vec<ImageIndexRecord>> {
        Ok(self.db.select::<ImageIndexRecord>(&QueryOptions::new())?)
    }
}

#[test]
fn test_first_run_indexes_one_file() -> Result<()> {
    let mut fx = Fixture::new()?;
    let file = fx.write("A.tif", "scene 10 0 grd")?;
    let digest = hash_file(&file)?;

    let summary = fx.index()?;
    assert_eq!(summary.not_indexed, 1);
    assert_eq!(summary.rows_written, 1);
    assert_eq!(summary.artifacts_generated, 2);
    assert!(summary.failures.is_empty());

    let records = fx.records()?;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.id, digest);
    assert_eq!(record.catalog, fx.catalog);
    assert_eq!(record.relative_path, PathBuf::from("."));
    assert_eq!(record.filename, "A");
    assert_eq!(record.filetype, ".tif");
    assert_eq!(record.image_type, ImageType::Grd);
    assert_eq!(record.look_angle, Some(55.0));

    assert!(fx.settings.thumbnail_path("A").exists());
    assert!(fx.settings.cog_path("A").exists());
    assert_eq!(fx.tool.translate_calls.get(), 1);
    assert_eq!(fx.tool.warp_calls.get(), 1);

    let info = image_info(&fx.db, &digest)?;
    assert_eq!(info["filename"], "A");
    assert_eq!(info["image_type"], "grd");

    let catalog = imagery::get_catalog(&fx.db, fx.catalog)?;
    assert!(catalog.last_indexed.is_some());
    Ok(())
}

#[test]
fn test_rescan_is_all_indexed() -> Result<()> {
    let mut fx = Fixture::new()?;
    fx.write("A.tif", "scene 10 0 grd")?;
    fx.write("sub/B.TIFF", "scene 20 0 grd")?;
    fx.write("notes.txt", "not a raster")?;
    fx.index()?;

    let infos = fx.tool.info_calls.get();
    let artifacts = fx.tool.artifact_calls();

    let summary = fx.index()?;
    assert_eq!(summary.indexed, 2);
    assert_eq!(summary.files_seen(), 2);
    assert_eq!(summary.rows_written, 0);
    assert_eq!(summary.artifacts_generated, 0);
    assert_eq!(fx.tool.info_calls.get(), infos);
    assert_eq!(fx.tool.artifact_calls(), artifacts);
    Ok(())
}

#[test]
fn test_duplicate_content() -> Result<()> {
    let mut fx = Fixture::new()?;
    let first = fx.write("A.tif", "scene 10 0 grd")?;
    fx.index()?;

    let copy = fx.write("copies/A2.tif", "scene 10 0 grd")?;
    let digest = hash_file(&copy)?;
    assert_eq!(
        check_image(&fx.db, &copy, &digest)?,
        IndexAction::Duplicate {
            indexed_path: fx.root.join("./A.tif")
        }
    );

    let summary = fx.index()?;
    assert_eq!(summary.indexed, 1);
    assert_eq!(summary.duplicates.len(), 1);
    assert_eq!(summary.duplicates[0].path, copy);
    assert_eq!(fx.records()?.len(), 1);
    assert_eq!(fx.records()?[0].filename, "A");
    assert!(first.exists());
    Ok(())
}

#[test]
fn test_duplicate_within_one_run() -> Result<()> {
    let mut fx = Fixture::new()?;
    fx.write("a/X.tif", "scene 10 0 grd")?;
    fx.write("b/Y.tif", "scene 10 0 grd")?;

    let summary = fx.index()?;
    assert_eq!(summary.not_indexed, 1);
    assert_eq!(summary.duplicates.len(), 1);
    assert_eq!(summary.duplicates[0].indexed_path, fx.root.join("a/X.tif"));
    assert_eq!(summary.rows_written, 1);
    assert_eq!(fx.tool.translate_calls.get(), 1);
    Ok(())
}

#[test]
fn test_rename_moves_artifacts() -> Result<()> {
    let mut fx = Fixture::new()?;
    let original = fx.write("A.tif", "scene 10 0 grd")?;
    fx.index()?;
    let digest = hash_file(&original)?;

    let renamed = fx.root.join("C.tif");
    fs::rename(&original, &renamed)?;
    assert_eq!(
        check_image(&fx.db, &renamed, &digest)?,
        IndexAction::ReindexFilename {
            old_stem: "A".to_string()
        }
    );

    let artifacts = fx.tool.artifact_calls();
    let summary = fx.index()?;
    assert_eq!(summary.reindex_filename, 1);
    assert_eq!(summary.artifacts_renamed, 2);
    assert_eq!(summary.rows_written, 1);
    assert_eq!(fx.tool.artifact_calls(), artifacts);

    assert!(!fx.settings.thumbnail_path("A").exists());
    assert!(!fx.settings.cog_path("A").exists());
    assert_eq!(fs::read(fx.settings.thumbnail_path("C"))?, b"thumbnail");
    assert_eq!(fs::read(fx.settings.cog_path("C"))?, b"cog");

    let records = fx.records()?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, digest);
    assert_eq!(records[0].filename, "C");

    assert_eq!(fx.index()?.indexed, 1);
    Ok(())
}

#[test]
fn test_rename_regenerates_missing_artifacts() -> Result<()> {
    let mut fx = Fixture::new()?;
    let original = fx.write("A.tif", "scene 10 0 grd")?;
    fx.index()?;
    fs::remove_file(fx.settings.thumbnail_path("A"))?;
    fs::rename(&original, fx.root.join("C.tif"))?;

    let summary = fx.index()?;
    assert_eq!(summary.reindex_filename, 1);
    assert_eq!(summary.artifacts_generated, 1);
    assert_eq!(summary.artifacts_renamed, 1);
    assert!(fx.settings.thumbnail_path("C").exists());
    Ok(())
}

#[test]
fn test_move_keeps_artifacts() -> Result<()> {
    let mut fx = Fixture::new()?;
    let original = fx.write("A.tif", "scene 10 0 grd")?;
    fx.index()?;

    fs::create_dir(fx.root.join("archive"))?;
    fs::rename(&original, fx.root.join("archive/A.tif"))?;

    let artifacts = fx.tool.artifact_calls();
    let summary = fx.index()?;
    assert_eq!(summary.reindex_parent, 1);
    assert_eq!(summary.rows_written, 1);
    assert_eq!(fx.tool.artifact_calls(), artifacts);
    assert!(fx.settings.thumbnail_path("A").exists());

    let records = fx.records()?;
    assert_eq!(records[0].relative_path, PathBuf::from("archive"));
    assert_eq!(fx.index()?.indexed, 1);
    Ok(())
}

#[test]
fn test_catalog_root_edit_repoints_rows() -> Result<()> {
    let mut fx = Fixture::new()?;
    fx.write("A.tif", "scene 10 0 grd")?;
    fx.write("deep/B.tif", "scene 20 0 grd")?;
    fx.index()?;
    let before: Vec<_> = fx.records()?.into_iter().map(|r| r.id).collect();

    // Widen the catalog to the parent directory
    let parent = fx.root.parent().map(Path::to_path_buf).unwrap_or_default();
    edit_catalog(&mut fx.db, fx.catalog, Some(parent.as_path()), None)?;

    let summary = fx.index()?;
    assert_eq!(summary.reindex_parent, 2);
    assert!(summary.failures.is_empty(), "{:?}", summary.failures);

    let mut records = fx.records()?;
    records.sort_by(|a, b| a.filename.cmp(&b.filename));
    assert_eq!(records[0].relative_path, PathBuf::from("scenes"));
    assert_eq!(records[1].relative_path, PathBuf::from("scenes/deep"));

    let mut after: Vec<_> = records.iter().map(|r| r.id).collect();
    let mut before = before;
    before.sort();
    after.sort();
    assert_eq!(before, after);
    Ok(())
}

#[test]
fn test_files_moved_to_another_catalog() -> Result<()> {
    let mut fx = Fixture::new()?;
    let file = fx.write("A.tif", "scene 10 0 grd")?;
    fx.index()?;

    let other_root = fx.root.with_file_name("other");
    fs::create_dir(&other_root)?;
    fs::rename(&file, other_root.join("A.tif"))?;
    let other = register_catalog(&mut fx.db, &other_root, "other")?.id;

    let summary = Indexer::new(&fx.settings, &fx.tool).run(&mut fx.db, other)?;
    assert_eq!(summary.reindex_parent, 1);
    let records = fx.records()?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].catalog, other);
    assert_eq!(records[0].relative_path, PathBuf::from("."));
    Ok(())
}

#[test]
fn test_failures_are_isolated() -> Result<()> {
    let mut fx = Fixture::new()?;
    let broken = fx.write("broken.tif", "garbage")?;
    fx.write("good.tif", "scene 10 0 grd")?;

    let summary = fx.index()?;
    assert_eq!(summary.not_indexed, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].path, broken);
    assert!(summary.failures[0].message.contains("unreadable raster"));
    assert_eq!(fx.records()?.len(), 1);
    assert!(!fx.settings.thumbnail_path("broken").exists());
    Ok(())
}

#[test]
fn test_new_image_with_known_stem_keeps_artifacts() -> Result<()> {
    let mut fx = Fixture::new()?;
    fx.write("a/X.tif", "scene 10 0 grd")?;
    fx.write("b/X.tif", "scene 20 0 grd")?;

    let summary = fx.index()?;
    assert_eq!(summary.not_indexed, 2);
    assert_eq!(summary.artifacts_generated, 2);
    assert_eq!(fx.tool.artifact_calls(), 2);
    assert_eq!(fx.records()?.len(), 2);
    assert_eq!(fs::read(fx.settings.thumbnail_path("X"))?, b"thumbnail");
    Ok(())
}

#[cfg(unix)]
#[test]
fn test_non_utf8_file_name_is_a_failure() -> Result<()> {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let mut fx = Fixture::new()?;
    let odd = fx.root.join(OsStr::from_bytes(b"sc\xffene.tif"));
    fs::write(&odd, "scene 10 0 grd")?;
    fx.write("good.tif", "scene 20 0 grd")?;

    for _ in 0..3 {
        let summary = fx.index()?;
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].path, odd);
        assert!(summary.failures[0].message.contains("not valid UTF-8"));
        assert_eq!(summary.reindex_parent, 0);
    }
    let records = fx.records()?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].filename, "good");

    // Unchanged rescan writes nothing
    let summary = fx.index()?;
    assert_eq!(summary.indexed, 1);
    assert_eq!(summary.rows_written, 0);
    Ok(())
}

#[test]
fn test_spatial_coverage() -> Result<()> {
    let mut fx = Fixture::new()?;
    fx.write("A.tif", "scene 10 0 grd")?;
    fx.write("B.tif", "scene 10.5 0 grd")?;
    fx.write("far.tif", "scene 80 40 grd")?;
    fx.index()?;

    // Identical to A's footprint, with the closing point omitted
    let query = json!({
        "type": "Polygon",
        "coordinates": [[[10.0, 1.0], [11.0, 1.0], [11.0, 0.0], [10.0, 0.0]]],
    });
    let rows = images_by_geojson(&fx.db, &query)?;
    assert_eq!(rows.len(), 2);
    for row in &rows {
        let coverage = row["coverage"].as_f64().unwrap_or_default();
        match row["filename"].as_str() {
            Some("A") => assert!((coverage - 1.0).abs() < 1e-9),
            Some("B") => assert!((coverage - 0.5).abs() < 1e-9),
            other => panic!("unexpected row {:?}", other),
        }
        assert_eq!(row["footprint"]["type"], "Polygon");
    }

    let disjoint = json!({
        "type": "Polygon",
        "coordinates": [[[-50.0, -50.0], [-49.0, -50.0], [-49.0, -49.0], [-50.0, -49.0], [-50.0, -50.0]]],
    });
    assert!(images_by_geojson(&fx.db, &disjoint)?.is_empty());

    let too_short = json!({"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [0.0, 0.0]]]});
    assert!(matches!(
        images_by_geojson(&fx.db, &too_short),
        Err(imagery::Error::Validation(_))
    ));
    Ok(())
}

#[test]
fn test_slc_radiometric_params() -> Result<()> {
    let mut fx = Fixture::new()?;
    let slc = fx.write("complex.tif", "scene 10 0 slc")?;
    let grd = fx.write("detected.tif", "scene 12 0 grd")?;
    fx.index()?;

    let digest = hash_file(&slc)?;
    let all = radiometric_params(&fx.db, &digest, &[])?;
    assert_eq!(all["noise"], json!({"type": "RELATIVE", "poly": [[0.5]]}));
    assert_eq!(all["sigma0"], json!([[1.5, 0.0]]));
    assert_eq!(all["beta0"], json!([[2.5]]));
    assert_eq!(all["gamma0"], json!([]));

    let some = radiometric_params(&fx.db, &digest, &[RadiometricFactor::Beta0])?;
    assert_eq!(some.len(), 1);
    assert_eq!(some["beta0"], json!([[2.5]]));

    assert!(matches!(
        radiometric_params(&fx.db, &hash_file(&grd)?, &[]),
        Err(imagery::Error::NotFound(_))
    ));
    assert_eq!(image_info(&fx.db, &digest)?["image_type"], "slc");
    Ok(())
}

#[test]
fn test_text_search() -> Result<()> {
    let mut fx = Fixture::new()?;
    fx.write("north_pass.tif", "scene 10 0 grd")?;
    fx.write("south_pass.tif", "scene 20 0 grd")?;
    fx.index()?;

    let rows = search_text(&fx.db, "north*", None)?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["filename"], "north_pass");
    assert_eq!(rows[0]["footprint"]["type"], "Polygon");

    assert_eq!(search_text(&fx.db, "SAT", None)?.len(), 2);
    assert_eq!(search_text(&fx.db, "SAT", Some(1))?.len(), 1);
    assert!(search_text(&fx.db, "  ", None).is_err());
    Ok(())
}

#[test]
fn test_text_search_with_punctuation() -> Result<()> {
    let mut fx = Fixture::new()?;
    fx.write("scene.v2.tif", "scene 10 0 grd")?;
    fx.write("other.tif", "scene 20 0 grd")?;
    fx.index()?;

    let rows = search_text(&fx.db, "scene.v2", None)?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["filename"], "scene.v2");

    // Collector name with a hyphen
    assert_eq!(search_text(&fx.db, "SAT-1", None)?.len(), 2);
    assert_eq!(search_text(&fx.db, "scene.v2 SAT-1", None)?.len(), 1);
    assert!(search_text(&fx.db, "scene.tif", None)?.is_empty());
    assert!(search_text(&fx.db, "a/b", None)?.is_empty());
    assert!(search_text(&fx.db, "O'Brien", None)?.is_empty());
    assert!(search_text(&fx.db, "\"quoted\"", None)?.is_empty());
    Ok(())
}
