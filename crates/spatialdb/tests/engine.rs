// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::sync::LazyLock;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use spatialdb::{
    Error, FieldDescriptor, GeoFormat, GeometryType, JoinType, OnConflict, Polygon, QueryOptions,
    Record, Row, SpatialDatabase, TableSchema, Value, WGS84,
};

static PARCELS: LazyLock<TableSchema> = LazyLock::new(|| {
    TableSchema::builder("parcels")
        .field(FieldDescriptor::integer("id").primary_key())
        .field(FieldDescriptor::text("owner").not_null())
        .field(FieldDescriptor::text("notes"))
        .field(FieldDescriptor::geometry("outline", GeometryType::Polygon, WGS84))
        .build()
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Parcel {
    id: i64,
    owner: String,
    notes: Option<String>,
    outline: Polygon,
}

impl Record for Parcel {
    fn schema() -> &'static TableSchema {
        &PARCELS
    }

    fn to_values(&self) -> spatialdb::Result<Vec<Value>> {
        Ok(vec![
            Value::Integer(self.id),
            Value::Text(self.owner.clone()),
            self.notes.clone().map_or(Value::Null, Value::Text),
            Value::Text(self.outline.to_wkt()),
        ])
    }

    fn from_row(row: &Row<'_>) -> spatialdb::Result<Self> {
        let outline: String = row.get("outline")?;
        Ok(Self {
            id: row.get("id")?,
            owner: row.get("owner")?,
            notes: row.get("notes")?,
            outline: Polygon::from_wkt(&outline)?,
        })
    }
}

fn square(x0: f64, y0: f64, size: f64) -> Polygon {
    let (x1, y1) = (x0 + size, y0 + size);
    Polygon::new(vec![vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)]]).unwrap()
}

fn parcel(id: i64, owner: &str, outline: Polygon) -> Parcel {
    Parcel {
        id,
        owner: owner.to_string(),
        notes: None,
        outline,
    }
}

fn setup() -> Result<SpatialDatabase> {
    let mut db = SpatialDatabase::open_in_memory()?;
    db.create_table(&PARCELS)?;
    db.create_fulltext_index(&PARCELS, &["owner", "notes"])?;
    Ok(db)
}

#[test]
fn test_create_table_is_idempotent_and_registers_geometry() -> Result<()> {
    let mut db = SpatialDatabase::open_in_memory()?;
    assert!(db.create_table(&PARCELS)?);
    assert!(!db.create_table(&PARCELS)?);
    assert!(db.table_exists("parcels")?);

    let (kind, srid): (String, i64) = db.connection()?.query_row(
        "SELECT geometry_type, srid FROM geometry_columns \
         WHERE f_table_name = 'parcels' AND f_geometry_column = 'outline'",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    assert_eq!(kind, "POLYGON");
    assert_eq!(srid, 4326);
    Ok(())
}

#[test]
fn test_open_file_database() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("index.db");
    let mut db = SpatialDatabase::open(&path)?;
    db.create_table(&PARCELS)?;
    db.upsert(&[parcel(1, "ada", square(0.0, 0.0, 1.0))], None)?;
    db.close()?;

    let db = SpatialDatabase::open(&path)?;
    let rows: Vec<Parcel> = db.select(&QueryOptions::new())?;
    assert_eq!(rows.len(), 1);
    Ok(())
}

#[test]
fn test_open_rejects_bad_paths() {
    let dir = tempfile::tempdir().unwrap();
    let missing_parent = dir.path().join("nope").join("index.db");
    assert!(matches!(
        SpatialDatabase::open(missing_parent),
        Err(Error::InvalidDatabasePath { .. })
    ));
    assert!(matches!(
        SpatialDatabase::open(dir.path().join("index.txt")),
        Err(Error::InvalidDatabasePath { .. })
    ));
}

#[test]
fn test_closed_database_fails_fast() -> Result<()> {
    let mut db = setup()?;
    db.close()?;
    assert!(!db.is_connected());
    assert!(matches!(db.table_exists("parcels"), Err(Error::NotConnected)));
    assert!(matches!(
        db.query(&PARCELS, &QueryOptions::new()),
        Err(Error::NotConnected)
    ));
    assert!(matches!(
        db.upsert(&[parcel(1, "ada", square(0.0, 0.0, 1.0))], None),
        Err(Error::NotConnected)
    ));
    Ok(())
}

#[test]
fn test_select_round_trips_records() -> Result<()> {
    let mut db = setup()?;
    let mut first = parcel(1, "ada", square(0.0, 0.0, 1.0));
    first.notes = Some("corner lot".to_string());
    let second = parcel(2, "grace", square(5.0, 5.0, 2.0));
    assert_eq!(db.upsert(&[first.clone(), second.clone()], None)?, 2);

    let rows: Vec<Parcel> = db.select(&QueryOptions::new().where_clause("id = :id").param("id", 1))?;
    assert_eq!(rows, vec![first]);
    Ok(())
}

#[test]
fn test_upsert_conflict_policies() -> Result<()> {
    let mut db = setup()?;
    db.upsert(&[parcel(1, "ada", square(0.0, 0.0, 1.0))], None)?;

    // Plain insert collides on the primary key
    let collide = db.upsert(&[parcel(1, "bob", square(0.0, 0.0, 1.0))], None);
    assert!(matches!(collide, Err(Error::Sqlite(_))));

    let ignored = db.upsert(
        &[parcel(1, "bob", square(0.0, 0.0, 1.0))],
        Some(&OnConflict::do_nothing()),
    )?;
    assert_eq!(ignored, 0);

    let updated = db.upsert(
        &[parcel(1, "carol", square(9.0, 9.0, 1.0))],
        Some(&OnConflict::update(["owner"])),
    )?;
    assert_eq!(updated, 1);

    let rows: Vec<Parcel> = db.select(&QueryOptions::new())?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].owner, "carol");
    // Only the named column is re-assigned
    assert_eq!(rows[0].outline, square(0.0, 0.0, 1.0));
    Ok(())
}

#[test]
fn test_query_geojson_and_derived_columns() -> Result<()> {
    let mut db = setup()?;
    db.upsert(
        &[
            parcel(1, "ada", square(0.0, 0.0, 2.0)),
            parcel(2, "grace", square(10.0, 10.0, 1.0)),
        ],
        None,
    )?;

    let options = QueryOptions::new()
        .columns(["id", "outline"])
        .geo_format(GeoFormat::AsGeoJson)
        .with_clause(
            "probe AS (SELECT geom, ST_Area(geom) AS area \
             FROM (SELECT ST_GeomFromText(:polygon, 4326) AS geom) AS tmp)",
        )
        .join(JoinType::Cross, "probe", None)
        .where_clause("ST_Intersects(parcels.outline, probe.geom)")
        .derived(
            "coverage",
            "ST_Area(ST_Intersection(parcels.outline, probe.geom)) / probe.area",
        )
        .param("polygon", square(1.0, 1.0, 2.0).to_wkt());

    let rows = db.query(&PARCELS, &options)?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], json!(1));
    assert_eq!(rows[0]["outline"]["type"], "Polygon");
    let coverage = rows[0]["coverage"].as_f64().unwrap();
    assert!((coverage - 0.25).abs() < 1e-9);
    Ok(())
}

#[test]
fn test_query_unknown_column_names_offenders() -> Result<()> {
    let db = setup()?;
    let err = db
        .query(&PARCELS, &QueryOptions::new().columns(["owner", "acreage"]))
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(err.to_string().contains("acreage"));
    Ok(())
}

#[test]
fn test_fulltext_index_follows_writes() -> Result<()> {
    let mut db = setup()?;
    db.upsert(
        &[
            parcel(1, "ada lovelace", square(0.0, 0.0, 1.0)),
            parcel(2, "grace hopper", square(2.0, 2.0, 1.0)),
        ],
        None,
    )?;

    let hits = db.search_text(&PARCELS, "lovelace", &QueryOptions::new().columns(["id"]))?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["id"], json!(1));

    // Conflict update fires the update trigger
    db.upsert(
        &[parcel(1, "charles babbage", square(0.0, 0.0, 1.0))],
        Some(&OnConflict::update(["owner"])),
    )?;
    assert!(db.search_text(&PARCELS, "lovelace", &QueryOptions::new())?.is_empty());
    assert_eq!(db.search_text(&PARCELS, "babbage", &QueryOptions::new())?.len(), 1);

    db.delete_by_ids(&PARCELS, &[Value::Integer(1)])?;
    assert!(db.search_text(&PARCELS, "babbage", &QueryOptions::new())?.is_empty());
    Ok(())
}

#[test]
fn test_fulltext_backfills_existing_rows() -> Result<()> {
    let mut db = SpatialDatabase::open_in_memory()?;
    db.create_table(&PARCELS)?;
    db.upsert(&[parcel(7, "hedy lamarr", square(0.0, 0.0, 1.0))], None)?;
    db.create_fulltext_index(&PARCELS, &["owner"])?;
    db.create_fulltext_index(&PARCELS, &["owner"])?;

    let hits = db.search_text(&PARCELS, "lamarr", &QueryOptions::new())?;
    assert_eq!(hits.len(), 1);
    Ok(())
}

#[test]
fn test_delete_by_ids_large_batch() -> Result<()> {
    let mut db = setup()?;
    let parcels: Vec<Parcel> = (0..2500)
        .map(|i| parcel(i, "owner", square(i as f64, 0.0, 1.0)))
        .collect();
    db.upsert(&parcels, None)?;

    let ids: Vec<Value> = (0..2400).map(Value::Integer).collect();
    assert_eq!(db.delete_by_ids(&PARCELS, &ids)?, 2400);

    let remaining = db.query(
        &PARCELS,
        &QueryOptions::new().no_columns().derived("n", "COUNT(*)"),
    )?;
    assert_eq!(remaining[0]["n"], json!(100));
    Ok(())
}
