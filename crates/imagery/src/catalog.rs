// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Catalog registration and maintenance.
//!
//! A catalog is a registered root directory. Its path is stored
//! canonicalized so that indexed paths compare equal to resolved file paths.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use spatialdb::{QueryOptions, SpatialDatabase};

use crate::error::{Error, Result};
use crate::model::{CATALOG, Catalog, IMAGE_TEXT_COLUMNS, IMAGES, RADIOMETRIC_PARAMS};
use crate::settings::{Settings, verify_dir};

/// Open the index database, creating every table and the full-text index
pub fn open_index(settings: &Settings) -> Result<SpatialDatabase> {
    settings.verify_db_dir()?;
    let mut db = SpatialDatabase::open(settings.index_db())?;
    ensure_schema(&mut db)?;
    Ok(db)
}

pub fn ensure_schema(db: &mut SpatialDatabase) -> Result<()> {
    db.create_table(&CATALOG)?;
    db.create_table(&IMAGES)?;
    db.create_table(&RADIOMETRIC_PARAMS)?;
    db.create_fulltext_index(&IMAGES, &IMAGE_TEXT_COLUMNS)?;
    Ok(())
}

fn canonical_dir(path: &Path) -> Result<PathBuf> {
    verify_dir(path)?;
    Ok(path.canonicalize()?)
}

fn find_by(db: &SpatialDatabase, column: &str, value: String) -> Result<Option<Catalog>> {
    let options = QueryOptions::new()
        .where_clause(format!("{} = :value", column))
        .param("value", value);
    Ok(db.select::<Catalog>(&options)?.into_iter().next())
}

fn check_name_free(db: &SpatialDatabase, name: &str, except: Option<i64>) -> Result<()> {
    match find_by(db, "name", name.to_string())? {
        Some(existing) if Some(existing.id) != except => Err(Error::conflict(format!(
            "Catalog name already exists: {}",
            name
        ))),
        _ => Ok(()),
    }
}

fn check_path_free(db: &SpatialDatabase, path: &Path, except: Option<i64>) -> Result<()> {
    match find_by(db, "path", path.to_string_lossy().into_owned())? {
        Some(existing) if Some(existing.id) != except => Err(Error::conflict(format!(
            "Catalog path already exists: {}",
            path.display()
        ))),
        _ => Ok(()),
    }
}

/// Register `path` under `name` and return the new catalog
pub fn register_catalog(db: &mut SpatialDatabase, path: &Path, name: &str) -> Result<Catalog> {
    if name.trim().is_empty() {
        return Err(Error::validation("Catalog name must not be empty"));
    }
    let path = canonical_dir(path)?;
    check_name_free(db, name, None)?;
    check_path_free(db, &path, None)?;

    let conn = db.connection()?;
    conn.execute(
        "INSERT INTO catalog (path, name) VALUES (?1, ?2)",
        params![path.to_string_lossy().into_owned(), name],
    )?;
    let id = conn.last_insert_rowid();

    let shown = path.display().to_string();
    diagnostics::log_info!("Registered catalog {id} ({name}) at {path}", id: id, name: name, path: shown);

    Ok(Catalog {
        id,
        path,
        name: name.to_string(),
        last_indexed: None,
    })
}

/// Change the root path and/or display name of catalog `id`
pub fn edit_catalog(
    db: &mut SpatialDatabase,
    id: i64,
    new_path: Option<&Path>,
    new_name: Option<&str>,
) -> Result<Catalog> {
    if id < 1 {
        return Err(Error::validation(format!(
            "id must be a positive integer (>= 1), got: {}",
            id
        )));
    }
    if new_path.is_none() && new_name.is_none() {
        return Err(Error::validation("Nothing to edit"));
    }
    let new_path = new_path.map(canonical_dir).transpose()?;

    // Resolves to `id` when present, otherwise to the largest registered id
    let resolved: Option<i64> = db
        .connection()?
        .query_row(
            "SELECT COALESCE((SELECT id FROM catalog WHERE id = ?1), (SELECT MAX(id) FROM catalog))",
            params![id],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    match resolved {
        None => return Err(Error::not_found("No catalogs registered")),
        Some(found) if found != id => {
            return Err(Error::not_found(format!(
                "No catalog found with id {}. Valid ids are in the range 1-{}",
                id, found
            )));
        }
        Some(_) => {}
    }

    if let Some(name) = new_name {
        if name.trim().is_empty() {
            return Err(Error::validation("Catalog name must not be empty"));
        }
        check_name_free(db, name, Some(id))?;
    }
    if let Some(path) = &new_path {
        check_path_free(db, path, Some(id))?;
    }

    let conn = db.connection()?;
    conn.execute(
        "UPDATE catalog SET path = COALESCE(?2, path), name = COALESCE(?3, name) WHERE id = ?1",
        params![
            id,
            new_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
            new_name
        ],
    )?;

    diagnostics::log_info!("Edited catalog {id}", id: id);
    get_catalog(db, id)
}

pub fn list_catalogs(db: &SpatialDatabase) -> Result<Vec<Catalog>> {
    let mut catalogs = db.select::<Catalog>(&QueryOptions::new())?;
    catalogs.sort_by_key(|c| c.id);
    Ok(catalogs)
}

pub fn get_catalog(db: &SpatialDatabase, id: i64) -> Result<Catalog> {
    let options = QueryOptions::new()
        .where_clause("id = :id")
        .param("id", id);
    match db.select::<Catalog>(&options)?.into_iter().next() {
        Some(catalog) => Ok(catalog),
        None => {
            let ids: Vec<String> = list_catalogs(db)?
                .iter()
                .map(|c| format!("{} ({})", c.id, c.name))
                .collect();
            Err(Error::not_found(format!(
                "Failed to get path for catalog id {}. Registered catalogs: [{}]",
                id,
                ids.join(", ")
            )))
        }
    }
}

pub fn catalog_root(db: &SpatialDatabase, id: i64) -> Result<PathBuf> {
    Ok(get_catalog(db, id)?.path)
}

/// Record the completion time of an index run
pub fn touch_last_indexed(db: &mut SpatialDatabase, id: i64, when: DateTime<Utc>) -> Result<()> {
    let changed = db.connection()?.execute(
        "UPDATE catalog SET last_indexed = ?2 WHERE id = ?1",
        params![id, when.timestamp_millis()],
    )?;
    if changed == 0 {
        return Err(Error::not_found(format!("No catalog found with id {}", id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn setup() -> (tempfile::TempDir, SpatialDatabase) {
        let dir = tempfile::tempdir().unwrap();
        let mut db = SpatialDatabase::open_in_memory().unwrap();
        ensure_schema(&mut db).unwrap();
        (dir, db)
    }

    #[test]
    fn test_register_and_list() {
        let (dir, mut db) = setup();
        let root = dir.path().join("scenes");
        std::fs::create_dir(&root).unwrap();

        let catalog = register_catalog(&mut db, &root, "main").unwrap();
        assert_eq!(catalog.id, 1);
        assert_eq!(catalog.path, root.canonicalize().unwrap());

        let listed = list_catalogs(&db).unwrap();
        assert_eq!(listed, vec![catalog.clone()]);
        assert_eq!(catalog_root(&db, 1).unwrap(), catalog.path);
    }

    #[test]
    fn test_register_conflicts() {
        let (dir, mut db) = setup();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::create_dir(&a).unwrap();
        std::fs::create_dir(&b).unwrap();

        register_catalog(&mut db, &a, "main").unwrap();
        assert!(matches!(register_catalog(&mut db, &b, "main"), Err(Error::Conflict(_))));
        // Same directory through a non-canonical path
        let dotted = dir.path().join("b/../a");
        assert!(matches!(register_catalog(&mut db, &dotted, "other"), Err(Error::Conflict(_))));
        assert!(matches!(
            register_catalog(&mut db, &dir.path().join("missing"), "x"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_edit_catalog() {
        let (dir, mut db) = setup();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::create_dir(&a).unwrap();
        std::fs::create_dir(&b).unwrap();

        assert!(matches!(
            edit_catalog(&mut db, 1, None, Some("x")),
            Err(Error::NotFound(msg)) if msg == "No catalogs registered"
        ));

        register_catalog(&mut db, &a, "main").unwrap();
        let edited = edit_catalog(&mut db, 1, Some(b.as_path()), None).unwrap();
        assert_eq!(edited.path, b.canonicalize().unwrap());
        assert_eq!(edited.name, "main");

        let renamed = edit_catalog(&mut db, 1, None, Some("renamed")).unwrap();
        assert_eq!(renamed.name, "renamed");
        assert_eq!(renamed.path, edited.path);

        assert!(matches!(edit_catalog(&mut db, 0, None, Some("x")), Err(Error::Validation(_))));
        assert!(matches!(edit_catalog(&mut db, 1, None, None), Err(Error::Validation(_))));
        assert!(matches!(
            edit_catalog(&mut db, 5, None, Some("x")),
            Err(Error::NotFound(msg)) if msg == "No catalog found with id 5. Valid ids are in the range 1-1"
        ));
        assert!(matches!(
            edit_catalog(&mut db, 1, Some(dir.path().join("nope").as_path()), None),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_touch_last_indexed() {
        let (dir, mut db) = setup();
        register_catalog(&mut db, dir.path(), "main").unwrap();

        let when = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        touch_last_indexed(&mut db, 1, when).unwrap();
        assert_eq!(get_catalog(&db, 1).unwrap().last_indexed, Some(when));

        assert!(matches!(touch_last_indexed(&mut db, 9, when), Err(Error::NotFound(_))));
        assert!(matches!(get_catalog(&db, 9), Err(Error::NotFound(_))));
    }
}
