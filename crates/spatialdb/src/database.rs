// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! The persistence engine.
//!
//! A [`SpatialDatabase`] owns one SQLite connection with the spatial function
//! set registered. Callers open one per operation; cross-process
//! serialization is left to SQLite's locking and the busy timeout.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, OptionalExtension, ToSql, params};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::field::{FieldDescriptor, encode_base64};
use crate::functions::register_spatial_functions;
use crate::query::{
    GeoFormat, OnConflict, QueryOptions, RecordMap, create_table_sql, fts_match_expression,
    fts_table_name, fulltext_sql, insert_sql, select_sql, selected_fields,
};
use crate::schema::{Record, TableSchema};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const DATABASE_EXTENSIONS: [&str; 3] = ["db", "sqlite", "sqlite3"];

const GEOMETRY_COLUMNS_SQL: &str = "CREATE TABLE IF NOT EXISTS geometry_columns (\
     f_table_name TEXT NOT NULL, \
     f_geometry_column TEXT NOT NULL, \
     geometry_type TEXT NOT NULL, \
     coord_dimension INTEGER NOT NULL, \
     srid INTEGER NOT NULL, \
     PRIMARY KEY (f_table_name, f_geometry_column))";

fn bind_list(params: &[(String, Value)]) -> Vec<(&str, &dyn ToSql)> {
    params
        .iter()
        .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
        .collect()
}

fn value_to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::from(i),
        ValueRef::Real(r) => JsonValue::from(r),
        ValueRef::Text(t) => JsonValue::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => JsonValue::String(encode_base64(b)),
    }
}

pub struct SpatialDatabase {
    path: Option<PathBuf>,
    conn: Option<Connection>,
}

impl SpatialDatabase {
    /// Open (creating if needed) the database file at `path`. The parent
    /// directory must exist and the extension must name a SQLite file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let parent_ok = match path.parent() {
            Some(parent) if parent.as_os_str().is_empty() => true,
            Some(parent) => parent.is_dir(),
            None => false,
        };
        let extension_ok = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| DATABASE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if !parent_ok || !extension_ok {
            return Err(Error::InvalidDatabasePath {
                path: path.to_path_buf(),
            });
        }

        let path_display = path.display().to_string();
        diagnostics::log_debug!("Opening database {path}", path: path_display);

        let conn = Connection::open(path)?;
        Self::prepare(conn, Some(path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::prepare(Connection::open_in_memory()?, None)
    }

    fn prepare(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        register_spatial_functions(&conn)?;
        conn.execute_batch(GEOMETRY_COLUMNS_SQL)?;
        Ok(Self {
            path,
            conn: Some(conn),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Close the connection. Later operations fail with `NotConnected`.
    pub fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| e)?;
        }
        Ok(())
    }

    /// Raw connection for statements the engine does not model
    pub fn connection(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(Error::NotConnected)
    }

    fn connection_mut(&mut self) -> Result<&mut Connection> {
        self.conn.as_mut().ok_or(Error::NotConnected)
    }

    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let found = self
            .connection()?
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Create the table and its geometry columns. Returns false when the
    /// table already existed and nothing was done.
    pub fn create_table(&mut self, schema: &TableSchema) -> Result<bool> {
        schema.validate()?;
        if self.table_exists(schema.name())? {
            return Ok(false);
        }

        let ddl = create_table_sql(schema);
        let tx = self.connection_mut()?.transaction()?;
        diagnostics::log_debug!("Executing SQL: {sql}", sql: ddl);
        tx.execute(&ddl, [])?;

        for field in schema.geometry_fields() {
            add_geometry_column(&tx, schema, field)?;
        }
        tx.commit()?;

        let table = schema.name();
        diagnostics::log_info!("Created table {table}", table: table);
        Ok(true)
    }

    /// Create the `{table}_fts` shadow index over `columns`. Rows already in
    /// the base table are copied in when the index is first created.
    pub fn create_fulltext_index(&mut self, schema: &TableSchema, columns: &[&str]) -> Result<()> {
        schema.validate()?;
        let statements = fulltext_sql(schema, columns)?;
        let fts = fts_table_name(schema);
        let existed = self.table_exists(&fts)?;

        let tx = self.connection_mut()?.transaction()?;
        for sql in &statements {
            diagnostics::log_debug!("Executing SQL: {sql}", sql: sql);
            tx.execute(sql, [])?;
        }

        if !existed {
            if let Some(key) = schema.primary_key() {
                let cols = columns.join(", ");
                let backfill = format!(
                    "INSERT INTO {} ({}, {}) SELECT {}, {} FROM {}",
                    fts,
                    key.name(),
                    cols,
                    key.name(),
                    cols,
                    schema.name()
                );
                diagnostics::log_debug!("Executing SQL: {sql}", sql: backfill);
                tx.execute(&backfill, [])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Insert every record in one transaction with one prepared statement.
    /// Returns the number of rows changed, which excludes conflicts resolved
    /// with `DO NOTHING`.
    pub fn upsert<R: Record>(
        &mut self,
        records: &[R],
        on_conflict: Option<&OnConflict>,
    ) -> Result<usize> {
        let schema = R::schema();
        schema.validate()?;
        if records.is_empty() {
            return Ok(0);
        }

        let sql = insert_sql(schema, on_conflict)?;
        let names: Vec<String> = schema
            .fields()
            .iter()
            .map(|f| format!(":{}", f.name()))
            .collect();

        let tx = self.connection_mut()?.transaction()?;
        let mut changed = 0;
        {
            diagnostics::log_debug!("Executing SQL: {sql}", sql: sql);
            let mut stmt = tx.prepare(&sql)?;
            for record in records {
                let values = record.to_values()?;
                if values.len() != names.len() {
                    return Err(Error::validation(format!(
                        "Record for {} produced {} values for {} columns",
                        schema.name(),
                        values.len(),
                        names.len()
                    )));
                }
                for (field, value) in schema.fields().iter().zip(&values) {
                    field.check_storage(value)?;
                }

                let bound: Vec<(&str, &dyn ToSql)> = names
                    .iter()
                    .zip(&values)
                    .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
                    .collect();
                changed += stmt.execute(bound.as_slice())?;
            }
        }
        tx.commit()?;

        let table = schema.name();
        let count = records.len();
        diagnostics::log_debug!("Upserted {count} records into {table} ({changed} changed)",
            count: count, table: table, changed: changed);
        Ok(changed)
    }

    /// Run a dynamic query and return rows as JSON maps. Schema columns use
    /// their field codec; geometry rendered as GeoJSON is parsed into JSON;
    /// derived and joined columns are converted by storage class.
    pub fn query(&self, schema: &TableSchema, options: &QueryOptions) -> Result<Vec<RecordMap>> {
        let sql = select_sql(schema, options)?;
        let fields: Vec<&FieldDescriptor> = selected_fields(schema, &options.columns)?;
        let selected: HashSet<&str> = fields.iter().map(|f| f.name()).collect();

        diagnostics::log_debug!("Executing SQL: {sql}", sql: sql);
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();

        let mut rows = stmt.query(bind_list(&options.params).as_slice())?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut map = RecordMap::new();
            for (idx, name) in names.iter().enumerate() {
                let field = schema
                    .field(name)
                    .filter(|f| selected.contains(f.name()));
                let json = match field {
                    Some(field) if field.is_geometry() => {
                        let text: Option<String> = row.get(idx)?;
                        match (text, options.geo_format) {
                            (None, _) => JsonValue::Null,
                            (Some(text), GeoFormat::AsGeoJson) => serde_json::from_str(&text)?,
                            (Some(text), GeoFormat::AsText) => JsonValue::String(text),
                        }
                    }
                    Some(field) => field.to_json(row.get::<_, Value>(idx)?)?,
                    None => value_to_json(row.get_ref(idx)?),
                };
                map.insert(name.clone(), json);
            }
            out.push(map);
        }
        Ok(out)
    }

    /// Select typed records. Every schema column is returned and geometry
    /// is rendered as WKT regardless of the options given.
    pub fn select<R: Record>(&self, options: &QueryOptions) -> Result<Vec<R>> {
        let mut options = options.clone();
        options.columns = crate::query::Columns::All;
        options.geo_format = GeoFormat::AsText;
        let sql = select_sql(R::schema(), &options)?;

        diagnostics::log_debug!("Executing SQL: {sql}", sql: sql);
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(bind_list(&options.params).as_slice())?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(R::from_row(row)?);
        }
        Ok(out)
    }

    /// Delete rows by primary key. Ids are staged in a temporary table so
    /// the batch size is not bounded by the statement parameter limit.
    pub fn delete_by_ids(&mut self, schema: &TableSchema, ids: &[Value]) -> Result<usize> {
        schema.validate()?;
        let key = schema
            .primary_key()
            .ok_or_else(|| {
                Error::validation(format!("Table {} has no primary key", schema.name()))
            })?
            .name();
        if ids.is_empty() {
            return Ok(0);
        }

        let tx = self.connection_mut()?.transaction()?;
        tx.execute_batch(
            "CREATE TEMP TABLE IF NOT EXISTS staged_ids (id PRIMARY KEY); DELETE FROM staged_ids;",
        )?;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO staged_ids (id) VALUES (?1)")?;
            for id in ids {
                stmt.execute(params![id])?;
            }
        }
        let sql = format!(
            "DELETE FROM {} WHERE {} IN (SELECT id FROM staged_ids)",
            schema.name(),
            key
        );
        diagnostics::log_debug!("Executing SQL: {sql}", sql: sql);
        let deleted = tx.execute(&sql, [])?;
        tx.execute("DELETE FROM staged_ids", [])?;
        tx.commit()?;
        Ok(deleted)
    }

    /// Full-text search over the `{table}_fts` index, returning matching
    /// base rows. `query` is free text, see [`fts_match_expression`]. An
    /// existing `where_clause` in `options` is ANDed in.
    pub fn search_text(
        &self,
        schema: &TableSchema,
        query: &str,
        options: &QueryOptions,
    ) -> Result<Vec<RecordMap>> {
        let key = schema
            .primary_key()
            .ok_or_else(|| {
                Error::validation(format!("Table {} has no primary key", schema.name()))
            })?
            .name();
        let fts = fts_table_name(schema);
        if !self.table_exists(&fts)? {
            return Err(Error::validation(format!(
                "Table {} has no full-text index",
                schema.name()
            )));
        }

        let expression = fts_match_expression(query)
            .ok_or_else(|| Error::validation("Full-text query has no search terms"))?;

        let matches = format!(
            "{table}.{key} IN (SELECT {key} FROM {fts} WHERE {fts} MATCH :fts_query)",
            table = schema.name(),
            key = key,
            fts = fts
        );
        let where_clause = match &options.where_clause {
            Some(existing) => format!("({}) AND {}", existing, matches),
            None => matches,
        };
        let options = options
            .clone()
            .where_clause(where_clause)
            .param("fts_query", expression);
        self.query(schema, &options)
    }
}

fn add_geometry_column(
    tx: &rusqlite::Transaction<'_>,
    schema: &TableSchema,
    field: &FieldDescriptor,
) -> Result<()> {
    let Some(spec) = field.geometry_spec() else {
        return Ok(());
    };

    let alter = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        schema.name(),
        field.name(),
        spec.kind
    );
    diagnostics::log_debug!("Executing SQL: {sql}", sql: alter);
    tx.execute(&alter, [])?;
    tx.execute(
        "INSERT OR REPLACE INTO geometry_columns \
         (f_table_name, f_geometry_column, geometry_type, coord_dimension, srid) \
         VALUES (?1, ?2, ?3, 2, ?4)",
        params![schema.name(), field.name(), spec.kind.as_str(), spec.srid],
    )?;
    Ok(())
}
