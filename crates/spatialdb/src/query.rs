// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! SQL text builders.
//!
//! Everything here is pure string assembly over a validated [`TableSchema`];
//! values are never interpolated, only bound by name at execution time.

use rusqlite::types::Value;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::schema::{TableSchema, is_identifier};

/// One result row keyed by output column name
pub type RecordMap = serde_json::Map<String, JsonValue>;

/// Which schema columns a query returns
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Columns {
    #[default]
    All,
    Only(Vec<String>),
    /// Only derived and joined expressions
    None,
}

/// Rendering of geometry columns in query results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GeoFormat {
    #[default]
    AsText,
    AsGeoJson,
}

impl GeoFormat {
    pub fn sql_function(self) -> &'static str {
        match self {
            GeoFormat::AsText => "AsText",
            GeoFormat::AsGeoJson => "AsGeoJSON",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Cross,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub kind: JoinType,
    pub table: String,
    pub on: Option<String>,
}

impl JoinClause {
    fn sql(&self) -> String {
        let keyword = match self.kind {
            JoinType::Inner => "JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Cross => "CROSS JOIN",
        };
        match &self.on {
            Some(on) => format!("{} {} ON {}", keyword, self.table, on),
            None => format!("{} {}", keyword, self.table),
        }
    }
}

/// Options for [`select_sql`]. Clauses are emitted in the fixed order
/// WITH, SELECT, FROM, JOIN, WHERE, LIMIT, OFFSET.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub columns: Columns,
    pub geo_format: GeoFormat,
    /// `(alias, expression)` pairs appended after the schema columns
    pub derived: Vec<(String, String)>,
    pub with_clause: Option<String>,
    pub joins: Vec<JoinClause>,
    pub where_clause: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Named parameters; a leading `:` is added when missing
    pub params: Vec<(String, Value)>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Columns::Only(columns.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn no_columns(mut self) -> Self {
        self.columns = Columns::None;
        self
    }

    #[must_use]
    pub fn geo_format(mut self, format: GeoFormat) -> Self {
        self.geo_format = format;
        self
    }

    #[must_use]
    pub fn derived<A: Into<String>, E: Into<String>>(mut self, alias: A, expression: E) -> Self {
        self.derived.push((alias.into(), expression.into()));
        self
    }

    #[must_use]
    pub fn with_clause<S: Into<String>>(mut self, cte: S) -> Self {
        self.with_clause = Some(cte.into());
        self
    }

    #[must_use]
    pub fn join<S: Into<String>>(mut self, kind: JoinType, table: S, on: Option<&str>) -> Self {
        self.joins.push(JoinClause {
            kind,
            table: table.into(),
            on: on.map(str::to_string),
        });
        self
    }

    #[must_use]
    pub fn where_clause<S: Into<String>>(mut self, clause: S) -> Self {
        self.where_clause = Some(clause.into());
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn param<S: Into<String>, V: Into<Value>>(mut self, name: S, value: V) -> Self {
        let name = name.into();
        let name = if name.starts_with([':', '@', '$']) {
            name
        } else {
            format!(":{}", name)
        };
        self.params.push((name, value.into()));
        self
    }
}

/// Schema columns an options value selects, in output order
pub(crate) fn selected_fields<'a>(
    schema: &'a TableSchema,
    columns: &Columns,
) -> Result<Vec<&'a crate::field::FieldDescriptor>> {
    match columns {
        Columns::All => Ok(schema.fields().iter().collect()),
        Columns::None => Ok(Vec::new()),
        Columns::Only(names) => {
            schema.validate_columns(names)?;
            Ok(names.iter().filter_map(|n| schema.field(n)).collect())
        }
    }
}

pub fn select_sql(schema: &TableSchema, options: &QueryOptions) -> Result<String> {
    let table = schema.name();
    let mut columns: Vec<String> = selected_fields(schema, &options.columns)?
        .into_iter()
        .map(|field| {
            if field.is_geometry() {
                format!(
                    "{}({}.{}) AS {}",
                    options.geo_format.sql_function(),
                    table,
                    field.name(),
                    field.name()
                )
            } else {
                format!("{}.{} AS {}", table, field.name(), field.name())
            }
        })
        .collect();

    for (alias, expression) in &options.derived {
        if !is_identifier(alias) {
            return Err(Error::validation(format!(
                "Invalid derived column alias: {:?}",
                alias
            )));
        }
        columns.push(format!("{} AS {}", expression, alias));
    }

    if columns.is_empty() {
        return Err(Error::validation(format!(
            "Query on {} selects no columns",
            table
        )));
    }

    let mut sql = String::new();
    if let Some(cte) = &options.with_clause {
        sql.push_str("WITH ");
        sql.push_str(cte);
        sql.push(' ');
    }
    sql.push_str(&format!("SELECT {} FROM {}", columns.join(", "), table));
    for join in &options.joins {
        sql.push(' ');
        sql.push_str(&join.sql());
    }
    if let Some(clause) = &options.where_clause {
        sql.push_str(" WHERE ");
        sql.push_str(clause);
    }
    match (options.limit, options.offset) {
        (Some(limit), _) => sql.push_str(&format!(" LIMIT {}", limit)),
        // SQLite only accepts OFFSET after a LIMIT
        (None, Some(_)) => sql.push_str(" LIMIT -1"),
        (None, None) => {}
    }
    if let Some(offset) = options.offset {
        sql.push_str(&format!(" OFFSET {}", offset));
    }
    Ok(sql)
}

/// What to do when an insert collides on the conflict target
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictAction {
    DoNothing,
    /// Re-assign the named columns from `excluded`
    Update(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OnConflict {
    /// Conflict target columns; the primary key when empty
    pub target: Vec<String>,
    pub action: ConflictAction,
}

impl OnConflict {
    pub fn do_nothing() -> Self {
        Self {
            target: Vec::new(),
            action: ConflictAction::DoNothing,
        }
    }

    pub fn update<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target: Vec::new(),
            action: ConflictAction::Update(columns.into_iter().map(Into::into).collect()),
        }
    }

    #[must_use]
    pub fn on<I, S>(mut self, target: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target = target.into_iter().map(Into::into).collect();
        self
    }

    fn sql(&self, schema: &TableSchema) -> Result<String> {
        let target = if self.target.is_empty() {
            let key = schema.primary_key().ok_or_else(|| {
                Error::validation(format!(
                    "Table {} has no primary key to resolve conflicts on",
                    schema.name()
                ))
            })?;
            vec![key.name().to_string()]
        } else {
            schema.validate_columns(&self.target)?;
            self.target.clone()
        };

        let action = match &self.action {
            ConflictAction::DoNothing => "NOTHING".to_string(),
            ConflictAction::Update(columns) => {
                if columns.is_empty() {
                    return Err(Error::validation(
                        "Conflict update must name at least one column",
                    ));
                }
                schema.validate_columns(columns)?;
                let sets: Vec<String> = columns
                    .iter()
                    .map(|c| format!("{} = excluded.{}", c, c))
                    .collect();
                format!("UPDATE SET {}", sets.join(", "))
            }
        };

        Ok(format!("ON CONFLICT ({}) DO {}", target.join(", "), action))
    }
}

/// Parameterized insert with one `:column` placeholder per field. Geometry
/// placeholders are wrapped in `GeomFromText(:column, srid)`.
pub fn insert_sql(schema: &TableSchema, conflict: Option<&OnConflict>) -> Result<String> {
    let names = schema.column_names();
    let placeholders: Vec<String> = schema
        .fields()
        .iter()
        .map(|field| match field.geometry_spec() {
            Some(spec) => format!("GeomFromText(:{}, {})", field.name(), spec.srid),
            None => format!(":{}", field.name()),
        })
        .collect();

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        schema.name(),
        names.join(", "),
        placeholders.join(", ")
    );
    if let Some(conflict) = conflict {
        sql.push(' ');
        sql.push_str(&conflict.sql(schema)?);
    }
    Ok(sql)
}

pub fn create_table_sql(schema: &TableSchema) -> String {
    let columns: Vec<String> = schema
        .fields()
        .iter()
        .filter_map(|f| f.column_sql())
        .collect();
    format!("CREATE TABLE {} ({})", schema.name(), columns.join(", "))
}

pub(crate) fn fts_table_name(schema: &TableSchema) -> String {
    format!("{}_fts", schema.name())
}

/// Turn free text into an FTS5 match expression. Each whitespace-separated
/// token becomes a quoted phrase so punctuation is never parsed as query
/// syntax; a trailing `*` stays a prefix operator. Returns `None` when no
/// token remains.
pub fn fts_match_expression(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split_whitespace()
        .filter_map(|token| {
            let stem = token.trim_end_matches('*');
            if stem.is_empty() {
                return None;
            }
            let quoted = format!("\"{}\"", stem.replace('"', "\"\""));
            if stem.len() < token.len() {
                Some(format!("{}*", quoted))
            } else {
                Some(quoted)
            }
        })
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

/// DDL for an FTS5 shadow table keyed by the primary key, plus the triggers
/// that keep it in step with the base table.
pub fn fulltext_sql(schema: &TableSchema, columns: &[&str]) -> Result<Vec<String>> {
    if columns.is_empty() {
        return Err(Error::validation("Full-text index needs at least one column"));
    }
    schema.validate_columns(columns)?;
    let key = schema
        .primary_key()
        .ok_or_else(|| {
            Error::validation(format!(
                "Table {} has no primary key to key a full-text index on",
                schema.name()
            ))
        })?
        .name();

    let table = schema.name();
    let fts = fts_table_name(schema);
    let cols = columns.join(", ");
    let new_values: Vec<String> = columns.iter().map(|c| format!("new.{}", c)).collect();
    let new_values = new_values.join(", ");

    Ok(vec![
        format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS {fts} USING fts5({key} UNINDEXED, {cols})"
        ),
        format!(
            "CREATE TRIGGER IF NOT EXISTS {fts}_insert AFTER INSERT ON {table} BEGIN \
             INSERT INTO {fts} ({key}, {cols}) VALUES (new.{key}, {new_values}); END"
        ),
        format!(
            "CREATE TRIGGER IF NOT EXISTS {fts}_delete AFTER DELETE ON {table} BEGIN \
             DELETE FROM {fts} WHERE {key} = old.{key}; END"
        ),
        format!(
            "CREATE TRIGGER IF NOT EXISTS {fts}_update AFTER UPDATE ON {table} BEGIN \
             DELETE FROM {fts} WHERE {key} = old.{key}; \
             INSERT INTO {fts} ({key}, {cols}) VALUES (new.{key}, {new_values}); END"
        ),
    ])
}
