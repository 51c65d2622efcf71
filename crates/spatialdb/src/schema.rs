// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Table schemas and the [`Record`] trait.
//!
//! Each record type declares its table once, usually in a
//! `std::sync::LazyLock<TableSchema>` static, and hands out a `'static`
//! reference to it. Schemas are built with [`TableSchema::builder`] and
//! validated by the engine before any DDL or write uses them.

use std::collections::HashSet;

use rusqlite::Row;
use rusqlite::types::Value;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::field::FieldDescriptor;

/// Ordered, named collection of columns defining one table
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    name: String,
    fields: Vec<FieldDescriptor>,
}

#[derive(Debug, Clone)]
pub struct TableSchemaBuilder {
    name: String,
    fields: Vec<FieldDescriptor>,
}

impl TableSchemaBuilder {
    #[must_use]
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn fields<I: IntoIterator<Item = FieldDescriptor>>(mut self, fields: I) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn build(self) -> TableSchema {
        TableSchema {
            name: self.name,
            fields: self.fields,
        }
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl TableSchema {
    pub fn builder<S: Into<String>>(name: S) -> TableSchemaBuilder {
        TableSchemaBuilder {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn primary_key(&self) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.is_primary_key())
    }

    pub fn geometry_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_geometry())
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.name()).collect()
    }

    /// Check that the table and column names are plain identifiers, that no
    /// column is declared twice, and that at most one column is the primary key.
    pub fn validate(&self) -> Result<()> {
        if !is_identifier(&self.name) {
            return Err(Error::validation(format!(
                "Invalid table name: {:?}",
                self.name
            )));
        }
        if self.fields.is_empty() {
            return Err(Error::validation(format!(
                "Table {} declares no columns",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !is_identifier(field.name()) {
                return Err(Error::validation(format!(
                    "Invalid column name in {}: {:?}",
                    self.name,
                    field.name()
                )));
            }
            if !seen.insert(field.name()) {
                return Err(Error::validation(format!(
                    "Column {} declared twice in {}",
                    field.name(),
                    self.name
                )));
            }
        }

        let keys = self.fields.iter().filter(|f| f.is_primary_key()).count();
        if keys > 1 {
            return Err(Error::validation(format!(
                "Table {} declares {} primary keys",
                self.name, keys
            )));
        }
        Ok(())
    }

    /// Fail with a validation error naming every column the table lacks
    pub fn validate_columns<S: AsRef<str>>(&self, columns: &[S]) -> Result<()> {
        let bad: Vec<String> = columns
            .iter()
            .map(|c| c.as_ref())
            .filter(|c| self.field(c).is_none())
            .map(str::to_string)
            .collect();

        if bad.is_empty() {
            Ok(())
        } else {
            Err(Error::unknown_columns(&self.name, &bad, &self.column_names()))
        }
    }
}

/// A domain type persisted as one row of its schema's table.
///
/// The external (payload) form is the type's serde representation; the
/// storage form is produced by [`Record::to_values`] and read back by
/// [`Record::from_row`].
pub trait Record: Serialize + DeserializeOwned + Sized {
    fn schema() -> &'static TableSchema;

    /// Storage values in schema field order. Geometry fields carry plain WKT
    /// text; the engine attaches the SRID on insert.
    fn to_values(&self) -> Result<Vec<Value>>;

    /// Build a record from a row selected with every schema column, geometry
    /// columns rendered as WKT.
    fn from_row(row: &Row<'_>) -> Result<Self>;

    fn from_payload(payload: JsonValue) -> Result<Self> {
        Ok(serde_json::from_value(payload)?)
    }

    fn to_payload(&self) -> Result<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{GeometryType, WGS84};

    fn schema() -> TableSchema {
        TableSchema::builder("parcels")
            .field(FieldDescriptor::integer("id").primary_key())
            .field(FieldDescriptor::text("owner").not_null())
            .field(FieldDescriptor::geometry("outline", GeometryType::Polygon, WGS84))
            .build()
    }

    #[test]
    fn test_lookup() {
        let schema = schema();
        assert_eq!(schema.name(), "parcels");
        assert_eq!(schema.primary_key().unwrap().name(), "id");
        assert_eq!(schema.column_names(), vec!["id", "owner", "outline"]);
        let geoms: Vec<_> = schema.geometry_fields().map(|f| f.name()).collect();
        assert_eq!(geoms, vec!["outline"]);
        assert!(schema.validate().is_ok());
    }

    #[test]
    fn test_validate_columns_names_offenders() {
        let schema = schema();
        assert!(schema.validate_columns(&["owner"]).is_ok());

        let err = schema.validate_columns(&["owner", "colour", "size"]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Invalid column(s) for parcels"));
        assert!(message.contains("colour, size"));
        assert!(message.contains("Valid columns are: id, owner, outline"));
    }

    #[test]
    fn test_validate_rejects_bad_declarations() {
        let twice = TableSchema::builder("t")
            .field(FieldDescriptor::integer("a"))
            .field(FieldDescriptor::integer("a"))
            .build();
        assert!(twice.validate().is_err());

        let keys = TableSchema::builder("t")
            .field(FieldDescriptor::integer("a").primary_key())
            .field(FieldDescriptor::integer("b").primary_key())
            .build();
        assert!(keys.validate().is_err());

        let name = TableSchema::builder("drop table")
            .field(FieldDescriptor::integer("a"))
            .build();
        assert!(name.validate().is_err());

        assert!(TableSchema::builder("empty").build().validate().is_err());
    }
}
