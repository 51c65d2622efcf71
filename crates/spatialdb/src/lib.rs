// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Typed spatial persistence on SQLite.
//!
//! Records declare their table through a [`TableSchema`] of
//! [`FieldDescriptor`]s. The [`SpatialDatabase`] engine creates tables and
//! geometry columns, maintains full-text shadow indexes, performs batched
//! upserts and builds parameterized queries with derived columns, joins and
//! common table expressions.

pub mod database;
pub mod error;
pub mod field;
pub mod functions;
pub mod geometry;
pub mod query;
pub mod schema;

pub use database::SpatialDatabase;
pub use error::{Error, Result};
pub use field::{
    Affinity, DomainType, FieldDescriptor, GeometrySpec, GeometryType, WGS84, decode_base64,
    encode_base64,
};
pub use geometry::{Polygon, StoredGeometry};
pub use query::{
    Columns, ConflictAction, GeoFormat, JoinClause, JoinType, OnConflict, QueryOptions, RecordMap,
    fts_match_expression,
};
pub use schema::{Record, TableSchema, TableSchemaBuilder};

// Storage values in record conversions
pub use rusqlite::types::Value;
pub use rusqlite::Row;
