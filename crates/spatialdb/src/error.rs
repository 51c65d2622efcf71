// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the persistence engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed geometry, unknown column, or an inconsistent schema
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database not connected")]
    NotConnected,

    #[error("Invalid database path: {path}")]
    InvalidDatabasePath { path: PathBuf },

    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Error::Validation(message.into())
    }

    pub fn geometry<S: Into<String>>(message: S) -> Self {
        Error::Geometry(message.into())
    }

    /// Build the error reported when a request names columns a table lacks
    pub fn unknown_columns(table: &str, bad: &[String], valid: &[&str]) -> Self {
        Error::Validation(format!(
            "Invalid column(s) for {}: {}. Valid columns are: {}",
            table,
            bad.join(", "),
            valid.join(", ")
        ))
    }
}
