// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A raster tool subprocess exited unsuccessfully
    #[error("{tool} failed ({status})\n{stderr}")]
    ExternalTool {
        tool: String,
        status: String,
        stderr: String,
    },

    /// The raster-info document lacks something extraction needs
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// A numeric input outside the domain of a formula
    #[error("Domain error: {0}")]
    Domain(String),

    #[error(transparent)]
    Store(#[from] spatialdb::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Store(spatialdb::Error::Sqlite(err))
    }
}

impl Error {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Error::Validation(message.into())
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Error::NotFound(message.into())
    }

    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Error::Conflict(message.into())
    }

    pub fn metadata<S: Into<String>>(message: S) -> Self {
        Error::Metadata(message.into())
    }
}
