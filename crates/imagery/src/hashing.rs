// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Content digests: the canonical identity of an image.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use spatialdb::{Value, decode_base64, encode_base64};

use crate::error::{Error, Result};

const CHUNK_SIZE: usize = 8192;
pub const DIGEST_LEN: usize = 32;

/// SHA-256 of a file's bytes. Stored as a 32-byte BLOB and exchanged as
/// URL-safe base64 without padding.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentDigest([u8; DIGEST_LEN]);

impl ContentDigest {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let array: [u8; DIGEST_LEN] = bytes.try_into().map_err(|_| {
            Error::validation(format!(
                "Digest must be {} bytes, got {}",
                DIGEST_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_b64(&self) -> String {
        encode_base64(&self.0)
    }

    pub fn from_b64(encoded: &str) -> Result<Self> {
        let bytes = decode_base64(encoded.trim())
            .map_err(|e| Error::validation(format!("Invalid digest {:?}: {}", encoded, e)))?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_b64())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.to_b64())
    }
}

impl FromStr for ContentDigest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_b64(s)
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_b64())
    }
}

impl<'de> Deserialize<'de> for ContentDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_b64(&encoded).map_err(serde::de::Error::custom)
    }
}

impl ToSql for ContentDigest {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(ValueRef::Blob(&self.0)))
    }
}

impl FromSql for ContentDigest {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let blob = value.as_blob()?;
        let array: [u8; DIGEST_LEN] =
            blob.try_into()
                .map_err(|_| FromSqlError::InvalidBlobSize {
                    expected_size: DIGEST_LEN,
                    blob_size: blob.len(),
                })?;
        Ok(Self(array))
    }
}

impl From<ContentDigest> for Value {
    fn from(digest: ContentDigest) -> Self {
        Value::Blob(digest.0.to_vec())
    }
}

/// Hash a file in fixed-size chunks
pub fn hash_file<P: AsRef<Path>>(path: P) -> Result<ContentDigest> {
    let mut file = File::open(path.as_ref())?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; CHUNK_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(ContentDigest(hasher.finalize().into()))
}
