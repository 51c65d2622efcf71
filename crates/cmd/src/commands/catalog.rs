// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use imagery::Settings;

use crate::common::{open_index, write_json};

pub fn catalog_add_command<W: Write>(
    settings: &Settings,
    path: &Path,
    name: &str,
    out: &mut W,
) -> Result<()> {
    let mut db = open_index(settings)?;
    let catalog = imagery::register_catalog(&mut db, path, name)
        .with_context(|| format!("Failed to register catalog {} at {}", name, path.display()))?;
    write_json(out, &catalog)
}

pub fn catalog_edit_command<W: Write>(
    settings: &Settings,
    id: i64,
    path: Option<&Path>,
    name: Option<&str>,
    out: &mut W,
) -> Result<()> {
    let mut db = open_index(settings)?;
    let catalog = imagery::edit_catalog(&mut db, id, path, name)
        .with_context(|| format!("Failed to edit catalog {}", id))?;
    write_json(out, &catalog)
}

pub fn catalog_list_command<W: Write>(settings: &Settings, out: &mut W) -> Result<()> {
    let db = open_index(settings)?;
    let catalogs = imagery::list_catalogs(&db)?;
    write_json(out, &catalogs)
}
