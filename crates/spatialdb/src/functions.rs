// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Spatial SQL functions registered on every connection.
//!
//! Names follow SpatiaLite so that query text reads the same: both the bare
//! and the `ST_` prefixed spellings are registered. All functions return
//! NULL when any geometry argument is NULL.

use rusqlite::Connection;
use rusqlite::functions::{Context, FunctionFlags};

use crate::error::Error;
use crate::geometry::StoredGeometry;

type FnResult<T> = rusqlite::Result<T>;

fn user_error(err: Error) -> rusqlite::Error {
    rusqlite::Error::UserFunctionError(Box::new(err))
}

fn geometry_arg(ctx: &Context<'_>, idx: usize) -> FnResult<Option<StoredGeometry>> {
    match ctx.get::<Option<String>>(idx)? {
        Some(text) => StoredGeometry::decode(&text).map(Some).map_err(user_error),
        None => Ok(None),
    }
}

fn geom_from_text(ctx: &Context<'_>) -> FnResult<Option<String>> {
    if ctx.is_empty() || ctx.len() > 2 {
        return Err(user_error(Error::validation(
            "GeomFromText expects (wkt) or (wkt, srid)",
        )));
    }

    let Some(text) = ctx.get::<Option<String>>(0)? else {
        return Ok(None);
    };
    let srid = if ctx.len() == 2 { ctx.get::<i32>(1)? } else { 0 };

    let geometry = StoredGeometry::from_wkt(&text, srid).map_err(user_error)?;
    Ok(Some(geometry.encode()))
}

fn as_text(ctx: &Context<'_>) -> FnResult<Option<String>> {
    Ok(geometry_arg(ctx, 0)?.map(|g| g.to_wkt()))
}

fn as_geojson(ctx: &Context<'_>) -> FnResult<Option<String>> {
    Ok(geometry_arg(ctx, 0)?.map(|g| g.to_geojson().to_string()))
}

fn geometry_type(ctx: &Context<'_>) -> FnResult<Option<String>> {
    Ok(geometry_arg(ctx, 0)?.map(|g| g.geometry_type().to_string()))
}

fn srid(ctx: &Context<'_>) -> FnResult<Option<i64>> {
    Ok(geometry_arg(ctx, 0)?.map(|g| i64::from(g.srid)))
}

fn area(ctx: &Context<'_>) -> FnResult<Option<f64>> {
    Ok(geometry_arg(ctx, 0)?.map(|g| g.area()))
}

fn intersects(ctx: &Context<'_>) -> FnResult<Option<i64>> {
    match (geometry_arg(ctx, 0)?, geometry_arg(ctx, 1)?) {
        (Some(a), Some(b)) => Ok(Some(i64::from(a.intersects(&b)))),
        _ => Ok(None),
    }
}

fn intersection(ctx: &Context<'_>) -> FnResult<Option<String>> {
    match (geometry_arg(ctx, 0)?, geometry_arg(ctx, 1)?) {
        (Some(a), Some(b)) => Ok(Some(a.intersection(&b).encode())),
        _ => Ok(None),
    }
}

/// Register the spatial function set on `conn`
pub fn register_spatial_functions(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    for name in ["GeomFromText", "ST_GeomFromText"] {
        conn.create_scalar_function(name, -1, flags, geom_from_text)?;
    }
    for name in ["AsText", "ST_AsText"] {
        conn.create_scalar_function(name, 1, flags, as_text)?;
    }
    for name in ["AsGeoJSON", "ST_AsGeoJSON"] {
        conn.create_scalar_function(name, 1, flags, as_geojson)?;
    }
    for name in ["GeometryType", "ST_GeometryType"] {
        conn.create_scalar_function(name, 1, flags, geometry_type)?;
    }
    for name in ["SRID", "ST_SRID"] {
        conn.create_scalar_function(name, 1, flags, srid)?;
    }
    for name in ["Area", "ST_Area"] {
        conn.create_scalar_function(name, 1, flags, area)?;
    }
    for name in ["Intersects", "ST_Intersects"] {
        conn.create_scalar_function(name, 2, flags, intersects)?;
    }
    for name in ["Intersection", "ST_Intersection"] {
        conn.create_scalar_function(name, 2, flags, intersection)?;
    }

    Ok(())
}
