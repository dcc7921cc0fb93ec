//! Reading milepost point features out of a GeoPackage.

use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{info, warn};

use super::MileageFeature;
use super::projection::{Crs, Point};
use crate::model::LineRefCode;

/// Table and column names of the milepost layer.
#[derive(Debug, Clone)]
pub struct MarkerLayer {
    pub table: String,
    pub id_column: String,
    pub code_column: String,
    pub value_column: String,
}

pub fn load_markers(path: &Path, layer: &MarkerLayer) -> Result<Vec<MileageFeature>> {
    let connection = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("failed to open {}", path.display()))?;
    read_markers(&connection, layer)
        .with_context(|| format!("failed to read layer {} from {}", layer.table, path.display()))
}

fn read_markers(connection: &Connection, layer: &MarkerLayer) -> Result<Vec<MileageFeature>> {
    let (geometry_column, layer_srs_id): (String, i32) = connection
        .query_row(
            "SELECT column_name, srs_id FROM gpkg_geometry_columns WHERE table_name = ?1",
            params![layer.table],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .context("failed to query gpkg_geometry_columns")?
        .with_context(|| format!("layer {} has no registered geometry column", layer.table))?;

    let sql = format!(
        "SELECT {id}, {code}, {value}, {geometry} FROM {table} ORDER BY {id}",
        id = quote_identifier(&layer.id_column),
        code = quote_identifier(&layer.code_column),
        value = quote_identifier(&layer.value_column),
        geometry = quote_identifier(&geometry_column),
        table = quote_identifier(&layer.table),
    );
    let mut statement = connection
        .prepare(&sql)
        .with_context(|| format!("failed to prepare marker query: {sql}"))?;

    let rows = statement.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, Option<f64>>(2)?,
            row.get::<_, Option<Vec<u8>>>(3)?,
        ))
    })?;

    let mut features = Vec::new();
    let mut skipped = 0_usize;
    for row in rows {
        let (id, code, value, blob) = row?;

        let lineref = code.as_deref().and_then(LineRefCode::parse);
        let linear_value = value.filter(|value| value.is_finite());
        let (Some(lineref), Some(linear_value), Some(blob)) = (lineref, linear_value, blob) else {
            warn!(feature_id = id, "skipping marker with missing code, value or geometry");
            skipped += 1;
            continue;
        };

        let Some((header_srs_id, x, y)) = parse_point_blob(&blob)
            .with_context(|| format!("invalid geometry for feature {id}"))?
        else {
            warn!(feature_id = id, "skipping marker with empty geometry");
            skipped += 1;
            continue;
        };

        let srs_id = if header_srs_id > 0 {
            header_srs_id
        } else {
            layer_srs_id
        };
        let crs = Crs::from_srs_id(srs_id)
            .with_context(|| format!("unsupported srs_id {srs_id} on feature {id}"))?;

        features.push(MileageFeature {
            id,
            lineref,
            linear_value,
            geometry: Point { x, y, crs },
        });
    }

    info!(
        layer = %layer.table,
        features = features.len(),
        skipped,
        "loaded reference markers"
    );

    Ok(features)
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Decodes a GeoPackage geometry blob holding a WKB point.
///
/// Returns the header srs_id with x and y, or `None` for an empty point.
pub fn parse_point_blob(blob: &[u8]) -> Result<Option<(i32, f64, f64)>> {
    if blob.len() < 8 || !blob.starts_with(b"GP") {
        bail!("missing GeoPackage geometry header");
    }

    let flags = blob[3];
    let header_little_endian = flags & 0x01 == 1;
    let envelope_len = match (flags >> 1) & 0x07 {
        0 => 0,
        1 => 32,
        2 | 3 => 48,
        4 => 64,
        other => bail!("invalid envelope indicator {other}"),
    };
    if (flags >> 4) & 0x01 == 1 {
        return Ok(None);
    }

    let srs_id = i32::from_ne_bytes(order_bytes(&blob[4..8], header_little_endian)?);

    let wkb = blob
        .get(8 + envelope_len..)
        .context("geometry blob shorter than its envelope")?;
    if wkb.len() < 21 {
        bail!("WKB point truncated ({} bytes)", wkb.len());
    }

    let little_endian = match wkb[0] {
        0 => false,
        1 => true,
        other => bail!("invalid WKB byte order {other}"),
    };
    let geometry_type = u32::from_ne_bytes(order_bytes(&wkb[1..5], little_endian)?);
    // ISO Z/M/ZM variants are 1001/2001/3001; EWKB keeps flags in the high bits.
    if (geometry_type & 0x0FFF_FFFF) % 1000 != 1 {
        bail!("expected WKB point, found geometry type {geometry_type}");
    }

    let x = f64::from_ne_bytes(order_bytes(&wkb[5..13], little_endian)?);
    let y = f64::from_ne_bytes(order_bytes(&wkb[13..21], little_endian)?);
    if x.is_nan() && y.is_nan() {
        return Ok(None);
    }

    Ok(Some((srs_id, x, y)))
}

fn order_bytes<const N: usize>(raw: &[u8], little_endian: bool) -> Result<[u8; N]> {
    let mut bytes: [u8; N] = raw.try_into().context("unexpected field width")?;
    if little_endian != cfg!(target_endian = "little") {
        bytes.reverse();
    }
    Ok(bytes)
}
