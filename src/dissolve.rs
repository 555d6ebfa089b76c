//! Dissolve: merge the rows of a feature class that share an attribute
//! value, unioning their geometries into one multi geometry per group. The
//! output lands next to the input as `<table>_dissolved`.

use camino::Utf8Path;
use rusqlite::params;
use serde::Serialize;
use tracing::info;

use crate::error::GeoparcelError;
use crate::gpkg::{GpkgWriter, Value, query_rows};
use crate::wkb;

#[derive(Debug, Clone, Serialize)]
pub struct DissolveResult {
    pub table: String,
    pub groups: usize,
}

pub fn dissolve(
    gpkg: &Utf8Path,
    table_name: &str,
    field: &str,
) -> Result<DissolveResult, GeoparcelError> {
    info!("--dissolve::{table_name} by {field}");
    let writer = GpkgWriter::open(gpkg)?;
    if !writer.has_table(table_name)? {
        return Err(GeoparcelError::SourceTableNotFound(table_name.to_string()));
    }

    let geometry = query_rows(
        writer.conn(),
        &format!(
            "SELECT column_name, geometry_type_name, srs_id
             FROM gpkg_geometry_columns WHERE table_name = '{table_name}'"
        ),
    )?;
    let Some(geometry) = geometry.first() else {
        return Err(GeoparcelError::GeometryMerge(format!(
            "{table_name} is not a feature class"
        )));
    };
    let geometry_column = geometry[0]
        .as_text()
        .ok_or_else(|| GeoparcelError::GeometryMerge("bad geometry registration".to_string()))?
        .to_string();
    let type_name = geometry[1].as_text().unwrap_or("GEOMETRY").to_string();
    let srs_id = geometry[2].as_integer().unwrap_or(0);

    let rows = query_rows(
        writer.conn(),
        &format!(
            "SELECT \"{field}\", \"{geometry_column}\" FROM \"{table_name}\" ORDER BY \"{field}\""
        ),
    )?;

    // rows arrive sorted, so groups are contiguous
    let mut groups: Vec<(Value, Vec<Vec<u8>>)> = Vec::new();
    for row in rows {
        let key = row[0].clone();
        let Some(blob) = row[1].as_blob() else {
            continue;
        };
        match groups.last_mut() {
            Some((last_key, blobs)) if *last_key == key => blobs.push(blob.to_vec()),
            _ => groups.push((key, vec![blob.to_vec()])),
        }
    }

    let output = format!("{table_name}_dissolved");
    recreate_output_table(&writer, &output, field, &groups, &type_name, srs_id)?;

    for (key, blobs) in &groups {
        let merged = wkb::merge_geometries(blobs)?;
        writer.conn().execute(
            &format!(
                "INSERT INTO \"{output}\" (\"{field}\", FeatureCount, Shape) VALUES (?1, ?2, ?3)"
            ),
            params![key, blobs.len() as i64, merged],
        )?;
    }

    Ok(DissolveResult {
        table: output,
        groups: groups.len(),
    })
}

fn recreate_output_table(
    writer: &GpkgWriter,
    output: &str,
    field: &str,
    groups: &[(Value, Vec<Vec<u8>>)],
    source_type_name: &str,
    srs_id: i64,
) -> Result<(), GeoparcelError> {
    writer
        .conn()
        .execute_batch(&format!("DROP TABLE IF EXISTS \"{output}\""))?;
    writer.conn().execute(
        "DELETE FROM gpkg_contents WHERE table_name = ?1",
        params![output],
    )?;
    writer.conn().execute(
        "DELETE FROM gpkg_geometry_columns WHERE table_name = ?1",
        params![output],
    )?;

    let field_type = match groups.first().map(|(key, _)| key) {
        Some(Value::Integer(_)) => "INTEGER",
        Some(Value::Real(_)) => "REAL",
        _ => "TEXT",
    };
    let multi_type = multi_type_name(source_type_name);
    writer.conn().execute(
        &format!(
            "CREATE TABLE \"{output}\" (
                 fid INTEGER PRIMARY KEY AUTOINCREMENT,
                 \"{field}\" {field_type},
                 FeatureCount INTEGER NOT NULL,
                 Shape {multi_type}
             )"
        ),
        [],
    )?;
    writer.conn().execute(
        "INSERT INTO gpkg_contents (table_name, data_type, identifier, last_change, srs_id)
         VALUES (?1, 'features', ?1, ?2, ?3)",
        params![output, chrono::Utc::now().to_rfc3339(), srs_id],
    )?;
    writer.conn().execute(
        "INSERT INTO gpkg_geometry_columns VALUES (?1, 'Shape', ?2, ?3, 0, 0)",
        params![output, multi_type, srs_id],
    )?;
    Ok(())
}

fn multi_type_name(source: &str) -> String {
    if source.starts_with("MULTI") {
        source.to_string()
    } else {
        format!("MULTI{source}")
    }
}
