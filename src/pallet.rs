//! Pallets: configuration-driven staging copies. A pallet ships a list of
//! crates (one source→destination dataset mapping each) into a staging
//! GeoPackage, then optionally dissolves one dataset. Copies are
//! delete-if-exists-then-recreate; there is no incremental update.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{Connection, params};
use serde::Serialize;
use tracing::info;

use crate::config::{DissolveEntry, PalletEntry};
use crate::dissolve::{DissolveResult, dissolve};
use crate::error::GeoparcelError;
use crate::gpkg::{GpkgWriter, query_rows};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CrateStatus {
    Created,
    Recreated,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrateResult {
    pub source_table: String,
    pub destination_workspace: String,
    pub destination_table: String,
    pub status: CrateStatus,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PalletResult {
    pub pallet: String,
    pub crates: Vec<CrateResult>,
    pub dissolved: Option<DissolveResult>,
}

#[derive(Debug, Clone)]
pub struct PalletCrate {
    pub source_workspace: Utf8PathBuf,
    pub source_table: String,
    pub destination_workspace: Utf8PathBuf,
    pub destination_table: String,
}

#[derive(Debug, Clone)]
pub struct Pallet {
    name: String,
    staging: Utf8PathBuf,
    crates: Vec<PalletCrate>,
    dissolve: Option<DissolveEntry>,
}

impl Pallet {
    pub fn from_entry(entry: &PalletEntry) -> Self {
        let crates = entry
            .crates
            .iter()
            .map(|c| PalletCrate {
                source_workspace: Utf8PathBuf::from(&c.source_workspace),
                source_table: c.source_table.clone(),
                destination_workspace: Utf8PathBuf::from(&c.destination_workspace),
                destination_table: c
                    .destination_table
                    .clone()
                    .unwrap_or_else(|| c.source_table.clone()),
            })
            .collect();
        Self {
            name: entry.name.clone(),
            staging: Utf8PathBuf::from(&entry.staging),
            crates,
            dissolve: entry.dissolve.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn crates(&self) -> &[PalletCrate] {
        &self.crates
    }

    /// Ships every crate into the staging rack, then runs the optional
    /// dissolve step.
    pub fn ship(&self) -> Result<PalletResult, GeoparcelError> {
        info!("shipping pallet {}", self.name);
        fs::create_dir_all(self.staging.as_std_path())
            .map_err(|err| GeoparcelError::Filesystem(err.to_string()))?;

        let mut crates = Vec::with_capacity(self.crates.len());
        for pallet_crate in &self.crates {
            crates.push(ship_crate(pallet_crate)?);
        }

        let dissolved = match &self.dissolve {
            Some(entry) => Some(dissolve(
                Utf8Path::new(&entry.workspace),
                &entry.table,
                &entry.field,
            )?),
            None => None,
        };

        Ok(PalletResult {
            pallet: self.name.clone(),
            crates,
            dissolved,
        })
    }
}

/// Copies one feature class or table from its source workspace into the
/// crate's destination GeoPackage, recreating the destination table.
fn ship_crate(pallet_crate: &PalletCrate) -> Result<CrateResult, GeoparcelError> {
    info!(
        "-- crate {} -> {}",
        pallet_crate.source_table, pallet_crate.destination_workspace
    );
    let source = Connection::open(pallet_crate.source_workspace.as_std_path())?;
    let table = &pallet_crate.source_table;
    let table_exists: i64 = source.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    if table_exists == 0 {
        return Err(GeoparcelError::SourceTableNotFound(table.clone()));
    }

    let columns = discover_columns(&source, table)?;
    let geometry = discover_geometry(&source, table)?;

    let destination = if pallet_crate.destination_workspace.as_std_path().exists() {
        GpkgWriter::open(&pallet_crate.destination_workspace)?
    } else {
        GpkgWriter::create(&pallet_crate.destination_workspace)?
    };

    let destination_table = &pallet_crate.destination_table;
    let status = if destination.has_table(destination_table)? {
        drop_table(&destination, destination_table)?;
        CrateStatus::Recreated
    } else {
        CrateStatus::Created
    };

    let mut ddl = vec!["fid INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
    for (name, declared_type) in &columns {
        ddl.push(format!("\"{name}\" {declared_type}"));
    }
    destination.conn().execute(
        &format!("CREATE TABLE \"{destination_table}\" ({})", ddl.join(", ")),
        [],
    )?;

    match &geometry {
        Some((column, type_name, srs_id)) => {
            destination.conn().execute(
                "INSERT INTO gpkg_contents (table_name, data_type, identifier, last_change, srs_id)
                 VALUES (?1, 'features', ?1, ?2, ?3)",
                params![destination_table, chrono::Utc::now().to_rfc3339(), srs_id],
            )?;
            destination.conn().execute(
                "INSERT INTO gpkg_geometry_columns VALUES (?1, ?2, ?3, ?4, 0, 0)",
                params![destination_table, column, type_name, srs_id],
            )?;
        }
        None => {
            destination.register_attribute_table(destination_table)?;
        }
    }

    let column_list = columns
        .iter()
        .map(|(name, _)| format!("\"{name}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let rows = query_rows(&source, &format!("SELECT {column_list} FROM \"{table}\""))?;
    let placeholders = vec!["?"; columns.len()].join(", ");
    let insert = format!(
        "INSERT INTO \"{destination_table}\" ({column_list}) VALUES ({placeholders})"
    );
    for row in &rows {
        destination
            .conn()
            .execute(&insert, rusqlite::params_from_iter(row.iter()))?;
    }

    Ok(CrateResult {
        source_table: table.clone(),
        destination_workspace: pallet_crate.destination_workspace.to_string(),
        destination_table: destination_table.clone(),
        status,
        rows: rows.len(),
    })
}

/// Source column layout, primary key column left out (destinations get
/// their own `fid`).
fn discover_columns(
    conn: &Connection,
    table: &str,
) -> Result<Vec<(String, String)>, GeoparcelError> {
    let info = query_rows(conn, &format!("PRAGMA table_info(\"{table}\")"))?;
    let mut columns = Vec::new();
    for row in info {
        // pragma layout: cid, name, type, notnull, dflt_value, pk
        let is_pk = row[5].as_integer().unwrap_or(0) != 0;
        if is_pk {
            continue;
        }
        let name = row[1].as_text().unwrap_or_default().to_string();
        let declared = row[2].as_text().unwrap_or("TEXT").to_string();
        columns.push((name, declared));
    }
    Ok(columns)
}

fn discover_geometry(
    conn: &Connection,
    table: &str,
) -> Result<Option<(String, String, i64)>, GeoparcelError> {
    let has_registry: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'gpkg_geometry_columns'",
        [],
        |row| row.get(0),
    )?;
    if has_registry == 0 {
        return Ok(None);
    }
    let rows = query_rows(
        conn,
        &format!(
            "SELECT column_name, geometry_type_name, srs_id
             FROM gpkg_geometry_columns WHERE table_name = '{table}'"
        ),
    )?;
    Ok(rows.first().map(|row| {
        (
            row[0].as_text().unwrap_or_default().to_string(),
            row[1].as_text().unwrap_or("GEOMETRY").to_string(),
            row[2].as_integer().unwrap_or(0),
        )
    }))
}

fn drop_table(destination: &GpkgWriter, table: &str) -> Result<(), GeoparcelError> {
    destination
        .conn()
        .execute_batch(&format!("DROP TABLE IF EXISTS \"{table}\""))?;
    destination.conn().execute(
        "DELETE FROM gpkg_contents WHERE table_name = ?1",
        params![table],
    )?;
    destination.conn().execute(
        "DELETE FROM gpkg_geometry_columns WHERE table_name = ?1",
        params![table],
    )?;
    Ok(())
}
