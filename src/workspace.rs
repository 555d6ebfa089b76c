//! Source-side querying. A workspace is either a file-based GeoPackage or a
//! managed enterprise connection; the two differ in how a table-specific
//! statement is executed (temporary view vs direct query layer) and in the
//! table prefix applied to statements.

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::domain::{ProjectId, TableKind};
use crate::error::GeoparcelError;
use crate::gpkg::{Row, query_rows};
use crate::schema::{TableDef, table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceKind {
    FileGeopackage,
    Enterprise,
}

#[derive(Debug)]
pub struct SourceWorkspace {
    path: Utf8PathBuf,
    prefix: String,
    kind: WorkspaceKind,
    conn: Connection,
}

impl SourceWorkspace {
    /// Opens a workspace, inferring the kind from the connection path:
    /// `.gpkg` files are file-based, anything else is treated as a managed
    /// enterprise connection.
    pub fn open(path: &Utf8Path, prefix: &str) -> Result<Self, GeoparcelError> {
        let kind = if path.as_str().ends_with(".gpkg") {
            WorkspaceKind::FileGeopackage
        } else {
            WorkspaceKind::Enterprise
        };
        Self::open_with_kind(path, prefix, kind)
    }

    pub fn open_with_kind(
        path: &Utf8Path,
        prefix: &str,
        kind: WorkspaceKind,
    ) -> Result<Self, GeoparcelError> {
        if !path.as_std_path().exists() {
            return Err(GeoparcelError::Filesystem(format!(
                "workspace not found: {path}"
            )));
        }
        let conn = Connection::open(path.as_std_path())?;
        Ok(Self {
            path: path.to_owned(),
            prefix: prefix.to_string(),
            kind,
            conn,
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn kind(&self) -> WorkspaceKind {
        self.kind
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Streams the rows of one delivered table for the given projects.
    /// POINT is read with a plain scan and gets its composite key
    /// synthesized here, inserted just before the geometry column; every
    /// other table goes through the statement strategy.
    pub fn fetch_table_rows(
        &self,
        kind: TableKind,
        project_ids: &[ProjectId],
    ) -> Result<Vec<Row>, GeoparcelError> {
        let def = table(kind);
        if kind == TableKind::Point {
            return self.fetch_point_rows(def, project_ids);
        }

        let sql = def.select_sql(&self.prefix, project_ids)?;
        info!("-creating feature layer {}_layer", def.name());
        debug!("--sql {sql}");
        self.run_layer_statement(def.name(), &sql)
    }

    /// PROJECT centroid rows for the given projects.
    pub fn fetch_project_centroids(
        &self,
        project_ids: &[ProjectId],
    ) -> Result<Vec<Row>, GeoparcelError> {
        let def = table(TableKind::Project);
        let sql = def.select_sql(&self.prefix, project_ids)?;
        info!("--fetch_project_centroids::");
        debug!("--sql {sql}");
        self.run_layer_statement(def.name(), &sql)
    }

    fn fetch_point_rows(
        &self,
        def: &TableDef,
        project_ids: &[ProjectId],
    ) -> Result<Vec<Row>, GeoparcelError> {
        let sql = TableDef::point_scan_sql(&self.prefix, project_ids)?;
        debug!("--sql {sql}");
        let feature_id_index = def
            .fields()
            .iter()
            .filter(|field| field.name != "Composite_Key")
            .position(|field| field.name == "FeatureID")
            .ok_or_else(|| GeoparcelError::UnknownTable("POINT.FeatureID".to_string()))?;

        let mut rows = query_rows(&self.conn, &sql)?;
        for row in &mut rows {
            let feature_id = row[feature_id_index].as_integer().ok_or_else(|| {
                GeoparcelError::InvalidGeometry("POINT.FeatureID is not an integer".to_string())
            })?;
            let key = crate::gpkg::Value::Text(format!("POINT:{feature_id}"));
            row.insert(row.len() - 1, key);
        }
        Ok(rows)
    }

    /// Executes a table statement with the workspace's strategy: file-based
    /// stores get a temporary view created, selected from, and dropped;
    /// enterprise connections run the statement directly.
    fn run_layer_statement(&self, name: &str, sql: &str) -> Result<Vec<Row>, GeoparcelError> {
        match self.kind {
            WorkspaceKind::FileGeopackage => {
                let layer = format!("{name}_layer");
                self.conn
                    .execute_batch(&format!("CREATE TEMP VIEW \"{layer}\" AS {sql}"))?;
                let result = query_rows(&self.conn, &format!("SELECT * FROM \"{layer}\""));
                self.conn
                    .execute_batch(&format!("DROP VIEW \"{layer}\""))?;
                result
            }
            WorkspaceKind::Enterprise => query_rows(&self.conn, sql),
        }
    }
}
