//! Destination-side GeoPackage writing: metadata tables, feature class and
//! attribute table creation, bulk inserts, and relationship classes mapped
//! onto the Related Tables Extension.

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ToSql, params};
use tracing::info;

use crate::domain::{GeometryType, TableKind};
use crate::error::GeoparcelError;
use crate::schema::{GEOMETRY_COLUMN, TableDef};

/// Spatial reference for everything this tool writes.
pub const WEB_MERCATOR: i32 = 3857;

/// One column value in transit between workspaces.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(value) => Some(value),
            _ => None,
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(value) => ToSqlOutput::Borrowed(ValueRef::Integer(*value)),
            Value::Real(value) => ToSqlOutput::Borrowed(ValueRef::Real(*value)),
            Value::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
            Value::Blob(value) => ToSqlOutput::Borrowed(ValueRef::Blob(value.as_slice())),
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(value) => Value::Integer(value),
            ValueRef::Real(value) => Value::Real(value),
            ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
        }
    }
}

pub type Row = Vec<Value>;

/// Runs a query and materializes every row.
pub fn query_rows(conn: &Connection, sql: &str) -> Result<Vec<Row>, GeoparcelError> {
    let mut statement = conn.prepare(sql)?;
    let column_count = statement.column_count();
    let mut rows = statement.query([])?;
    let mut results = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(column_count);
        for index in 0..column_count {
            values.push(Value::from(row.get_ref(index)?));
        }
        results.push(values);
    }
    Ok(results)
}

/// A relationship class between two delivered tables, joined on a shared
/// key column on each side.
#[derive(Debug, Clone, Copy)]
pub struct Relationship {
    pub origin: TableKind,
    pub destination: TableKind,
    pub origin_key: &'static str,
    pub destination_key: &'static str,
}

impl Relationship {
    pub fn name(&self) -> String {
        format!("{}__HAS__{}", self.origin.name(), self.destination.name())
    }
}

pub struct GpkgWriter {
    conn: Connection,
    path: Utf8PathBuf,
}

impl GpkgWriter {
    /// Creates a new GeoPackage with the mandatory metadata tables and srs
    /// rows seeded. The file must not already exist.
    pub fn create(path: &Utf8Path) -> Result<Self, GeoparcelError> {
        if path.as_std_path().exists() {
            return Err(GeoparcelError::Filesystem(format!(
                "geopackage already exists: {path}"
            )));
        }
        info!("--create_gpkg::{path}");
        let conn = Connection::open(path.as_std_path())?;
        conn.execute_batch(
            "PRAGMA application_id = 0x47504B47;
             PRAGMA user_version = 10300;
             CREATE TABLE gpkg_spatial_ref_sys (
                 srs_name TEXT NOT NULL,
                 srs_id INTEGER PRIMARY KEY,
                 organization TEXT NOT NULL,
                 organization_coordsys_id INTEGER NOT NULL,
                 definition TEXT NOT NULL,
                 description TEXT
             );
             CREATE TABLE gpkg_contents (
                 table_name TEXT NOT NULL PRIMARY KEY,
                 data_type TEXT NOT NULL,
                 identifier TEXT UNIQUE,
                 description TEXT DEFAULT '',
                 last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                 min_x DOUBLE, min_y DOUBLE, max_x DOUBLE, max_y DOUBLE,
                 srs_id INTEGER
             );
             CREATE TABLE gpkg_geometry_columns (
                 table_name TEXT NOT NULL,
                 column_name TEXT NOT NULL,
                 geometry_type_name TEXT NOT NULL,
                 srs_id INTEGER NOT NULL,
                 z TINYINT NOT NULL,
                 m TINYINT NOT NULL,
                 PRIMARY KEY (table_name, column_name)
             );
             CREATE TABLE gpkg_extensions (
                 table_name TEXT,
                 column_name TEXT,
                 extension_name TEXT NOT NULL,
                 definition TEXT NOT NULL,
                 scope TEXT NOT NULL
             );
             INSERT INTO gpkg_spatial_ref_sys VALUES
                 ('Undefined Cartesian SRS', -1, 'NONE', -1, 'undefined', NULL),
                 ('Undefined Geographic SRS', 0, 'NONE', 0, 'undefined', NULL),
                 ('WGS 84', 4326, 'EPSG', 4326,
                  'GEOGCS[\"WGS 84\",DATUM[\"WGS_1984\",SPHEROID[\"WGS 84\",6378137,298.257223563]],PRIMEM[\"Greenwich\",0],UNIT[\"degree\",0.0174532925199433]]',
                  NULL),
                 ('WGS 84 / Pseudo-Mercator', 3857, 'EPSG', 3857,
                  'PROJCS[\"WGS 84 / Pseudo-Mercator\",GEOGCS[\"WGS 84\",DATUM[\"WGS_1984\",SPHEROID[\"WGS 84\",6378137,298.257223563]],PRIMEM[\"Greenwich\",0],UNIT[\"degree\",0.0174532925199433]],PROJECTION[\"Mercator_1SP\"],UNIT[\"metre\",1]]',
                  NULL);",
        )?;
        Ok(Self {
            conn,
            path: path.to_owned(),
        })
    }

    /// Opens an existing GeoPackage for further writes (pallet staging,
    /// dissolve post-processing).
    pub fn open(path: &Utf8Path) -> Result<Self, GeoparcelError> {
        let conn = Connection::open(path.as_std_path())?;
        Ok(Self {
            conn,
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Creates a delivered table from its catalog definition: a feature
    /// class when the kind carries geometry, a plain attribute table
    /// otherwise.
    pub fn create_table(&self, def: &TableDef) -> Result<(), GeoparcelError> {
        info!("-- create table {}", def.name());
        self.conn.execute(&def.create_sql(), [])?;
        match def.geometry() {
            Some(geometry) => {
                self.register_feature_table(def.name(), geometry)?;
            }
            None => {
                self.register_attribute_table(def.name())?;
            }
        }
        Ok(())
    }

    /// Registers a feature class in `gpkg_contents` and
    /// `gpkg_geometry_columns`.
    pub fn register_feature_table(
        &self,
        name: &str,
        geometry: GeometryType,
    ) -> Result<(), GeoparcelError> {
        self.conn.execute(
            "INSERT INTO gpkg_contents (table_name, data_type, identifier, last_change, srs_id)
             VALUES (?1, 'features', ?1, ?2, ?3)",
            params![name, iso_timestamp(), WEB_MERCATOR],
        )?;
        self.conn.execute(
            "INSERT INTO gpkg_geometry_columns VALUES (?1, ?2, ?3, ?4, 0, 0)",
            params![name, GEOMETRY_COLUMN, geometry.gpkg_name(), WEB_MERCATOR],
        )?;
        Ok(())
    }

    pub fn register_attribute_table(&self, name: &str) -> Result<(), GeoparcelError> {
        self.conn.execute(
            "INSERT INTO gpkg_contents (table_name, data_type, identifier, last_change)
             VALUES (?1, 'attributes', ?1, ?2)",
            params![name, iso_timestamp()],
        )?;
        Ok(())
    }

    /// Bulk-inserts rows in a single transaction. Row shape must match the
    /// table's column layout.
    pub fn insert_rows(&mut self, def: &TableDef, rows: &[Row]) -> Result<usize, GeoparcelError> {
        let tx = self.conn.transaction()?;
        {
            let mut statement = tx.prepare(&def.insert_sql())?;
            for row in rows {
                statement.execute(rusqlite::params_from_iter(row.iter()))?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn has_table(&self, name: &str) -> Result<bool, GeoparcelError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn row_count(&self, name: &str) -> Result<i64, GeoparcelError> {
        let count: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM \"{name}\""), [], |row| {
                    row.get(0)
                })?;
        Ok(count)
    }

    /// Creates one relationship class: a `gpkgext_relations` row plus a
    /// materialized `<ORIGIN>__HAS__<DESTINATION>` mapping table joining the
    /// key columns. Skipped (returns false) when either endpoint table is
    /// absent or empty.
    pub fn create_relationship(&self, rel: &Relationship) -> Result<bool, GeoparcelError> {
        let origin = rel.origin.name();
        let destination = rel.destination.name();
        for endpoint in [origin, destination] {
            if !self.has_table(endpoint)? || self.row_count(endpoint)? == 0 {
                info!("-- skipping relationship {} ({endpoint} missing or empty)", rel.name());
                return Ok(false);
            }
        }

        info!("-- create relationship {}", rel.name());
        self.ensure_relations_registry()?;

        let mapping = rel.name();
        self.conn.execute(
            &format!(
                "CREATE TABLE \"{mapping}\" (base_id INTEGER NOT NULL, related_id INTEGER NOT NULL)"
            ),
            [],
        )?;
        self.conn.execute(
            &format!(
                "INSERT INTO \"{mapping}\" (base_id, related_id)
                 SELECT b.fid, r.fid FROM \"{origin}\" b
                 JOIN \"{destination}\" r ON b.\"{origin_key}\" = r.\"{destination_key}\"",
                origin_key = rel.origin_key,
                destination_key = rel.destination_key,
            ),
            [],
        )?;

        let relation_name = if rel.destination.is_spatial() {
            "features"
        } else {
            "attributes"
        };
        self.conn.execute(
            "INSERT INTO gpkgext_relations
             (base_table_name, base_primary_column, related_table_name,
              related_primary_column, relation_name, mapping_table_name)
             VALUES (?1, 'fid', ?2, 'fid', ?3, ?4)",
            params![origin, destination, relation_name, mapping],
        )?;
        self.conn.execute(
            "INSERT INTO gpkg_extensions (table_name, column_name, extension_name, definition, scope)
             VALUES (?1, NULL, 'gpkg_related_tables', 'http://www.geopackage.org/18-000.html', 'read-write')",
            params![mapping],
        )?;
        Ok(true)
    }

    fn ensure_relations_registry(&self) -> Result<(), GeoparcelError> {
        if self.has_table("gpkgext_relations")? {
            return Ok(());
        }
        self.conn.execute_batch(
            "CREATE TABLE gpkgext_relations (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 base_table_name TEXT NOT NULL,
                 base_primary_column TEXT NOT NULL DEFAULT 'id',
                 related_table_name TEXT NOT NULL,
                 related_primary_column TEXT NOT NULL DEFAULT 'id',
                 relation_name TEXT NOT NULL,
                 mapping_table_name TEXT NOT NULL UNIQUE
             );
             INSERT INTO gpkg_extensions (table_name, column_name, extension_name, definition, scope)
             VALUES ('gpkgext_relations', NULL, 'gpkg_related_tables',
                     'http://www.geopackage.org/18-000.html', 'read-write');",
        )?;
        Ok(())
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TableKind;
    use crate::schema::table;
    use crate::wkb;

    fn temp_gpkg() -> (tempfile::TempDir, GpkgWriter) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("test.gpkg")).unwrap();
        let writer = GpkgWriter::create(&path).unwrap();
        (dir, writer)
    }

    fn point_row(feature_id: i64, project_id: i64) -> Row {
        vec![
            Value::Text("Guzzler".to_string()),
            Value::Integer(feature_id),
            Value::Null,
            Value::Text("Construction".to_string()),
            Value::Null,
            Value::Integer(project_id),
            Value::Text("Complete".to_string()),
            Value::Text(format!("POINT:{feature_id}")),
            Value::Blob(wkb::wrap_gpkg(WEB_MERCATOR, &wkb::point_wkb(1.0, 2.0))),
        ]
    }

    #[test]
    fn create_rejects_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("dup.gpkg")).unwrap();
        GpkgWriter::create(&path).unwrap();
        assert!(GpkgWriter::create(&path).is_err());
    }

    #[test]
    fn feature_class_registration() {
        let (_dir, mut writer) = temp_gpkg();
        let def = table(TableKind::Point);
        writer.create_table(def).unwrap();
        writer.insert_rows(def, &[point_row(1, 10)]).unwrap();

        let rows = query_rows(
            writer.conn(),
            "SELECT geometry_type_name FROM gpkg_geometry_columns WHERE table_name = 'POINT'",
        )
        .unwrap();
        assert_eq!(rows[0][0].as_text(), Some("MULTIPOINT"));
        assert_eq!(writer.row_count("POINT").unwrap(), 1);
    }

    #[test]
    fn attribute_table_registration() {
        let (_dir, writer) = temp_gpkg();
        writer.create_table(table(TableKind::AreaAction)).unwrap();
        let rows = query_rows(
            writer.conn(),
            "SELECT data_type FROM gpkg_contents WHERE table_name = 'AREAACTION'",
        )
        .unwrap();
        assert_eq!(rows[0][0].as_text(), Some("attributes"));
    }

    #[test]
    fn relationship_skipped_when_endpoint_missing() {
        let (_dir, mut writer) = temp_gpkg();
        let def = table(TableKind::Point);
        writer.create_table(def).unwrap();
        writer.insert_rows(def, &[point_row(1, 10)]).unwrap();

        let created = writer
            .create_relationship(&Relationship {
                origin: TableKind::Point,
                destination: TableKind::AreaAction,
                origin_key: "FeatureID",
                destination_key: "FeatureID",
            })
            .unwrap();
        assert!(!created);
        assert!(!writer.has_table("POINT__HAS__AREAACTION").unwrap());
    }

    #[test]
    fn relationship_skipped_when_endpoint_empty() {
        let (_dir, mut writer) = temp_gpkg();
        let point = table(TableKind::Point);
        writer.create_table(point).unwrap();
        writer.insert_rows(point, &[point_row(1, 10)]).unwrap();
        writer.create_table(table(TableKind::AreaAction)).unwrap();

        let created = writer
            .create_relationship(&Relationship {
                origin: TableKind::Point,
                destination: TableKind::AreaAction,
                origin_key: "FeatureID",
                destination_key: "FeatureID",
            })
            .unwrap();
        assert!(!created);
    }

    #[test]
    fn relationship_materializes_mapping_rows() {
        let (_dir, mut writer) = temp_gpkg();
        let point = table(TableKind::Point);
        writer.create_table(point).unwrap();
        writer
            .insert_rows(point, &[point_row(1, 10), point_row(2, 10)])
            .unwrap();

        let action = table(TableKind::AreaAction);
        writer.create_table(action).unwrap();
        writer
            .insert_rows(
                action,
                &[
                    vec![
                        Value::Text("Seeding".to_string()),
                        Value::Integer(100),
                        Value::Integer(1),
                    ],
                    vec![
                        Value::Text("Mulching".to_string()),
                        Value::Integer(101),
                        Value::Integer(1),
                    ],
                ],
            )
            .unwrap();

        let created = writer
            .create_relationship(&Relationship {
                origin: TableKind::Point,
                destination: TableKind::AreaAction,
                origin_key: "FeatureID",
                destination_key: "FeatureID",
            })
            .unwrap();
        assert!(created);
        assert_eq!(writer.row_count("POINT__HAS__AREAACTION").unwrap(), 2);

        let rows = query_rows(
            writer.conn(),
            "SELECT relation_name FROM gpkgext_relations WHERE mapping_table_name = 'POINT__HAS__AREAACTION'",
        )
        .unwrap();
        assert_eq!(rows[0][0].as_text(), Some("attributes"));
    }
}
