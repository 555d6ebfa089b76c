//! The download pipeline: build scratch space, copy project centroids, query
//! each table's rows, write them into a fresh GeoPackage, wire up
//! relationship classes, zip. Straight-line orchestration; the first storage
//! error propagates unmodified and callers re-run the whole pipeline.

use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::Serialize;
use tracing::info;

use crate::archive;
use crate::domain::{ProjectId, TableKind};
use crate::error::GeoparcelError;
use crate::gpkg::{GpkgWriter, Relationship};
use crate::schema::table;
use crate::workspace::SourceWorkspace;

pub const PACKAGE_GPKG: &str = "SpatialData.gpkg";
pub const PACKAGE_ZIP: &str = "SpatialData.zip";

/// The fixed pairwise relationship classes of the delivered package:
/// action→treatment, treatment→herbicide, each spatial kind→action, each
/// spatial kind→county, project→each spatial kind.
pub fn relationship_catalog() -> Vec<Relationship> {
    let mut relationships = vec![
        Relationship {
            origin: TableKind::AreaAction,
            destination: TableKind::AreaTreatment,
            origin_key: "AreaActionID",
            destination_key: "AreaActionID",
        },
        Relationship {
            origin: TableKind::AreaTreatment,
            destination: TableKind::AreaHerbicide,
            origin_key: "AreaTreatmentID",
            destination_key: "AreaTreatmentID",
        },
    ];
    for origin in TableKind::SPATIAL {
        relationships.push(Relationship {
            origin,
            destination: TableKind::AreaAction,
            origin_key: "FeatureID",
            destination_key: "FeatureID",
        });
    }
    for origin in TableKind::SPATIAL {
        relationships.push(Relationship {
            origin,
            destination: TableKind::County,
            origin_key: "Composite_Key",
            destination_key: "Composite_Key",
        });
    }
    for destination in TableKind::SPATIAL {
        relationships.push(Relationship {
            origin: TableKind::Project,
            destination,
            origin_key: "Project_ID",
            destination_key: "Project_ID",
        });
    }
    relationships
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub zip_path: String,
    pub package_path: String,
    pub table_counts: BTreeMap<String, usize>,
    pub relationships: Vec<String>,
}

pub struct DownloadPipeline {
    workspace: SourceWorkspace,
    scratch: Utf8PathBuf,
}

impl DownloadPipeline {
    pub fn new(workspace: SourceWorkspace, scratch: Utf8PathBuf) -> Self {
        Self { workspace, scratch }
    }

    /// Default scratch location under the user's cache directory.
    pub fn default_scratch_dir() -> Result<Utf8PathBuf, GeoparcelError> {
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.home_dir().join(".cache").join("geoparcel").join("scratch"),
                )
                .ok()
            })
            .ok_or_else(|| {
                GeoparcelError::Filesystem("unable to resolve scratch directory".to_string())
            })
    }

    pub fn execute(&mut self, project_ids: &[ProjectId]) -> Result<DownloadResult, GeoparcelError> {
        if project_ids.is_empty() {
            return Err(GeoparcelError::EmptyProjectList);
        }
        info!(
            "executing version {} against {}",
            env!("CARGO_PKG_VERSION"),
            self.workspace.path(),
        );

        delete_scratch_data(&self.scratch)?;
        create_scratch_folder(&self.scratch)?;

        let package_path = self.scratch.join(PACKAGE_GPKG);
        let mut writer = GpkgWriter::create(&package_path)?;

        let mut table_counts = BTreeMap::new();
        self.copy_project_centroids(&mut writer, project_ids, &mut table_counts)?;
        self.export_tables(&mut writer, project_ids, &mut table_counts)?;

        let mut relationships = Vec::new();
        for relationship in relationship_catalog() {
            if writer.create_relationship(&relationship)? {
                relationships.push(relationship.name());
            }
        }

        // close the package before archiving so no journal sidecars remain
        drop(writer);

        let zip_path = self.scratch.join(PACKAGE_ZIP);
        info!("-Zipping the result to {zip_path}");
        archive::zip_directory(self.scratch.as_std_path(), zip_path.as_std_path())?;

        Ok(DownloadResult {
            zip_path: zip_path.to_string(),
            package_path: package_path.to_string(),
            table_counts,
            relationships,
        })
    }

    /// PROJECT is copied unconditionally so the package always carries one
    /// centroid record per requested project.
    fn copy_project_centroids(
        &self,
        writer: &mut GpkgWriter,
        project_ids: &[ProjectId],
        table_counts: &mut BTreeMap<String, usize>,
    ) -> Result<(), GeoparcelError> {
        info!("--copy_project_centroids::");
        let rows = self.workspace.fetch_project_centroids(project_ids)?;
        let def = table(TableKind::Project);
        writer.create_table(def)?;
        let count = writer.insert_rows(def, &rows)?;
        table_counts.insert(def.name().to_string(), count);
        Ok(())
    }

    /// Destination tables are only created for kinds that produced rows;
    /// relationship guards rely on that.
    fn export_tables(
        &self,
        writer: &mut GpkgWriter,
        project_ids: &[ProjectId],
        table_counts: &mut BTreeMap<String, usize>,
    ) -> Result<(), GeoparcelError> {
        for kind in TableKind::DOWNLOAD_ORDER {
            let rows = self.workspace.fetch_table_rows(kind, project_ids)?;
            if rows.is_empty() {
                info!("-- no rows for {kind}, skipping");
                continue;
            }
            let def = table(kind);
            writer.create_table(def)?;
            let count = writer.insert_rows(def, &rows)?;
            table_counts.insert(def.name().to_string(), count);
        }
        Ok(())
    }
}

fn create_scratch_folder(directory: &Utf8Path) -> Result<(), GeoparcelError> {
    info!("--create_scratch_folder::{directory}");
    fs::create_dir_all(directory.as_std_path())
        .map_err(|err| GeoparcelError::Filesystem(err.to_string()))
}

/// Removes stale scratch artifacts, tolerating a missing directory. Lock
/// sidecars are removed before the databases they belong to.
fn delete_scratch_data(directory: &Utf8Path) -> Result<(), GeoparcelError> {
    info!("--delete_scratch_data::{directory}");
    if !directory.as_std_path().exists() {
        return Ok(());
    }

    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for entry in fs::read_dir(directory.as_std_path())
        .map_err(|err| GeoparcelError::Filesystem(err.to_string()))?
    {
        let entry = entry.map_err(|err| GeoparcelError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        } else {
            files.push(path);
        }
    }

    files.sort_by_key(|path| {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_lowercase();
        let is_sidecar =
            name.ends_with("-wal") || name.ends_with("-shm") || name.ends_with("-journal");
        // sidecars first
        !is_sidecar
    });

    for path in files {
        fs::remove_file(&path).map_err(|err| GeoparcelError::Filesystem(err.to_string()))?;
    }
    for path in dirs {
        fs::remove_dir_all(&path).map_err(|err| GeoparcelError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relationship_catalog_is_complete() {
        let names: Vec<String> = relationship_catalog()
            .iter()
            .map(Relationship::name)
            .collect();
        assert_eq!(names.len(), 11);
        assert!(names.contains(&"AREAACTION__HAS__AREATREATMENT".to_string()));
        assert!(names.contains(&"AREATREATMENT__HAS__AREAHERBICIDE".to_string()));
        for spatial in ["POINT", "LINE", "POLY"] {
            assert!(names.contains(&format!("{spatial}__HAS__AREAACTION")));
            assert!(names.contains(&format!("{spatial}__HAS__COUNTY")));
            assert!(names.contains(&format!("PROJECT__HAS__{spatial}")));
        }
    }

    #[test]
    fn scratch_cleanup_tolerates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Utf8PathBuf::from_path_buf(dir.path().join("nope")).unwrap();
        delete_scratch_data(&missing).unwrap();
    }

    #[test]
    fn scratch_cleanup_removes_stale_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = Utf8PathBuf::from_path_buf(dir.path().join("scratch")).unwrap();
        fs::create_dir_all(scratch.join("old.gdb").as_std_path()).unwrap();
        fs::write(scratch.join("stale.gpkg").as_std_path(), b"db").unwrap();
        fs::write(scratch.join("stale.gpkg-wal").as_std_path(), b"lock").unwrap();
        fs::write(scratch.join("old.zip").as_std_path(), b"zip").unwrap();

        delete_scratch_data(&scratch).unwrap();
        assert_eq!(
            fs::read_dir(scratch.as_std_path()).unwrap().count(),
            0,
            "scratch should be empty"
        );
    }
}
