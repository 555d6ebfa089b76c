use assert_matches::assert_matches;

use geoparcel::config::ConfigLoader;
use geoparcel::error::GeoparcelError;
use geoparcel::workspace::WorkspaceKind;

#[test]
fn resolve_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("geoparcel.json");
    std::fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "default_environment": "local",
            "environments": {
                "local": { "workspace": "data/dev.gpkg", "prefix": "main." },
                "prod": { "workspace": "data/wri.db", "prefix": "WRI.dbo.", "kind": "enterprise" }
            },
            "pallets": [
                {
                    "name": "reference",
                    "staging": "staging",
                    "crates": [
                        {
                            "source_workspace": "garage/udwr.gpkg",
                            "source_table": "NRCS_precip1981_2010_a_ut",
                            "destination_workspace": "staging/udwr.gpkg"
                        }
                    ],
                    "dissolve": {
                        "workspace": "staging/udwr.gpkg",
                        "table": "NRCS_precip1981_2010_a_ut",
                        "field": "Inches"
                    }
                }
            ]
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap();
    assert_eq!(resolved.default_environment, "local");
    assert_eq!(
        resolved.environment(Some("prod")).unwrap().kind,
        Some(WorkspaceKind::Enterprise)
    );

    let pallet = resolved.pallet("reference").unwrap();
    assert_eq!(pallet.crates.len(), 1);
    assert_eq!(pallet.dissolve.as_ref().unwrap().field, "Inches");
}

#[test]
fn explicit_path_read_failure() {
    let err = ConfigLoader::resolve(Some("/nonexistent/geoparcel.json")).unwrap_err();
    assert_matches!(err, GeoparcelError::ConfigRead(_));
}

#[test]
fn malformed_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("geoparcel.json");
    std::fs::write(&path, "{ not json").unwrap();
    let err = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap_err();
    assert_matches!(err, GeoparcelError::ConfigParse(_));
}
