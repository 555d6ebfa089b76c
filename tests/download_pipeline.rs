use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{Connection, params};

use geoparcel::archive;
use geoparcel::domain::parse_project_ids;
use geoparcel::gpkg::{GpkgWriter, WEB_MERCATOR, query_rows};
use geoparcel::pipeline::{DownloadPipeline, PACKAGE_GPKG, PACKAGE_ZIP};
use geoparcel::wkb;
use geoparcel::workspace::SourceWorkspace;

fn point_shape() -> Vec<u8> {
    wkb::wrap_gpkg(WEB_MERCATOR, &wkb::point_wkb(-12_500_000.0, 4_900_000.0))
}

fn line_shape() -> Vec<u8> {
    wkb::wrap_gpkg(
        WEB_MERCATOR,
        &wkb::line_string_wkb(&[(0.0, 0.0), (10.0, 10.0)]),
    )
}

fn poly_shape() -> Vec<u8> {
    wkb::wrap_gpkg(
        WEB_MERCATOR,
        &wkb::polygon_wkb(&[vec![
            (0.0, 0.0),
            (5.0, 0.0),
            (5.0, 5.0),
            (0.0, 5.0),
            (0.0, 0.0),
        ]]),
    )
}

/// Builds a source workspace holding two projects: project 42 touches every
/// table, project 99 has a single point feature and nothing else.
fn build_source(dir: &std::path::Path) -> Utf8PathBuf {
    let path = Utf8PathBuf::from_path_buf(dir.join("wri.gpkg")).unwrap();
    let conn = Connection::open(path.as_std_path()).unwrap();
    conn.execute_batch(
        "CREATE TABLE PROJECT (
             ProjectName TEXT, Project_ID INTEGER, StatusDescription TEXT, Shape BLOB
         );
         CREATE TABLE POINT (
             TypeDescription TEXT, FeatureID INTEGER, FeatureSubTypeDescription TEXT,
             ActionDescription TEXT, Description TEXT, Project_ID INTEGER,
             StatusDescription TEXT, Shape BLOB
         );
         CREATE TABLE LINE (
             TypeDescription TEXT, FeatureID INTEGER, FeatureSubTypeDescription TEXT,
             ActionDescription TEXT, Description TEXT, Project_ID INTEGER,
             StatusDescription TEXT, Shape BLOB
         );
         CREATE TABLE POLY (
             TypeDescription TEXT, FeatureID INTEGER, Project_ID INTEGER,
             StatusDescription TEXT, Retreatment TEXT, Shape BLOB
         );
         CREATE TABLE COUNTY (
             County TEXT, CountyInfoID INTEGER, FeatureID INTEGER,
             County_ID INTEGER, Intersection REAL, Composite_Key TEXT
         );
         CREATE TABLE AREAACTION (
             ActionDescription TEXT, AreaActionID INTEGER, FeatureID INTEGER
         );
         CREATE TABLE AREATREATMENT (
             TreatmentTypeDescription TEXT, AreaTreatmentID INTEGER, AreaActionID INTEGER
         );
         CREATE TABLE AREAHERBICIDE (
             HerbicideDescription TEXT, AreaHerbicideID INTEGER,
             AreaTreatmentID INTEGER, HerbicideID INTEGER
         );",
    )
    .unwrap();

    conn.execute(
        "INSERT INTO PROJECT VALUES ('Sage Steppe Restoration', 42, 'Current', ?1)",
        params![point_shape()],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO PROJECT VALUES ('Creek Fence', 99, 'Complete', ?1)",
        params![point_shape()],
    )
    .unwrap();

    conn.execute(
        "INSERT INTO POINT VALUES ('Guzzler', 7, NULL, 'Construction', 'water', 42, 'Current', ?1)",
        params![point_shape()],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO POINT VALUES ('Trough', 8, NULL, 'Construction', NULL, 99, 'Complete', ?1)",
        params![point_shape()],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO LINE VALUES ('Pipeline', 9, NULL, 'Construction', NULL, 42, 'Current', ?1)",
        params![line_shape()],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO POLY VALUES ('Terrestrial Treatment Area', 11, 42, 'Current', 'N', ?1)",
        params![poly_shape()],
    )
    .unwrap();

    conn.execute_batch(
        "INSERT INTO COUNTY VALUES ('Juab', 1, 7, 23, 1.0, 'POINT:7');
         INSERT INTO COUNTY VALUES ('Juab', 2, 11, 23, 0.75, 'POLY:11');
         INSERT INTO AREAACTION VALUES ('Vegetation removal', 100, 11);
         INSERT INTO AREATREATMENT VALUES ('Chemical', 200, 100);
         INSERT INTO AREAHERBICIDE VALUES ('Glyphosate', 300, 200, 5);",
    )
    .unwrap();
    path
}

fn run_pipeline(
    dir: &std::path::Path,
    projects: &str,
) -> geoparcel::pipeline::DownloadResult {
    let source = build_source(dir);
    let workspace = SourceWorkspace::open(&source, "").unwrap();
    let scratch = Utf8PathBuf::from_path_buf(dir.join("scratch")).unwrap();
    let mut pipeline = DownloadPipeline::new(workspace, scratch);
    let ids = parse_project_ids(projects).unwrap();
    pipeline.execute(&ids).unwrap()
}

#[test]
fn full_project_package() {
    let dir = tempfile::tempdir().unwrap();
    let result = run_pipeline(dir.path(), "42");

    assert!(result.zip_path.ends_with(PACKAGE_ZIP));
    assert_eq!(result.table_counts["PROJECT"], 1);
    assert_eq!(result.table_counts["POINT"], 1);
    assert_eq!(result.table_counts["LINE"], 1);
    assert_eq!(result.table_counts["POLY"], 1);
    assert_eq!(result.table_counts["COUNTY"], 2);
    assert_eq!(result.table_counts["AREAACTION"], 1);
    assert_eq!(result.table_counts["AREATREATMENT"], 1);
    assert_eq!(result.table_counts["AREAHERBICIDE"], 1);

    // every relationship has populated endpoints, so all eleven exist
    assert_eq!(result.relationships.len(), 11);

    let package = GpkgWriter::open(Utf8Path::new(&result.package_path)).unwrap();
    let points = query_rows(
        package.conn(),
        "SELECT Composite_Key, Project_ID FROM POINT",
    )
    .unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0][0].as_text(), Some("POINT:7"));
    assert_eq!(points[0][1].as_integer(), Some(42));

    let polys = query_rows(package.conn(), "SELECT Composite_Key FROM POLY").unwrap();
    assert_eq!(polys[0][0].as_text(), Some("POLY:11"));

    assert_eq!(package.row_count("POLY__HAS__AREAACTION").unwrap(), 1);
    assert_eq!(package.row_count("POINT__HAS__COUNTY").unwrap(), 1);
    assert_eq!(package.row_count("PROJECT__HAS__POINT").unwrap(), 1);
    assert_eq!(
        package
            .row_count("AREATREATMENT__HAS__AREAHERBICIDE")
            .unwrap(),
        1
    );
}

#[test]
fn sparse_project_skips_empty_tables_and_relationships() {
    let dir = tempfile::tempdir().unwrap();
    let result = run_pipeline(dir.path(), "99");

    assert_eq!(result.table_counts["PROJECT"], 1);
    assert_eq!(result.table_counts["POINT"], 1);
    assert!(!result.table_counts.contains_key("LINE"));
    assert!(!result.table_counts.contains_key("POLY"));
    assert!(!result.table_counts.contains_key("COUNTY"));
    assert!(!result.table_counts.contains_key("AREAACTION"));

    assert_eq!(result.relationships, vec!["PROJECT__HAS__POINT".to_string()]);

    let package = GpkgWriter::open(Utf8Path::new(&result.package_path)).unwrap();
    assert!(!package.has_table("LINE").unwrap());
    assert!(!package.has_table("POINT__HAS__COUNTY").unwrap());
}

#[test]
fn multiple_projects_in_one_package() {
    let dir = tempfile::tempdir().unwrap();
    let result = run_pipeline(dir.path(), "42,99");

    assert_eq!(result.table_counts["PROJECT"], 2);
    assert_eq!(result.table_counts["POINT"], 2);
    assert_eq!(result.table_counts["LINE"], 1);

    let package = GpkgWriter::open(Utf8Path::new(&result.package_path)).unwrap();
    assert_eq!(package.row_count("PROJECT__HAS__POINT").unwrap(), 2);
}

#[test]
fn archive_contains_package_and_excludes_sidecars() {
    let dir = tempfile::tempdir().unwrap();
    let result = run_pipeline(dir.path(), "42");

    let zip_path = std::path::Path::new(&result.zip_path);
    archive::validate_zip(zip_path).unwrap();
    let entries = archive::list_entries(zip_path).unwrap();
    assert!(entries.contains(&PACKAGE_GPKG.to_string()));
    assert!(!entries.iter().any(|name| name.ends_with(".zip")));
    assert!(!entries.iter().any(|name| name.ends_with("-wal")));

    // the delivered package survives extraction intact
    let extract_dir = dir.path().join("delivered");
    archive::extract_zip(zip_path, &extract_dir).unwrap();
    let delivered =
        Utf8PathBuf::from_path_buf(extract_dir.join(PACKAGE_GPKG)).unwrap();
    let package = GpkgWriter::open(&delivered).unwrap();
    assert_eq!(package.row_count("POINT").unwrap(), 1);
    let srs = query_rows(
        package.conn(),
        "SELECT srs_id FROM gpkg_contents WHERE table_name = 'POINT'",
    )
    .unwrap();
    assert_eq!(srs[0][0].as_integer(), Some(WEB_MERCATOR as i64));
}

#[test]
fn rerun_clears_stale_scratch() {
    let dir = tempfile::tempdir().unwrap();
    let source = build_source(dir.path());
    let scratch = Utf8PathBuf::from_path_buf(dir.path().join("scratch")).unwrap();
    let ids = parse_project_ids("42").unwrap();

    let workspace = SourceWorkspace::open(&source, "").unwrap();
    let mut pipeline = DownloadPipeline::new(workspace, scratch.clone());
    pipeline.execute(&ids).unwrap();

    // stale artifacts from the first run must not break the second
    std::fs::write(scratch.join("leftover.lock").as_std_path(), b"x").unwrap();
    let workspace = SourceWorkspace::open(&source, "").unwrap();
    let mut pipeline = DownloadPipeline::new(workspace, scratch);
    let result = pipeline.execute(&ids).unwrap();
    assert_eq!(result.table_counts["POINT"], 1);
}

#[test]
fn unknown_project_yields_centroid_free_package() {
    let dir = tempfile::tempdir().unwrap();
    let result = run_pipeline(dir.path(), "777");

    assert_eq!(result.table_counts["PROJECT"], 0);
    assert!(result.relationships.is_empty());

    let package = GpkgWriter::open(Utf8Path::new(&result.package_path)).unwrap();
    assert!(package.has_table("PROJECT").unwrap());
    assert_eq!(package.row_count("PROJECT").unwrap(), 0);
}
