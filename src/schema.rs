use crate::domain::{GeometryType, ProjectId, TableKind, id_list};
use crate::error::GeoparcelError;

/// Geometry column name used by every feature class in the delivered package.
pub const GEOMETRY_COLUMN: &str = "Shape";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text(u16),
    Long,
    Float,
}

impl FieldType {
    pub fn sql_type(&self) -> String {
        match self {
            FieldType::Text(length) => format!("TEXT({length})"),
            FieldType::Long => "INTEGER".to_string(),
            FieldType::Float => "REAL".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    pub name: &'static str,
    pub field_type: FieldType,
    pub nullable: bool,
}

impl FieldDef {
    const fn text(name: &'static str, length: u16, nullable: bool) -> Self {
        Self {
            name,
            field_type: FieldType::Text(length),
            nullable,
        }
    }

    const fn long(name: &'static str, nullable: bool) -> Self {
        Self {
            name,
            field_type: FieldType::Long,
            nullable,
        }
    }

    const fn float(name: &'static str, nullable: bool) -> Self {
        Self {
            name,
            field_type: FieldType::Float,
            nullable,
        }
    }
}

/// Schema for one delivered table. Attribute fields only; the geometry
/// column, when present, always comes last in the column layout.
#[derive(Debug, Clone, Copy)]
pub struct TableDef {
    kind: TableKind,
    fields: &'static [FieldDef],
}

const POINT_FIELDS: &[FieldDef] = &[
    FieldDef::text("TypeDescription", 255, true),
    FieldDef::long("FeatureID", false),
    FieldDef::text("FeatureSubTypeDescription", 255, true),
    FieldDef::text("ActionDescription", 255, true),
    FieldDef::text("Description", 255, true),
    FieldDef::long("Project_ID", false),
    FieldDef::text("StatusDescription", 50, true),
    FieldDef::text("Composite_Key", 255, false),
];

const LINE_FIELDS: &[FieldDef] = POINT_FIELDS;

const POLY_FIELDS: &[FieldDef] = &[
    FieldDef::text("TypeDescription", 255, true),
    FieldDef::long("FeatureID", false),
    FieldDef::long("Project_ID", false),
    FieldDef::text("StatusDescription", 50, true),
    FieldDef::text("Retreatment", 1, true),
    FieldDef::text("Composite_Key", 255, false),
];

const COUNTY_FIELDS: &[FieldDef] = &[
    FieldDef::text("County", 255, true),
    FieldDef::long("CountyInfoID", false),
    FieldDef::long("FeatureID", false),
    FieldDef::long("County_ID", false),
    FieldDef::float("Intersection", true),
    FieldDef::text("Composite_Key", 255, false),
];

const AREAACTION_FIELDS: &[FieldDef] = &[
    FieldDef::text("ActionDescription", 255, true),
    FieldDef::long("AreaActionID", false),
    FieldDef::long("FeatureID", false),
];

const AREATREATMENT_FIELDS: &[FieldDef] = &[
    FieldDef::text("TreatmentTypeDescription", 255, true),
    FieldDef::long("AreaTreatmentID", false),
    FieldDef::long("AreaActionID", false),
];

const AREAHERBICIDE_FIELDS: &[FieldDef] = &[
    FieldDef::text("HerbicideDescription", 255, true),
    FieldDef::long("AreaHerbicideID", false),
    FieldDef::long("AreaTreatmentID", false),
    FieldDef::long("HerbicideID", true),
];

const PROJECT_FIELDS: &[FieldDef] = &[
    FieldDef::text("ProjectName", 255, true),
    FieldDef::long("Project_ID", false),
    FieldDef::text("StatusDescription", 50, true),
];

const CATALOG: &[TableDef] = &[
    TableDef {
        kind: TableKind::Point,
        fields: POINT_FIELDS,
    },
    TableDef {
        kind: TableKind::Line,
        fields: LINE_FIELDS,
    },
    TableDef {
        kind: TableKind::Poly,
        fields: POLY_FIELDS,
    },
    TableDef {
        kind: TableKind::County,
        fields: COUNTY_FIELDS,
    },
    TableDef {
        kind: TableKind::AreaAction,
        fields: AREAACTION_FIELDS,
    },
    TableDef {
        kind: TableKind::AreaTreatment,
        fields: AREATREATMENT_FIELDS,
    },
    TableDef {
        kind: TableKind::AreaHerbicide,
        fields: AREAHERBICIDE_FIELDS,
    },
    TableDef {
        kind: TableKind::Project,
        fields: PROJECT_FIELDS,
    },
];

pub fn table(kind: TableKind) -> &'static TableDef {
    let index = match kind {
        TableKind::Point => 0,
        TableKind::Line => 1,
        TableKind::Poly => 2,
        TableKind::County => 3,
        TableKind::AreaAction => 4,
        TableKind::AreaTreatment => 5,
        TableKind::AreaHerbicide => 6,
        TableKind::Project => 7,
    };
    &CATALOG[index]
}

impl TableDef {
    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn fields(&self) -> &'static [FieldDef] {
        self.fields
    }

    pub fn geometry(&self) -> Option<GeometryType> {
        self.kind.geometry_type()
    }

    /// Column layout of the delivered table, geometry last.
    pub fn column_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.fields.iter().map(|field| field.name).collect();
        if self.geometry().is_some() {
            names.push(GEOMETRY_COLUMN);
        }
        names
    }

    /// Index at which the synthesized composite key sits in the column
    /// layout. Only meaningful for spatial kinds.
    pub fn composite_key_position(&self) -> Option<usize> {
        self.fields
            .iter()
            .position(|field| field.name == "Composite_Key")
    }

    /// Source-side selection SQL for this table, filtered to the given
    /// projects. Spatial kinds synthesize the composite key in the
    /// projection; non-spatial kinds come from the embedded SQL assets.
    pub fn select_sql(
        &self,
        prefix: &str,
        project_ids: &[ProjectId],
    ) -> Result<String, GeoparcelError> {
        if project_ids.is_empty() {
            return Err(GeoparcelError::EmptyProjectList);
        }
        let ids = id_list(project_ids);

        if self.kind == TableKind::Project {
            let columns = projection(self.fields, None, true);
            return Ok(format!(
                "SELECT {columns} FROM {prefix}PROJECT WHERE Project_ID IN ({ids})"
            ));
        }

        if self.kind.is_spatial() {
            let columns = projection(self.fields, Some(self.kind), true);
            return Ok(format!(
                "SELECT {columns} FROM {prefix}{table} WHERE Project_ID IN ({ids})",
                table = self.name(),
            ));
        }

        let asset = match self.kind {
            TableKind::County => include_str!("sql/county.sql"),
            TableKind::AreaAction => include_str!("sql/areaaction.sql"),
            TableKind::AreaTreatment => include_str!("sql/areatreatment.sql"),
            TableKind::AreaHerbicide => include_str!("sql/areaherbicide.sql"),
            _ => unreachable!("spatial kinds handled above"),
        };
        Ok(asset.replace("{prefix}", prefix).replace("{ids}", &ids))
    }

    /// Plain scan over the POINT base table, composite key left out of the
    /// projection so the caller can synthesize it row by row.
    pub fn point_scan_sql(
        prefix: &str,
        project_ids: &[ProjectId],
    ) -> Result<String, GeoparcelError> {
        if project_ids.is_empty() {
            return Err(GeoparcelError::EmptyProjectList);
        }
        let def = table(TableKind::Point);
        let columns = def
            .fields
            .iter()
            .filter(|field| field.name != "Composite_Key")
            .map(|field| field.name)
            .chain(std::iter::once(GEOMETRY_COLUMN))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!(
            "SELECT {columns} FROM {prefix}POINT WHERE Project_ID IN ({ids})",
            ids = id_list(project_ids),
        ))
    }

    pub fn create_sql(&self) -> String {
        let mut columns = vec!["fid INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
        for field in self.fields {
            let not_null = if field.nullable { "" } else { " NOT NULL" };
            columns.push(format!(
                "\"{}\" {}{not_null}",
                field.name,
                field.field_type.sql_type()
            ));
        }
        if let Some(geometry) = self.geometry() {
            columns.push(format!("\"{GEOMETRY_COLUMN}\" {}", geometry.gpkg_name()));
        }
        format!(
            "CREATE TABLE \"{}\" ({})",
            self.name(),
            columns.join(", ")
        )
    }

    pub fn insert_sql(&self) -> String {
        let names = self.column_names();
        let placeholders = vec!["?"; names.len()].join(", ");
        let quoted = names
            .iter()
            .map(|name| format!("\"{name}\""))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO \"{}\" ({quoted}) VALUES ({placeholders})",
            self.name()
        )
    }
}

fn projection(
    fields: &[FieldDef],
    composite_kind: Option<TableKind>,
    with_geometry: bool,
) -> String {
    let mut columns = Vec::with_capacity(fields.len() + 1);
    for field in fields {
        if field.name == "Composite_Key" {
            if let Some(kind) = composite_kind {
                columns.push(format!(
                    "'{}:' || FeatureID AS Composite_Key",
                    kind.name()
                ));
                continue;
            }
        }
        columns.push(field.name.to_string());
    }
    if with_geometry {
        columns.push(GEOMETRY_COLUMN.to_string());
    }
    columns.join(", ")
}
