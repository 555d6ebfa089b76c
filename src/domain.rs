use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GeoparcelError;

/// A project identifier. Always an integer on the wire, but callers hand
/// these around as strings, so parsing is the only way in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(i64);

impl ProjectId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProjectId {
    type Err = GeoparcelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        trimmed
            .parse::<i64>()
            .map(Self)
            .map_err(|_| GeoparcelError::InvalidProjectId(value.to_string()))
    }
}

/// Parses a comma-separated id list (`"17,23,105"`). Rejects an empty list.
pub fn parse_project_ids(value: &str) -> Result<Vec<ProjectId>, GeoparcelError> {
    let ids = value
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(str::parse)
        .collect::<Result<Vec<ProjectId>, _>>()?;
    if ids.is_empty() {
        return Err(GeoparcelError::EmptyProjectList);
    }
    Ok(ids)
}

/// Renders ids for a `Project_ID IN (...)` predicate.
pub fn id_list(project_ids: &[ProjectId]) -> String {
    project_ids
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Point,
    Line,
    Poly,
    County,
    AreaAction,
    AreaTreatment,
    AreaHerbicide,
    Project,
}

impl TableKind {
    /// The tables the download pipeline copies, in copy order.
    /// PROJECT centroids are handled separately.
    pub const DOWNLOAD_ORDER: [TableKind; 7] = [
        TableKind::Point,
        TableKind::Line,
        TableKind::Poly,
        TableKind::County,
        TableKind::AreaAction,
        TableKind::AreaTreatment,
        TableKind::AreaHerbicide,
    ];

    pub const SPATIAL: [TableKind; 3] = [TableKind::Point, TableKind::Line, TableKind::Poly];

    pub fn name(&self) -> &'static str {
        match self {
            TableKind::Point => "POINT",
            TableKind::Line => "LINE",
            TableKind::Poly => "POLY",
            TableKind::County => "COUNTY",
            TableKind::AreaAction => "AREAACTION",
            TableKind::AreaTreatment => "AREATREATMENT",
            TableKind::AreaHerbicide => "AREAHERBICIDE",
            TableKind::Project => "PROJECT",
        }
    }

    pub fn geometry_type(&self) -> Option<GeometryType> {
        match self {
            TableKind::Point | TableKind::Project => Some(GeometryType::MultiPoint),
            TableKind::Line => Some(GeometryType::MultiLineString),
            TableKind::Poly => Some(GeometryType::MultiPolygon),
            _ => None,
        }
    }

    pub fn is_spatial(&self) -> bool {
        self.geometry_type().is_some()
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for TableKind {
    type Err = GeoparcelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "POINT" => Ok(TableKind::Point),
            "LINE" => Ok(TableKind::Line),
            "POLY" => Ok(TableKind::Poly),
            "COUNTY" => Ok(TableKind::County),
            "AREAACTION" => Ok(TableKind::AreaAction),
            "AREATREATMENT" => Ok(TableKind::AreaTreatment),
            "AREAHERBICIDE" => Ok(TableKind::AreaHerbicide),
            "PROJECT" => Ok(TableKind::Project),
            _ => Err(GeoparcelError::UnknownTable(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryType {
    MultiPoint,
    MultiLineString,
    MultiPolygon,
}

impl GeometryType {
    /// The geometry type name registered in `gpkg_geometry_columns`.
    pub fn gpkg_name(&self) -> &'static str {
        match self {
            GeometryType::MultiPoint => "MULTIPOINT",
            GeometryType::MultiLineString => "MULTILINESTRING",
            GeometryType::MultiPolygon => "MULTIPOLYGON",
        }
    }
}

/// The synthesized `"<KIND>:<FeatureID>"` key that uniquely identifies a
/// spatial record across the delivered tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeKey {
    kind: TableKind,
    feature_id: i64,
}

impl CompositeKey {
    pub fn new(kind: TableKind, feature_id: i64) -> Self {
        Self { kind, feature_id }
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn feature_id(&self) -> i64 {
        self.feature_id
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.name(), self.feature_id)
    }
}

impl FromStr for CompositeKey {
    type Err = GeoparcelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (kind, id) = value
            .split_once(':')
            .ok_or_else(|| GeoparcelError::UnknownTable(value.to_string()))?;
        let kind: TableKind = kind.parse()?;
        let feature_id = id
            .parse::<i64>()
            .map_err(|_| GeoparcelError::InvalidProjectId(id.to_string()))?;
        Ok(Self { kind, feature_id })
    }
}
