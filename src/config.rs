use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::GeoparcelError;
use crate::workspace::WorkspaceKind;

/// On-disk config shape (`geoparcel.json`): named source environments plus
/// pallet plans.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub default_environment: Option<String>,
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentEntry>,
    #[serde(default)]
    pub pallets: Vec<PalletEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EnvironmentEntry {
    pub workspace: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PalletEntry {
    pub name: String,
    pub staging: String,
    #[serde(default)]
    pub crates: Vec<CrateEntry>,
    #[serde(default)]
    pub dissolve: Option<DissolveEntry>,
}

/// A single source→destination dataset mapping inside a pallet.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrateEntry {
    pub source_workspace: String,
    pub source_table: String,
    pub destination_workspace: String,
    #[serde(default)]
    pub destination_table: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DissolveEntry {
    pub workspace: String,
    pub table: String,
    pub field: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedEnvironment {
    pub name: String,
    pub workspace: Utf8PathBuf,
    pub prefix: String,
    pub kind: Option<WorkspaceKind>,
}

#[derive(Debug)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub default_environment: String,
    pub environments: BTreeMap<String, ResolvedEnvironment>,
    pub pallets: Vec<PalletEntry>,
}

impl ResolvedConfig {
    /// Picks a named environment, falling back to the configured default.
    pub fn environment(&self, name: Option<&str>) -> Result<&ResolvedEnvironment, GeoparcelError> {
        let name = name.unwrap_or(&self.default_environment);
        self.environments
            .get(name)
            .ok_or_else(|| GeoparcelError::UnknownEnvironment(name.to_string()))
    }

    pub fn pallet(&self, name: &str) -> Result<&PalletEntry, GeoparcelError> {
        self.pallets
            .iter()
            .find(|pallet| pallet.name == name)
            .ok_or_else(|| GeoparcelError::UnknownPallet(name.to_string()))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, GeoparcelError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("geoparcel.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Err(GeoparcelError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| GeoparcelError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| GeoparcelError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, GeoparcelError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let default_environment = config
            .default_environment
            .unwrap_or_else(|| "local".to_string());

        let environments = config
            .environments
            .into_iter()
            .map(|(name, entry)| {
                let kind = match entry.kind.as_deref() {
                    None => None,
                    Some("file") => Some(WorkspaceKind::FileGeopackage),
                    Some("enterprise") => Some(WorkspaceKind::Enterprise),
                    Some(other) => {
                        return Err(GeoparcelError::ConfigParse(format!(
                            "unknown workspace kind: {other}"
                        )));
                    }
                };
                let resolved = ResolvedEnvironment {
                    name: name.clone(),
                    workspace: Utf8PathBuf::from(entry.workspace),
                    prefix: entry.prefix.unwrap_or_default(),
                    kind,
                };
                Ok((name, resolved))
            })
            .collect::<Result<BTreeMap<_, _>, GeoparcelError>>()?;

        Ok(ResolvedConfig {
            schema_version,
            default_environment,
            environments,
            pallets: config.pallets,
        })
    }
}
