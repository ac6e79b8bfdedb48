use crate::logging::LogLevel;
use mb_mapping::{SOURCE_NAMESPACE, TARGET_NAMESPACE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Comma separated mod ids moved to the end of the load order.
pub const LOAD_LATE_ENV: &str = "MODBRIDGE_LOAD_LATE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read loader config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse loader config {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    pub game_dir: PathBuf,
    pub cache_dir: String,
    pub processed_mods_dir: String,
    pub tmp_dir: String,
    /// Mod id of the loader itself; never added to the classpath.
    pub loader_mod_id: String,
    pub mappings: MappingsConfig,
    /// Host jars or class directories used for inheritance during remap.
    pub remap_classpath: Vec<PathBuf>,
    pub log_level: LogLevel,
    pub debug: DebugConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MappingsConfig {
    pub path: Option<PathBuf>,
    pub source_namespace: String,
    pub target_namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DebugConfig {
    pub load_late: Vec<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            game_dir: PathBuf::from("."),
            cache_dir: ".fabric".to_string(),
            processed_mods_dir: "processedMods".to_string(),
            tmp_dir: "tmp".to_string(),
            loader_mod_id: "fabricloader".to_string(),
            mappings: MappingsConfig::default(),
            remap_classpath: Vec::new(),
            log_level: LogLevel::default(),
            debug: DebugConfig::default(),
        }
    }
}

impl Default for MappingsConfig {
    fn default() -> Self {
        Self {
            path: None,
            source_namespace: SOURCE_NAMESPACE.to_string(),
            target_namespace: TARGET_NAMESPACE.to_string(),
        }
    }
}

impl LoaderConfig {
    /// Reads a TOML config file and applies environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            origin: path.display().to_string(),
            source,
        })?;
        config.apply_load_late_override(std::env::var(LOAD_LATE_ENV).ok().as_deref());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            origin: "<string>".to_string(),
            source,
        })
    }

    /// Replaces `debug.load_late` with the ids in `value`, if any.
    pub fn apply_load_late_override(&mut self, value: Option<&str>) {
        if let Some(value) = value {
            self.debug.load_late = value
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        self.game_dir.join(&self.cache_dir)
    }

    pub fn processed_mods_path(&self) -> PathBuf {
        self.cache_path().join(&self.processed_mods_dir)
    }

    pub fn tmp_path(&self) -> PathBuf {
        self.cache_path().join(&self.tmp_dir)
    }

    /// Mapping file location, relative paths resolved against the game dir.
    pub fn mappings_path(&self) -> Option<PathBuf> {
        self.mappings.path.as_ref().map(|path| self.resolve(path))
    }

    pub fn remap_classpath(&self) -> Vec<PathBuf> {
        self.remap_classpath
            .iter()
            .map(|path| self.resolve(path))
            .collect()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.game_dir.join(path)
        }
    }
}
