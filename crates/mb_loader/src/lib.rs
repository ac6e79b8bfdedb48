// mb_loader - host-facing loading sequence
//
// `ModLoader` remaps the resolved mods, registers them and, once frozen,
// exposes their entrypoints. Host integration plugs in through the traits
// in `provider`.

pub mod config;
mod loader;
pub mod logging;
pub mod provider;

pub use config::{ConfigError, LoaderConfig};
pub use loader::{ModContainer, ModLoader};
pub use logging::{init_logging, LogLevel};
pub use provider::{AdapterFactories, ClasspathExtender, MappingProvider, TinyFileMappingProvider};

use mb_artifact::ArtifactError;
use mb_entrypoint::SetupError;
use mb_mapping::MappingError;
use mb_remap::RemapError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("frozen - cannot load additional mods")]
    Frozen,
    #[error("loader is already frozen")]
    AlreadyFrozen,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Remap(#[from] RemapError),
    #[error("error extracting mod {mod_id}: {source}")]
    Extract {
        mod_id: String,
        #[source]
        source: ArtifactError,
    },
    #[error("failed to add {path} to the classpath: {source}")]
    Classpath {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("language adapter '{key}' refers to unknown implementation {implementation}")]
    UnknownAdapterImplementation { key: String, implementation: String },
    #[error("failed to instantiate language adapter: {key}")]
    AdapterInstantiation {
        key: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error("failed to setup mod {name} ({path})")]
    ModSetup {
        name: String,
        path: String,
        #[source]
        source: SetupError,
    },
}
