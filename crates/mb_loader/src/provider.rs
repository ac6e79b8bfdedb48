//! Seams the host integration fills in: where mappings come from, how mod
//! paths reach the running classpath, and which adapter implementations
//! exist.

use mb_entrypoint::{DefaultLanguageAdapter, LanguageAdapter, LegacyLanguageAdapter};
use mb_mapping::{tiny, MappingError, SymbolMapping};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub trait MappingProvider {
    /// `Ok(None)` when no mapping table is available, which disables remap.
    fn load(&self) -> Result<Option<SymbolMapping>, MappingError>;
}

/// Reads a Tiny v1/v2 file if it exists.
#[derive(Debug, Clone)]
pub struct TinyFileMappingProvider {
    path: Option<PathBuf>,
}

impl TinyFileMappingProvider {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl MappingProvider for TinyFileMappingProvider {
    fn load(&self) -> Result<Option<SymbolMapping>, MappingError> {
        let Some(path) = self.path.as_deref() else {
            info!("no mapping file configured, mods will not be remapped");
            return Ok(None);
        };
        if !path.exists() {
            info!(path = %path.display(), "mapping file not found, mods will not be remapped");
            return Ok(None);
        }
        let mapping = tiny::read_file(path)?;
        info!(path = %path.display(), classes = mapping.classes().len(), "loaded mappings");
        Ok(Some(mapping))
    }
}

/// Makes mod paths loadable by the running host.
pub trait ClasspathExtender {
    fn add_path(&self, path: &Path) -> anyhow::Result<()>;
}

pub type AdapterConstructor = Arc<dyn Fn() -> anyhow::Result<Arc<dyn LanguageAdapter>> + Send + Sync>;

/// Adapter implementations the host can instantiate, keyed by the
/// implementation reference mods declare.
#[derive(Clone, Default)]
pub struct AdapterFactories {
    default: DefaultLanguageAdapter,
    constructors: HashMap<String, AdapterConstructor>,
    legacy: Vec<(String, Arc<dyn LegacyLanguageAdapter>)>,
}

impl AdapterFactories {
    pub fn new(default: DefaultLanguageAdapter) -> Self {
        Self {
            default,
            ..Self::default()
        }
    }

    pub fn with_constructor<F>(mut self, implementation: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> anyhow::Result<Arc<dyn LanguageAdapter>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(implementation.into(), Arc::new(constructor));
        self
    }

    pub fn with_legacy(mut self, class_ref: impl Into<String>, adapter: Arc<dyn LegacyLanguageAdapter>) -> Self {
        self.legacy.push((class_ref.into(), adapter));
        self
    }

    pub fn default_adapter(&self) -> &DefaultLanguageAdapter {
        &self.default
    }

    pub fn constructor(&self, implementation: &str) -> Option<&AdapterConstructor> {
        self.constructors.get(implementation)
    }

    pub fn legacy(&self) -> impl Iterator<Item = (&str, &Arc<dyn LegacyLanguageAdapter>)> {
        self.legacy
            .iter()
            .map(|(class_ref, adapter)| (class_ref.as_str(), adapter))
    }
}

impl fmt::Debug for AdapterFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut constructors: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        constructors.sort_unstable();
        f.debug_struct("AdapterFactories")
            .field("default", &self.default)
            .field("constructors", &constructors)
            .field("legacy", &self.legacy.iter().map(|(key, _)| key).collect::<Vec<_>>())
            .finish()
    }
}
