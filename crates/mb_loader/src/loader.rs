use crate::config::LoaderConfig;
use crate::provider::{AdapterFactories, ClasspathExtender, MappingProvider};
use crate::LoaderError;
use indexmap::IndexSet;
use mb_artifact::{EnvType, ModArtifact, ModMetadata, DEFAULT_ADAPTER};
use mb_entrypoint::{
    EntrypointContainer, EntrypointError, EntrypointRegistry, LanguageAdapterRegistry, SetupError,
};
use mb_mapping::SymbolMappingIndex;
use mb_remap::RemapPipeline;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// A loaded mod and where its code lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModContainer {
    metadata: ModMetadata,
    origin_path: Option<PathBuf>,
    builtin: bool,
}

impl ModContainer {
    fn from_artifact(artifact: &ModArtifact) -> Self {
        Self {
            metadata: artifact.metadata().clone(),
            origin_path: artifact.path().map(Path::to_path_buf),
            builtin: artifact.is_builtin(),
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn metadata(&self) -> &ModMetadata {
        &self.metadata
    }

    /// `None` only for builtin mods without a backing file.
    pub fn origin_path(&self) -> Option<&Path> {
        self.origin_path.as_deref()
    }

    pub fn is_builtin(&self) -> bool {
        self.builtin
    }
}

impl fmt::Display for ModContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.metadata.id, self.metadata.version)
    }
}

/// Owns the loaded mod set and, once frozen, their entrypoints.
pub struct ModLoader {
    config: LoaderConfig,
    mappings: Option<Arc<SymbolMappingIndex>>,
    classpath: Box<dyn ClasspathExtender>,
    factories: AdapterFactories,
    mods: Vec<Arc<ModContainer>>,
    mod_map: HashMap<String, Arc<ModContainer>>,
    entrypoints: Option<EntrypointRegistry>,
    frozen: bool,
}

impl ModLoader {
    pub fn new(
        config: LoaderConfig,
        mappings: Option<Arc<SymbolMappingIndex>>,
        classpath: Box<dyn ClasspathExtender>,
        factories: AdapterFactories,
    ) -> Self {
        Self {
            config,
            mappings,
            classpath,
            factories,
            mods: Vec::new(),
            mod_map: HashMap::new(),
            entrypoints: None,
            frozen: false,
        }
    }

    /// Builds the mapping index for the configured namespace pair.
    pub fn with_mapping_provider(
        config: LoaderConfig,
        provider: &dyn MappingProvider,
        classpath: Box<dyn ClasspathExtender>,
        factories: AdapterFactories,
    ) -> Result<Self, LoaderError> {
        let mappings = match provider.load()? {
            Some(mapping) => Some(Arc::new(SymbolMappingIndex::new(
                &mapping,
                &config.mappings.source_namespace,
                &config.mappings.target_namespace,
            )?)),
            None => None,
        };
        Ok(Self::new(config, mappings, classpath, factories))
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Remaps, orders and registers the resolved artifacts.
    pub fn load(&mut self, mut artifacts: Vec<ModArtifact>) -> Result<(), LoaderError> {
        if self.frozen {
            return Err(LoaderError::Frozen);
        }

        let count = artifacts.len();
        let list = artifacts
            .iter()
            .map(|artifact| format!("\t- {} {}", artifact.id(), artifact.version()))
            .collect::<Vec<_>>()
            .join("\n");
        info!("Loading {count} mod{}:\n{list}", if count == 1 { "" } else { "s" });

        let output_dir = self.config.processed_mods_path();
        RemapPipeline::new(self.mappings.clone())
            .with_classpath(self.config.remap_classpath())
            .remap(&mut artifacts, &self.config.tmp_path(), &output_dir)?;

        move_to_end(&mut artifacts, &self.config.debug.load_late);

        for mut artifact in artifacts {
            if !artifact.has_path() && !artifact.is_builtin() {
                let path = artifact
                    .copy_to_dir(&output_dir, false)
                    .map_err(|source| LoaderError::Extract {
                        mod_id: artifact.id().to_string(),
                        source,
                    })?;
                artifact.set_path(path);
            }
            self.add_mod(&artifact);
        }
        Ok(())
    }

    fn add_mod(&mut self, artifact: &ModArtifact) {
        let container = Arc::new(ModContainer::from_artifact(artifact));
        debug!(mod_id = container.id(), path = ?container.origin_path(), "adding mod");
        self.mods.push(Arc::clone(&container));
        self.mod_map
            .insert(container.id().to_string(), Arc::clone(&container));
        for provided in &container.metadata().provides {
            self.mod_map.insert(provided.clone(), Arc::clone(&container));
        }
    }

    /// Publishes mod paths and sets up adapters and entrypoints. A failed
    /// freeze still leaves the loader frozen.
    pub fn freeze(&mut self) -> Result<(), LoaderError> {
        if self.frozen {
            return Err(LoaderError::AlreadyFrozen);
        }
        self.frozen = true;

        for container in &self.mods {
            if container.is_builtin() || container.id() == self.config.loader_mod_id {
                continue;
            }
            if let Some(path) = container.origin_path() {
                self.classpath
                    .add_path(path)
                    .map_err(|source| LoaderError::Classpath {
                        path: path.to_path_buf(),
                        source,
                    })?;
            }
        }

        let adapters = self.setup_language_adapters()?;
        self.entrypoints = Some(self.setup_entrypoints(Arc::new(adapters))?);
        Ok(())
    }

    fn setup_language_adapters(&self) -> Result<LanguageAdapterRegistry, LoaderError> {
        let mut adapters = LanguageAdapterRegistry::new();
        adapters.register(DEFAULT_ADAPTER, Arc::new(self.factories.default_adapter().clone()))?;
        for (class_ref, adapter) in self.factories.legacy() {
            adapters.register_legacy(class_ref, Arc::clone(adapter))?;
        }

        for container in &self.mods {
            for (key, implementation) in &container.metadata().language_adapters {
                if adapters.contains(key) {
                    return Err(SetupError::DuplicateAdapterKey { key: key.clone() }.into());
                }
                let constructor = self.factories.constructor(implementation).ok_or_else(|| {
                    LoaderError::UnknownAdapterImplementation {
                        key: key.clone(),
                        implementation: implementation.clone(),
                    }
                })?;
                let adapter = constructor().map_err(|source| LoaderError::AdapterInstantiation {
                    key: key.clone(),
                    source,
                })?;
                debug!(mod_id = container.id(), key = %key, implementation = %implementation, "registered language adapter");
                adapters.register(key.clone(), adapter)?;
            }
        }
        Ok(adapters)
    }

    fn setup_entrypoints(&self, adapters: Arc<LanguageAdapterRegistry>) -> Result<EntrypointRegistry, LoaderError> {
        let registry = EntrypointRegistry::new(adapters);
        for container in &self.mods {
            let metadata = container.metadata();
            for value in &metadata.legacy_initializers {
                registry.add_deprecated(&metadata.id, metadata.legacy_adapter(), value);
            }
            for (key, declarations) in &metadata.entrypoints {
                for declaration in declarations {
                    registry
                        .add(&metadata.id, key, &declaration.adapter, &declaration.value)
                        .map_err(|source| LoaderError::ModSetup {
                            name: metadata.display_name().to_string(),
                            path: container
                                .origin_path()
                                .map_or_else(|| "builtin".to_string(), |path| path.display().to_string()),
                            source,
                        })?;
                }
            }
        }
        Ok(registry)
    }

    pub fn mod_container(&self, id: &str) -> Option<&Arc<ModContainer>> {
        self.mod_map.get(id)
    }

    pub fn all_mods(&self) -> &[Arc<ModContainer>] {
        &self.mods
    }

    /// True for mod ids and for ids a mod provides.
    pub fn is_mod_loaded(&self, id: &str) -> bool {
        self.mod_map.contains_key(id)
    }

    /// Every weave config active in `env`, across all mods.
    pub fn weave_configs(&self, env: EnvType) -> IndexSet<String> {
        self.mods
            .iter()
            .flat_map(|container| container.metadata().weave_configs_for(env))
            .map(str::to_string)
            .collect()
    }

    /// Empty until the loader is frozen.
    pub fn entrypoints<T: ?Sized + Send + Sync + 'static>(&self, key: &str) -> Result<Vec<Arc<T>>, EntrypointError> {
        match &self.entrypoints {
            Some(registry) => registry.entrypoints::<T>(key),
            None => Ok(Vec::new()),
        }
    }

    pub fn entrypoint_containers<T: ?Sized + Send + Sync + 'static>(&self, key: &str) -> Vec<EntrypointContainer<T>> {
        match &self.entrypoints {
            Some(registry) => registry.entrypoint_containers::<T>(key),
            None => Vec::new(),
        }
    }
}

impl fmt::Debug for ModLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModLoader")
            .field("mods", &self.mods.iter().map(|m| m.to_string()).collect::<Vec<_>>())
            .field("remap", &self.mappings.is_some())
            .field("frozen", &self.frozen)
            .finish()
    }
}

/// Moves the first artifact with each id to the end, in the order given.
fn move_to_end(artifacts: &mut Vec<ModArtifact>, ids: &[String]) {
    for id in ids {
        if let Some(position) = artifacts.iter().position(|artifact| artifact.id() == id) {
            let artifact = artifacts.remove(position);
            debug!(mod_id = %id, "loading mod late");
            artifacts.push(artifact);
        }
    }
}
