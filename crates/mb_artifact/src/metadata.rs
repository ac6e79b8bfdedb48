use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Adapter class reference used by mods that declare old-style initializers
/// without naming an adapter.
pub const DEFAULT_LEGACY_ADAPTER: &str = "net.fabricmc.loader.language.JavaLanguageAdapter";
pub const DEFAULT_ADAPTER: &str = "default";

/// Runtime environment a declaration applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvType {
    Client,
    Server,
}

impl EnvType {
    pub const ALL: [EnvType; 2] = [EnvType::Client, EnvType::Server];

    pub const fn as_str(self) -> &'static str {
        match self {
            EnvType::Client => "client",
            EnvType::Server => "server",
        }
    }
}

impl fmt::Display for EnvType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrypointDeclaration {
    #[serde(default = "default_adapter")]
    pub adapter: String,
    pub value: String,
}

impl EntrypointDeclaration {
    pub fn new(adapter: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            adapter: adapter.into(),
            value: value.into(),
        }
    }
}

/// A mixin-style weave configuration path inside the artifact.
///
/// `environment: None` applies to every environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaveConfig {
    pub config: String,
    #[serde(default)]
    pub environment: Option<EnvType>,
}

impl WeaveConfig {
    pub fn applies_to(&self, env: EnvType) -> bool {
        self.environment.map_or(true, |declared| declared == env)
    }
}

/// Metadata of one mod as produced by the metadata parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModMetadata {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub version: String,
    #[serde(default)]
    pub provides: Vec<String>,
    #[serde(default)]
    pub entrypoints: IndexMap<String, Vec<EntrypointDeclaration>>,
    #[serde(default)]
    pub legacy_initializers: Vec<String>,
    #[serde(default)]
    pub legacy_adapter: Option<String>,
    #[serde(default)]
    pub weave_configs: Vec<WeaveConfig>,
    #[serde(default)]
    pub access_widener: Option<String>,
    #[serde(default)]
    pub language_adapters: IndexMap<String, String>,
}

impl ModMetadata {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            version: version.into(),
            provides: Vec::new(),
            entrypoints: IndexMap::new(),
            legacy_initializers: Vec::new(),
            legacy_adapter: None,
            weave_configs: Vec::new(),
            access_widener: None,
            language_adapters: IndexMap::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn with_entrypoint(
        mut self,
        key: impl Into<String>,
        adapter: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.entrypoints
            .entry(key.into())
            .or_default()
            .push(EntrypointDeclaration::new(adapter, value));
        self
    }

    pub fn with_legacy_initializer(mut self, value: impl Into<String>) -> Self {
        self.legacy_initializers.push(value.into());
        self
    }

    pub fn with_weave_config(mut self, config: impl Into<String>, environment: Option<EnvType>) -> Self {
        self.weave_configs.push(WeaveConfig {
            config: config.into(),
            environment,
        });
        self
    }

    pub fn with_access_widener(mut self, path: impl Into<String>) -> Self {
        self.access_widener = Some(path.into());
        self
    }

    pub fn with_language_adapter(mut self, key: impl Into<String>, implementation: impl Into<String>) -> Self {
        self.language_adapters.insert(key.into(), implementation.into());
        self
    }

    pub fn legacy_adapter(&self) -> &str {
        self.legacy_adapter.as_deref().unwrap_or(DEFAULT_LEGACY_ADAPTER)
    }

    /// Weave config paths active in `env`, in declaration order.
    pub fn weave_configs_for(&self, env: EnvType) -> impl Iterator<Item = &str> + '_ {
        self.weave_configs
            .iter()
            .filter(move |config| config.applies_to(env))
            .map(|config| config.config.as_str())
            .filter(|config| !config.is_empty())
    }
}

fn default_adapter() -> String {
    DEFAULT_ADAPTER.to_string()
}
