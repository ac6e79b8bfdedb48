//! Entrypoint declarations and the language adapters that turn them into
//! typed instances.

mod adapter;
mod registry;

pub use adapter::{
    downcast, erase, Capability, DefaultLanguageAdapter, EntrypointObject, LanguageAdapter,
    LanguageAdapterRegistry, LegacyLanguageAdapter, UntypedInstance,
};
pub use registry::{EntrypointContainer, EntrypointRegistry, LEGACY_KEYS};

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("could not find adapter '{adapter}' for mod {mod_id}")]
    AdapterNotFound { adapter: String, mod_id: String },
    #[error("duplicate language adapter key '{key}'")]
    DuplicateAdapterKey { key: String },
}

/// Construction failure for one hook key. Failures of later declarations under
/// the same key are kept in [`suppressed`](Self::suppressed).
#[derive(Debug, Error)]
#[error("exception while loading entries for entrypoint '{key}' provided by '{mod_id}'")]
pub struct EntrypointError {
    key: String,
    mod_id: String,
    #[source]
    cause: BoxError,
    suppressed: Vec<EntrypointError>,
}

impl EntrypointError {
    pub fn new(key: &str, mod_id: &str, cause: impl Into<BoxError>) -> Self {
        Self {
            key: key.to_string(),
            mod_id: mod_id.to_string(),
            cause: cause.into(),
            suppressed: Vec::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn mod_id(&self) -> &str {
        &self.mod_id
    }

    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.cause.as_ref()
    }

    pub fn suppressed(&self) -> &[EntrypointError] {
        &self.suppressed
    }

    pub(crate) fn suppress(&mut self, other: EntrypointError) {
        self.suppressed.push(other);
    }
}

#[cfg(test)]
mod tests;
