use crate::adapter::{downcast, Capability, EntrypointObject, LanguageAdapter, LanguageAdapterRegistry, UntypedInstance};
use crate::{EntrypointError, SetupError};
use parking_lot::{ReentrantMutex, RwLock};
use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Hook keys a legacy declaration is registered under.
pub const LEGACY_KEYS: [&str; 3] = ["main", "client", "server"];

/// Entrypoint declarations grouped by hook key, constructed on demand.
pub struct EntrypointRegistry {
    adapters: Arc<LanguageAdapterRegistry>,
    entries: RwLock<HashMap<String, Vec<Entry>>>,
}

#[derive(Clone)]
enum Entry {
    Keyed(Arc<KeyedEntry>),
    Legacy(Arc<LegacyEntry>),
}

struct KeyedEntry {
    mod_id: String,
    adapter: Arc<dyn LanguageAdapter>,
    value: String,
    // Reentrant so an adapter may look up its own declaration while
    // constructing it.
    cache: ReentrantMutex<RefCell<HashMap<TypeId, EntrypointObject>>>,
}

struct LegacyEntry {
    mod_id: String,
    adapter_ref: String,
    value: String,
    adapters: Arc<LanguageAdapterRegistry>,
    instance: ReentrantMutex<RefCell<Option<Arc<UntypedInstance>>>>,
}

impl KeyedEntry {
    fn get<T: ?Sized + Send + Sync + 'static>(&self) -> anyhow::Result<Arc<T>> {
        let capability = Capability::of::<T>();
        let guard = self.cache.lock();

        let cached = guard.borrow().get(&capability.type_id()).cloned();
        if let Some(object) = cached {
            return self.typed(&object, &capability);
        }

        debug!(mod_id = %self.mod_id, value = %self.value, capability = capability.name(), "constructing entrypoint");
        let created = self.adapter.create(&self.mod_id, &self.value, &capability)?;
        self.typed::<T>(&created, &capability)?;

        // A reentrant lookup may have stored an instance in the meantime.
        let winner = guard
            .borrow_mut()
            .entry(capability.type_id())
            .or_insert(created)
            .clone();
        self.typed(&winner, &capability)
    }

    fn typed<T: ?Sized + Send + Sync + 'static>(
        &self,
        object: &EntrypointObject,
        capability: &Capability,
    ) -> anyhow::Result<Arc<T>> {
        downcast::<T>(object).ok_or_else(|| {
            anyhow::anyhow!(
                "adapter returned no usable {} instance for {}",
                capability.name(),
                self.value
            )
        })
    }
}

impl LegacyEntry {
    /// `Ok(None)` when the instance exists but does not offer `T`.
    fn get<T: ?Sized + Send + Sync + 'static>(&self) -> anyhow::Result<Option<Arc<T>>> {
        let guard = self.instance.lock();

        let cached = guard.borrow().clone();
        let instance = match cached {
            Some(instance) => instance,
            None => {
                let adapter = self.adapters.legacy(&self.adapter_ref).ok_or_else(|| {
                    anyhow::anyhow!("unknown language adapter {}", self.adapter_ref)
                })?;
                debug!(mod_id = %self.mod_id, value = %self.value, adapter = %self.adapter_ref, "constructing legacy entrypoint");
                let created = Arc::new(adapter.create_instance(&self.value)?);
                let mut slot = guard.borrow_mut();
                Arc::clone(slot.get_or_insert(created))
            }
        };
        Ok(instance.view::<T>())
    }
}

impl EntrypointRegistry {
    pub fn new(adapters: Arc<LanguageAdapterRegistry>) -> Self {
        Self {
            adapters,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn adapters(&self) -> &LanguageAdapterRegistry {
        &self.adapters
    }

    /// Registers a keyed declaration. The adapter must already be known.
    pub fn add(&self, mod_id: &str, key: &str, adapter: &str, value: &str) -> Result<(), SetupError> {
        let resolved = self
            .adapters
            .get(adapter)
            .ok_or_else(|| SetupError::AdapterNotFound {
                adapter: adapter.to_string(),
                mod_id: mod_id.to_string(),
            })?;

        debug!(mod_id, key, adapter, value, "registering entrypoint");
        let entry = Entry::Keyed(Arc::new(KeyedEntry {
            mod_id: mod_id.to_string(),
            adapter: resolved,
            value: value.to_string(),
            cache: ReentrantMutex::new(RefCell::new(HashMap::new())),
        }));
        self.entries
            .write()
            .entry(key.to_string())
            .or_default()
            .push(entry);
        Ok(())
    }

    /// Registers one legacy declaration under every key in [`LEGACY_KEYS`].
    /// The adapter is looked up when the entrypoint is first requested.
    pub fn add_deprecated(&self, mod_id: &str, adapter_ref: &str, value: &str) {
        debug!(mod_id, adapter = adapter_ref, value, "registering legacy entrypoint");
        let entry = Entry::Legacy(Arc::new(LegacyEntry {
            mod_id: mod_id.to_string(),
            adapter_ref: adapter_ref.to_string(),
            value: value.to_string(),
            adapters: Arc::clone(&self.adapters),
            instance: ReentrantMutex::new(RefCell::new(None)),
        }));

        let mut entries = self.entries.write();
        for key in LEGACY_KEYS {
            entries.entry(key.to_string()).or_default().push(entry.clone());
        }
    }

    pub fn has_entrypoints(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    fn snapshot(&self, key: &str) -> Vec<Entry> {
        self.entries.read().get(key).cloned().unwrap_or_default()
    }

    /// Constructs every entrypoint under `key` as `T`, in declaration order.
    ///
    /// Legacy declarations that fail or do not offer `T` are left out. Any
    /// keyed failure fails the whole call; the error names the first failing
    /// mod and carries the rest as suppressed causes.
    pub fn entrypoints<T: ?Sized + Send + Sync + 'static>(&self, key: &str) -> Result<Vec<Arc<T>>, EntrypointError> {
        let entries = self.snapshot(key);
        let mut instances = Vec::with_capacity(entries.len());
        let mut failure: Option<EntrypointError> = None;

        for entry in &entries {
            match entry {
                Entry::Legacy(legacy) => {
                    if let Some(instance) = probe_legacy::<T>(key, legacy) {
                        instances.push(instance);
                    }
                }
                Entry::Keyed(keyed) => match keyed.get::<T>() {
                    Ok(instance) => instances.push(instance),
                    Err(cause) => {
                        let error = EntrypointError::new(key, &keyed.mod_id, cause);
                        match failure.as_mut() {
                            Some(first) => first.suppress(error),
                            None => failure = Some(error),
                        }
                    }
                },
            }
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(instances),
        }
    }

    /// Like [`entrypoints`](Self::entrypoints), but keyed declarations are
    /// only constructed when their container is asked for the instance.
    pub fn entrypoint_containers<T: ?Sized + Send + Sync + 'static>(&self, key: &str) -> Vec<EntrypointContainer<T>> {
        let entries = self.snapshot(key);
        let mut containers = Vec::with_capacity(entries.len());

        for entry in &entries {
            match entry {
                Entry::Legacy(legacy) => {
                    if let Some(instance) = probe_legacy::<T>(key, legacy) {
                        containers.push(EntrypointContainer {
                            key: key.to_string(),
                            mod_id: legacy.mod_id.clone(),
                            source: ContainerSource::Ready(instance),
                        });
                    }
                }
                Entry::Keyed(keyed) => containers.push(EntrypointContainer {
                    key: key.to_string(),
                    mod_id: keyed.mod_id.clone(),
                    source: ContainerSource::Deferred(Arc::clone(keyed)),
                }),
            }
        }

        containers
    }
}

fn probe_legacy<T: ?Sized + Send + Sync + 'static>(key: &str, legacy: &LegacyEntry) -> Option<Arc<T>> {
    match legacy.get::<T>() {
        Ok(Some(instance)) => Some(instance),
        Ok(None) => {
            debug!(key, mod_id = %legacy.mod_id, value = %legacy.value, "legacy entrypoint does not provide requested type");
            None
        }
        Err(error) => {
            warn!(key, mod_id = %legacy.mod_id, value = %legacy.value, error = %error, "skipping legacy entrypoint");
            None
        }
    }
}

impl fmt::Debug for EntrypointRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.read();
        let mut keys: Vec<(&str, usize)> = entries
            .iter()
            .map(|(key, entries)| (key.as_str(), entries.len()))
            .collect();
        keys.sort_unstable();
        f.debug_struct("EntrypointRegistry")
            .field("adapters", &self.adapters)
            .field("entries", &keys)
            .finish()
    }
}

/// An entrypoint tagged with the mod that declared it.
pub struct EntrypointContainer<T: ?Sized> {
    key: String,
    mod_id: String,
    source: ContainerSource<T>,
}

enum ContainerSource<T: ?Sized> {
    Ready(Arc<T>),
    Deferred(Arc<KeyedEntry>),
}

impl<T: ?Sized + Send + Sync + 'static> EntrypointContainer<T> {
    pub fn mod_id(&self) -> &str {
        &self.mod_id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Constructs on first use; later calls share the cached instance.
    pub fn entrypoint(&self) -> Result<Arc<T>, EntrypointError> {
        match &self.source {
            ContainerSource::Ready(instance) => Ok(Arc::clone(instance)),
            ContainerSource::Deferred(entry) => entry
                .get::<T>()
                .map_err(|cause| EntrypointError::new(&self.key, &self.mod_id, cause)),
        }
    }
}

impl<T: ?Sized> fmt::Debug for EntrypointContainer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntrypointContainer")
            .field("key", &self.key)
            .field("mod_id", &self.mod_id)
            .field("ready", &matches!(self.source, ContainerSource::Ready(_)))
            .finish()
    }
}
