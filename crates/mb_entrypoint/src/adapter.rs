use crate::SetupError;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Type-erased entrypoint instance. For a capability `T` it holds an
/// `Arc<T>`, which lets `T` be a trait object such as `dyn ModInitializer`.
pub type EntrypointObject = Arc<dyn Any + Send + Sync>;

/// Wraps a typed instance for storage.
pub fn erase<T: ?Sized + Send + Sync + 'static>(instance: Arc<T>) -> EntrypointObject {
    Arc::new(instance)
}

/// Recovers the typed instance, `None` when `object` was built for another
/// capability.
pub fn downcast<T: ?Sized + Send + Sync + 'static>(object: &EntrypointObject) -> Option<Arc<T>> {
    object.downcast_ref::<Arc<T>>().cloned()
}

/// The interface an entrypoint is requested as.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capability {
    type_id: TypeId,
    name: &'static str,
}

impl Capability {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Builds keyed entrypoints for one capability at a time.
pub trait LanguageAdapter: Send + Sync {
    /// Must return an object holding an `Arc` of the requested capability.
    fn create(&self, mod_id: &str, value: &str, capability: &Capability) -> anyhow::Result<EntrypointObject>;
}

/// Old-style adapter: builds one untyped instance per declaration, whatever
/// capability is asked for later.
pub trait LegacyLanguageAdapter: Send + Sync {
    fn create_instance(&self, value: &str) -> anyhow::Result<UntypedInstance>;
}

/// An instance together with every capability it can be viewed as.
#[derive(Default)]
pub struct UntypedInstance {
    views: HashMap<TypeId, EntrypointObject>,
}

impl UntypedInstance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_view<T: ?Sized + Send + Sync + 'static>(mut self, instance: Arc<T>) -> Self {
        self.views.insert(TypeId::of::<T>(), erase(instance));
        self
    }

    pub fn view<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.views.get(&TypeId::of::<T>()).and_then(downcast::<T>)
    }
}

impl fmt::Debug for UntypedInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UntypedInstance")
            .field("views", &self.views.len())
            .finish()
    }
}

type Factory = Arc<dyn Fn() -> anyhow::Result<EntrypointObject> + Send + Sync>;

/// Adapter backed by a table of `(value, capability) -> constructor`.
#[derive(Default, Clone)]
pub struct DefaultLanguageAdapter {
    factories: HashMap<(String, TypeId), Factory>,
}

impl DefaultLanguageAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provide<T, F>(&mut self, value: impl Into<String>, factory: F)
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn() -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move || factory().map(erase));
        self.factories
            .insert((value.into(), TypeId::of::<T>()), factory);
    }

    pub fn with<T, F>(mut self, value: impl Into<String>, factory: F) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn() -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        self.provide(value, factory);
        self
    }
}

impl LanguageAdapter for DefaultLanguageAdapter {
    fn create(&self, mod_id: &str, value: &str, capability: &Capability) -> anyhow::Result<EntrypointObject> {
        let factory = self
            .factories
            .get(&(value.to_string(), capability.type_id()))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "{value} (declared by {mod_id}) does not provide {}",
                    capability.name()
                )
            })?;
        factory()
    }
}

impl fmt::Debug for DefaultLanguageAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultLanguageAdapter")
            .field("factories", &self.factories.len())
            .finish()
    }
}

/// Named adapters for keyed declarations and class-referenced adapters for
/// legacy ones.
#[derive(Default, Clone)]
pub struct LanguageAdapterRegistry {
    adapters: HashMap<String, Arc<dyn LanguageAdapter>>,
    legacy: HashMap<String, Arc<dyn LegacyLanguageAdapter>>,
}

impl LanguageAdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: impl Into<String>, adapter: Arc<dyn LanguageAdapter>) -> Result<(), SetupError> {
        let key = key.into();
        if self.adapters.contains_key(&key) {
            return Err(SetupError::DuplicateAdapterKey { key });
        }
        self.adapters.insert(key, adapter);
        Ok(())
    }

    pub fn register_legacy(
        &mut self,
        class_ref: impl Into<String>,
        adapter: Arc<dyn LegacyLanguageAdapter>,
    ) -> Result<(), SetupError> {
        let class_ref = class_ref.into();
        if self.legacy.contains_key(&class_ref) {
            return Err(SetupError::DuplicateAdapterKey { key: class_ref });
        }
        self.legacy.insert(class_ref, adapter);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn LanguageAdapter>> {
        self.adapters.get(key).cloned()
    }

    pub fn legacy(&self, class_ref: &str) -> Option<Arc<dyn LegacyLanguageAdapter>> {
        self.legacy.get(class_ref).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.adapters.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }
}

impl fmt::Debug for LanguageAdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.keys().collect();
        keys.sort_unstable();
        f.debug_struct("LanguageAdapterRegistry")
            .field("adapters", &keys)
            .field("legacy", &self.legacy.len())
            .finish()
    }
}
