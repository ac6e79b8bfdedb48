use super::*;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Weak};
use std::thread;
use std::time::Duration;

trait ModInitializer: Send + Sync {
    fn name(&self) -> String;
}

trait ServerInitializer: Send + Sync {
    fn port(&self) -> u16;
}

struct Initializer(&'static str);

impl ModInitializer for Initializer {
    fn name(&self) -> String {
        self.0.to_string()
    }
}

impl ServerInitializer for Initializer {
    fn port(&self) -> u16 {
        25565
    }
}

fn counting(adapter: DefaultLanguageAdapter, value: &'static str, counter: Arc<AtomicUsize>) -> DefaultLanguageAdapter {
    adapter.with::<dyn ModInitializer, _>(value, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Initializer(value)) as Arc<dyn ModInitializer>)
    })
}

fn registry_with(adapter: DefaultLanguageAdapter) -> EntrypointRegistry {
    let mut adapters = LanguageAdapterRegistry::new();
    adapters
        .register("default", Arc::new(adapter))
        .expect("register adapter");
    EntrypointRegistry::new(Arc::new(adapters))
}

struct LegacyAdapter {
    constructed: Arc<AtomicUsize>,
}

impl LegacyLanguageAdapter for LegacyAdapter {
    fn create_instance(&self, value: &str) -> anyhow::Result<UntypedInstance> {
        self.constructed.fetch_add(1, Ordering::SeqCst);
        match value {
            "com.example.Broken" => anyhow::bail!("no such class {value}"),
            "com.example.ServerOnly" => {
                let instance = Arc::new(Initializer("server-only"));
                Ok(UntypedInstance::new().with_view::<dyn ServerInitializer>(instance))
            }
            _ => {
                let instance = Arc::new(Initializer("legacy"));
                Ok(UntypedInstance::new()
                    .with_view::<dyn ModInitializer>(instance.clone())
                    .with_view::<dyn ServerInitializer>(instance))
            }
        }
    }
}

const LEGACY_REF: &str = "net.fabricmc.loader.language.JavaLanguageAdapter";

#[test]
fn keyed_instances_are_cached_per_type() {
    let counter = Arc::new(AtomicUsize::new(0));
    let registry = registry_with(counting(DefaultLanguageAdapter::new(), "com.example.Main", counter.clone()));
    registry
        .add("example", "main", "default", "com.example.Main")
        .expect("add");

    let first = registry.entrypoints::<dyn ModInitializer>("main").expect("first");
    let second = registry.entrypoints::<dyn ModInitializer>("main").expect("second");

    assert_eq!(first.len(), 1);
    assert!(Arc::ptr_eq(&first[0], &second[0]));
    assert_eq!(first[0].name(), "com.example.Main");
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn keyed_failures_are_aggregated() {
    let adapter = DefaultLanguageAdapter::new()
        .with::<dyn ModInitializer, _>("com.example.First", || {
            Ok(Arc::new(Initializer("first")) as Arc<dyn ModInitializer>)
        })
        .with::<dyn ModInitializer, _>("com.example.Second", || {
            anyhow::bail!("constructor threw")
        })
        .with::<dyn ModInitializer, _>("com.example.Third", || {
            Ok(Arc::new(Initializer("third")) as Arc<dyn ModInitializer>)
        });
    let registry = registry_with(adapter);
    registry.add("first", "server", "default", "com.example.First").expect("add");
    registry.add("second", "server", "default", "com.example.Second").expect("add");
    registry.add("third", "server", "default", "com.example.Third").expect("add");

    let error = registry
        .entrypoints::<dyn ModInitializer>("server")
        .err().unwrap();
    assert_eq!(error.key(), "server");
    assert_eq!(error.mod_id(), "second");
    assert!(error.suppressed().is_empty());
    assert_eq!(
        error.to_string(),
        "exception while loading entries for entrypoint 'server' provided by 'second'"
    );
    assert_eq!(error.cause().to_string(), "constructor threw");
}

#[test]
fn later_failures_are_suppressed_into_the_first() {
    let adapter = DefaultLanguageAdapter::new()
        .with::<dyn ModInitializer, _>("com.example.A", || anyhow::bail!("a failed"))
        .with::<dyn ModInitializer, _>("com.example.B", || anyhow::bail!("b failed"));
    let registry = registry_with(adapter);
    registry.add("alpha", "main", "default", "com.example.A").expect("add");
    registry.add("beta", "main", "default", "com.example.B").expect("add");

    let error = registry.entrypoints::<dyn ModInitializer>("main").err().unwrap();
    assert_eq!(error.mod_id(), "alpha");
    let suppressed: Vec<&str> = error.suppressed().iter().map(EntrypointError::mod_id).collect();
    assert_eq!(suppressed, ["beta"]);
}

#[test]
fn failed_construction_is_retried() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let adapter = DefaultLanguageAdapter::new().with::<dyn ModInitializer, _>("com.example.Flaky", move || {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            anyhow::bail!("first attempt fails");
        }
        Ok(Arc::new(Initializer("flaky")) as Arc<dyn ModInitializer>)
    });
    let registry = registry_with(adapter);
    registry.add("flaky", "main", "default", "com.example.Flaky").expect("add");

    assert!(registry.entrypoints::<dyn ModInitializer>("main").is_err());
    let instances = registry.entrypoints::<dyn ModInitializer>("main").expect("retry");
    assert_eq!(instances[0].name(), "flaky");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn missing_capability_is_an_error_for_keyed_entries() {
    let registry = registry_with(counting(
        DefaultLanguageAdapter::new(),
        "com.example.Main",
        Arc::new(AtomicUsize::new(0)),
    ));
    registry.add("example", "main", "default", "com.example.Main").expect("add");

    let error = registry.entrypoints::<dyn ServerInitializer>("main").err().unwrap();
    assert_eq!(error.mod_id(), "example");
}

#[test]
fn unknown_adapter_is_rejected_at_add() {
    let registry = registry_with(DefaultLanguageAdapter::new());
    let error = registry
        .add("example", "main", "kotlin", "com.example.Main")
        .unwrap_err();
    assert_eq!(error.to_string(), "could not find adapter 'kotlin' for mod example");
    assert!(!registry.has_entrypoints("main"));
}

#[test]
fn duplicate_adapter_keys_are_rejected() {
    let mut adapters = LanguageAdapterRegistry::new();
    adapters
        .register("default", Arc::new(DefaultLanguageAdapter::new()))
        .expect("first");
    let error = adapters
        .register("default", Arc::new(DefaultLanguageAdapter::new()))
        .unwrap_err();
    assert!(matches!(error, SetupError::DuplicateAdapterKey { ref key } if key == "default"));
}

#[test]
fn legacy_entries_share_one_instance_across_keys_and_types() {
    let constructed = Arc::new(AtomicUsize::new(0));
    let mut adapters = LanguageAdapterRegistry::new();
    adapters
        .register_legacy(LEGACY_REF, Arc::new(LegacyAdapter { constructed: constructed.clone() }))
        .expect("register legacy");
    let registry = EntrypointRegistry::new(Arc::new(adapters));
    registry.add_deprecated("legacy", LEGACY_REF, "com.example.Legacy");

    for key in LEGACY_KEYS {
        assert!(registry.has_entrypoints(key));
    }

    let main = registry.entrypoints::<dyn ModInitializer>("main").expect("main");
    let server = registry.entrypoints::<dyn ServerInitializer>("server").expect("server");
    let client = registry.entrypoints::<dyn ModInitializer>("client").expect("client");

    assert_eq!(main[0].name(), "legacy");
    assert_eq!(server[0].port(), 25565);
    assert!(Arc::ptr_eq(&main[0], &client[0]));
    assert_eq!(constructed.load(Ordering::SeqCst), 1);
}

#[test]
fn legacy_failures_and_mismatches_are_skipped() {
    let mut adapters = LanguageAdapterRegistry::new();
    adapters
        .register("default", Arc::new(counting(
            DefaultLanguageAdapter::new(),
            "com.example.Keyed",
            Arc::new(AtomicUsize::new(0)),
        )))
        .expect("register");
    adapters
        .register_legacy(LEGACY_REF, Arc::new(LegacyAdapter { constructed: Arc::new(AtomicUsize::new(0)) }))
        .expect("register legacy");
    let registry = EntrypointRegistry::new(Arc::new(adapters));
    registry.add_deprecated("broken", LEGACY_REF, "com.example.Broken");
    registry.add_deprecated("server-only", LEGACY_REF, "com.example.ServerOnly");
    registry.add_deprecated("unknown", "com.example.MissingAdapter", "com.example.Legacy");
    registry.add("keyed", "main", "default", "com.example.Keyed").expect("add");

    let instances = registry.entrypoints::<dyn ModInitializer>("main").expect("main");
    let names: Vec<String> = instances.iter().map(|instance| instance.name()).collect();
    assert_eq!(names, ["com.example.Keyed"]);
}

#[test]
fn containers_defer_keyed_construction() {
    let counter = Arc::new(AtomicUsize::new(0));
    let constructed = Arc::new(AtomicUsize::new(0));
    let mut adapters = LanguageAdapterRegistry::new();
    adapters
        .register("default", Arc::new(counting(DefaultLanguageAdapter::new(), "com.example.Main", counter.clone())))
        .expect("register");
    adapters
        .register_legacy(LEGACY_REF, Arc::new(LegacyAdapter { constructed: constructed.clone() }))
        .expect("register legacy");
    let registry = EntrypointRegistry::new(Arc::new(adapters));
    registry.add_deprecated("legacy", LEGACY_REF, "com.example.Legacy");
    registry.add("example", "main", "default", "com.example.Main").expect("add");

    let containers = registry.entrypoint_containers::<dyn ModInitializer>("main");
    let owners: Vec<&str> = containers.iter().map(EntrypointContainer::mod_id).collect();
    assert_eq!(owners, ["legacy", "example"]);
    assert_eq!(constructed.load(Ordering::SeqCst), 1);
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    let first = containers[1].entrypoint().expect("construct");
    let again = registry.entrypoints::<dyn ModInitializer>("main").expect("entrypoints");
    assert!(Arc::ptr_eq(&first, &again[1]));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn container_reports_failure_with_owner() {
    let adapter = DefaultLanguageAdapter::new()
        .with::<dyn ModInitializer, _>("com.example.Broken", || anyhow::bail!("boom"));
    let registry = registry_with(adapter);
    registry.add("broken", "client", "default", "com.example.Broken").expect("add");

    let containers = registry.entrypoint_containers::<dyn ModInitializer>("client");
    let error = containers[0].entrypoint().err().unwrap();
    assert_eq!(error.key(), "client");
    assert_eq!(error.mod_id(), "broken");
}

#[test]
fn concurrent_callers_share_one_construction() {
    let counter = Arc::new(AtomicUsize::new(0));
    let slow = counter.clone();
    let adapter = DefaultLanguageAdapter::new().with::<dyn ModInitializer, _>("com.example.Slow", move || {
        slow.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        Ok(Arc::new(Initializer("slow")) as Arc<dyn ModInitializer>)
    });
    let registry = Arc::new(registry_with(adapter));
    registry.add("slow", "main", "default", "com.example.Slow").expect("add");

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry
                    .entrypoints::<dyn ModInitializer>("main")
                    .expect("entrypoints")
                    .remove(0)
            })
        })
        .collect();
    let instances: Vec<Arc<dyn ModInitializer>> = handles
        .into_iter()
        .map(|handle| handle.join().expect("join"))
        .collect();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(instances.iter().all(|instance| Arc::ptr_eq(instance, &instances[0])));
}

#[test]
fn construction_may_reenter_its_own_declaration() {
    let registry_slot: Arc<OnceCell<Weak<EntrypointRegistry>>> = Arc::new(OnceCell::new());
    let server_built = Arc::new(AtomicUsize::new(0));

    let lookup = registry_slot.clone();
    let built = server_built.clone();
    let adapter = DefaultLanguageAdapter::new()
        .with::<dyn ServerInitializer, _>("com.example.Both", move || {
            built.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Initializer("both")) as Arc<dyn ServerInitializer>)
        })
        .with::<dyn ModInitializer, _>("com.example.Both", move || {
            // Resolving the server view of the same declaration takes the
            // declaration guard again on this thread.
            let registry = lookup
                .get()
                .and_then(Weak::upgrade)
                .ok_or_else(|| anyhow::anyhow!("registry gone"))?;
            let server = registry.entrypoints::<dyn ServerInitializer>("main")?;
            anyhow::ensure!(server.len() == 1);
            Ok(Arc::new(Initializer("both")) as Arc<dyn ModInitializer>)
        });

    let registry = Arc::new(registry_with(adapter));
    registry_slot
        .set(Arc::downgrade(&registry))
        .expect("set registry once");
    registry.add("both", "main", "default", "com.example.Both").expect("add");

    let main = registry.entrypoints::<dyn ModInitializer>("main").expect("main");
    assert_eq!(main[0].name(), "both");
    let server = registry.entrypoints::<dyn ServerInitializer>("main").expect("server");
    assert_eq!(server[0].port(), 25565);
    assert_eq!(server_built.load(Ordering::SeqCst), 1);
}

#[test]
fn unknown_keys_yield_nothing() {
    let registry = registry_with(DefaultLanguageAdapter::new());
    assert!(!registry.has_entrypoints("preLaunch"));
    assert!(registry
        .entrypoints::<dyn ModInitializer>("preLaunch")
        .expect("empty")
        .is_empty());
    assert!(registry
        .entrypoint_containers::<dyn ModInitializer>("preLaunch")
        .is_empty());
}
