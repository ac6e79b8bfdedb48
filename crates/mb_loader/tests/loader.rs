use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mb_artifact::{EnvType, ModArtifact, ModMetadata};
use mb_entrypoint::{Capability, DefaultLanguageAdapter, EntrypointObject, LanguageAdapter, SetupError};
use mb_loader::{
    AdapterFactories, ClasspathExtender, LoaderConfig, LoaderError, ModLoader, TinyFileMappingProvider,
};
use mb_remap::classfile::ClassFile;
use parking_lot::Mutex;
use tempfile::tempdir;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

trait ModInitializer: Send + Sync {
    fn describe(&self) -> String;
}

struct Named(String);

impl ModInitializer for Named {
    fn describe(&self) -> String {
        self.0.clone()
    }
}

#[derive(Clone, Default)]
struct RecordingExtender {
    paths: Arc<Mutex<Vec<PathBuf>>>,
}

impl ClasspathExtender for RecordingExtender {
    fn add_path(&self, path: &Path) -> anyhow::Result<()> {
        self.paths.lock().push(path.to_path_buf());
        Ok(())
    }
}

struct FailingExtender;

impl ClasspathExtender for FailingExtender {
    fn add_path(&self, path: &Path) -> anyhow::Result<()> {
        anyhow::bail!("cannot open {}", path.display())
    }
}

struct PrefixAdapter(&'static str);

impl LanguageAdapter for PrefixAdapter {
    fn create(&self, _mod_id: &str, value: &str, capability: &Capability) -> anyhow::Result<EntrypointObject> {
        anyhow::ensure!(capability.is::<dyn ModInitializer>(), "unsupported capability {capability:?}");
        let instance: Arc<dyn ModInitializer> = Arc::new(Named(format!("{}{value}", self.0)));
        Ok(mb_entrypoint::erase(instance))
    }
}

fn config(game_dir: &Path) -> LoaderConfig {
    LoaderConfig {
        game_dir: game_dir.to_path_buf(),
        ..LoaderConfig::default()
    }
}

fn builtin(metadata: ModMetadata) -> ModArtifact {
    ModArtifact::in_memory(metadata, Vec::<u8>::new()).builtin()
}

fn factories() -> AdapterFactories {
    let default = DefaultLanguageAdapter::new().with::<dyn ModInitializer, _>("com.example.Main", || {
        Ok(Arc::new(Named("main".to_string())) as Arc<dyn ModInitializer>)
    });
    AdapterFactories::new(default).with_constructor("com.example.PrefixAdapter", || {
        Ok(Arc::new(PrefixAdapter("prefixed:")) as Arc<dyn LanguageAdapter>)
    })
}

fn jar_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, bytes) in entries {
        writer
            .start_file(*name, FileOptions::default())
            .expect("start entry");
        writer.write_all(bytes).expect("write entry");
    }
    writer.finish().expect("finish jar").into_inner()
}

fn read_class(jar: &Path, name: &str) -> ClassFile {
    let mut archive = ZipArchive::new(File::open(jar).expect("open jar")).expect("read jar");
    let mut entry = archive.by_name(name).expect("class entry");
    let mut bytes = Vec::new();
    std::io::Read::read_to_end(&mut entry, &mut bytes).expect("read class");
    ClassFile::parse(&bytes).expect("parse class")
}

#[test]
fn load_and_freeze_register_mods_and_entrypoints() {
    let game = tempdir().expect("temp");
    let on_disk = game.path().join("library.jar");
    std::fs::write(&on_disk, jar_bytes(&[("library.txt", b"lib".as_slice())])).expect("write jar");

    let artifacts = vec![
        builtin(ModMetadata::new("minecraft", "1.20.1")),
        ModArtifact::from_path(ModMetadata::new("fabricloader", "0.15.0"), game.path().join("loader.jar")),
        ModArtifact::from_path(ModMetadata::new("library", "2.0.0"), &on_disk),
        ModArtifact::in_memory(
            ModMetadata {
                name: Some("Fancy Mod".to_string()),
                provides: vec!["fancy_api".to_string()],
                ..ModMetadata::new("fancy", "1.0.0")
            }
            .with_entrypoint("main", "default", "com.example.Main")
            .with_entrypoint("main", "prefix", "Fancy")
            .with_language_adapter("prefix", "com.example.PrefixAdapter")
            .with_weave_config("fancy.mixins.json", None)
            .with_weave_config("fancy.client.mixins.json", Some(EnvType::Client)),
            jar_bytes(&[("fancy.mixins.json", b"{}".as_slice())]),
        ),
    ];

    let extender = RecordingExtender::default();
    let mut loader = ModLoader::new(config(game.path()), None, Box::new(extender.clone()), factories());
    loader.load(artifacts).expect("load");

    let extracted = game.path().join(".fabric").join("processedMods").join("fancy-1.0.0.jar");
    assert!(extracted.is_file());
    let fancy = loader.mod_container("fancy").expect("fancy loaded");
    assert_eq!(fancy.origin_path(), Some(extracted.as_path()));
    assert_eq!(fancy.to_string(), "fancy 1.0.0");
    assert!(loader.is_mod_loaded("fancy_api"));
    assert!(Arc::ptr_eq(fancy, loader.mod_container("fancy_api").expect("alias")));
    assert_eq!(loader.all_mods().len(), 4);
    assert!(loader.mod_container("minecraft").expect("builtin").origin_path().is_none());

    assert!(loader.entrypoints::<dyn ModInitializer>("main").expect("before freeze").is_empty());

    loader.freeze().expect("freeze");
    assert_eq!(*extender.paths.lock(), vec![on_disk.clone(), extracted.clone()]);

    let main = loader.entrypoints::<dyn ModInitializer>("main").expect("entrypoints");
    let described: Vec<String> = main.iter().map(|entry| entry.describe()).collect();
    assert_eq!(described, ["main", "prefixed:Fancy"]);

    let containers = loader.entrypoint_containers::<dyn ModInitializer>("main");
    assert!(containers.iter().all(|container| container.mod_id() == "fancy"));

    let client: Vec<String> = loader.weave_configs(EnvType::Client).into_iter().collect();
    assert_eq!(client, ["fancy.mixins.json", "fancy.client.mixins.json"]);
    let server: Vec<String> = loader.weave_configs(EnvType::Server).into_iter().collect();
    assert_eq!(server, ["fancy.mixins.json"]);

    assert!(matches!(loader.load(Vec::new()), Err(LoaderError::Frozen)));
    assert!(matches!(loader.freeze(), Err(LoaderError::AlreadyFrozen)));
}

#[test]
fn load_late_ids_move_to_the_end() {
    let game = tempdir().expect("temp");
    let mut config = config(game.path());
    config.apply_load_late_override(Some("first"));

    let artifacts = ["first", "second", "third"]
        .into_iter()
        .map(|id| builtin(ModMetadata::new(id, "1.0")))
        .collect();
    let mut loader = ModLoader::new(config, None, Box::new(RecordingExtender::default()), factories());
    loader.load(artifacts).expect("load");

    let order: Vec<&str> = loader.all_mods().iter().map(|container| container.id()).collect();
    assert_eq!(order, ["second", "third", "first"]);
}

#[test]
fn unknown_entrypoint_adapter_fails_setup_with_mod_name() {
    let game = tempdir().expect("temp");
    let jar = game.path().join("broken.jar");
    std::fs::write(&jar, jar_bytes(&[])).expect("write jar");
    let metadata = ModMetadata::new("broken", "1.0").with_entrypoint("main", "scala", "com.example.Main");

    let mut loader = ModLoader::new(config(game.path()), None, Box::new(RecordingExtender::default()), factories());
    loader
        .load(vec![ModArtifact::from_path(metadata, &jar)])
        .expect("load");

    let error = loader.freeze().unwrap_err();
    assert_eq!(
        error.to_string(),
        format!("failed to setup mod broken ({})", jar.display())
    );
    match error {
        LoaderError::ModSetup { source, .. } => assert_eq!(
            source.to_string(),
            "could not find adapter 'scala' for mod broken"
        ),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn duplicate_adapter_keys_across_mods_are_fatal() {
    let game = tempdir().expect("temp");
    let artifacts = vec![
        builtin(ModMetadata::new("a", "1").with_language_adapter("prefix", "com.example.PrefixAdapter")),
        builtin(ModMetadata::new("b", "1").with_language_adapter("prefix", "com.example.PrefixAdapter")),
    ];
    let mut loader = ModLoader::new(config(game.path()), None, Box::new(RecordingExtender::default()), factories());
    loader.load(artifacts).expect("load");

    let error = loader.freeze().unwrap_err();
    assert!(matches!(
        error,
        LoaderError::Setup(SetupError::DuplicateAdapterKey { ref key }) if key == "prefix"
    ));
}

#[test]
fn unknown_adapter_implementation_is_fatal() {
    let game = tempdir().expect("temp");
    let artifacts = vec![builtin(
        ModMetadata::new("a", "1").with_language_adapter("kotlin", "com.example.KotlinAdapter"),
    )];
    let mut loader = ModLoader::new(config(game.path()), None, Box::new(RecordingExtender::default()), factories());
    loader.load(artifacts).expect("load");

    assert!(matches!(
        loader.freeze(),
        Err(LoaderError::UnknownAdapterImplementation { .. })
    ));
}

#[test]
fn classpath_failures_surface_on_freeze() {
    let game = tempdir().expect("temp");
    let jar = game.path().join("mod.jar");
    std::fs::write(&jar, jar_bytes(&[])).expect("write jar");
    let mut loader = ModLoader::new(config(game.path()), None, Box::new(FailingExtender), factories());
    loader
        .load(vec![ModArtifact::from_path(ModMetadata::new("mod", "1"), &jar)])
        .expect("load");

    match loader.freeze() {
        Err(LoaderError::Classpath { path, .. }) => assert_eq!(path, jar),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(loader.is_frozen());
}

#[test]
fn mappings_from_provider_remap_during_load() {
    let game = tempdir().expect("temp");
    let mappings = game.path().join("mappings.tiny");
    std::fs::write(
        &mappings,
        "tiny\t2\t0\tintermediary\tnamed\nc\tnet/minecraft/class_2\tnet/minecraft/entity/Entity\n",
    )
    .expect("write mappings");

    let class = ClassFile::new("com/example/FancyEntity", Some("net/minecraft/class_2"))
        .expect("class")
        .to_bytes();
    let jar = game.path().join("fancy.jar");
    std::fs::write(
        &jar,
        jar_bytes(&[("com/example/FancyEntity.class", class.as_slice())]),
    )
    .expect("write jar");

    let mut config = config(game.path());
    config.mappings.path = Some(PathBuf::from("mappings.tiny"));
    let provider = TinyFileMappingProvider::new(config.mappings_path());
    let mut loader = ModLoader::with_mapping_provider(
        config,
        &provider,
        Box::new(RecordingExtender::default()),
        factories(),
    )
    .expect("loader");

    loader
        .load(vec![ModArtifact::from_path(ModMetadata::new("fancy", "1.0.0"), &jar).requiring_remap(true)])
        .expect("load");

    let output = game.path().join(".fabric").join("processedMods").join("fancy-1.0.0.jar");
    let container = loader.mod_container("fancy").expect("fancy");
    assert_eq!(container.origin_path(), Some(output.as_path()));
    let remapped = read_class(&output, "com/example/FancyEntity.class");
    assert_eq!(
        remapped.header().expect("header").super_name.as_deref(),
        Some("net/minecraft/entity/Entity")
    );
}
