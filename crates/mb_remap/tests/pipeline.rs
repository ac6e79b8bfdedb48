use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use mb_artifact::{EnvType, ModArtifact, ModMetadata};
use mb_mapping::{tiny, SymbolMappingIndex, SOURCE_NAMESPACE, TARGET_NAMESPACE};
use mb_remap::classfile::ClassFile;
use mb_remap::{RemapError, RemapPipeline};
use tempfile::tempdir;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

const MAPPINGS: &str = "tiny\t2\t0\tintermediary\tnamed
c\tnet/minecraft/class_1\tnet/minecraft/world/World
\tm\t(Lnet/minecraft/class_2;)V\tmethod_1\tspawnEntity
c\tnet/minecraft/class_2\tnet/minecraft/entity/Entity
\tf\tLnet/minecraft/class_1;\tfield_2\tworld
\tm\t()V\tmethod_2\ttick
";

fn index(target: &str) -> Arc<SymbolMappingIndex> {
    let mapping = tiny::parse(MAPPINGS).expect("parse mappings");
    Arc::new(SymbolMappingIndex::new(&mapping, SOURCE_NAMESPACE, target).expect("index"))
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

fn write_jar(path: &Path, entries: &[(&str, &[u8])]) {
    let mut file = File::create(path).expect("create jar");
    file.write_all(&jar_bytes(entries)).expect("write jar");
}

fn jar_entries(path: &Path) -> Vec<(String, Vec<u8>)> {
    let file = File::open(path).expect("open jar");
    let mut archive = ZipArchive::new(file).expect("read jar");
    let mut entries = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).expect("entry");
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).expect("read entry");
        entries.push((entry.name().to_string(), bytes));
    }
    entries
}

fn entry<'a>(entries: &'a [(String, Vec<u8>)], name: &str) -> &'a [u8] {
    entries
        .iter()
        .find(|(entry, _)| entry == name)
        .map(|(_, bytes)| bytes.as_slice())
        .unwrap_or_else(|| panic!("missing entry {name}"))
}

fn entity_class() -> Vec<u8> {
    let mut class =
        ClassFile::new("com/example/FancyEntity", Some("net/minecraft/class_2")).expect("class");
    class.add_method(0x0001, "method_2", "()V").expect("method");
    class.to_bytes()
}

fn fancy_metadata() -> ModMetadata {
    ModMetadata::new("fancy", "1.0.0")
        .with_weave_config("fancy.mixins.json", None)
        .with_weave_config("fancy.client.mixins.json", Some(EnvType::Client))
        .with_access_widener("fancy.accesswidener")
}

fn fancy_jar(path: &Path) {
    let class = entity_class();
    let manifest = b"Manifest-Version: 1.0\r\n\r\nName: com/example/FancyEntity.class\r\nSHA-256-Digest: abc=\r\n\r\n";
    write_jar(
        path,
        &[
            ("META-INF/MANIFEST.MF", manifest.as_slice()),
            ("META-INF/FANCY.SF", b"signature".as_slice()),
            ("META-INF/FANCY.RSA", b"key".as_slice()),
            ("com/example/FancyEntity.class", class.as_slice()),
            (
                "fancy.mixins.json",
                br#"{ "package": "com.example.mixin", "refmap": "fancy-refmap.json" }"#.as_slice(),
            ),
            (
                "fancy.client.mixins.json",
                br#"{ "package": "com.example.mixin.client", "refmap": "fancy-refmap.json" }"#.as_slice(),
            ),
            (
                "fancy-refmap.json",
                br#"{ "mappings": { "com/example/mixin/EntityMixin": { "tick": "Lnet/minecraft/class_2;method_2()V" } } }"#.as_slice(),
            ),
            (
                "fancy.accesswidener",
                b"accessWidener\tv1\tintermediary\naccessible\tfield\tnet/minecraft/class_2\tfield_2\tLnet/minecraft/class_1;\n".as_slice(),
            ),
            ("assets/fancy/lang/en_us.json", b"{}".as_slice()),
        ],
    );
}

#[test]
fn remaps_classes_and_auxiliary_files() {
    let temp = tempdir().expect("temp");
    let input = temp.path().join("fancy.jar");
    fancy_jar(&input);
    let untouched = temp.path().join("plain.jar");
    write_jar(&untouched, &[("plain.txt", b"plain".as_slice())]);

    let mut artifacts = vec![
        ModArtifact::from_path(fancy_metadata(), &input).requiring_remap(true),
        ModArtifact::from_path(ModMetadata::new("plain", "1.0.0"), &untouched),
    ];
    let tmp_dir = temp.path().join("tmp");
    let output_dir = temp.path().join("processedMods");

    let remapped = RemapPipeline::new(Some(index(TARGET_NAMESPACE)))
        .remap(&mut artifacts, &tmp_dir, &output_dir)
        .expect("remap");
    assert_eq!(remapped, 1);

    let output = output_dir.join("fancy-1.0.0.jar");
    assert_eq!(artifacts[0].path(), Some(output.as_path()));
    assert_eq!(artifacts[1].path(), Some(untouched.as_path()));

    let entries = jar_entries(&output);
    let names: Vec<&str> = entries.iter().map(|(name, _)| name.as_str()).collect();
    assert!(!names.contains(&"META-INF/FANCY.SF"));
    assert!(!names.contains(&"META-INF/FANCY.RSA"));
    assert_eq!(
        names.iter().filter(|name| **name == "fancy-refmap.json").count(),
        1
    );

    assert_eq!(
        entry(&entries, "META-INF/MANIFEST.MF"),
        b"Manifest-Version: 1.0\r\n\r\n".as_slice()
    );
    assert_eq!(entry(&entries, "assets/fancy/lang/en_us.json"), b"{}".as_slice());

    let class = ClassFile::parse(entry(&entries, "com/example/FancyEntity.class")).expect("class");
    assert_eq!(
        class.header().expect("header").super_name.as_deref(),
        Some("net/minecraft/entity/Entity")
    );
    assert_eq!(class.pool.utf8(class.methods[0].name_index).expect("name"), "tick");

    let refmap: serde_json::Value =
        serde_json::from_slice(entry(&entries, "fancy-refmap.json")).expect("refmap json");
    assert_eq!(
        refmap["mappings"]["com/example/mixin/EntityMixin"]["tick"],
        "Lnet/minecraft/entity/Entity;tick()V"
    );

    assert_eq!(
        entry(&entries, "fancy.accesswidener"),
        b"accessWidener\tv1\tnamed\naccessible\tfield\tnet/minecraft/entity/Entity\tworld\tLnet/minecraft/world/World;\n".as_slice()
    );
}

#[test]
fn identity_mapping_keeps_class_bytes() {
    let temp = tempdir().expect("temp");
    let input = temp.path().join("fancy.jar");
    fancy_jar(&input);

    let mut artifacts = vec![ModArtifact::from_path(
        ModMetadata::new("fancy", "1.0.0"),
        &input,
    )
    .requiring_remap(true)];
    RemapPipeline::new(Some(index(SOURCE_NAMESPACE)))
        .remap(&mut artifacts, &temp.path().join("tmp"), &temp.path().join("out"))
        .expect("remap");

    let before = jar_entries(&input);
    let after = jar_entries(artifacts[0].path().expect("output path"));
    assert_eq!(
        entry(&after, "com/example/FancyEntity.class"),
        entry(&before, "com/example/FancyEntity.class")
    );
}

#[test]
fn failure_removes_every_output_and_temp_input() {
    let temp = tempdir().expect("temp");
    let tmp_dir = temp.path().join("tmp");
    let output_dir = temp.path().join("processedMods");

    let healthy = jar_bytes(&[("com/example/FancyEntity.class", entity_class().as_slice())]);

    // Header intact, member tables cut off: survives stage-in, fails in apply.
    let mut broken_class = ClassFile::new("com/example/Broken", Some("java/lang/Object"))
        .expect("class")
        .to_bytes();
    broken_class.truncate(broken_class.len() - 6);
    let broken = temp.path().join("broken.jar");
    write_jar(&broken, &[("com/example/Broken.class", broken_class.as_slice())]);

    let mut artifacts = vec![
        ModArtifact::in_memory(ModMetadata::new("healthy", "1.0.0"), healthy).requiring_remap(true),
        ModArtifact::from_path(ModMetadata::new("broken", "1.0.0"), &broken).requiring_remap(true),
    ];

    let error = RemapPipeline::new(Some(index(TARGET_NAMESPACE)))
        .remap(&mut artifacts, &tmp_dir, &output_dir)
        .unwrap_err();
    match &error {
        RemapError::Batch { source } => {
            assert!(matches!(**source, RemapError::Class { .. }), "{source}")
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(!output_dir.join("healthy-1.0.0.jar").exists());
    assert!(!output_dir.join("broken-1.0.0.jar").exists());
    let leftovers: Vec<_> = fs::read_dir(&tmp_dir).expect("tmp dir").collect();
    assert!(leftovers.is_empty());

    assert!(!artifacts[0].has_path());
    assert_eq!(artifacts[1].path(), Some(broken.as_path()));
}

#[test]
fn stale_output_is_replaced() {
    let temp = tempdir().expect("temp");
    let input = temp.path().join("fancy.jar");
    fancy_jar(&input);
    let output_dir = temp.path().join("out");
    fs::create_dir_all(&output_dir).expect("output dir");
    fs::write(output_dir.join("fancy-1.0.0.jar"), b"stale").expect("stale output");

    let mut artifacts = vec![ModArtifact::from_path(fancy_metadata(), &input).requiring_remap(true)];
    RemapPipeline::new(Some(index(TARGET_NAMESPACE)))
        .remap(&mut artifacts, &temp.path().join("tmp"), &output_dir)
        .expect("remap");

    let entries = jar_entries(&output_dir.join("fancy-1.0.0.jar"));
    assert!(entries.iter().any(|(name, _)| name == "com/example/FancyEntity.class"));
}

#[test]
fn missing_mapping_is_a_no_op() {
    let temp = tempdir().expect("temp");
    let input = temp.path().join("fancy.jar");
    fancy_jar(&input);

    let mut artifacts = vec![ModArtifact::from_path(fancy_metadata(), &input).requiring_remap(true)];
    let remapped = RemapPipeline::new(None)
        .remap(&mut artifacts, &temp.path().join("tmp"), &temp.path().join("out"))
        .expect("remap");

    assert_eq!(remapped, 0);
    assert_eq!(artifacts[0].path(), Some(input.as_path()));
    assert!(!temp.path().join("out").exists());
}
