use std::fs;

use mb_mapping::{tiny, MappingError, SymbolMappingIndex, SOURCE_NAMESPACE, TARGET_NAMESPACE};
use tempfile::tempdir;

#[test]
fn reads_mapping_table_from_disk() {
    let temp = tempdir().expect("temp");
    let path = temp.path().join("mappings.tiny");
    fs::write(
        &path,
        "tiny\t2\t0\tintermediary\tnamed\nc\tnet/minecraft/class_7\tnet/minecraft/block/Block\n",
    )
    .expect("write mappings");

    let mapping = tiny::read_file(&path).expect("read mappings");
    let index = SymbolMappingIndex::new(&mapping, SOURCE_NAMESPACE, TARGET_NAMESPACE)
        .expect("index");
    assert_eq!(
        index.map_class("net/minecraft/class_7"),
        Some("net/minecraft/block/Block")
    );
    assert_eq!(index.class_count(), 1);
}

#[test]
fn missing_file_reports_path() {
    let temp = tempdir().expect("temp");
    let path = temp.path().join("absent.tiny");
    let error = tiny::read_file(&path).unwrap_err();
    match error {
        MappingError::Io { path: reported, .. } => assert_eq!(reported, path),
        other => panic!("unexpected error: {other}"),
    }
}
