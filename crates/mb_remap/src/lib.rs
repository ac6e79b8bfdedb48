// mb_remap - rewrites mod jars from the source to the target namespace
//
// The pipeline drives the class-file engine over a batch of artifacts and
// then patches the auxiliary files (refmaps, access wideners) that carry
// symbol names outside of class files.

pub mod access;
pub mod classfile;
mod engine;
pub mod jar;
mod pipeline;
pub mod refmap;

pub use access::{rewrite_access_widener, AccessWidenerError};
pub use classfile::ClassParseError;
pub use engine::{InputTag, Remapper};
pub use pipeline::RemapPipeline;
pub use refmap::{remap_refmap_bytes, rewrite_refmap, Refmap};

use mb_artifact::ArtifactError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemapError {
    #[error("failed to remap mods: {source}")]
    Batch {
        #[source]
        source: Box<RemapError>,
    },
    #[error("failed to populate remap classpath: {source}")]
    Classpath {
        #[source]
        source: Box<RemapError>,
    },
    #[error("IO error while processing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ZIP error while processing {path}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("malformed class {entry}: {source}")]
    Class {
        entry: String,
        #[source]
        source: ClassParseError,
    },
    #[error("{jar} has no entry {entry}")]
    MissingEntry { jar: PathBuf, entry: String },
    #[error("malformed weave config {path}: {source}")]
    WeaveConfig {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed refmap {path}: {source}")]
    Refmap {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot remap access widener {path}: {source}")]
    AccessWidener {
        path: String,
        #[source]
        source: AccessWidenerError,
    },
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("input tag does not belong to this remapper")]
    UnknownTag,
}
