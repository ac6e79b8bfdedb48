// mb_mapping - namespace-to-namespace symbol mapping tables
//
// A `SymbolMapping` is the raw table as read from a Tiny file; a
// `SymbolMappingIndex` answers lookups for one ordered namespace pair.

pub mod descriptor;
mod index;
pub mod tiny;
mod tree;

pub use descriptor::DescriptorError;
pub use index::{OwnedMember, SymbolMappingIndex};
pub use tree::{ClassMapping, MemberMapping, SymbolMapping};

use std::path::PathBuf;
use thiserror::Error;

/// Namespace the stable, obfuscation-resistant names live in.
pub const SOURCE_NAMESPACE: &str = "intermediary";
/// Human-readable namespace expected by the running host.
pub const TARGET_NAMESPACE: &str = "named";

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("mapping table does not declare namespace '{namespace}' (available: {available})")]
    UnknownNamespace { namespace: String, available: String },
    #[error("malformed mapping table at line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("unsupported mapping format header: {0}")]
    UnsupportedFormat(String),
    #[error("IO error while reading mappings from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
