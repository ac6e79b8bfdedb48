// mb_artifact - mod artifacts handed over by the resolver
mod metadata;

pub use metadata::{
    EntrypointDeclaration, EnvType, ModMetadata, WeaveConfig, DEFAULT_ADAPTER,
    DEFAULT_LEGACY_ADAPTER,
};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("IO error while materialising {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where an artifact's jar currently lives.
#[derive(Debug, Clone)]
pub enum ArtifactSource {
    Path(PathBuf),
    /// Nested or virtual jar with no file of its own yet.
    Memory(Arc<[u8]>),
}

/// One mod to be loaded. Owned by the loader for the process lifetime; only
/// its path changes, once remapping or extraction produced a file.
#[derive(Debug, Clone)]
pub struct ModArtifact {
    metadata: ModMetadata,
    source: ArtifactSource,
    requires_remap: bool,
    builtin: bool,
}

impl ModArtifact {
    pub fn from_path(metadata: ModMetadata, path: impl Into<PathBuf>) -> Self {
        Self {
            metadata,
            source: ArtifactSource::Path(path.into()),
            requires_remap: false,
            builtin: false,
        }
    }

    pub fn in_memory(metadata: ModMetadata, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            metadata,
            source: ArtifactSource::Memory(bytes.into()),
            requires_remap: false,
            builtin: false,
        }
    }

    pub fn requiring_remap(mut self, requires_remap: bool) -> Self {
        self.requires_remap = requires_remap;
        self
    }

    /// Host-provided artifacts are never remapped nor added to the classpath.
    pub fn builtin(mut self) -> Self {
        self.builtin = true;
        self.requires_remap = false;
        self
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    pub fn metadata(&self) -> &ModMetadata {
        &self.metadata
    }

    pub fn requires_remap(&self) -> bool {
        self.requires_remap
    }

    pub fn is_builtin(&self) -> bool {
        self.builtin
    }

    pub fn source(&self) -> &ArtifactSource {
        &self.source
    }

    pub fn has_path(&self) -> bool {
        matches!(self.source, ArtifactSource::Path(_))
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            ArtifactSource::Path(path) => Some(path),
            ArtifactSource::Memory(_) => None,
        }
    }

    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.source = ArtifactSource::Path(path.into());
    }

    /// File name used for outputs derived from this artifact.
    pub fn default_file_name(&self) -> String {
        let sanitize = |value: &str| -> String {
            value
                .chars()
                .map(|ch| {
                    if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                        ch
                    } else {
                        '_'
                    }
                })
                .collect()
        };
        format!(
            "{}-{}.jar",
            sanitize(&self.metadata.id),
            sanitize(&self.metadata.version)
        )
    }

    /// Writes the artifact's jar into `dir`.
    ///
    /// With `temp` the file gets a unique name the caller is expected to
    /// delete; otherwise it is written as `default_file_name()`.
    pub fn copy_to_dir(&self, dir: &Path, temp: bool) -> Result<PathBuf, ArtifactError> {
        let io_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source| ArtifactError::Io { path, source }
        };

        fs::create_dir_all(dir).map_err(io_error(dir))?;

        if temp {
            let prefix = format!("{}-", self.id());
            let mut staged = tempfile::Builder::new()
                .prefix(&prefix)
                .suffix(".jar")
                .tempfile_in(dir)
                .map_err(io_error(dir))?;
            // removed on drop unless kept
            let staged_path = staged.path().to_path_buf();
            self.write_contents(staged.as_file_mut(), &staged_path)?;
            let (_, path) = staged.keep().map_err(|error| ArtifactError::Io {
                path: staged_path,
                source: error.error,
            })?;
            return Ok(path);
        }

        let path = dir.join(self.default_file_name());
        let mut file = fs::File::create(&path).map_err(io_error(&path))?;
        self.write_contents(&mut file, &path)?;
        Ok(path)
    }

    fn write_contents(&self, file: &mut fs::File, target: &Path) -> Result<(), ArtifactError> {
        let result = match &self.source {
            ArtifactSource::Path(source) => {
                fs::File::open(source).and_then(|mut input| std::io::copy(&mut input, file).map(|_| ()))
            }
            ArtifactSource::Memory(bytes) => file.write_all(bytes),
        };
        result
            .and_then(|_| file.flush())
            .map_err(|source| ArtifactError::Io {
                path: target.to_path_buf(),
                source,
            })
    }
}
