//! Output jars and the META-INF fix-ups applied while copying resources.

use crate::RemapError;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::trace;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

const MANIFEST: &str = "META-INF/MANIFEST.MF";
const SIGNATURE_SUFFIXES: [&str; 4] = [".SF", ".RSA", ".DSA", ".EC"];

/// Jar being produced for one artifact. Entries are written once; later
/// writes of the same name are ignored.
pub struct OutputJar {
    path: PathBuf,
    writer: ZipWriter<File>,
    written: HashSet<String>,
}

impl std::fmt::Debug for OutputJar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputJar")
            .field("path", &self.path)
            .field("entries", &self.written.len())
            .finish()
    }
}

impl OutputJar {
    pub fn create(path: &Path) -> Result<Self, RemapError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| RemapError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = File::create(path).map_err(|source| RemapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: ZipWriter::new(file),
            written: HashSet::new(),
        })
    }

    pub fn write_entry(&mut self, name: &str, bytes: &[u8]) -> Result<(), RemapError> {
        if !self.written.insert(name.to_string()) {
            trace!(entry = name, "skipping duplicate jar entry");
            return Ok(());
        }
        self.writer
            .start_file(name, FileOptions::default())
            .map_err(|source| RemapError::Zip {
                path: self.path.clone(),
                source,
            })?;
        self.writer.write_all(bytes).map_err(|source| RemapError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Copies every non-class entry of `input`, dropping jar signatures and
    /// stripping per-entry digests from the manifest.
    pub fn copy_resources(&mut self, input: &Path) -> Result<usize, RemapError> {
        let file = File::open(input).map_err(|source| RemapError::Io {
            path: input.to_path_buf(),
            source,
        })?;
        let mut archive = ZipArchive::new(file).map_err(|source| RemapError::Zip {
            path: input.to_path_buf(),
            source,
        })?;

        let mut copied = 0;
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).map_err(|source| RemapError::Zip {
                path: input.to_path_buf(),
                source,
            })?;
            let name = entry.name().to_string();
            if entry.is_dir() || name.ends_with(".class") || is_signature_file(&name) {
                continue;
            }

            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut bytes)
                .map_err(|source| RemapError::Io {
                    path: input.join(&name),
                    source,
                })?;
            if name.eq_ignore_ascii_case(MANIFEST) {
                bytes = strip_manifest_digests(&bytes);
            }
            self.write_entry(&name, &bytes)?;
            copied += 1;
        }
        Ok(copied)
    }

    pub fn close(mut self) -> Result<PathBuf, RemapError> {
        self.writer.finish().map_err(|source| RemapError::Zip {
            path: self.path.clone(),
            source,
        })?;
        Ok(self.path)
    }
}

/// Reads a single entry, `None` when the jar has no such entry.
pub fn read_entry(jar: &Path, name: &str) -> Result<Option<Vec<u8>>, RemapError> {
    let file = File::open(jar).map_err(|source| RemapError::Io {
        path: jar.to_path_buf(),
        source,
    })?;
    let mut archive = ZipArchive::new(file).map_err(|source| RemapError::Zip {
        path: jar.to_path_buf(),
        source,
    })?;
    let name = name.trim_start_matches('/');
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(source) => {
            return Err(RemapError::Zip {
                path: jar.to_path_buf(),
                source,
            })
        }
    };
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut bytes)
        .map_err(|source| RemapError::Io {
            path: jar.join(name),
            source,
        })?;
    Ok(Some(bytes))
}

/// Replaces (or adds) entries of a closed jar.
///
/// The jar is rebuilt next to itself and moved over the original once
/// complete.
pub fn overwrite_entries(jar: &Path, replacements: &IndexMap<String, Vec<u8>>) -> Result<(), RemapError> {
    if replacements.is_empty() {
        return Ok(());
    }
    let io_error = |source| RemapError::Io {
        path: jar.to_path_buf(),
        source,
    };
    let zip_error = |source| RemapError::Zip {
        path: jar.to_path_buf(),
        source,
    };

    let replacements: IndexMap<&str, &Vec<u8>> = replacements
        .iter()
        .map(|(name, bytes)| (name.trim_start_matches('/'), bytes))
        .collect();

    let parent = jar.parent().unwrap_or_else(|| Path::new("."));
    let staged = tempfile::NamedTempFile::new_in(parent).map_err(io_error)?;
    let input = File::open(jar).map_err(io_error)?;
    let mut archive = ZipArchive::new(input).map_err(zip_error)?;
    let mut writer = ZipWriter::new(staged.reopen().map_err(io_error)?);

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(zip_error)?;
        let name = entry.name().to_string();
        if replacements.contains_key(name.as_str()) {
            continue;
        }
        if entry.is_dir() {
            writer
                .add_directory(name, FileOptions::default())
                .map_err(zip_error)?;
            continue;
        }
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes).map_err(io_error)?;
        writer
            .start_file(name, FileOptions::default())
            .map_err(zip_error)?;
        writer.write_all(&bytes).map_err(io_error)?;
    }

    for (name, bytes) in &replacements {
        writer
            .start_file(*name, FileOptions::default())
            .map_err(zip_error)?;
        writer.write_all(bytes).map_err(io_error)?;
    }
    writer.finish().map_err(zip_error)?;
    drop(archive);

    staged
        .persist(jar)
        .map_err(|error| io_error(error.error))?;
    Ok(())
}

fn is_signature_file(name: &str) -> bool {
    let Some(file) = name.strip_prefix("META-INF/") else {
        return false;
    };
    if file.contains('/') {
        return false;
    }
    let upper = file.to_ascii_uppercase();
    SIGNATURE_SUFFIXES
        .iter()
        .any(|suffix| upper.ends_with(suffix))
}

/// Drops `*-Digest` attributes from the per-entry sections of a manifest.
/// Sections left with nothing but their `Name` are removed; the main section
/// is kept as is.
pub fn strip_manifest_digests(manifest: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(manifest);
    let mut sections: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.split_inclusive('\n') {
        current.push(line);
        if line.trim_end_matches(['\r', '\n']).is_empty() {
            sections.push(std::mem::take(&mut current));
        }
    }
    sections.push(current);

    let mut out = String::with_capacity(text.len());
    for (position, section) in sections.iter().enumerate() {
        if position == 0 {
            out.extend(section.iter().copied());
            continue;
        }

        let mut kept: Vec<&str> = Vec::with_capacity(section.len());
        let mut dropping = false;
        for line in section {
            let content = line.trim_end_matches(['\r', '\n']);
            if content.starts_with(' ') {
                if !dropping {
                    kept.push(line);
                }
                continue;
            }
            dropping = content
                .split_once(':')
                .map(|(key, _)| key.trim().to_ascii_lowercase().ends_with("-digest"))
                .unwrap_or(false);
            if !dropping {
                kept.push(line);
            }
        }

        let attributes = kept
            .iter()
            .filter(|line| {
                let content = line.trim_end_matches(['\r', '\n']);
                !content.is_empty()
                    && !content.starts_with(' ')
                    && !content.to_ascii_lowercase().starts_with("name:")
            })
            .count();
        if attributes > 0 {
            out.extend(kept.iter().copied());
        }
    }
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_files_are_detected_in_meta_inf_only() {
        assert!(is_signature_file("META-INF/MOJANGCS.SF"));
        assert!(is_signature_file("META-INF/mojangcs.rsa"));
        assert!(is_signature_file("META-INF/KEY.EC"));
        assert!(!is_signature_file("META-INF/MANIFEST.MF"));
        assert!(!is_signature_file("META-INF/nested/KEY.SF"));
        assert!(!is_signature_file("assets/KEY.SF"));
    }

    #[test]
    fn manifest_digests_are_stripped() {
        let manifest = "Manifest-Version: 1.0\r\nMain-Class: com.example.Main\r\n\r\n\
Name: com/example/Main.class\r\nSHA-256-Digest: abc\r\n def\r\n\r\n\
Name: assets/icon.png\r\nSHA-256-Digest: xyz\r\nContent-Type: image/png\r\n\r\n";
        let stripped = String::from_utf8(strip_manifest_digests(manifest.as_bytes())).unwrap();
        assert_eq!(
            stripped,
            "Manifest-Version: 1.0\r\nMain-Class: com.example.Main\r\n\r\n\
Name: assets/icon.png\r\nContent-Type: image/png\r\n\r\n"
        );
    }

    #[test]
    fn manifest_without_entry_sections_is_unchanged() {
        let manifest = b"Manifest-Version: 1.0\n";
        assert_eq!(strip_manifest_digests(manifest), manifest.to_vec());
    }
}
