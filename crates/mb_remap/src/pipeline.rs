use crate::access::rewrite_access_widener;
use crate::engine::{InputTag, Remapper};
use crate::jar::{overwrite_entries, read_entry, OutputJar};
use crate::refmap::remap_refmap_bytes;
use crate::RemapError;
use indexmap::{IndexMap, IndexSet};
use mb_artifact::{EnvType, ModArtifact};
use mb_mapping::SymbolMappingIndex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Remaps a batch of artifacts from the source to the target namespace.
///
/// Either every selected artifact ends up pointing at a complete output jar,
/// or none of the outputs survive.
#[derive(Debug, Clone, Default)]
pub struct RemapPipeline {
    index: Option<Arc<SymbolMappingIndex>>,
    classpath: Vec<PathBuf>,
}

#[derive(Debug)]
struct RemapJob {
    artifact: usize,
    tag: InputTag,
    input_path: PathBuf,
    input_is_temp: bool,
    output_path: PathBuf,
    output: Option<OutputJar>,
    access_widener: Option<(String, Vec<u8>)>,
}

impl RemapPipeline {
    /// `None` means no mapping table is available; `remap` is then a no-op.
    pub fn new(index: Option<Arc<SymbolMappingIndex>>) -> Self {
        Self {
            index,
            classpath: Vec::new(),
        }
    }

    /// Host jars or class directories consulted for inheritance only.
    pub fn with_classpath(mut self, classpath: Vec<PathBuf>) -> Self {
        self.classpath = classpath;
        self
    }

    /// Returns the number of artifacts that were remapped.
    pub fn remap(
        &self,
        artifacts: &mut [ModArtifact],
        tmp_dir: &Path,
        output_dir: &Path,
    ) -> Result<usize, RemapError> {
        let Some(index) = self.index.as_ref() else {
            debug!("no mappings available, skipping remap");
            return Ok(0);
        };

        let selected: Vec<usize> = artifacts
            .iter()
            .enumerate()
            .filter(|(_, artifact)| artifact.requires_remap())
            .map(|(position, _)| position)
            .collect();
        if selected.is_empty() {
            return Ok(0);
        }

        info!(
            mods = selected.len(),
            source = index.source_namespace(),
            target = index.target_namespace(),
            "remapping mods"
        );

        let mut remapper = Remapper::new(Arc::clone(index));
        remapper
            .read_classpath(&self.classpath)
            .map_err(|source| RemapError::Classpath {
                source: Box::new(source),
            })?;

        let mut jobs: Vec<RemapJob> = Vec::with_capacity(selected.len());
        let result = run_phases(
            &mut remapper,
            index,
            artifacts,
            &selected,
            tmp_dir,
            output_dir,
            &mut jobs,
        );

        if result.is_err() {
            remapper.finish();
            for job in &mut jobs {
                drop(job.output.take());
                if let Err(error) = remove_if_exists(&job.output_path) {
                    warn!(path = %job.output_path.display(), %error, "error deleting failed output jar");
                }
            }
        }

        for job in jobs.iter().filter(|job| job.input_is_temp) {
            if let Err(error) = remove_if_exists(&job.input_path) {
                warn!(path = %job.input_path.display(), %error, "error deleting temporary input jar");
            }
        }

        result.map_err(|source| {
            error!(error = %source, "failed to remap mods");
            RemapError::Batch {
                source: Box::new(source),
            }
        })
    }
}

fn run_phases(
    remapper: &mut Remapper,
    index: &SymbolMappingIndex,
    artifacts: &mut [ModArtifact],
    selected: &[usize],
    tmp_dir: &Path,
    output_dir: &Path,
    jobs: &mut Vec<RemapJob>,
) -> Result<usize, RemapError> {
    // Every input is registered before any output is produced so that
    // cross-artifact references resolve.
    for &position in selected {
        let artifact = &artifacts[position];
        let tag = remapper.create_input_tag();
        let (input_path, input_is_temp) = match artifact.path() {
            Some(path) => (path.to_path_buf(), false),
            None => (artifact.copy_to_dir(tmp_dir, true)?, true),
        };
        let output_path = output_dir.join(artifact.default_file_name());
        debug!(mod_id = artifact.id(), input = %input_path.display(), "staging remap input");

        jobs.push(RemapJob {
            artifact: position,
            tag,
            input_path: input_path.clone(),
            input_is_temp,
            output_path: output_path.clone(),
            output: None,
            access_widener: None,
        });

        remove_if_exists(&output_path).map_err(|source| RemapError::Io {
            path: output_path,
            source,
        })?;
        remapper.read_inputs(tag, &input_path)?;
    }

    for job in jobs.iter_mut() {
        let mut output = OutputJar::create(&job.output_path)?;
        output.copy_resources(&job.input_path)?;
        remapper.apply(job.tag, &mut output)?;
        job.output = Some(output);
    }

    // Access widener symbols are still in the source namespace inside the input.
    for job in jobs.iter_mut() {
        let Some(path) = artifacts[job.artifact].metadata().access_widener.clone() else {
            continue;
        };
        let bytes = read_entry(&job.input_path, &path)?.ok_or_else(|| RemapError::MissingEntry {
            jar: job.input_path.clone(),
            entry: path.clone(),
        })?;
        let rewritten = rewrite_access_widener(&bytes, index).map_err(|source| {
            RemapError::AccessWidener {
                path: path.clone(),
                source,
            }
        })?;
        job.access_widener = Some((path, rewritten));
    }

    remapper.finish();

    for job in jobs.iter_mut() {
        if let Some(output) = job.output.take() {
            output.close()?;
        }

        let metadata = artifacts[job.artifact].metadata();
        let configs: IndexSet<&str> = EnvType::ALL
            .iter()
            .flat_map(|env| metadata.weave_configs_for(*env))
            .collect();

        let mut refmaps: IndexSet<String> = IndexSet::new();
        for config in configs {
            let Some(bytes) = read_entry(&job.input_path, config)? else {
                debug!(mod_id = %metadata.id, config, "weave config not present in input");
                continue;
            };
            let document: serde_json::Value =
                serde_json::from_slice(&bytes).map_err(|source| RemapError::WeaveConfig {
                    path: config.to_string(),
                    source,
                })?;
            if let Some(refmap) = document.get("refmap").and_then(serde_json::Value::as_str) {
                refmaps.insert(refmap.to_string());
            }
        }

        let mut replacements: IndexMap<String, Vec<u8>> = IndexMap::new();
        for refmap in refmaps {
            let Some(bytes) = read_entry(&job.input_path, &refmap)? else {
                warn!(mod_id = %metadata.id, refmap = %refmap, "declared refmap not present in input");
                continue;
            };
            let remapped = remap_refmap_bytes(&bytes, index).map_err(|source| RemapError::Refmap {
                path: refmap.clone(),
                source,
            })?;
            replacements.insert(refmap, remapped);
        }
        if let Some((path, bytes)) = job.access_widener.take() {
            replacements.insert(path, bytes);
        }
        overwrite_entries(&job.output_path, &replacements)?;
    }

    for job in jobs.iter() {
        let artifact = &mut artifacts[job.artifact];
        artifact.set_path(&job.output_path);
        debug!(mod_id = artifact.id(), output = %job.output_path.display(), "remapped mod");
    }

    Ok(jobs.len())
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error),
    }
}
