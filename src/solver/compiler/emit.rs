use std::path::{Path, PathBuf};

use fdgen_codegen::compiler::write_generated_kernel;
use thiserror::Error;

use crate::solver::codegen::KernelSource;
use crate::solver::error::GenError;
use crate::solver::ir::KernelManifest;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Manifest(#[from] GenError),

    #[error("cannot write kernel artifacts to {}: {source}", dir.display())]
    Io {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Paths written for one kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelArtifacts {
    pub source: PathBuf,
    pub manifest: PathBuf,
}

/// Writes `<kernel>.c` and `<kernel>.manifest.json` under `out_dir`. Files whose content is
/// already current are left untouched.
pub fn write_kernel_artifacts(
    out_dir: impl AsRef<Path>,
    source: &KernelSource,
    manifest: &KernelManifest,
) -> Result<KernelArtifacts, WriteError> {
    let out_dir = out_dir.as_ref();
    let manifest_json = manifest.to_json_pretty()?;
    let (source, manifest) =
        write_generated_kernel(out_dir, source, &manifest_json).map_err(|source| {
            WriteError::Io {
                dir: out_dir.to_path_buf(),
                source,
            }
        })?;
    log::info!("wrote {} and {}", source.display(), manifest.display());
    Ok(KernelArtifacts { source, manifest })
}
