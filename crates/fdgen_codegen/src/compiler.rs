use std::fs;
use std::path::{Path, PathBuf};

use crate::solver::codegen::KernelSource;

/// Paths of the `.c` file and the JSON manifest for `kernel` under `out_dir`.
pub fn artifact_paths(out_dir: impl AsRef<Path>, kernel: &str) -> (PathBuf, PathBuf) {
    let out_dir = out_dir.as_ref();
    (
        out_dir.join(format!("{kernel}.c")),
        out_dir.join(format!("{kernel}.manifest.json")),
    )
}

pub fn write_file_if_changed(
    output_path: impl AsRef<Path>,
    content: &str,
) -> std::io::Result<PathBuf> {
    let output_path = output_path.as_ref();
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    if let Ok(existing) = fs::read_to_string(output_path) {
        if existing == content {
            log::debug!("{} is up to date", output_path.display());
            return Ok(output_path.to_path_buf());
        }
    }
    fs::write(output_path, content)?;
    Ok(output_path.to_path_buf())
}

/// Writes the kernel source and its manifest side by side, returning both paths.
pub fn write_generated_kernel(
    out_dir: impl AsRef<Path>,
    source: &KernelSource,
    manifest_json: &str,
) -> std::io::Result<(PathBuf, PathBuf)> {
    let (c_path, manifest_path) = artifact_paths(out_dir, source.name());
    let c_path = write_file_if_changed(c_path, &source.to_c())?;
    let manifest_path = write_file_if_changed(manifest_path, manifest_json)?;
    Ok((c_path, manifest_path))
}
