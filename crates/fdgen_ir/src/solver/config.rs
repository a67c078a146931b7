use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::{GenError, GenResult};
use super::model::Precision;
use super::stencil::StencilLimits;

/// Generator settings. Every field has a default, so a config file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub accuracy_order: u32,
    pub time_steps: usize,
    pub enable_fission: bool,
    /// Thread count written into the `omp parallel for` clause. `None` leaves it to the runtime.
    pub thread_hint: Option<usize>,
    pub use_polyhedral_transform: bool,
    pub precision: Precision,
    /// Per-axis tile sizes for the built-in rectangular tiler; the last entry repeats.
    pub tile_sizes: Vec<usize>,
    pub max_derivative_order: u32,
    pub kernel_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            accuracy_order: 2,
            time_steps: 1,
            enable_fission: true,
            thread_hint: None,
            use_polyhedral_transform: false,
            precision: Precision::F64,
            tile_sizes: Vec::new(),
            max_derivative_order: 4,
            kernel_name: "fd_kernel".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(text: &str) -> GenResult<Self> {
        let config: PipelineConfig = serde_json::from_str(text)
            .map_err(|err| GenError::InvalidConfig(format!("malformed config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> GenResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            GenError::InvalidConfig(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> GenResult<()> {
        if self.accuracy_order < 2 || self.accuracy_order % 2 != 0 {
            return Err(GenError::InvalidConfig(format!(
                "accuracy_order must be even and at least 2, got {}",
                self.accuracy_order
            )));
        }
        if self.time_steps == 0 {
            return Err(GenError::InvalidConfig(
                "time_steps must be at least 1".to_string(),
            ));
        }
        if self.thread_hint == Some(0) {
            return Err(GenError::InvalidConfig(
                "thread_hint must be positive when set".to_string(),
            ));
        }
        if self.tile_sizes.iter().any(|&size| size == 0) {
            return Err(GenError::InvalidConfig(
                "tile_sizes entries must be positive".to_string(),
            ));
        }
        if self.max_derivative_order == 0 {
            return Err(GenError::InvalidConfig(
                "max_derivative_order must be at least 1".to_string(),
            ));
        }
        if !is_c_identifier(&self.kernel_name) {
            return Err(GenError::InvalidConfig(format!(
                "kernel_name '{}' is not a valid C identifier",
                self.kernel_name
            )));
        }
        Ok(())
    }

    pub fn stencil_limits(&self) -> StencilLimits {
        let defaults = StencilLimits::default();
        StencilLimits {
            max_derivative_order: self.max_derivative_order,
            max_accuracy_order: defaults.max_accuracy_order.max(self.accuracy_order),
        }
    }
}

pub fn is_c_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
