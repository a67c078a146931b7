use serde::{Deserialize, Serialize};

use super::manifest::{FieldManifest, KernelManifest};
use crate::solver::error::{GenError, GenResult};

/// Dense row-major values of one field, halo cells included.
///
/// This is the hand-off format for whatever supplies initial conditions (e.g. trace ingestion)
/// and whatever consumes results (e.g. visualization).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSnapshot {
    pub field: String,
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl FieldSnapshot {
    pub fn new(field: impl Into<String>, shape: Vec<usize>, data: Vec<f64>) -> Self {
        Self {
            field: field.into(),
            shape,
            data,
        }
    }

    pub fn zeros(field: impl Into<String>, shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self::new(field, shape, vec![0.0; len])
    }

    /// Checks the snapshot against the manifest entry of its field.
    pub fn validate<'m>(&self, manifest: &'m KernelManifest) -> GenResult<&'m FieldManifest> {
        let entry = manifest.field(&self.field).ok_or_else(|| GenError::Snapshot {
            field: self.field.clone(),
            detail: format!("kernel '{}' has no such field", manifest.kernel),
        })?;
        if entry.shape != self.shape {
            return Err(GenError::Snapshot {
                field: self.field.clone(),
                detail: format!(
                    "shape {:?} does not match declared extents {:?}",
                    self.shape, entry.shape
                ),
            });
        }
        if self.data.len() != entry.slot_len() {
            return Err(GenError::Snapshot {
                field: self.field.clone(),
                detail: format!(
                    "{} values supplied for {} cells",
                    self.data.len(),
                    entry.slot_len()
                ),
            });
        }
        Ok(entry)
    }

    /// Buffer contents at time level 0: every slot holds the snapshot.
    pub fn into_slots(self, manifest: &KernelManifest) -> GenResult<Vec<Vec<f64>>> {
        let levels = self.validate(manifest)?.time_levels;
        Ok(vec![self.data; levels])
    }

    /// Reads the final state back out of a field's slot buffers.
    pub fn from_final_slot(entry: &FieldManifest, slots: &[Vec<f64>]) -> GenResult<Self> {
        let data = slots.get(entry.final_slot).ok_or_else(|| GenError::Snapshot {
            field: entry.name.clone(),
            detail: format!(
                "final slot {} missing ({} slots supplied)",
                entry.final_slot,
                slots.len()
            ),
        })?;
        if data.len() != entry.slot_len() {
            return Err(GenError::Snapshot {
                field: entry.name.clone(),
                detail: format!("slot holds {} values, expected {}", data.len(), entry.slot_len()),
            });
        }
        Ok(Self::new(entry.name.clone(), entry.shape.clone(), data.clone()))
    }
}
