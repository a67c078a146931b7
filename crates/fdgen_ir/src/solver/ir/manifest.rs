use serde::{Deserialize, Serialize};

use super::loop_nest::{AxisHalo, LoopNest, StatementOrigin};
use crate::solver::error::{GenError, GenResult};
use crate::solver::model::{FieldRole, Precision};

pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Describes how a caller lays out buffers for the emitted kernel and where to find results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelManifest {
    pub format_version: u32,
    pub kernel: String,
    pub time_steps: usize,
    pub thread_hint: Option<usize>,
    /// Scalar kernel parameters, in argument order after the field pointers.
    pub parameters: Vec<String>,
    /// In argument order.
    pub fields: Vec<FieldManifest>,
    pub equations: Vec<EquationManifest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldManifest {
    pub name: String,
    /// Per-slot array shape, halo cells included.
    pub shape: Vec<usize>,
    pub time_levels: usize,
    pub precision: Precision,
    pub halo: Vec<AxisHalo>,
    pub staggered: Vec<bool>,
    pub role: FieldRole,
    /// Slot holding the final state after `time_steps` steps.
    pub final_slot: usize,
}

impl FieldManifest {
    pub fn slot_len(&self) -> usize {
        self.shape.iter().product()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquationManifest {
    pub field: String,
    pub precision: Precision,
}

impl KernelManifest {
    pub fn from_nest(nest: &LoopNest) -> Self {
        let fields = nest
            .fields
            .iter()
            .map(|layout| FieldManifest {
                name: layout.name.clone(),
                shape: layout.extents.clone(),
                time_levels: layout.time_levels,
                precision: layout.precision,
                halo: layout.halo.clone(),
                staggered: layout.staggered.clone(),
                role: layout.role,
                final_slot: layout.final_slot(nest.time_steps),
            })
            .collect();

        let mut equations: Vec<EquationManifest> = Vec::new();
        for statement in nest.statements() {
            let StatementOrigin::Interior { field } = &statement.origin else {
                continue;
            };
            if equations.iter().any(|e| &e.field == field) {
                continue;
            }
            let precision = nest
                .field(field)
                .map(|layout| layout.precision)
                .unwrap_or_default();
            equations.push(EquationManifest {
                field: field.clone(),
                precision,
            });
        }

        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            kernel: nest.name.clone(),
            time_steps: nest.time_steps,
            thread_hint: nest.thread_hint,
            parameters: nest.params.clone(),
            fields,
            equations,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldManifest> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn to_json_pretty(&self) -> GenResult<String> {
        serde_json::to_string_pretty(self).map_err(|err| GenError::IncompleteNest {
            nest: self.kernel.clone(),
            detail: format!("manifest serialization failed: {err}"),
        })
    }

    pub fn from_json_str(text: &str) -> GenResult<Self> {
        serde_json::from_str(text)
            .map_err(|err| GenError::InvalidConfig(format!("malformed manifest: {err}")))
    }
}
