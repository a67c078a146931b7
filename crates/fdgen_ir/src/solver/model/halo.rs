use indexmap::IndexMap;

use super::expr::FieldAccess;
use super::field::{GridField, TimeLevel};
use crate::solver::error::{GenError, GenResult};
use crate::solver::ir::AxisHalo;
use crate::solver::stencil::exact_to_i64;

/// A field access converted to integer array offsets on the grid of the field being updated.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedRead {
    pub field: GridField,
    pub level: TimeLevel,
    pub offsets: Vec<i64>,
}

/// Array offsets of `access` relative to the array index of `target`.
///
/// Logical positions are `i + shift`, where the shift is 1/2 on staggered axes, so the array
/// offset is `shift(target) + logical offset - shift(accessed)` and must be an integer.
pub fn align_offsets(
    target: &GridField,
    access: &FieldAccess,
    context: &str,
) -> GenResult<Vec<i64>> {
    if access.field.rank() != target.rank() || access.offsets.len() != target.rank() {
        return Err(GenError::RankMismatch {
            field: access.field.name().to_string(),
            rank: target.rank(),
            what: "access",
            found: access.offsets.len(),
        });
    }

    (0..target.rank())
        .map(|axis| {
            let shift = target.stagger_shift(axis) - access.field.stagger_shift(axis);
            let array = shift + &access.offsets[axis];
            exact_to_i64(&array).ok_or_else(|| GenError::MisalignedAccess {
                field: access.field.name().to_string(),
                context: context.to_string(),
                axis,
                offset: array.to_string(),
            })
        })
        .collect()
}

/// Per field, per axis ghost-cell requirement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HaloSpec {
    fields: IndexMap<String, Vec<AxisHalo>>,
}

impl HaloSpec {
    pub fn get(&self, field: &str) -> Option<&[AxisHalo]> {
        self.fields.get(field).map(Vec::as_slice)
    }

    /// Widest face along `axis`, zero for unknown fields.
    pub fn width(&self, field: &str, axis: usize) -> usize {
        self.get(field)
            .and_then(|faces| faces.get(axis))
            .map(AxisHalo::width)
            .unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[AxisHalo])> {
        self.fields
            .iter()
            .map(|(name, faces)| (name.as_str(), faces.as_slice()))
    }

    fn widen(&mut self, field: &GridField, offsets: &[i64]) {
        let Some(faces) = self.fields.get_mut(field.name()) else {
            return;
        };
        for (face, &offset) in faces.iter_mut().zip(offsets) {
            if offset < 0 {
                face.lower = face.lower.max(offset.unsigned_abs() as usize);
            } else {
                face.upper = face.upper.max(offset as usize);
            }
        }
    }
}

/// Halos from the interior update equations.
///
/// A field's halo covers every read made by its own equation (so the interior can be swept
/// without leaving the arrays) and every read of the field made by any equation.
pub fn compute_halos<'a>(
    fields: &[GridField],
    equations: impl IntoIterator<Item = (&'a GridField, &'a [AlignedRead])>,
) -> GenResult<HaloSpec> {
    let mut spec = HaloSpec {
        fields: fields
            .iter()
            .map(|f| (f.name().to_string(), vec![AxisHalo::default(); f.rank()]))
            .collect(),
    };

    for (target, reads) in equations {
        for read in reads {
            spec.widen(target, &read.offsets);
            spec.widen(&read.field, &read.offsets);
        }
    }

    for field in fields {
        for (axis, &extent) in field.extents().iter().enumerate() {
            let halo = spec.width(field.name(), axis);
            if 2 * halo >= extent {
                return Err(GenError::HaloExceedsExtent {
                    field: field.name().to_string(),
                    axis,
                    halo,
                    extent,
                });
            }
        }
    }

    log::debug!(
        "halos: {}",
        spec.iter()
            .map(|(name, faces)| format!("{name}={faces:?}"))
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(spec)
}
