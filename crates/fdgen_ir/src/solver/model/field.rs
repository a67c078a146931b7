use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::expr::Expr;
use crate::solver::stencil::{exact_int, exact_ratio, Exact};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    F32,
    #[default]
    F64,
}

impl Precision {
    pub fn as_str(self) -> &'static str {
        match self {
            Precision::F32 => "f32",
            Precision::F64 => "f64",
        }
    }

    pub fn c_type(self) -> &'static str {
        match self {
            Precision::F32 => "float",
            Precision::F64 => "double",
        }
    }
}

impl std::str::FromStr for Precision {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "f32" | "float" | "single" => Ok(Precision::F32),
            "f64" | "double" => Ok(Precision::F64),
            _ => Err(format!("unknown precision: {}", value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRole {
    /// Advanced in time by exactly one equation.
    #[default]
    Updated,
    /// Medium parameter (density, Lamé coefficients, ...): a single time level, never written.
    ReadOnly,
}

impl FieldRole {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldRole::Updated => "updated",
            FieldRole::ReadOnly => "read_only",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeLevel {
    Previous,
    Current,
    Next,
}

impl TimeLevel {
    /// Offset from the current step, used for slot rotation.
    pub fn offset(self) -> i64 {
        match self {
            TimeLevel::Previous => -1,
            TimeLevel::Current => 0,
            TimeLevel::Next => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeLevel::Previous => "previous",
            TimeLevel::Current => "current",
            TimeLevel::Next => "next",
        }
    }
}

/// Declaration of a grid field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    /// Array extents per axis, halo cells included.
    pub extents: Vec<usize>,
    pub spacing: Vec<f64>,
    /// A staggered axis stores element `i` at logical position `i + 1/2`.
    pub staggered: Vec<bool>,
    pub precision: Precision,
    pub role: FieldRole,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, extents: Vec<usize>, spacing: Vec<f64>) -> Self {
        let rank = extents.len();
        Self {
            name: name.into(),
            extents,
            spacing,
            staggered: vec![false; rank],
            precision: Precision::default(),
            role: FieldRole::default(),
        }
    }

    pub fn staggered_on(mut self, axis: usize) -> Self {
        if let Some(flag) = self.staggered.get_mut(axis) {
            *flag = true;
        }
        self
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.role = FieldRole::ReadOnly;
        self
    }

    pub fn rank(&self) -> usize {
        self.extents.len()
    }
}

#[derive(Debug)]
struct FieldData {
    index: usize,
    spec: FieldSpec,
}

/// Shared, immutable handle to a declared field.
///
/// Equality is identity: two handles are equal only if they come from the same declaration.
#[derive(Clone)]
pub struct GridField(Rc<FieldData>);

impl GridField {
    pub(crate) fn new(index: usize, spec: FieldSpec) -> Self {
        Self(Rc::new(FieldData { index, spec }))
    }

    /// Declaration order within the owning model.
    pub fn index(&self) -> usize {
        self.0.index
    }

    pub fn name(&self) -> &str {
        &self.0.spec.name
    }

    pub fn spec(&self) -> &FieldSpec {
        &self.0.spec
    }

    pub fn rank(&self) -> usize {
        self.0.spec.rank()
    }

    pub fn extents(&self) -> &[usize] {
        &self.0.spec.extents
    }

    pub fn spacing(&self) -> &[f64] {
        &self.0.spec.spacing
    }

    pub fn staggering(&self) -> &[bool] {
        &self.0.spec.staggered
    }

    pub fn is_staggered(&self, axis: usize) -> bool {
        self.0.spec.staggered.get(axis).copied().unwrap_or(false)
    }

    /// Logical position of array element 0 along `axis`.
    pub fn stagger_shift(&self, axis: usize) -> Exact {
        if self.is_staggered(axis) {
            exact_ratio(1, 2)
        } else {
            exact_int(0)
        }
    }

    pub fn precision(&self) -> Precision {
        self.0.spec.precision
    }

    pub fn role(&self) -> FieldRole {
        self.0.spec.role
    }

    pub fn is_read_only(&self) -> bool {
        self.0.spec.role == FieldRole::ReadOnly
    }

    pub fn ptr_eq(&self, other: &GridField) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn at(&self, level: TimeLevel) -> Expr {
        Expr::access(self, level, vec![exact_int(0); self.rank()])
    }

    pub fn current(&self) -> Expr {
        self.at(TimeLevel::Current)
    }

    pub fn next(&self) -> Expr {
        self.at(TimeLevel::Next)
    }

    pub fn previous(&self) -> Expr {
        self.at(TimeLevel::Previous)
    }

    /// Access at integer logical offsets from the evaluation point.
    pub fn at_offset(&self, level: TimeLevel, offsets: &[i64]) -> Expr {
        Expr::access(self, level, offsets.iter().map(|&o| exact_int(o)).collect())
    }
}

impl PartialEq for GridField {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for GridField {}

impl fmt::Debug for GridField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridField")
            .field("name", &self.name())
            .field("extents", &self.extents())
            .field("staggered", &self.staggering())
            .finish()
    }
}

impl fmt::Display for GridField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_compare_by_identity() {
        let spec = FieldSpec::new("u", vec![8], vec![1.0]);
        let a = GridField::new(0, spec.clone());
        let b = GridField::new(0, spec);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn staggering_shifts_logical_origin() {
        let field = GridField::new(
            0,
            FieldSpec::new("vx", vec![8, 8], vec![1.0, 1.0]).staggered_on(0),
        );
        assert_eq!(field.stagger_shift(0), exact_ratio(1, 2));
        assert_eq!(field.stagger_shift(1), exact_int(0));
    }

    #[test]
    fn precision_parses_c_names() {
        assert_eq!("double".parse::<Precision>(), Ok(Precision::F64));
        assert_eq!(Precision::F32.c_type(), "float");
    }
}
