use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::solver::model::{BinaryOp, FieldRole, Precision, TimeLevel};
use crate::solver::stencil::Exact;

/// Half-open, axis-aligned box of array indices: `lower[a] <= i[a] < upper[a]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexBox {
    pub lower: Vec<usize>,
    pub upper: Vec<usize>,
}

impl IndexBox {
    pub fn new(lower: Vec<usize>, upper: Vec<usize>) -> Self {
        debug_assert_eq!(lower.len(), upper.len());
        Self { lower, upper }
    }

    pub fn from_ranges(ranges: &[(usize, usize)]) -> Self {
        Self {
            lower: ranges.iter().map(|r| r.0).collect(),
            upper: ranges.iter().map(|r| r.1).collect(),
        }
    }

    pub fn rank(&self) -> usize {
        self.lower.len()
    }

    pub fn range(&self, axis: usize) -> (usize, usize) {
        (self.lower[axis], self.upper[axis])
    }

    pub fn is_empty(&self) -> bool {
        self.lower.iter().zip(&self.upper).any(|(lo, hi)| lo >= hi)
    }

    pub fn cell_count(&self) -> usize {
        self.lower
            .iter()
            .zip(&self.upper)
            .map(|(lo, hi)| hi.saturating_sub(*lo))
            .product()
    }

    pub fn contains(&self, point: &[usize]) -> bool {
        point.len() == self.rank()
            && point
                .iter()
                .enumerate()
                .all(|(axis, &i)| self.lower[axis] <= i && i < self.upper[axis])
    }

    pub fn intersection(&self, other: &IndexBox) -> Option<IndexBox> {
        if self.rank() != other.rank() {
            return None;
        }
        let lower: Vec<usize> = self
            .lower
            .iter()
            .zip(&other.lower)
            .map(|(a, b)| *a.max(b))
            .collect();
        let upper: Vec<usize> = self
            .upper
            .iter()
            .zip(&other.upper)
            .map(|(a, b)| *a.min(b))
            .collect();
        let out = IndexBox { lower, upper };
        (!out.is_empty()).then_some(out)
    }

    pub fn intersects(&self, other: &IndexBox) -> bool {
        self.intersection(other).is_some()
    }

    /// Smallest box containing both.
    pub fn bounding(&self, other: &IndexBox) -> IndexBox {
        IndexBox {
            lower: self
                .lower
                .iter()
                .zip(&other.lower)
                .map(|(a, b)| *a.min(b))
                .collect(),
            upper: self
                .upper
                .iter()
                .zip(&other.upper)
                .map(|(a, b)| *a.max(b))
                .collect(),
        }
    }

    /// All points in row-major order (last axis fastest).
    pub fn points(&self) -> Vec<Vec<usize>> {
        if self.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(self.cell_count());
        let mut current = self.lower.clone();
        loop {
            out.push(current.clone());
            let mut axis = self.rank();
            loop {
                if axis == 0 {
                    return out;
                }
                axis -= 1;
                current[axis] += 1;
                if current[axis] < self.upper[axis] {
                    break;
                }
                current[axis] = self.lower[axis];
            }
        }
    }
}

impl fmt::Display for IndexBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for axis in 0..self.rank() {
            if axis > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}..{}", self.lower[axis], self.upper[axis])?;
        }
        write!(f, "]")
    }
}

/// Ghost cells on the two faces of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AxisHalo {
    pub lower: usize,
    pub upper: usize,
}

impl AxisHalo {
    pub fn new(lower: usize, upper: usize) -> Self {
        Self { lower, upper }
    }

    pub fn symmetric(width: usize) -> Self {
        Self {
            lower: width,
            upper: width,
        }
    }

    pub fn width(&self) -> usize {
        self.lower.max(self.upper)
    }
}

/// Storage layout of one field as seen by the kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldLayout {
    pub name: String,
    /// Array extents, halo cells included.
    pub extents: Vec<usize>,
    pub halo: Vec<AxisHalo>,
    pub staggered: Vec<bool>,
    /// Number of rotating buffer slots.
    pub time_levels: usize,
    pub precision: Precision,
    pub role: FieldRole,
}

impl FieldLayout {
    pub fn rank(&self) -> usize {
        self.extents.len()
    }

    pub fn cell_count(&self) -> usize {
        self.extents.iter().product()
    }

    pub fn interior(&self) -> IndexBox {
        IndexBox {
            lower: self.halo.iter().map(|h| h.lower).collect(),
            upper: self
                .extents
                .iter()
                .zip(&self.halo)
                .map(|(extent, h)| extent.saturating_sub(h.upper))
                .collect(),
        }
    }

    /// Buffer slot holding `level` during time step `step`.
    pub fn slot(&self, level: TimeLevel, step: usize) -> usize {
        if self.time_levels <= 1 {
            return 0;
        }
        let levels = self.time_levels as i64;
        (step as i64 + level.offset()).rem_euclid(levels) as usize
    }

    /// Slot holding the newest state after `steps` completed steps.
    pub fn final_slot(&self, steps: usize) -> usize {
        if self.time_levels <= 1 {
            0
        } else {
            steps % self.time_levels
        }
    }

    /// Row-major flat index of an in-bounds point.
    pub fn flat_index(&self, point: &[usize]) -> usize {
        point
            .iter()
            .zip(&self.extents)
            .fold(0, |acc, (&i, &extent)| acc * extent + i)
    }
}

/// One array element relative to the iteration point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrayAccess {
    pub field: String,
    pub level: TimeLevel,
    pub offsets: Vec<i64>,
}

impl ArrayAccess {
    pub fn new(field: impl Into<String>, level: TimeLevel, offsets: Vec<i64>) -> Self {
        Self {
            field: field.into(),
            level,
            offsets,
        }
    }

    pub fn is_centered(&self) -> bool {
        self.offsets.iter().all(|&o| o == 0)
    }
}

impl fmt::Display for ArrayAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}[", self.field, self.level.as_str())?;
        for (axis, offset) in self.offsets.iter().enumerate() {
            if axis > 0 {
                write!(f, ",")?;
            }
            write!(f, "{offset:+}")?;
        }
        write!(f, "]")
    }
}

/// Lowered right-hand side. Stencil weights stay exact until emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KernelExpr {
    Float(f64),
    Rational(Exact),
    Param(String),
    Read(ArrayAccess),
    Neg(Box<KernelExpr>),
    Binary {
        op: BinaryOp,
        lhs: Box<KernelExpr>,
        rhs: Box<KernelExpr>,
    },
}

impl KernelExpr {
    pub fn binary(op: BinaryOp, lhs: KernelExpr, rhs: KernelExpr) -> Self {
        KernelExpr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn visit_reads<'a>(&'a self, f: &mut impl FnMut(&'a ArrayAccess)) {
        match self {
            KernelExpr::Float(_) | KernelExpr::Rational(_) | KernelExpr::Param(_) => {}
            KernelExpr::Read(access) => f(access),
            KernelExpr::Neg(inner) => inner.visit_reads(f),
            KernelExpr::Binary { lhs, rhs, .. } => {
                lhs.visit_reads(f);
                rhs.visit_reads(f);
            }
        }
    }

    pub fn reads(&self) -> Vec<&ArrayAccess> {
        let mut out = Vec::new();
        self.visit_reads(&mut |access| out.push(access));
        out
    }

    pub fn params(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_params(&mut out);
        out
    }

    fn collect_params<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            KernelExpr::Param(name) => {
                out.insert(name.as_str());
            }
            KernelExpr::Neg(inner) => inner.collect_params(out),
            KernelExpr::Binary { lhs, rhs, .. } => {
                lhs.collect_params(out);
                rhs.collect_params(out);
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatementId(pub usize);

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatementOrigin {
    Interior { field: String },
    Boundary { field: String, region: String },
}

impl StatementOrigin {
    pub fn field(&self) -> &str {
        match self {
            StatementOrigin::Interior { field } | StatementOrigin::Boundary { field, .. } => field,
        }
    }

    pub fn is_boundary(&self) -> bool {
        matches!(self, StatementOrigin::Boundary { .. })
    }
}

/// Writes exactly one array element (the target, at the iteration point) per iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub id: StatementId,
    pub origin: StatementOrigin,
    pub target: ArrayAccess,
    pub value: KernelExpr,
    /// Only iterations inside this box execute the statement.
    pub guard: Option<IndexBox>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LevelRole {
    Full,
    /// Iterates tile origins `start, start + size, ...`.
    Tile { size: usize },
    /// Iterates `[origin, min(origin + size, end))` for the enclosing tile of the same axis.
    Point { size: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ParallelHint {
    pub threads: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoopLevel {
    pub axis: usize,
    pub start: usize,
    pub end: usize,
    pub step: usize,
    pub role: LevelRole,
    pub parallel: Option<ParallelHint>,
}

impl LoopLevel {
    pub fn full(axis: usize, start: usize, end: usize) -> Self {
        Self {
            axis,
            start,
            end,
            step: 1,
            role: LevelRole::Full,
            parallel: None,
        }
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BodyKind {
    Interior { field: String },
    Boundary { field: String, region: String },
    /// Interior and boundary work of one field in a single guarded sweep.
    Combined { field: String },
}

impl BodyKind {
    pub fn field(&self) -> &str {
        match self {
            BodyKind::Interior { field }
            | BodyKind::Boundary { field, .. }
            | BodyKind::Combined { field } => field,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BodyKind::Interior { .. } => "interior",
            BodyKind::Boundary { .. } => "boundary",
            BodyKind::Combined { .. } => "combined",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopBody {
    pub name: String,
    pub kind: BodyKind,
    /// Outermost first.
    pub levels: Vec<LoopLevel>,
    pub statements: Vec<Statement>,
}

impl LoopBody {
    pub fn rank(&self) -> usize {
        self.levels
            .iter()
            .map(|level| level.axis + 1)
            .max()
            .unwrap_or(0)
    }

    /// Iteration domain spanned by the Full and Tile levels.
    pub fn domain(&self) -> IndexBox {
        let rank = self.rank();
        let mut lower = vec![0; rank];
        let mut upper = vec![0; rank];
        for level in &self.levels {
            if matches!(level.role, LevelRole::Full | LevelRole::Tile { .. }) {
                lower[level.axis] = level.start;
                upper[level.axis] = level.end;
            }
        }
        IndexBox { lower, upper }
    }

    /// Iteration box actually executed by `statement`.
    pub fn statement_domain(&self, statement: &Statement) -> IndexBox {
        let domain = self.domain();
        match &statement.guard {
            Some(guard) => guard
                .intersection(&domain)
                .unwrap_or_else(|| IndexBox::new(domain.lower.clone(), domain.lower.clone())),
            None => domain,
        }
    }

    pub fn written_fields(&self) -> BTreeSet<&str> {
        self.statements
            .iter()
            .map(|s| s.target.field.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopNest {
    pub name: String,
    pub time_steps: usize,
    pub fields: Vec<FieldLayout>,
    pub params: Vec<String>,
    /// Executed in order once per time step.
    pub bodies: Vec<LoopBody>,
    pub thread_hint: Option<usize>,
}

impl LoopNest {
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn statements(&self) -> impl Iterator<Item = &Statement> {
        self.bodies.iter().flat_map(|b| b.statements.iter())
    }

    pub fn statement_count(&self) -> usize {
        self.bodies.iter().map(|b| b.statements.len()).sum()
    }

    pub fn body(&self, name: &str) -> Option<&LoopBody> {
        self.bodies.iter().find(|b| b.name == name)
    }
}
