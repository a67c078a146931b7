use thiserror::Error;

pub type GenResult<T> = Result<T, GenError>;

/// Build-time failures of the generator.
///
/// None of these can surface while a generated kernel runs: a successful build means every
/// condition below has been ruled out. Only [`GenError::TransformIntegrityError`] is recoverable
/// (the offending pass falls back to the untransformed body); everything else aborts the build.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenError {
    #[error(
        "unsupported stencil order: derivative order {derivative_order}, accuracy order {accuracy_order} ({reason})"
    )]
    UnsupportedOrder {
        derivative_order: u32,
        accuracy_order: u32,
        reason: String,
    },

    #[error("conflicting boundary regions for field '{field}': '{first}' overlaps '{second}'")]
    ConflictingBoundary {
        field: String,
        first: String,
        second: String,
    },

    #[error("halo of {halo} cells for field '{field}' does not fit extent {extent} along axis {axis}")]
    HaloExceedsExtent {
        field: String,
        axis: usize,
        halo: usize,
        extent: usize,
    },

    #[error("transform of body '{body}' rejected: {detail}")]
    TransformIntegrityError { body: String, detail: String },

    #[error("loop nest '{nest}' is incomplete: {detail}")]
    IncompleteNest { nest: String, detail: String },

    #[error("field '{field}' is already declared")]
    DuplicateField { field: String },

    #[error("field '{field}' referenced by '{context}' is not declared in this model")]
    UndeclaredField { field: String, context: String },

    #[error("field '{field}' has more than one update equation")]
    DuplicateEquation { field: String },

    #[error("updated field '{field}' has no update equation")]
    MissingEquation { field: String },

    #[error("field '{field}' declares rank {rank} but {what} has {found} entries")]
    RankMismatch {
        field: String,
        rank: usize,
        what: &'static str,
        found: usize,
    },

    #[error("axis {axis} is out of range for '{context}' (rank {rank})")]
    AxisOutOfRange {
        context: String,
        axis: usize,
        rank: usize,
    },

    #[error("derivative along axis {axis} mixes grid spacings {first} and {second}")]
    SpacingMismatch { axis: usize, first: f64, second: f64 },

    #[error(
        "access to '{field}' from '{context}' lands between grid points along axis {axis} (offset {offset})"
    )]
    MisalignedAccess {
        field: String,
        context: String,
        axis: usize,
        offset: String,
    },

    #[error("'{context}' reads time level {level} of '{field}', which is not available there")]
    InvalidTimeLevel {
        field: String,
        context: String,
        level: &'static str,
    },

    #[error("boundary region '{region}' lies outside field '{field}' along axis {axis}")]
    RegionOutOfBounds {
        field: String,
        region: String,
        axis: usize,
    },

    #[error("boundary '{region}' targets '{field}', which has no update equation")]
    BoundaryWithoutEquation { field: String, region: String },

    #[error(
        "'{context}' reads '{field}' at offset {offset} along axis {axis}, outside its extent {extent}"
    )]
    AccessOutOfBounds {
        field: String,
        context: String,
        axis: usize,
        offset: i64,
        extent: usize,
    },

    #[error("analytic solution of '{field}' rejected: {detail}")]
    InvalidSolution { field: String, detail: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("snapshot for '{field}' rejected: {detail}")]
    Snapshot { field: String, detail: String },
}

impl GenError {
    /// Whether the build may continue after this error by discarding the failed transformation.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, GenError::TransformIntegrityError { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GenError::UnsupportedOrder { .. } => "UnsupportedOrder",
            GenError::ConflictingBoundary { .. } => "ConflictingBoundary",
            GenError::HaloExceedsExtent { .. } => "HaloExceedsExtent",
            GenError::TransformIntegrityError { .. } => "TransformIntegrityError",
            GenError::IncompleteNest { .. } => "IncompleteNest",
            GenError::DuplicateField { .. } => "DuplicateField",
            GenError::UndeclaredField { .. } => "UndeclaredField",
            GenError::DuplicateEquation { .. } => "DuplicateEquation",
            GenError::MissingEquation { .. } => "MissingEquation",
            GenError::RankMismatch { .. } => "RankMismatch",
            GenError::AxisOutOfRange { .. } => "AxisOutOfRange",
            GenError::SpacingMismatch { .. } => "SpacingMismatch",
            GenError::MisalignedAccess { .. } => "MisalignedAccess",
            GenError::InvalidTimeLevel { .. } => "InvalidTimeLevel",
            GenError::RegionOutOfBounds { .. } => "RegionOutOfBounds",
            GenError::BoundaryWithoutEquation { .. } => "BoundaryWithoutEquation",
            GenError::AccessOutOfBounds { .. } => "AccessOutOfBounds",
            GenError::InvalidSolution { .. } => "InvalidSolution",
            GenError::InvalidConfig(_) => "InvalidConfig",
            GenError::Snapshot { .. } => "Snapshot",
        }
    }
}
