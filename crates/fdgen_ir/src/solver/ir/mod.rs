// Loop-nest IR facade.
//
// Codegen passes depend on the types re-exported here rather than reaching into the equation
// model. A `LoopNest` refers to fields by name only and holds no handles back into the model.

mod loop_nest;
pub mod manifest;
pub mod snapshot;

pub use loop_nest::{
    ArrayAccess, AxisHalo, BodyKind, FieldLayout, IndexBox, KernelExpr, LevelRole, LoopBody,
    LoopLevel, LoopNest, ParallelHint, Statement, StatementId, StatementOrigin,
};
pub use manifest::{EquationManifest, FieldManifest, KernelManifest};
pub use snapshot::FieldSnapshot;

pub use crate::solver::model::{BinaryOp, FieldRole, Precision, TimeLevel};
