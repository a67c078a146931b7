pub mod definitions;

pub use definitions::{all_models, model_by_id, model_ids, ModelDefinition};
pub use fdgen_ir::solver::model::*;
