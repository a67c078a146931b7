pub mod compiler;
pub mod model;
pub mod pipeline;

pub use fdgen_codegen::solver::codegen;
pub use fdgen_ir::solver::{config, error, ir, scheme, stencil};

pub use config::PipelineConfig;
pub use error::{GenError, GenResult};
pub use pipeline::{BuildArtifact, Pipeline};
pub use scheme::TimeScheme;
