pub mod config;
pub mod error;
pub mod ir;
pub mod model;
pub mod scheme;
pub mod stencil;

pub use config::PipelineConfig;
pub use error::{GenError, GenResult};
pub use scheme::TimeScheme;
pub use stencil::{StencilCache, StencilCoefficients, StencilKey, StencilKind, StencilLimits};
