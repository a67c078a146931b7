pub mod codegen;

pub mod config {
    pub use fdgen_ir::solver::config::*;
}

pub mod error {
    pub use fdgen_ir::solver::error::*;
}

pub mod ir {
    pub use fdgen_ir::solver::ir::*;
}

pub mod model {
    pub use fdgen_ir::solver::model::*;
}

pub mod scheme {
    pub use fdgen_ir::solver::scheme::*;
}

pub mod stencil {
    pub use fdgen_ir::solver::stencil::*;
}
