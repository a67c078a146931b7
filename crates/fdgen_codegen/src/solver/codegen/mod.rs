pub mod c_ast;
pub mod deps;
pub mod emit;
pub mod fission;
mod kernel_c;
pub mod lower;
pub mod parallel;
pub mod polyhedral;

pub use deps::{analyze_body, Dependence, DependenceKind};
pub use emit::emit;
pub use fission::FissionReport;
pub use kernel_c::KernelSource;
pub use lower::build;
pub use parallel::ParallelReport;
pub use polyhedral::{
    PolyhedralReport, PolyhedralScheduler, ProcessScheduler, RectangularTiler, ScheduleRequest,
    ScheduleResponse, SchedulerError,
};
