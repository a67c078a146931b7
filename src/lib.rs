pub mod report;
pub mod solver;
