pub mod compiler;
pub mod solver;
