pub mod emit;

pub use emit::*;
