pub mod catalog;
pub mod executions;
pub mod merge;
pub mod ports;
mod graph;
mod validation;

pub use graph::*;
pub use validation::*;
