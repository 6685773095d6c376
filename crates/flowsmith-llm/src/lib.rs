pub mod agent;
mod client;
mod types;

pub use client::*;
pub use types::*;
