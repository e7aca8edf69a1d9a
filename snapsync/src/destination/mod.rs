mod base;
mod loader;
pub mod memory;
pub mod postgres;

pub use base::*;
pub use loader::*;
