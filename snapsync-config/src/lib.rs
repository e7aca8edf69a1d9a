//! Configuration for the snapshot sync service.
//!
//! Layered YAML and environment loading, environment detection, secret wrappers and the
//! configuration types shared between the sync library and the API binary.

mod environment;
mod load;
mod secret;
pub mod shared;

pub use environment::*;
pub use load::*;
pub use secret::*;
