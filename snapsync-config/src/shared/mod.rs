mod base;
mod batch;
mod connection;
mod pipeline;
mod rate_limit;
mod retry;
mod sentry;
mod snapshot;

pub use base::*;
pub use batch::*;
pub use connection::*;
pub use pipeline::*;
pub use rate_limit::*;
pub use retry::*;
pub use sentry::*;
pub use snapshot::*;
