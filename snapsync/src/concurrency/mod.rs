pub mod rate_limit;
pub mod shutdown;
pub mod single_flight;
