//! HTTP surface of the snapshot sync service.
//!
//! Exposes the bearer-authenticated trigger endpoint, limiter statistics and a health check,
//! and wires the sync service with the Postgres destination and the completion callback.

pub mod authentication;
pub mod config;
pub mod notifier;
pub mod routes;
pub mod startup;
pub mod trigger;
