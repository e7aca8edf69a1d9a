//! Snapshot-based sync of a document store into a relational database.
//!
//! A sync run exports a point-in-time snapshot of the source ([`snapshot`]), infers a type for
//! every untyped value ([`conversions`]) and replaces the content of each destination table
//! with the snapshot rows ([`destination`]). [`pipeline::SyncPipeline`] orchestrates one run
//! while [`service::SyncService`] admits runs through a per-caller rate limit and a per-key
//! single-flight guard ([`concurrency`]).

pub mod concurrency;
pub mod conversions;
pub mod destination;
pub mod error;
mod macros;
pub mod notifier;
pub mod pipeline;
pub mod retry;
pub mod service;
pub mod snapshot;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
