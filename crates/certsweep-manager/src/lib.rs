//! # certsweep-manager
//!
//! The central Manager of the certsweep fleet. It owns the catalog of
//! CT logs, partitions each log into job ranges, hands ranges to
//! workers, tracks their liveness, suppresses duplicate certificate
//! uploads through an in-memory cache, and persists surviving records
//! to SQLite.
//!
//! The library crate exists so integration tests can drive the
//! coordinator, cache, and ingestion pipeline directly; the binary in
//! `main.rs` only wires these pieces to the HTTP surface.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cache;
pub mod catalog;
pub mod coordinator;
pub mod http;
pub mod ingest;
pub mod store;

pub use cache::{CacheOutcome, DuplicateCache};
pub use coordinator::{Coordinator, CoordinatorConfig};
pub use store::Store;
