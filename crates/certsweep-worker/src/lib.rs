//! # certsweep-worker
//!
//! An anonymous worker node of the certsweep fleet. It pulls job
//! ranges from the Manager, streams entries from public CT logs over
//! pooled HTTP/2 clients, filters them to the configured domain
//! suffix, and uploads matching certificates in bounded batches.
//! Failed uploads land in a local spool and are retried until the
//! Manager takes them.
//!
//! The binary wires one fetch thread per log category plus a spool
//! reaper thread; everything testable lives in this library crate.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod config;
pub mod fetch;
pub mod shutdown;
pub mod spool;

pub use config::{ConfigError, WorkerConfig};
