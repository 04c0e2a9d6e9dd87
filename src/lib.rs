//! Content migration orchestration substrate
//!
//! Moves taxonomy tags, courses, lessons, and video assets from the
//! legacy relational system into the content-resource store. The run is
//! idempotent and resumable: a durable local mapping store guarantees
//! at-most-one target record per legacy record across any number of
//! re-runs, and every run appends lifecycle events to an offset-
//! addressable stream that dashboards, log tails, and tests can read or
//! follow live. Staged test corpora grow through the selection engine,
//! which keeps every phase a strict superset of the one before it.

pub mod config;
pub mod error;
pub mod executor;
pub mod mapper;
pub mod mapping_store;
pub mod model;
pub mod progress;
pub mod selection;
pub mod source;
pub mod stream;
pub mod target;
