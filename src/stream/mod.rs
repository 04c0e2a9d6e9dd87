//! Durable, append-only event log for migration runs
//!
//! Streams are ordered sequences of migration events with monotonically
//! increasing integer offsets starting at 0, identified by run id and
//! bounded by a TTL. Single writer per run; any number of readers.

pub mod event;
pub mod reader;
pub mod server;
pub mod writer;

pub use event::MigrationEvent;
pub use reader::{EventLogReader, EventTail, TailState};
pub use server::EventLogServer;
pub use writer::EventLogWriter;
