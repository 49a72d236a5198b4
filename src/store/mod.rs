//! `LeadStore` / `AuditLookup` implementations.
//!
//! `sqlite` is the durable store used by the CLI and server. `memory` keeps
//! everything in process and can inject failures.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{LeadDb, SqliteStore, TransitionWrite};
