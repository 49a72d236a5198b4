//! Shared domain types for the leadflow workflow engine.
//!
//! Everything that crosses the boundary between the workflow core and its
//! collaborators lives here: the `Lead` document, its `Activity` history,
//! partial-update patches, and the `LeadStore` / `AuditLookup` traits the
//! core is written against.

pub mod activity;
pub mod lead;
pub mod money;
pub mod store;

pub use activity::{Activity, ActivityKind};
pub use lead::{Lead, LeadPatch, NextAction, ServiceInterest, WriteTime};
pub use money::{format_amount, parse_amount};
pub use store::{
    AuditLookup, AuditRecord, LEADS_COLLECTION, LeadStore, StoreError,
};
