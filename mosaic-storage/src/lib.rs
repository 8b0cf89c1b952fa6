//! Mosaic Storage - Backend Traits, In-Memory Backend and Service
//!
//! Defines the storage abstraction for the entity store. The PostgreSQL
//! backend lives in mosaic-api.

pub mod audit;
pub mod memory;
pub mod service;
pub mod traits;

pub use audit::{AuditSink, RecordingAuditSink, TracingAuditSink};
pub use memory::MemoryStore;
pub use service::EntityService;
pub use traits::{
    Backend, ConsistencySweep, EntityStore, PrincipalDirectory, QueryEngine, RelationGraph,
    StoreHealth, SweepReport, TypeRegistry,
};
