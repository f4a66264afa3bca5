//! Vergraph Core Library
//!
//! Object-versioning and replication engine:
//! - Field-level change model (value assignments, sub-properties, set deltas)
//! - Immutable, content-addressed change DAG per object
//! - Three-way merge with field-level conflict detection and resolution
//! - Live-object checkout between arbitrary DAG nodes
//! - Self-verifying wire representation and idempotent replication import
//!
//! The engine is synchronous and I/O-free; persistence and transport belong
//! to the host, which supplies a `FieldAccessor` per versioned type and a
//! `ReplicaStore` for replication. All mutation of one object must be
//! serialized by the host; concurrency is expressed as branch divergence in
//! the DAG, resolved by merge.

pub mod accessor;
pub mod change;
pub mod dto;
pub mod editor;
pub mod error;
pub mod factory;
pub mod field;
pub mod history;
pub mod store;
pub mod value;

pub use accessor::{FieldAccessor, MapAccessor, MapObject};
pub use change::{Change, ConflictSide, FieldConflict, PendingChange};
pub use dto::{ChangeDto, MAX_RECORD_SIZE, WIRE_MAGIC, WIRE_VERSION};
pub use editor::VersionedObjectEditor;
pub use error::{Result, VersionError};
pub use factory::ChangeFactory;
pub use field::{FieldChange, FieldMerge, SetChange, ValueChange};
pub use history::{History, MAX_CHAIN_DEPTH};
pub use store::{MemoryStore, ReplicaStore};
pub use value::{ChangeId, ObjectId, Value};
