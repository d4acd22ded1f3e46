//! Database access
//!
//! - `backend`: administrative command trait and explicit sessions
//! - `mongo`: MongoDB driver implementation
//! - `memory`: in-memory engine used for rehearsals and tests
//! - `schemas`: users, documents and indexes provisioned

pub mod backend;
pub mod memory;
pub mod mongo;
pub mod schemas;

pub use backend::{AdminBackend, Session};
pub use memory::InMemoryBackend;
pub use mongo::MongoBackend;
