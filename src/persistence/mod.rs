//! Persistence layer: the durable owner of record
//!
//! The `Persistence` trait is the remote side of every optimistic mutation.
//! Two backends are provided: `MemoryPersistence` for embedding and tests,
//! and `SqlitePersistence` for durable storage.

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryPersistence;
pub use sqlite::SqlitePersistence;
pub use traits::{Persistence, PersistenceError, PersistenceResult, UserSnapshot};
