//! Tagkeep: tag-assignment reconciliation for personal text collections
//!
//! Texts are annotated with tags from a per-user glossary. Tags come from an
//! automated classifier (`ai`, with a confidence) and from the user
//! (`manual`, always confidence 1.0). This crate keeps the two in agreement.
//!
//! # Core Concepts
//!
//! - **Assignments**: at most one per (text, tag); manual ones survive
//!   every re-classification
//! - **Store**: one normalized table per session; every search scope is a
//!   projection of it
//! - **Optimistic mutations**: applied at once, confirmed against
//!   persistence, rolled back on failure
//! - **Portability**: a diffable JSON document for export and import
//!
//! # Example
//!
//! ```
//! use tagkeep::search;
//!
//! let tags = ["Штирлиц", "Советские"];
//! assert!(search::matches(tags, "штир сов"));
//! assert!(!search::matches(tags, "штир политика"));
//! ```

pub mod api;
pub mod classifier;
pub mod config;
pub mod engine;
mod error;
pub mod model;
pub mod persistence;
pub mod portability;
pub mod reconcile;
pub mod search;
pub mod store;

pub use api::TagkeepApi;
pub use classifier::{
    Candidate, ClassifierError, ClassifierGateway, DisabledClassifier, EnsembleClassifier,
    GlossaryEntry, MockClassifier,
};
pub use config::{ConfigError, TagkeepConfig};
pub use engine::{
    BatchReport, EngineEvent, EngineOptions, Mutation, MutationError, MutationKind, MutationState,
    OptimisticEngine, TextAdded,
};
pub use error::{TagkeepError, TagkeepResult};
pub use model::{Assignment, AssignmentKey, Source, Tag, TagId, Text, TextId, UserId, ValidationError};
pub use persistence::{
    MemoryPersistence, Persistence, PersistenceError, PersistenceResult, SqlitePersistence,
    UserSnapshot,
};
pub use portability::{ImportReport, PortableDocument, FORMAT_ID};
pub use reconcile::{convert_to_manual, reconcile, ManualUpsert, Reconciliation};
pub use search::SearchQuery;
pub use store::{AssignmentStore, ResyncOutcome, RollbackOutcome, ScopeKey, ScopeView, Table};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
