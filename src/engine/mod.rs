//! Optimistic mutation engine
//!
//! Every user action is applied to the store at once, then confirmed against
//! persistence. A failed confirmation rolls the store back using the
//! snapshot captured when the delta was applied.

mod mutation;
mod optimistic;

pub use mutation::{EngineEvent, Mutation, MutationError, MutationKind, MutationState};
pub use optimistic::{BatchReport, EngineOptions, OptimisticEngine, TextAdded};
