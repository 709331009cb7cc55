//! Client-side state: the normalized table, scoped views, and the
//! bookkeeping that optimistic mutations and resyncs rely on

mod assignment_store;
mod scope;
mod table;
mod ticket;

pub use assignment_store::{Applied, AssignmentStore, ResyncOutcome, RollbackOutcome};
pub use scope::{render, ScopeKey, ScopeView, TagBadge, TextView};
pub use table::{StampKey, Table};
pub use ticket::ResyncTicket;
