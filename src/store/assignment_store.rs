//! AssignmentStore: the single source of truth for one user's session

use super::scope::{render, ScopeKey, ScopeView};
use super::table::{StampKey, Table};
use super::ticket::ResyncTicket;
use crate::model::{Assignment, TextId, UserId};
use crate::persistence::UserSnapshot;
use crate::search::SearchQuery;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Result of one `apply_delta`
#[derive(Debug, Clone)]
pub struct Applied {
    /// The table before the delta; the rollback snapshot
    pub previous: Arc<Table>,
    pub current: Arc<Table>,
    /// Version this delta produced. Equal to the prior version for a no-op.
    pub version: u64,
    pub touched: BTreeSet<StampKey>,
    prior_version: u64,
    prior_stamps: BTreeMap<StampKey, Option<u64>>,
}

impl Applied {
    pub fn is_noop(&self) -> bool {
        self.touched.is_empty()
    }
}

/// How much of a failed mutation could be undone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RollbackOutcome {
    /// Nothing landed since; the snapshot was restored verbatim
    Exact,
    /// Newer mutations overwrote some keys; only the rest were restored
    Partial { restored: usize, skipped: usize },
    /// Every touched key has since been overwritten
    Superseded,
}

impl RollbackOutcome {
    /// True when every key the mutation touched was restored
    pub fn is_complete(&self) -> bool {
        matches!(
            self,
            RollbackOutcome::Exact | RollbackOutcome::Partial { skipped: 0, .. }
        )
    }
}

/// What happened to a resync's data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResyncOutcome {
    /// The table was replaced; `changed` keys differed from the source of record
    Applied { version: u64, changed: usize },
    /// A mutation started while the resync was in flight; its data was dropped
    Superseded,
    /// Mutations are pending; the last one to resolve will resync again
    Deferred,
}

#[derive(Debug)]
struct TableState {
    table: Arc<Table>,
    /// Version of the delta currently at the head of the table
    version: u64,
    next_version: u64,
    /// Last version that wrote each key
    stamps: HashMap<StampKey, u64>,
}

#[derive(Debug, Default)]
struct ResyncState {
    pending: usize,
    ticket: Option<ResyncTicket>,
    deferred: bool,
}

/// In-memory state of texts, tags, and assignments for the active user.
///
/// Every scoped view is a projection of one normalized table, so a delta
/// applied under any scope is visible under all of them. `apply_delta` calls
/// are serialized by a mutex that is never held across an await.
#[derive(Debug)]
pub struct AssignmentStore {
    user: UserId,
    state: Mutex<TableState>,
    resync: Mutex<ResyncState>,
    scopes: DashMap<ScopeKey, SearchQuery>,
}

impl AssignmentStore {
    pub fn new(user: UserId) -> Self {
        Self::with_table(user, Table::new())
    }

    pub fn with_table(user: UserId, table: Table) -> Self {
        Self {
            user,
            state: Mutex::new(TableState {
                table: Arc::new(table),
                version: 0,
                next_version: 0,
                stamps: HashMap::new(),
            }),
            resync: Mutex::new(ResyncState::default()),
            scopes: DashMap::new(),
        }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    fn lock_state(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_resync(&self) -> MutexGuard<'_, ResyncState> {
        self.resync.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // === Reads ===

    /// The current table. Cheap: the table is shared, never copied.
    pub fn snapshot(&self) -> Arc<Table> {
        self.lock_state().table.clone()
    }

    pub fn version(&self) -> u64 {
        self.lock_state().version
    }

    /// Version of the last delta that wrote `key`
    pub fn stamp(&self, key: &StampKey) -> Option<u64> {
        self.lock_state().stamps.get(key).copied()
    }

    pub fn assignments(&self, text_id: &TextId) -> Vec<Assignment> {
        self.snapshot().assignments_for(text_id)
    }

    // === Deltas ===

    /// Replace the table with `mutator(&current)`.
    pub fn apply_delta<F>(&self, mutator: F) -> Applied
    where
        F: FnOnce(&Table) -> Table,
    {
        match self.try_apply_delta(|t| Ok::<_, Infallible>(mutator(t))) {
            Ok(applied) => applied,
            Err(never) => match never {},
        }
    }

    /// Fallible `apply_delta`. When the mutator fails the table is unchanged.
    ///
    /// A mutator that produces an identical table is a no-op: the version is
    /// not bumped and the touched set is empty.
    pub fn try_apply_delta<F, E>(&self, mutator: F) -> Result<Applied, E>
    where
        F: FnOnce(&Table) -> Result<Table, E>,
    {
        let mut state = self.lock_state();
        let next = mutator(&state.table)?;
        let touched = state.table.diff(&next);

        if touched.is_empty() {
            return Ok(Applied {
                previous: state.table.clone(),
                current: state.table.clone(),
                version: state.version,
                touched,
                prior_version: state.version,
                prior_stamps: BTreeMap::new(),
            });
        }

        state.next_version += 1;
        let version = state.next_version;
        let prior_stamps: BTreeMap<StampKey, Option<u64>> = touched
            .iter()
            .map(|k| (k.clone(), state.stamps.get(k).copied()))
            .collect();
        for key in &touched {
            state.stamps.insert(key.clone(), version);
        }
        let prior_version = state.version;
        state.version = version;
        let previous = std::mem::replace(&mut state.table, Arc::new(next));

        tracing::debug!(
            user = %self.user,
            version,
            touched = touched.len(),
            "applied delta"
        );
        Ok(Applied {
            previous,
            current: state.table.clone(),
            version,
            touched,
            prior_version,
            prior_stamps,
        })
    }

    /// Undo a delta.
    ///
    /// If the table is still at the delta's version the snapshot is restored
    /// verbatim. Otherwise only keys whose stamp is still the delta's version
    /// are restored; keys a newer delta wrote keep the newer value.
    pub fn roll_back(&self, applied: &Applied) -> RollbackOutcome {
        if applied.is_noop() {
            return RollbackOutcome::Exact;
        }
        let mut state = self.lock_state();

        if state.version == applied.version {
            state.table = applied.previous.clone();
            for (key, prior) in &applied.prior_stamps {
                match prior {
                    Some(v) => state.stamps.insert(key.clone(), *v),
                    None => state.stamps.remove(key),
                };
            }
            state.version = applied.prior_version;
            tracing::debug!(user = %self.user, version = applied.version, "exact rollback");
            return RollbackOutcome::Exact;
        }

        let restorable: BTreeSet<StampKey> = applied
            .touched
            .iter()
            .filter(|k| state.stamps.get(*k) == Some(&applied.version))
            .cloned()
            .collect();
        let skipped = applied.touched.len() - restorable.len();
        if restorable.is_empty() {
            tracing::debug!(user = %self.user, version = applied.version, "rollback fully superseded");
            return RollbackOutcome::Superseded;
        }

        let mut table = (*state.table).clone();
        table.restore_from(&applied.previous, &restorable);
        state.table = Arc::new(table);
        for key in &restorable {
            match applied.prior_stamps.get(key).copied().flatten() {
                Some(v) => state.stamps.insert(key.clone(), v),
                None => state.stamps.remove(key),
            };
        }
        // The restored table is no longer any delta's output, so no pending
        // `Applied` may take the exact branch against it
        state.next_version += 1;
        state.version = state.next_version;
        tracing::debug!(
            user = %self.user,
            version = applied.version,
            restored = restorable.len(),
            skipped,
            "partial rollback"
        );
        RollbackOutcome::Partial {
            restored: restorable.len(),
            skipped,
        }
    }

    // === Resync bookkeeping ===

    /// Register a mutation as in flight. Supersedes any in-flight resync; the
    /// superseded resync is re-run once no mutations are pending.
    pub fn begin_mutation(&self) {
        let mut resync = self.lock_resync();
        if let Some(ticket) = resync.ticket.take() {
            ticket.supersede();
            resync.deferred = true;
            tracing::debug!(user = %self.user, "superseded in-flight resync");
        }
        resync.pending += 1;
    }

    /// Mark a mutation as resolved. Returns true when the caller, as the last
    /// pending mutation, should now run a resync.
    pub fn end_mutation(&self, wants_resync: bool) -> bool {
        let mut resync = self.lock_resync();
        resync.pending = resync.pending.saturating_sub(1);
        if wants_resync {
            resync.deferred = true;
        }
        if resync.pending == 0 && resync.deferred {
            resync.deferred = false;
            true
        } else {
            false
        }
    }

    pub fn pending_mutations(&self) -> usize {
        self.lock_resync().pending
    }

    /// Start a resync. Any older in-flight resync is superseded.
    pub fn begin_resync(&self) -> ResyncTicket {
        let mut resync = self.lock_resync();
        if let Some(old) = resync.ticket.take() {
            old.supersede();
        }
        let ticket = ResyncTicket::new();
        resync.ticket = Some(ticket.clone());
        ticket
    }

    /// Apply a resync's data unless it was superseded or mutations are pending.
    pub fn finish_resync(&self, ticket: &ResyncTicket, snapshot: UserSnapshot) -> ResyncOutcome {
        let mut resync = self.lock_resync();
        if ticket.is_superseded() {
            return ResyncOutcome::Superseded;
        }
        if resync.ticket.as_ref().is_some_and(|t| t.same_as(ticket)) {
            resync.ticket = None;
        }
        if resync.pending > 0 {
            resync.deferred = true;
            return ResyncOutcome::Deferred;
        }
        let fresh = Table::from_snapshot(snapshot);
        let applied = self.apply_delta(|_| fresh);
        ResyncOutcome::Applied {
            version: applied.version,
            changed: applied.touched.len(),
        }
    }

    // === Scopes ===

    /// Open (or reuse) the scope for a search query
    pub fn open_scope(&self, query: &SearchQuery) -> ScopeKey {
        let key = ScopeKey::new(self.user.clone(), query);
        self.scopes.entry(key.clone()).or_insert_with(|| query.clone());
        key
    }

    pub fn close_scope(&self, key: &ScopeKey) -> bool {
        self.scopes.remove(key).is_some()
    }

    /// Open scopes, ordered by key
    pub fn active_scopes(&self) -> Vec<ScopeKey> {
        let mut keys: Vec<ScopeKey> = self.scopes.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Render a scope against the current table
    pub fn view(&self, key: &ScopeKey) -> ScopeView {
        render(&self.snapshot(), key)
    }

    /// Open scopes whose rendered view differs between two tables
    pub fn affected_scopes(&self, before: &Table, after: &Table) -> Vec<ScopeKey> {
        self.active_scopes()
            .into_iter()
            .filter(|key| render(before, key).texts != render(after, key).texts)
            .collect()
    }
}
