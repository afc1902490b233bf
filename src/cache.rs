//! An in-memory store of expense collections keyed by query.
//!
//! The cache holds "what the user currently sees" for each key, which may be
//! an optimistic overlay or the last authoritative fetch. Two mechanisms stop
//! a slow fetch from erasing an optimistic overlay:
//!
//! - every key has a generation that [ExpenseCache::cancel_pending] bumps, and
//!   a fetch result is only applied if the generation is unchanged since the
//!   fetch began;
//! - every key counts the mutations that are still waiting for the server, and
//!   fetch results are discarded while that count is non-zero.

use std::{
    collections::HashMap,
    fmt::Display,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::{Expense, ExpenseId};

/// Identifies one collection in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollectionKey(&'static str);

impl CollectionKey {
    /// The key for the full list of expenses.
    pub const EXPENSES: CollectionKey = CollectionKey("expenses");

    /// Create a key with the given name.
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }
}

impl Display for CollectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Proof that a fetch was started, used to decide whether its result is
/// still wanted when it arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct FetchTicket {
    key: CollectionKey,
    generation: u64,
}

impl FetchTicket {
    /// The collection the fetch is for.
    pub fn key(&self) -> CollectionKey {
        self.key
    }
}

#[derive(Debug, Default)]
struct Entry {
    view: Option<Vec<Expense>>,
    generation: u64,
    pending_mutations: usize,
    fetched_at: Option<Instant>,
}

/// A shared handle to the expense cache.
///
/// Cloning the handle is cheap and all clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct ExpenseCache {
    entries: Arc<Mutex<HashMap<CollectionKey, Entry>>>,
}

impl ExpenseCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current view for `key`, or `None` if nothing has been loaded.
    pub fn read(&self, key: CollectionKey) -> Option<Vec<Expense>> {
        self.lock().get(&key).and_then(|entry| entry.view.clone())
    }

    /// Replace the whole view for `key`.
    pub fn replace(&self, key: CollectionKey, expenses: Vec<Expense>) {
        self.lock().entry(key).or_default().view = Some(expenses);
    }

    /// Modify the view for `key` in place.
    ///
    /// Returns `false` without calling `modify` if nothing is loaded for `key`.
    pub fn update(&self, key: CollectionKey, modify: impl FnOnce(&mut Vec<Expense>)) -> bool {
        match self
            .lock()
            .get_mut(&key)
            .and_then(|entry| entry.view.as_mut())
        {
            Some(view) => {
                modify(view);
                true
            }
            None => false,
        }
    }

    /// Make any fetch for `key` that is currently in flight be ignored when
    /// it resolves.
    pub fn cancel_pending(&self, key: CollectionKey) {
        let mut entries = self.lock();
        let entry = entries.entry(key).or_default();
        entry.generation += 1;
        tracing::debug!(
            "cancelled in-flight fetches for {key} (generation {})",
            entry.generation
        );
    }

    /// Record the start of an authoritative fetch for `key`.
    pub fn begin_fetch(&self, key: CollectionKey) -> FetchTicket {
        let generation = self.lock().entry(key).or_default().generation;

        FetchTicket { key, generation }
    }

    /// Apply the result of a fetch started with `ticket`.
    ///
    /// The result is discarded, and `false` returned, if the fetch was
    /// cancelled or if a mutation is still waiting for the server. Either way
    /// a newer refresh is due that will supersede this one.
    pub fn complete_fetch(&self, ticket: FetchTicket, expenses: Vec<Expense>) -> bool {
        let mut entries = self.lock();
        let entry = entries.entry(ticket.key).or_default();

        if entry.generation != ticket.generation {
            tracing::debug!(
                "discarding stale fetch for {} (generation {} != {})",
                ticket.key,
                ticket.generation,
                entry.generation
            );
            return false;
        }

        if entry.pending_mutations > 0 {
            tracing::debug!(
                "discarding fetch for {} while {} mutation(s) are pending",
                ticket.key,
                entry.pending_mutations
            );
            return false;
        }

        entry.view = Some(expenses);
        entry.fetched_at = Some(Instant::now());
        true
    }

    /// Note that a mutation of `key` is waiting for the server.
    pub fn register_mutation(&self, key: CollectionKey) {
        self.lock().entry(key).or_default().pending_mutations += 1;
    }

    /// Note that a mutation registered with [ExpenseCache::register_mutation]
    /// has settled.
    pub fn release_mutation(&self, key: CollectionKey) {
        if let Some(entry) = self.lock().get_mut(&key) {
            entry.pending_mutations = entry.pending_mutations.saturating_sub(1);
        }
    }

    /// The number of mutations of `key` still waiting for the server.
    pub fn pending_mutations(&self, key: CollectionKey) -> usize {
        self.lock()
            .get(&key)
            .map_or(0, |entry| entry.pending_mutations)
    }

    /// Whether `key` should be fetched again: it has never been fetched, or
    /// the last fetch is older than `stale_time`.
    pub fn is_stale(&self, key: CollectionKey, stale_time: Duration) -> bool {
        match self.lock().get(&key).and_then(|entry| entry.fetched_at) {
            Some(fetched_at) => fetched_at.elapsed() >= stale_time,
            None => true,
        }
    }

    /// Set the file reference of one expense in the view for `key`.
    ///
    /// Returns `false` if nothing is loaded or no expense has the ID.
    pub fn set_file_reference(&self, key: CollectionKey, id: ExpenseId, reference: &str) -> bool {
        let mut found = false;

        self.update(key, |expenses| {
            if let Some(expense) = expenses.iter_mut().find(|expense| expense.id == id) {
                expense.file_reference = Some(reference.to_owned());
                found = true;
            }
        });

        found
    }

    // Every critical section leaves the map consistent, so a poisoned lock
    // still holds usable data.
    fn lock(&self) -> MutexGuard<'_, HashMap<CollectionKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
