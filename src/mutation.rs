//! Optimistic creation and deletion of expenses.
//!
//! Every mutation follows the same steps:
//!
//! 1. cancel in-flight fetches so they cannot overwrite the overlay,
//! 2. snapshot the current view,
//! 3. apply the change to the cache immediately,
//! 4. send the change to the server,
//! 5. commit on success or restore the snapshot on failure,
//! 6. refresh from the server, which supersedes the optimistic view.
//!
//! Steps 1 to 3 and 5 are [PendingMutation]. [MutationEngine] drives the
//! whole sequence.

use std::{
    collections::BTreeSet,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use crate::{
    ApiError, CollectionKey, Error, Expense, ExpenseApi, ExpenseCache, ExpenseId, NewExpense,
    UploadSession,
};

const CREATE_FAILED: &str = "Failed to add expense";
const DELETE_FAILED: &str = "Failed to delete expense";

/// What a pending mutation changes.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationKind {
    /// A new expense, shown under a placeholder ID until the server confirms it.
    Create {
        /// The synthetic record appended to the view.
        placeholder: Expense,
    },
    /// Removal of an existing expense.
    Delete {
        /// The ID of the expense removed from the view.
        id: ExpenseId,
    },
}

/// How a pending mutation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The server accepted the change.
    Committed,
    /// The server rejected the change and the view was restored.
    RolledBack,
}

/// A change that has been applied to the cache but not yet confirmed.
///
/// [PendingMutation::commit] and [PendingMutation::rollback] consume the
/// mutation, so exactly one of them can happen. While a pending mutation is
/// alive, fetch results for its collection are discarded. Dropping it without
/// an outcome releases that hold and leaves the overlay for the next refresh
/// to reconcile.
#[derive(Debug)]
#[must_use = "a pending mutation must be committed or rolled back"]
pub struct PendingMutation {
    cache: ExpenseCache,
    key: CollectionKey,
    kind: MutationKind,
    snapshot_before: Option<Vec<Expense>>,
}

impl PendingMutation {
    /// Start a mutation of the collection `key`, applying it to the cache.
    ///
    /// If nothing is loaded for `key` there is nothing to overlay, so the
    /// cache view is left alone.
    pub fn begin(cache: &ExpenseCache, key: CollectionKey, kind: MutationKind) -> Self {
        cache.cancel_pending(key);
        cache.register_mutation(key);

        let snapshot_before = cache.read(key);

        if let Some(before) = &snapshot_before {
            let mut overlay = before.clone();

            match &kind {
                MutationKind::Create { placeholder } => overlay.push(placeholder.clone()),
                MutationKind::Delete { id } => overlay.retain(|expense| expense.id != *id),
            }

            cache.replace(key, overlay);
        }

        tracing::debug!("applied optimistic {kind:?} to {key}");

        Self {
            cache: cache.clone(),
            key,
            kind,
            snapshot_before,
        }
    }

    /// The change this mutation applied.
    pub fn kind(&self) -> &MutationKind {
        &self.kind
    }

    /// The view as it was before the change was applied.
    pub fn snapshot_before(&self) -> Option<&[Expense]> {
        self.snapshot_before.as_deref()
    }

    /// Accept the change.
    ///
    /// For a create, `confirmed` is the record the server stored. It takes the
    /// placeholder's place in the view, or the placeholder is dropped if the
    /// server's record is already listed.
    pub fn commit(self, confirmed: Option<&Expense>) -> MutationOutcome {
        if let (MutationKind::Create { placeholder }, Some(confirmed)) = (&self.kind, confirmed) {
            let placeholder_id = placeholder.id;

            self.cache.update(self.key, |expenses| {
                let already_listed = expenses.iter().any(|expense| expense.id == confirmed.id);
                let position = expenses
                    .iter()
                    .position(|expense| expense.id == placeholder_id);

                match position {
                    Some(position) if already_listed => {
                        expenses.remove(position);
                    }
                    Some(position) => expenses[position] = confirmed.clone(),
                    None => {}
                }
            });
        }

        MutationOutcome::Committed
    }

    /// Reject the change, putting back the view captured before it was applied.
    pub fn rollback(mut self) -> MutationOutcome {
        if let Some(before) = self.snapshot_before.take() {
            tracing::warn!("rolling back {:?} on {}", self.kind, self.key);
            self.cache.replace(self.key, before);
        }

        MutationOutcome::RolledBack
    }
}

impl Drop for PendingMutation {
    fn drop(&mut self) {
        self.cache.release_mutation(self.key);
    }
}

/// What a view of the expenses should show besides the expenses themselves.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationStatus {
    /// The number of creates waiting for the server.
    pub creates_in_flight: usize,
    /// The expenses with a delete waiting for the server.
    pub deleting: BTreeSet<ExpenseId>,
    /// Why the last create, delete or upload failed.
    pub mutation_error: Option<Error>,
    /// Why the last fetch failed.
    pub fetch_error: Option<Error>,
}

impl MutationStatus {
    /// Whether a create is waiting for the server.
    pub fn is_creating(&self) -> bool {
        self.creates_in_flight > 0
    }

    /// Whether a delete of `id` is waiting for the server.
    pub fn is_deleting(&self, id: ExpenseId) -> bool {
        self.deleting.contains(&id)
    }
}

/// Runs optimistic mutations and refreshes for one expense collection.
///
/// All methods take `&self`, so overlapping mutations may be driven
/// concurrently. Each one snapshots and restores independently; the refresh
/// after the last one settles resolves any divergence.
#[derive(Debug)]
pub struct MutationEngine<A> {
    api: A,
    cache: ExpenseCache,
    key: CollectionKey,
    stale_time: Duration,
    next_placeholder_id: AtomicI64,
    status: Mutex<MutationStatus>,
}

impl<A: ExpenseApi> MutationEngine<A> {
    /// Create an engine for [CollectionKey::EXPENSES].
    ///
    /// A fetched list is reused by [MutationEngine::load] for `stale_time`.
    pub fn new(api: A, cache: ExpenseCache, stale_time: Duration) -> Self {
        Self {
            api,
            cache,
            key: CollectionKey::EXPENSES,
            stale_time,
            next_placeholder_id: AtomicI64::new(-1),
            status: Mutex::new(MutationStatus::default()),
        }
    }

    /// The API the engine sends changes to.
    pub fn api(&self) -> &A {
        &self.api
    }

    /// The cache the engine keeps the view in.
    pub fn cache(&self) -> &ExpenseCache {
        &self.cache
    }

    /// What the user currently sees, or `None` before the first fetch.
    pub fn view(&self) -> Option<Vec<Expense>> {
        self.cache.read(self.key)
    }

    /// A copy of the in-progress indicators and last errors.
    pub fn status(&self) -> MutationStatus {
        self.lock_status().clone()
    }

    /// Fetch the list from the server and reconcile the cache with it.
    ///
    /// Returns the view afterwards. If a mutation started while the fetch was
    /// in flight, the fetched list is discarded and the current view is
    /// returned instead.
    ///
    /// # Errors
    ///
    /// Returns an [Error::Fetch] if the list could not be fetched. The cache
    /// is not modified in that case.
    pub async fn refresh(&self) -> Result<Vec<Expense>, Error> {
        let ticket = self.cache.begin_fetch(self.key);

        match self.api.list_expenses().await {
            Ok(expenses) => {
                self.cache.complete_fetch(ticket, expenses);
                self.lock_status().fetch_error = None;

                Ok(self.cache.read(self.key).unwrap_or_default())
            }
            Err(error) => {
                tracing::error!("could not fetch expenses: {error}");
                let error = Error::Fetch(error.to_string());
                self.lock_status().fetch_error = Some(error.clone());

                Err(error)
            }
        }
    }

    /// The cached view if it is fresh, otherwise a [MutationEngine::refresh].
    ///
    /// # Errors
    ///
    /// Returns an [Error::Fetch] if a fetch was needed and failed.
    pub async fn load(&self) -> Result<Vec<Expense>, Error> {
        match self.cache.read(self.key) {
            Some(view) if !self.cache.is_stale(self.key, self.stale_time) => Ok(view),
            _ => self.refresh().await,
        }
    }

    /// Apply a create to the cache under a fresh placeholder ID.
    pub fn begin_create(&self, expense: &NewExpense) -> PendingMutation {
        let placeholder = Expense {
            id: self.next_placeholder_id.fetch_sub(1, Ordering::Relaxed),
            title: expense.title().to_owned(),
            amount: expense.amount(),
            file_reference: None,
        };

        PendingMutation::begin(&self.cache, self.key, MutationKind::Create { placeholder })
    }

    /// Apply a delete to the cache.
    pub fn begin_delete(&self, id: ExpenseId) -> PendingMutation {
        PendingMutation::begin(&self.cache, self.key, MutationKind::Delete { id })
    }

    /// Validate form input and create an expense from it.
    ///
    /// # Errors
    ///
    /// Returns an [Error::Validation] without touching the cache or the
    /// network if the input is invalid. Otherwise see
    /// [MutationEngine::create_expense].
    pub async fn create(&self, title: &str, amount: &str) -> Result<Expense, Error> {
        let expense = match NewExpense::parse(title, amount) {
            Ok(expense) => expense,
            Err(error) => {
                self.lock_status().mutation_error = Some(error.clone());
                return Err(error);
            }
        };

        self.create_expense(expense).await
    }

    /// Show `expense` immediately, then ask the server to store it.
    ///
    /// Returns the record the server stored.
    ///
    /// # Errors
    ///
    /// Returns an [Error::Confirm] with the server's message, or a generic
    /// one, if the server did not store the expense. The view has been
    /// restored to what it was before the call.
    pub async fn create_expense(&self, expense: NewExpense) -> Result<Expense, Error> {
        let in_progress = InProgress::start(&self.status, Indicator::Create);
        let pending = self.begin_create(&expense);

        let result = match self.api.create_expense(&expense).await {
            Ok(confirmed) => {
                pending.commit(Some(&confirmed));
                Ok(confirmed)
            }
            Err(error) => {
                pending.rollback();
                Err(confirm_error(&error, CREATE_FAILED))
            }
        };

        drop(in_progress);
        self.settle(&result).await;

        result
    }

    /// Hide the expense immediately, then ask the server to delete it.
    ///
    /// # Errors
    ///
    /// Returns an [Error::Confirm] with the server's message, or a generic
    /// one, if the server did not delete the expense. The expense is back in
    /// its original position in the view.
    pub async fn delete(&self, id: ExpenseId) -> Result<ExpenseId, Error> {
        let in_progress = InProgress::start(&self.status, Indicator::Delete(id));
        let pending = self.begin_delete(id);

        let result = match self.api.delete_expense(id).await {
            Ok(_) => {
                pending.commit(None);
                Ok(id)
            }
            Err(error) => {
                pending.rollback();
                Err(confirm_error(&error, DELETE_FAILED))
            }
        };

        drop(in_progress);
        self.settle(&result).await;

        result
    }

    /// Upload the file selected in `session` and attach it to the session's
    /// expense.
    ///
    /// Returns the committed storage key. The expense in the view points at
    /// the key straight away and the list is then refreshed.
    ///
    /// # Errors
    ///
    /// Returns the error of the upload phase that failed. Nothing in the view
    /// changes when an upload fails.
    pub async fn attach_receipt(&self, session: &mut UploadSession) -> Result<String, Error> {
        self.lock_status().mutation_error = None;

        let storage_key = match session.run(&self.api).await {
            Ok(storage_key) => storage_key,
            Err(error) => {
                self.lock_status().mutation_error = Some(error.clone());
                return Err(error);
            }
        };

        self.cache.cancel_pending(self.key);

        if !self
            .cache
            .set_file_reference(self.key, session.expense_id(), &storage_key)
        {
            tracing::debug!(
                "expense {} is not in the view, waiting for refresh",
                session.expense_id()
            );
        }

        if let Err(error) = self.refresh().await {
            tracing::warn!("could not refresh after attaching receipt: {error}");
        }

        Ok(storage_key)
    }

    async fn settle<T>(&self, result: &Result<T, Error>) {
        if let Err(error) = result {
            self.lock_status().mutation_error = Some(error.clone());
        }

        if let Err(error) = self.refresh().await {
            tracing::warn!("could not refresh after mutation: {error}");
        }
    }

    fn lock_status(&self) -> MutexGuard<'_, MutationStatus> {
        lock_status(&self.status)
    }
}

// The status is only ever assigned whole fields, so a poisoned lock still
// holds a usable value.
fn lock_status(status: &Mutex<MutationStatus>) -> MutexGuard<'_, MutationStatus> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The in-progress indicator a running create or delete shows.
#[derive(Debug, Clone, Copy)]
enum Indicator {
    Create,
    Delete(ExpenseId),
}

/// Shows an [Indicator] in the status for as long as it is alive.
///
/// Dropping the guard clears the indicator, including when the mutation's
/// future is dropped before the server answers.
#[derive(Debug)]
struct InProgress<'a> {
    status: &'a Mutex<MutationStatus>,
    indicator: Indicator,
}

impl<'a> InProgress<'a> {
    /// Clear the last mutation error and show `indicator`.
    fn start(status: &'a Mutex<MutationStatus>, indicator: Indicator) -> Self {
        {
            let mut status = lock_status(status);
            status.mutation_error = None;

            match indicator {
                Indicator::Create => status.creates_in_flight += 1,
                Indicator::Delete(id) => {
                    status.deleting.insert(id);
                }
            }
        }

        Self { status, indicator }
    }
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        let mut status = lock_status(self.status);

        match self.indicator {
            Indicator::Create => {
                status.creates_in_flight = status.creates_in_flight.saturating_sub(1);
            }
            Indicator::Delete(id) => {
                status.deleting.remove(&id);
            }
        }
    }
}

fn confirm_error(error: &ApiError, fallback: &str) -> Error {
    tracing::warn!("server did not confirm mutation: {error}");

    Error::Confirm(
        error
            .server_message()
            .map_or_else(|| fallback.to_owned(), str::to_owned),
    )
}

#[cfg(test)]
mod pending_mutation_tests {
    use crate::{
        CollectionKey, ExpenseCache, MutationKind, MutationOutcome, PendingMutation,
        test_utils::expense,
    };

    const KEY: CollectionKey = CollectionKey::EXPENSES;

    fn loaded_cache() -> ExpenseCache {
        let cache = ExpenseCache::new();
        cache.replace(
            KEY,
            vec![
                expense(1, "Coffee", 4.5),
                expense(2, "Taxi", 20.0),
                expense(3, "Lunch", 12.0),
            ],
        );
        cache
    }

    #[test]
    fn create_appends_placeholder() {
        let cache = loaded_cache();
        let placeholder = expense(-1, "Book", 30.0);

        let _pending = PendingMutation::begin(
            &cache,
            KEY,
            MutationKind::Create {
                placeholder: placeholder.clone(),
            },
        );

        let view = cache.read(KEY).unwrap();
        assert_eq!(view.len(), 4);
        assert_eq!(view.last(), Some(&placeholder));
    }

    #[test]
    fn delete_removes_target() {
        let cache = loaded_cache();

        let _pending = PendingMutation::begin(&cache, KEY, MutationKind::Delete { id: 2 });

        let ids: Vec<_> = cache.read(KEY).unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn begin_records_snapshot_and_holds_fetches() {
        let cache = loaded_cache();
        let before = cache.read(KEY).unwrap();

        let pending = PendingMutation::begin(&cache, KEY, MutationKind::Delete { id: 2 });

        assert_eq!(pending.snapshot_before(), Some(before.as_slice()));
        assert_eq!(cache.pending_mutations(KEY), 1);
    }

    #[test]
    fn begin_cancels_in_flight_fetch() {
        let cache = loaded_cache();
        let ticket = cache.begin_fetch(KEY);

        let pending = PendingMutation::begin(&cache, KEY, MutationKind::Delete { id: 2 });
        drop(pending);

        assert!(!cache.complete_fetch(ticket, vec![]));
    }

    #[test]
    fn rollback_restores_snapshot_exactly() {
        let cache = loaded_cache();
        let before = cache.read(KEY).unwrap();
        let pending = PendingMutation::begin(&cache, KEY, MutationKind::Delete { id: 2 });

        let outcome = pending.rollback();

        assert_eq!(outcome, MutationOutcome::RolledBack);
        assert_eq!(cache.read(KEY), Some(before));
        assert_eq!(cache.pending_mutations(KEY), 0);
    }

    #[test]
    fn commit_swaps_placeholder_for_confirmed_record_in_place() {
        let cache = loaded_cache();
        let pending = PendingMutation::begin(
            &cache,
            KEY,
            MutationKind::Create {
                placeholder: expense(-1, "Book", 30.0),
            },
        );
        cache.update(KEY, |expenses| expenses.push(expense(9, "Later", 1.0)));

        let outcome = pending.commit(Some(&expense(7, "Book", 30.0)));

        assert_eq!(outcome, MutationOutcome::Committed);
        let ids: Vec<_> = cache.read(KEY).unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 7, 9]);
        assert_eq!(cache.pending_mutations(KEY), 0);
    }

    #[test]
    fn commit_drops_placeholder_when_confirmed_record_already_listed() {
        let cache = loaded_cache();
        let pending = PendingMutation::begin(
            &cache,
            KEY,
            MutationKind::Create {
                placeholder: expense(-1, "Book", 30.0),
            },
        );
        cache.update(KEY, |expenses| expenses.insert(0, expense(7, "Book", 30.0)));

        pending.commit(Some(&expense(7, "Book", 30.0)));

        let ids: Vec<_> = cache.read(KEY).unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![7, 1, 2, 3]);
    }

    #[test]
    fn nothing_is_overlaid_or_restored_when_nothing_is_loaded() {
        let cache = ExpenseCache::new();

        let pending = PendingMutation::begin(
            &cache,
            KEY,
            MutationKind::Create {
                placeholder: expense(-1, "Book", 30.0),
            },
        );
        assert_eq!(cache.read(KEY), None);

        pending.rollback();
        assert_eq!(cache.read(KEY), None);
    }

    #[test]
    fn dropping_without_outcome_releases_fetch_hold_and_keeps_overlay() {
        let cache = loaded_cache();
        let pending = PendingMutation::begin(&cache, KEY, MutationKind::Delete { id: 2 });

        drop(pending);

        assert_eq!(cache.pending_mutations(KEY), 0);
        assert_eq!(cache.read(KEY).unwrap().len(), 2);
    }
}
