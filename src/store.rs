// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Transaction persistence.
//!
//! The store owns two things per retailer: the mutable aggregate and the
//! append-only transaction log. Every write that touches both does so as one
//! unit, and every read returns a view in which they agree.

use crate::LedgerError;
use crate::base::{ActorId, RequestId, RetailerId, TransactionId};
use crate::reconciliation::ReconciliationRecord;
use crate::retailer::RetailerState;
use crate::transaction::{Snapshot, Transaction, TransactionStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::collections::hash_map;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// The state replay starts from, and the last sequence number it covers.
///
/// Registration anchors at the initial state with `after_sequence == 0`.
/// A credit limit change re-anchors at the current head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayAnchor {
    pub state: RetailerState,
    pub after_sequence: u64,
}

/// A transaction computed by the engine, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    pub snapshot: Snapshot,
    pub actor_id: ActorId,
    pub request_id: Option<RequestId>,
}

/// Result of [`TransactionStore::append_and_commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(Transaction),
    /// The request id was already committed. Nothing was written.
    Duplicate(Transaction),
}

impl CommitOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            Self::Committed(tx) | Self::Duplicate(tx) => tx,
        }
    }

    pub fn into_transaction(self) -> Transaction {
        match self {
            Self::Committed(tx) | Self::Duplicate(tx) => tx,
        }
    }
}

/// History filter. The default selects every transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    pub statuses: Option<Vec<TransactionStatus>>,
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub to: Option<DateTime<Utc>>,
}

impl HistoryQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.statuses.get_or_insert_with(Vec::new).push(status);
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn matches(&self, transaction: &Transaction) -> bool {
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&transaction.status) {
                return false;
            }
        }
        if self.from.is_some_and(|from| transaction.created_at < from) {
            return false;
        }
        if self.to.is_some_and(|to| transaction.created_at >= to) {
            return false;
        }
        true
    }
}

/// Consistent read of one retailer: aggregate, anchor and full history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerView {
    pub state: RetailerState,
    pub anchor: ReplayAnchor,
    /// Ordered by `created_at`, then `sequence`.
    pub transactions: Vec<Transaction>,
}

impl LedgerView {
    /// Transactions replay has to fold, after the anchor.
    pub fn since_anchor(&self) -> impl Iterator<Item = &Transaction> {
        let after = self.anchor.after_sequence;
        self.transactions.iter().filter(move |tx| tx.sequence > after)
    }
}

/// Persistence boundary of the ledger.
pub trait TransactionStore: Send + Sync {
    /// Creates the aggregate of a new retailer.
    fn register(&self, retailer_id: RetailerId, initial: RetailerState) -> Result<(), LedgerError>;

    fn get_aggregate(&self, retailer_id: RetailerId) -> Result<RetailerState, LedgerError>;

    fn retailers(&self) -> Result<Vec<RetailerId>, LedgerError>;

    /// Persists a transaction row and the aggregate it produced as one unit.
    ///
    /// A request id already committed for this retailer yields
    /// [`CommitOutcome::Duplicate`] with the original row.
    fn append_and_commit(
        &self,
        retailer_id: RetailerId,
        pending: PendingTransaction,
        new_state: RetailerState,
    ) -> Result<CommitOutcome, LedgerError>;

    fn find_by_request(
        &self,
        retailer_id: RetailerId,
        request_id: &RequestId,
    ) -> Result<Option<Transaction>, LedgerError>;

    /// Ordered by `created_at` ascending, ties broken by `sequence`.
    fn list_history(
        &self,
        retailer_id: RetailerId,
        query: &HistoryQuery,
    ) -> Result<Vec<Transaction>, LedgerError>;

    fn read_view(&self, retailer_id: RetailerId) -> Result<LedgerView, LedgerError>;

    /// Marks a transaction cancelled and writes the recomputed aggregate as one unit.
    fn cancel_and_commit(
        &self,
        retailer_id: RetailerId,
        transaction_id: TransactionId,
        new_state: RetailerState,
    ) -> Result<Transaction, LedgerError>;

    /// Writes a new aggregate and re-anchors replay at the current head.
    fn rebase(&self, retailer_id: RetailerId, new_state: RetailerState) -> Result<(), LedgerError>;

    /// Overwrites the aggregate and records why, as one unit.
    fn replace_aggregate(
        &self,
        retailer_id: RetailerId,
        new_state: RetailerState,
        record: ReconciliationRecord,
    ) -> Result<(), LedgerError>;

    fn reconciliations(
        &self,
        retailer_id: RetailerId,
    ) -> Result<Vec<ReconciliationRecord>, LedgerError>;
}

#[derive(Debug)]
struct RetailerBook {
    state: RetailerState,
    anchor: ReplayAnchor,
    transactions: Vec<Transaction>,
    /// Request ids to positions in `transactions`.
    requests: HashMap<RequestId, usize>,
    reconciliations: Vec<ReconciliationRecord>,
}

impl RetailerBook {
    fn new(initial: RetailerState) -> Self {
        Self {
            state: initial,
            anchor: ReplayAnchor {
                state: initial,
                after_sequence: 0,
            },
            transactions: Vec::new(),
            requests: HashMap::new(),
            reconciliations: Vec::new(),
        }
    }

    fn head_sequence(&self) -> u64 {
        self.transactions.last().map(|tx| tx.sequence).unwrap_or(0)
    }

    /// Commit timestamps never go backwards within one retailer, so
    /// `created_at` order is commit order.
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.transactions.last() {
            Some(last) if last.created_at > now => last.created_at,
            _ => now,
        }
    }
}

/// In-memory store.
///
/// Each retailer's book sits behind its own [`RwLock`]: writers take it
/// exclusively for the whole commit, readers share it, so a reader never
/// sees a transaction row without its aggregate update.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    books: DashMap<RetailerId, Arc<RwLock<RetailerBook>>>,
    sequence: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn book(&self, retailer_id: RetailerId) -> Result<Arc<RwLock<RetailerBook>>, LedgerError> {
        self.books
            .get(&retailer_id)
            .map(|book| Arc::clone(&book))
            .ok_or(LedgerError::RetailerNotFound(retailer_id))
    }

    /// Overwrites the stored aggregate without any bookkeeping.
    ///
    /// Simulates the unguarded field writes that cause drift, so tests can
    /// exercise reconciliation. Not for production paths.
    #[doc(hidden)]
    pub fn corrupt_aggregate(
        &self,
        retailer_id: RetailerId,
        state: RetailerState,
    ) -> Result<(), LedgerError> {
        self.book(retailer_id)?.write().state = state;
        Ok(())
    }

    /// Flips a status without touching the aggregate or neighbouring rows.
    #[doc(hidden)]
    pub fn force_status(
        &self,
        retailer_id: RetailerId,
        transaction_id: TransactionId,
        status: TransactionStatus,
    ) -> Result<(), LedgerError> {
        let book = self.book(retailer_id)?;
        let mut book = book.write();
        let tx = book
            .transactions
            .iter_mut()
            .find(|tx| tx.id == transaction_id)
            .ok_or(LedgerError::TransactionNotFound(transaction_id))?;
        tx.status = status;
        Ok(())
    }
}

impl TransactionStore for InMemoryStore {
    fn register(&self, retailer_id: RetailerId, initial: RetailerState) -> Result<(), LedgerError> {
        // Entry API for an atomic check-and-insert.
        match self.books.entry(retailer_id) {
            Entry::Occupied(_) => Err(LedgerError::RetailerExists(retailer_id)),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(RwLock::new(RetailerBook::new(initial))));
                Ok(())
            }
        }
    }

    fn get_aggregate(&self, retailer_id: RetailerId) -> Result<RetailerState, LedgerError> {
        Ok(self.book(retailer_id)?.read().state)
    }

    fn retailers(&self) -> Result<Vec<RetailerId>, LedgerError> {
        let mut ids: Vec<RetailerId> = self.books.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        Ok(ids)
    }

    fn append_and_commit(
        &self,
        retailer_id: RetailerId,
        pending: PendingTransaction,
        new_state: RetailerState,
    ) -> Result<CommitOutcome, LedgerError> {
        let book = self.book(retailer_id)?;
        let mut guard = book.write();
        let book = &mut *guard;

        let created_at = book.next_timestamp();
        let position = book.transactions.len();
        if let Some(request_id) = &pending.request_id {
            match book.requests.entry(request_id.clone()) {
                hash_map::Entry::Occupied(entry) => {
                    let original = book.transactions[*entry.get()].clone();
                    return Ok(CommitOutcome::Duplicate(original));
                }
                hash_map::Entry::Vacant(entry) => {
                    entry.insert(position);
                }
            }
        }

        let transaction = Transaction {
            id: TransactionId::new(),
            retailer_id,
            status: TransactionStatus::Completed,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            created_at,
            actor_id: pending.actor_id,
            request_id: pending.request_id,
            snapshot: pending.snapshot,
        };
        book.transactions.push(transaction.clone());
        book.state = new_state;
        Ok(CommitOutcome::Committed(transaction))
    }

    fn find_by_request(
        &self,
        retailer_id: RetailerId,
        request_id: &RequestId,
    ) -> Result<Option<Transaction>, LedgerError> {
        let book = self.book(retailer_id)?;
        let book = book.read();
        Ok(book
            .requests
            .get(request_id)
            .map(|position| book.transactions[*position].clone()))
    }

    fn list_history(
        &self,
        retailer_id: RetailerId,
        query: &HistoryQuery,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let book = self.book(retailer_id)?;
        let mut history: Vec<Transaction> = book
            .read()
            .transactions
            .iter()
            .filter(|tx| query.matches(tx))
            .cloned()
            .collect();
        history.sort_by_key(|tx| (tx.created_at, tx.sequence));
        Ok(history)
    }

    fn read_view(&self, retailer_id: RetailerId) -> Result<LedgerView, LedgerError> {
        let book = self.book(retailer_id)?;
        let book = book.read();
        let mut transactions = book.transactions.clone();
        transactions.sort_by_key(|tx| (tx.created_at, tx.sequence));
        Ok(LedgerView {
            state: book.state,
            anchor: book.anchor,
            transactions,
        })
    }

    fn cancel_and_commit(
        &self,
        retailer_id: RetailerId,
        transaction_id: TransactionId,
        new_state: RetailerState,
    ) -> Result<Transaction, LedgerError> {
        let book = self.book(retailer_id)?;
        let mut book = book.write();
        let tx = book
            .transactions
            .iter_mut()
            .find(|tx| tx.id == transaction_id)
            .ok_or(LedgerError::TransactionNotFound(transaction_id))?;
        if tx.status == TransactionStatus::Cancelled {
            return Err(LedgerError::AlreadyCancelled(transaction_id));
        }
        tx.status = TransactionStatus::Cancelled;
        let cancelled = tx.clone();
        book.state = new_state;
        Ok(cancelled)
    }

    fn rebase(&self, retailer_id: RetailerId, new_state: RetailerState) -> Result<(), LedgerError> {
        let book = self.book(retailer_id)?;
        let mut book = book.write();
        book.anchor = ReplayAnchor {
            state: new_state,
            after_sequence: book.head_sequence(),
        };
        book.state = new_state;
        Ok(())
    }

    fn replace_aggregate(
        &self,
        retailer_id: RetailerId,
        new_state: RetailerState,
        record: ReconciliationRecord,
    ) -> Result<(), LedgerError> {
        let book = self.book(retailer_id)?;
        let mut book = book.write();
        book.state = new_state;
        book.reconciliations.push(record);
        Ok(())
    }

    fn reconciliations(
        &self,
        retailer_id: RetailerId,
    ) -> Result<Vec<ReconciliationRecord>, LedgerError> {
        Ok(self.book(retailer_id)?.read().reconciliations.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LedgerEngine;
    use crate::transaction::TransactionRequest;
    use rust_decimal_macros::dec;

    fn pending(state: &RetailerState, request: &TransactionRequest) -> (PendingTransaction, RetailerState) {
        let transition = LedgerEngine::transition(state, request).unwrap();
        (
            PendingTransaction {
                snapshot: transition.snapshot,
                actor_id: ActorId(1),
                request_id: request.request_id.clone(),
            },
            transition.state,
        )
    }

    fn registered() -> (InMemoryStore, RetailerState) {
        let store = InMemoryStore::new();
        let initial = RetailerState::new(dec!(1000), dec!(0.05));
        store.register(RetailerId(1), initial).unwrap();
        (store, initial)
    }

    #[test]
    fn duplicate_registration_returns_error() {
        let (store, initial) = registered();
        assert_eq!(
            store.register(RetailerId(1), initial),
            Err(LedgerError::RetailerExists(RetailerId(1)))
        );
    }

    #[test]
    fn unknown_retailer_returns_error() {
        let store = InMemoryStore::new();
        assert_eq!(
            store.get_aggregate(RetailerId(9)),
            Err(LedgerError::RetailerNotFound(RetailerId(9)))
        );
    }

    #[test]
    fn commit_writes_row_and_aggregate_together() {
        let (store, initial) = registered();
        let (tx, next) = pending(&initial, &TransactionRequest::discount(dec!(100)));
        let outcome = store.append_and_commit(RetailerId(1), tx, next).unwrap();

        let view = store.read_view(RetailerId(1)).unwrap();
        assert_eq!(view.state, next);
        assert_eq!(view.transactions, vec![outcome.into_transaction()]);
        assert_eq!(view.transactions[0].status, TransactionStatus::Completed);
    }

    #[test]
    fn duplicate_request_id_returns_original() {
        let (store, initial) = registered();
        let request = TransactionRequest::discount(dec!(100)).with_request_id("giro-7");
        let (tx, next) = pending(&initial, &request);
        let first = store.append_and_commit(RetailerId(1), tx.clone(), next).unwrap();

        let (retry, retry_state) = pending(&next, &request);
        let second = store.append_and_commit(RetailerId(1), retry, retry_state).unwrap();

        assert!(matches!(first, CommitOutcome::Committed(_)));
        assert_eq!(second, CommitOutcome::Duplicate(first.transaction().clone()));
        assert_eq!(store.get_aggregate(RetailerId(1)).unwrap(), next);
        assert_eq!(
            store
                .find_by_request(RetailerId(1), &RequestId::new("giro-7"))
                .unwrap()
                .map(|tx| tx.id),
            Some(first.transaction().id)
        );
    }

    #[test]
    fn history_is_ordered_and_filtered() {
        let (store, initial) = registered();
        let mut state = initial;
        let mut ids = Vec::new();
        for amount in [dec!(10), dec!(20), dec!(30)] {
            let (tx, next) = pending(&state, &TransactionRequest::discount(amount));
            ids.push(store.append_and_commit(RetailerId(1), tx, next).unwrap().transaction().id);
            state = next;
        }
        store
            .cancel_and_commit(RetailerId(1), ids[2], state)
            .unwrap();

        let all = store.list_history(RetailerId(1), &HistoryQuery::all()).unwrap();
        assert_eq!(all.iter().map(|tx| tx.id).collect::<Vec<_>>(), ids);
        assert!(all.windows(2).all(|w| w[0].sequence < w[1].sequence));
        assert!(all.windows(2).all(|w| w[0].created_at <= w[1].created_at));

        let completed = store
            .list_history(
                RetailerId(1),
                &HistoryQuery::all().with_status(TransactionStatus::Completed),
            )
            .unwrap();
        assert_eq!(completed.len(), 2);

        let future = Utc::now() + chrono::Duration::hours(1);
        let none = store
            .list_history(
                RetailerId(1),
                &HistoryQuery::all().between(future, future + chrono::Duration::hours(1)),
            )
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn cancelling_twice_returns_error() {
        let (store, initial) = registered();
        let (tx, next) = pending(&initial, &TransactionRequest::discount(dec!(10)));
        let id = store.append_and_commit(RetailerId(1), tx, next).unwrap().transaction().id;
        store.cancel_and_commit(RetailerId(1), id, initial).unwrap();
        assert_eq!(
            store.cancel_and_commit(RetailerId(1), id, initial),
            Err(LedgerError::AlreadyCancelled(id))
        );
    }

    #[test]
    fn rebase_moves_the_anchor_to_the_head() {
        let (store, initial) = registered();
        let (tx, next) = pending(&initial, &TransactionRequest::discount(dec!(10)));
        let committed = store.append_and_commit(RetailerId(1), tx, next).unwrap();
        let relimited = LedgerEngine::set_credit_limit(&next, dec!(2000)).unwrap();
        store.rebase(RetailerId(1), relimited).unwrap();

        let view = store.read_view(RetailerId(1)).unwrap();
        assert_eq!(view.anchor.state, relimited);
        assert_eq!(view.anchor.after_sequence, committed.transaction().sequence);
        assert_eq!(view.since_anchor().count(), 0);
    }
}
