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

//! Ledger entry point.
//!
//! [`LedgerService`] is the only component that mutates retailer aggregates.
//! Every mutation follows the same cycle:
//!
//! 1. Acquire the retailer lock (bounded wait, [`LedgerError::LockTimeout`] otherwise).
//! 2. Load the aggregate.
//! 3. Run the engine.
//! 4. Commit the transaction row and the new aggregate as one unit.
//! 5. Release the lock.
//!
//! An engine error releases the lock without writing anything.
//!
//! # Thread Safety
//!
//! Mutations on the same retailer are serialized by the [`KeyedLock`];
//! mutations on different retailers run in parallel.

use crate::LedgerError;
use crate::base::{ActorId, RetailerId, TransactionId};
use crate::config::LedgerConfig;
use crate::engine::LedgerEngine;
use crate::guard::{KeyedLock, LocalKeyedLock};
use crate::replay::ReplayProjector;
use crate::retailer::RetailerState;
use crate::store::{CommitOutcome, HistoryQuery, InMemoryStore, PendingTransaction, TransactionStore};
use crate::transaction::{Transaction, TransactionRequest, TransactionStatus};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

/// Why a retailer's balances changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalanceChange {
    Applied(Transaction),
    Cancelled(Transaction),
    CreditLimit { previous: Decimal },
    ProfitPercentage { previous: Decimal },
}

/// Published after every committed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceChanged {
    pub retailer_id: RetailerId,
    pub actor_id: ActorId,
    pub change: BalanceChange,
    pub state: RetailerState,
}

/// Serialized read-modify-write over a [`TransactionStore`].
pub struct LedgerService<S, L> {
    store: Arc<S>,
    guard: Arc<L>,
    subscribers: Mutex<Vec<Sender<BalanceChanged>>>,
}

impl LedgerService<InMemoryStore, LocalKeyedLock> {
    /// Service over a fresh in-memory store and an in-process lock.
    pub fn in_memory(config: &LedgerConfig) -> Self {
        Self::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(LocalKeyedLock::new(config.lock_timeout())),
        )
    }
}

impl<S: TransactionStore, L: KeyedLock> LedgerService<S, L> {
    pub fn new(store: Arc<S>, guard: Arc<L>) -> Self {
        Self {
            store,
            guard,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn guard(&self) -> &Arc<L> {
        &self.guard
    }

    /// Registers a retailer at the canonical anchor: the whole limit
    /// available, no surplus.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - negative limit or percentage.
    /// - [`LedgerError::RetailerExists`] - id already registered.
    pub fn register_retailer(
        &self,
        retailer_id: RetailerId,
        credit_limit: Decimal,
        profit_percentage: Decimal,
    ) -> Result<RetailerState, LedgerError> {
        if credit_limit < Decimal::ZERO || profit_percentage < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        self.register_with_anchor(retailer_id, RetailerState::new(credit_limit, profit_percentage))
    }

    /// Registers a retailer migrated with pre-existing balances.
    ///
    /// The given state becomes the replay anchor, so it must be established
    /// by the migration, not inferred from a possibly drifted aggregate.
    pub fn register_with_anchor(
        &self,
        retailer_id: RetailerId,
        anchor: RetailerState,
    ) -> Result<RetailerState, LedgerError> {
        if !anchor.check_invariants().is_empty() || anchor.profit_percentage < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        self.store.register(retailer_id, anchor)?;
        info!(
            retailer = %retailer_id,
            credit_limit = %anchor.credit_limit,
            available_credit = %anchor.available_credit,
            "retailer registered"
        );
        Ok(anchor)
    }

    /// Applies one transaction request.
    ///
    /// A request carrying a request id that was already committed for this
    /// retailer returns the original transaction and writes nothing.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::LockTimeout`] - retryable. The request may or may not have been
    ///   applied by a concurrent attempt; retry with the same request id.
    /// - [`LedgerError::RetailerNotFound`] - unknown retailer.
    /// - [`LedgerError::InsufficientBalance`], [`LedgerError::NegativeAdjustment`],
    ///   [`LedgerError::InvalidAmount`] - rejected by the engine; nothing is written.
    pub fn apply(
        &self,
        retailer_id: RetailerId,
        request: TransactionRequest,
        actor_id: ActorId,
    ) -> Result<Transaction, LedgerError> {
        let _lock = self.guard.lock(retailer_id)?;

        if let Some(request_id) = &request.request_id {
            if let Some(existing) = self.store.find_by_request(retailer_id, request_id)? {
                info!(retailer = %retailer_id, request = %request_id, tx = %existing.id, "duplicate request");
                return Ok(existing);
            }
        }

        let state = self.store.get_aggregate(retailer_id)?;
        let transition = LedgerEngine::transition(&state, &request).inspect_err(|e| {
            warn!(
                retailer = %retailer_id,
                kind = %request.kind,
                amount = %request.amount,
                reason = %e,
                "transaction rejected"
            );
        })?;

        let pending = PendingTransaction {
            snapshot: transition.snapshot,
            actor_id,
            request_id: request.request_id.clone(),
        };
        let transaction = match self
            .store
            .append_and_commit(retailer_id, pending, transition.state)?
        {
            CommitOutcome::Committed(tx) => tx,
            CommitOutcome::Duplicate(tx) => return Ok(tx),
        };

        info!(
            retailer = %retailer_id,
            tx = %transaction.id,
            kind = %request.kind,
            amount = %request.amount,
            available_credit = %transition.state.available_credit,
            balance_in_favor = %transition.state.balance_in_favor,
            debt = %transition.snapshot.accumulated_debt,
            "transaction applied"
        );
        self.publish(BalanceChanged {
            retailer_id,
            actor_id,
            change: BalanceChange::Applied(transaction.clone()),
            state: transition.state,
        });
        Ok(transaction)
    }

    /// Changes the credit limit, keeping debt. Replay re-anchors at this point.
    pub fn set_credit_limit(
        &self,
        retailer_id: RetailerId,
        credit_limit: Decimal,
        actor_id: ActorId,
    ) -> Result<RetailerState, LedgerError> {
        let _lock = self.guard.lock(retailer_id)?;
        let state = self.store.get_aggregate(retailer_id)?;
        let next = LedgerEngine::set_credit_limit(&state, credit_limit)?;
        self.store.rebase(retailer_id, next)?;

        info!(
            retailer = %retailer_id,
            actor = %actor_id,
            previous = %state.credit_limit,
            credit_limit = %credit_limit,
            "credit limit changed"
        );
        self.publish(BalanceChanged {
            retailer_id,
            actor_id,
            change: BalanceChange::CreditLimit {
                previous: state.credit_limit,
            },
            state: next,
        });
        Ok(next)
    }

    /// Changes the rate applied to future discounts and refunds.
    pub fn set_profit_percentage(
        &self,
        retailer_id: RetailerId,
        profit_percentage: Decimal,
        actor_id: ActorId,
    ) -> Result<RetailerState, LedgerError> {
        if profit_percentage < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        let _lock = self.guard.lock(retailer_id)?;
        let state = self.store.get_aggregate(retailer_id)?;
        let next = RetailerState {
            profit_percentage,
            ..state
        };
        self.store.rebase(retailer_id, next)?;

        info!(
            retailer = %retailer_id,
            actor = %actor_id,
            previous = %state.profit_percentage,
            profit_percentage = %profit_percentage,
            "profit percentage changed"
        );
        self.publish(BalanceChanged {
            retailer_id,
            actor_id,
            change: BalanceChange::ProfitPercentage {
                previous: state.profit_percentage,
            },
            state: next,
        });
        Ok(next)
    }

    /// Cancels the latest settled transaction of a retailer.
    ///
    /// The aggregate is recomputed by replaying the remaining history and
    /// written together with the status change.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::TransactionNotFound`] / [`LedgerError::AlreadyCancelled`].
    /// - [`LedgerError::HasSuccessors`] - a later settled transaction, or a replay
    ///   anchor, was computed from this transaction's output.
    /// - [`LedgerError::Inconsistent`] - the stored aggregate has drifted from its
    ///   history; it must be reconciled first.
    pub fn cancel(
        &self,
        retailer_id: RetailerId,
        transaction_id: TransactionId,
        actor_id: ActorId,
    ) -> Result<Transaction, LedgerError> {
        let _lock = self.guard.lock(retailer_id)?;
        let view = self.store.read_view(retailer_id)?;

        let target = view
            .transactions
            .iter()
            .find(|tx| tx.id == transaction_id)
            .ok_or(LedgerError::TransactionNotFound(transaction_id))?;
        if target.status == TransactionStatus::Cancelled {
            return Err(LedgerError::AlreadyCancelled(transaction_id));
        }
        let has_successors = target.sequence <= view.anchor.after_sequence
            || view
                .transactions
                .iter()
                .any(|tx| tx.sequence > target.sequence && tx.is_settled());
        if has_successors {
            return Err(LedgerError::HasSuccessors(transaction_id));
        }

        let current = ReplayProjector::project_view(retailer_id, &view)?;
        if current.state != view.state {
            warn!(retailer = %retailer_id, "cancellation refused on drifted ledger");
            return Err(LedgerError::Inconsistent(retailer_id));
        }
        let remaining = ReplayProjector::project(
            retailer_id,
            &view.anchor.state,
            view.since_anchor().filter(|tx| tx.id != transaction_id),
        )?;

        let cancelled = self
            .store
            .cancel_and_commit(retailer_id, transaction_id, remaining.state)?;

        info!(
            retailer = %retailer_id,
            tx = %transaction_id,
            actor = %actor_id,
            available_credit = %remaining.state.available_credit,
            "transaction cancelled"
        );
        self.publish(BalanceChanged {
            retailer_id,
            actor_id,
            change: BalanceChange::Cancelled(cancelled.clone()),
            state: remaining.state,
        });
        Ok(cancelled)
    }

    pub fn aggregate(&self, retailer_id: RetailerId) -> Result<RetailerState, LedgerError> {
        self.store.get_aggregate(retailer_id)
    }

    pub fn debt(&self, retailer_id: RetailerId) -> Result<Decimal, LedgerError> {
        Ok(self.store.get_aggregate(retailer_id)?.debt())
    }

    pub fn history(
        &self,
        retailer_id: RetailerId,
        query: &HistoryQuery,
    ) -> Result<Vec<Transaction>, LedgerError> {
        self.store.list_history(retailer_id, query)
    }

    pub fn retailers(&self) -> Result<Vec<RetailerId>, LedgerError> {
        self.store.retailers()
    }

    /// Receives a [`BalanceChanged`] event for every committed mutation.
    pub fn subscribe(&self) -> Receiver<BalanceChanged> {
        let (sender, receiver) = channel::unbounded();
        self.subscribers.lock().push(sender);
        receiver
    }

    fn publish(&self, event: BalanceChanged) {
        // Dropped receivers are pruned on the next publish.
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}
