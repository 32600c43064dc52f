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

//! Deterministic replay of a retailer's history.
//!
//! Replay folds [`LedgerEngine::transition`] over the settled transactions of
//! one retailer, in `created_at` order, starting from an anchor state.
//! Cancelled and pending rows are filtered out before folding. Each
//! transaction is replayed with the profit percentage recorded on its own
//! snapshot.

use crate::LedgerError;
use crate::base::{RetailerId, TransactionId};
use crate::engine::LedgerEngine;
use crate::retailer::RetailerState;
use crate::store::LedgerView;
use crate::transaction::{Snapshot, Transaction};

/// One folded transaction: what was recorded at creation and what replay computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayStep {
    pub transaction_id: TransactionId,
    pub sequence: u64,
    pub recorded: Snapshot,
    pub recomputed: Snapshot,
}

impl ReplayStep {
    pub fn matches(&self) -> bool {
        self.recorded == self.recomputed
    }
}

/// Result of a replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub state: RetailerState,
    pub steps: Vec<ReplayStep>,
    /// Rows excluded from the fold because they are not settled.
    pub skipped: Vec<TransactionId>,
}

/// Read-only history folder.
pub struct ReplayProjector;

impl ReplayProjector {
    /// Replays `transactions` on top of `anchor`.
    ///
    /// `transactions` must already be ordered by `created_at`, then `sequence`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::RetailerMismatch`] - a row belongs to another retailer.
    /// - [`LedgerError::ReplayRejected`] - the engine refuses a settled row.
    pub fn project<'a>(
        retailer_id: RetailerId,
        anchor: &RetailerState,
        transactions: impl IntoIterator<Item = &'a Transaction>,
    ) -> Result<Projection, LedgerError> {
        let mut state = *anchor;
        let mut steps = Vec::new();
        let mut skipped = Vec::new();

        for tx in transactions {
            if tx.retailer_id != retailer_id {
                return Err(LedgerError::RetailerMismatch(tx.id));
            }
            if !tx.is_settled() {
                skipped.push(tx.id);
                continue;
            }
            let step = Self::step(&state, tx)?;
            state = step.0;
            steps.push(step.1);
        }

        // The fold borrows each row's rate; the result keeps the anchor's.
        state.profit_percentage = anchor.profit_percentage;

        Ok(Projection {
            state,
            steps,
            skipped,
        })
    }

    /// Replays everything after the view's anchor.
    pub fn project_view(
        retailer_id: RetailerId,
        view: &LedgerView,
    ) -> Result<Projection, LedgerError> {
        Self::project(retailer_id, &view.anchor.state, view.since_anchor())
    }

    /// Folds one more settled transaction onto a previous result.
    pub fn extend(
        projection: &Projection,
        tx: &Transaction,
    ) -> Result<RetailerState, LedgerError> {
        let profit_percentage = projection.state.profit_percentage;
        let (mut state, _) = Self::step(&projection.state, tx)?;
        state.profit_percentage = profit_percentage;
        Ok(state)
    }

    fn step(
        state: &RetailerState,
        tx: &Transaction,
    ) -> Result<(RetailerState, ReplayStep), LedgerError> {
        let at_rate = RetailerState {
            profit_percentage: tx.snapshot.profit_percentage,
            ..*state
        };
        let transition = LedgerEngine::transition(&at_rate, &tx.to_request()).map_err(|e| {
            LedgerError::ReplayRejected {
                transaction_id: tx.id,
                reason: Box::new(e),
            }
        })?;
        Ok((
            transition.state,
            ReplayStep {
                transaction_id: tx.id,
                sequence: tx.sequence,
                recorded: tx.snapshot,
                recomputed: transition.snapshot,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::ActorId;
    use crate::transaction::{TransactionRequest, TransactionStatus};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn history(anchor: &RetailerState, requests: &[TransactionRequest]) -> Vec<Transaction> {
        let mut state = *anchor;
        requests
            .iter()
            .enumerate()
            .map(|(i, request)| {
                let t = LedgerEngine::transition(&state, request).unwrap();
                state = t.state;
                Transaction {
                    id: TransactionId::new(),
                    retailer_id: RetailerId(1),
                    status: TransactionStatus::Completed,
                    sequence: i as u64 + 1,
                    created_at: Utc::now(),
                    actor_id: ActorId(1),
                    request_id: None,
                    snapshot: t.snapshot,
                }
            })
            .collect()
    }

    #[test]
    fn replay_reproduces_live_state() {
        let anchor = RetailerState::new(dec!(1000), dec!(0.05));
        let requests = [
            TransactionRequest::discount(dec!(400)),
            TransactionRequest::recharge(dec!(600)),
            TransactionRequest::discount(dec!(100)),
        ];
        let live = LedgerEngine::fold(&anchor, &requests).unwrap();
        let projection =
            ReplayProjector::project(RetailerId(1), &anchor, &history(&anchor, &requests)).unwrap();
        assert_eq!(projection.state, live);
        assert!(projection.steps.iter().all(ReplayStep::matches));
    }

    #[test]
    fn cancelled_rows_are_skipped() {
        let anchor = RetailerState::new(dec!(1000), dec!(0));
        let mut rows = history(
            &anchor,
            &[
                TransactionRequest::discount(dec!(100)),
                TransactionRequest::discount(dec!(50)),
            ],
        );
        rows[1].status = TransactionStatus::Cancelled;
        let projection = ReplayProjector::project(RetailerId(1), &anchor, &rows).unwrap();
        assert_eq!(projection.state.available_credit, dec!(900));
        assert_eq!(projection.skipped, vec![rows[1].id]);
    }

    #[test]
    fn pending_rows_are_replayed() {
        let anchor = RetailerState::new(dec!(1000), dec!(0));
        let mut rows = history(
            &anchor,
            &[
                TransactionRequest::discount(dec!(100)),
                TransactionRequest::discount(dec!(50)),
            ],
        );
        rows[1].status = TransactionStatus::Pending;
        let projection = ReplayProjector::project(RetailerId(1), &anchor, &rows).unwrap();
        assert_eq!(projection.state.available_credit, dec!(850));
        assert!(projection.skipped.is_empty());
    }

    #[test]
    fn foreign_rows_are_rejected() {
        let anchor = RetailerState::new(dec!(1000), dec!(0));
        let rows = history(&anchor, &[TransactionRequest::discount(dec!(10))]);
        assert_eq!(
            ReplayProjector::project(RetailerId(2), &anchor, &rows),
            Err(LedgerError::RetailerMismatch(rows[0].id))
        );
    }

    #[test]
    fn unreplayable_row_is_reported() {
        let anchor = RetailerState::new(dec!(1000), dec!(0.05));
        let rows = history(&anchor, &[TransactionRequest::discount(dec!(900))]);
        // Replaying from an anchor with less credit makes the discount impossible.
        let poorer = RetailerState {
            available_credit: dec!(100),
            ..anchor
        };
        assert_eq!(
            ReplayProjector::project(RetailerId(1), &poorer, &rows),
            Err(LedgerError::ReplayRejected {
                transaction_id: rows[0].id,
                reason: Box::new(LedgerError::InsufficientBalance),
            })
        );
    }
}
