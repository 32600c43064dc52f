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

//! Ledger state transitions.
//!
//! [`LedgerEngine`] is a pure function from `(state, request)` to
//! `(new state, snapshot)`. It performs no I/O and holds no state, so the
//! same input always produces the same output. Replay and reconciliation
//! depend on that.
//!
//! # Transaction Kinds
//!
//! | Kind | Behavior |
//! |------|----------|
//! | Recharge | Adds funds, overflow beyond the limit goes to balance-in-favor. Resets accumulated profit |
//! | Discount | Spends balance-in-favor first, then credit. Earns `amount * profit_percentage` |
//! | Refund | Returns a discount net of its profit, pooling all liquidity |
//! | Adjustment | Signed change of available credit, never below zero |
//! | Profit | Credits profit with the recharge fill rule, keeps accumulated profit |

use crate::LedgerError;
use crate::retailer::RetailerState;
use crate::transaction::{Snapshot, TransactionKind, TransactionRequest};
use rust_decimal::Decimal;

/// Output of a successful transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: RetailerState,
    pub snapshot: Snapshot,
}

/// Balance movements of a single transition, before the snapshot is assembled.
#[derive(Debug, Default)]
struct Movement {
    balance_in_favor_used: Decimal,
    credit_used: Decimal,
    external_debt: Decimal,
    profit_earned: Decimal,
}

/// Pure ledger state machine.
pub struct LedgerEngine;

impl LedgerEngine {
    /// Applies `request` to `state`.
    ///
    /// The profit percentage is read from `state`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - negative discount, refund or profit.
    /// - [`LedgerError::InsufficientBalance`] - the part of a discount not covered by
    ///   balance-in-favor and available credit exceeds the profit the discount earns.
    /// - [`LedgerError::NegativeAdjustment`] - an adjustment or negative recharge would
    ///   drive available credit below zero.
    pub fn transition(
        state: &RetailerState,
        request: &TransactionRequest,
    ) -> Result<Transition, LedgerError> {
        let amount = request.amount;
        let mut next = *state;
        let mut movement = Movement::default();

        match request.kind {
            TransactionKind::Recharge => {
                if amount < Decimal::ZERO {
                    // Direct reduction of available credit. A held surplus tops it back up.
                    let reduced = state.available_credit + amount;
                    if reduced < Decimal::ZERO {
                        return Err(LedgerError::NegativeAdjustment);
                    }
                    (next.available_credit, next.balance_in_favor) =
                        settle(state.credit_limit, reduced, state.balance_in_favor);
                } else {
                    (next.available_credit, next.balance_in_favor) = fill(
                        state.credit_limit,
                        state.available_credit + amount,
                        state.balance_in_favor,
                    );
                }
                next.accumulated_profit = Decimal::ZERO;
            }
            TransactionKind::Discount => {
                ensure_principal(amount)?;
                let immediate_profit = amount * state.profit_percentage;

                // Balance-in-favor is consumed first.
                let used = state.balance_in_favor.min(amount);
                let balance_in_favor = state.balance_in_favor - used;
                let remaining = amount - used;

                // Then available credit. Whatever is left is external debt.
                let (credit_used, external_debt, available) =
                    if remaining <= state.available_credit {
                        (remaining, Decimal::ZERO, state.available_credit - remaining)
                    } else {
                        (
                            state.available_credit,
                            remaining - state.available_credit,
                            Decimal::ZERO,
                        )
                    };

                if external_debt > immediate_profit {
                    return Err(LedgerError::InsufficientBalance);
                }

                // The whole profit is credited. External debt is only recorded.
                (next.available_credit, next.balance_in_favor) =
                    fill(state.credit_limit, available + immediate_profit, balance_in_favor);
                next.accumulated_profit = state.accumulated_profit + immediate_profit;

                movement = Movement {
                    balance_in_favor_used: used,
                    credit_used,
                    external_debt,
                    profit_earned: immediate_profit,
                };
            }
            TransactionKind::Refund => {
                ensure_principal(amount)?;
                let profit_to_revert = amount * state.profit_percentage;
                let net_refund = amount - profit_to_revert;
                let total_liquidity = state.liquidity() + net_refund;

                if total_liquidity > state.credit_limit {
                    next.available_credit = state.credit_limit;
                    next.balance_in_favor = total_liquidity - state.credit_limit;
                } else {
                    next.available_credit = total_liquidity;
                    next.balance_in_favor = Decimal::ZERO;
                }
            }
            TransactionKind::Adjustment => {
                let adjusted = state.available_credit + amount;
                if adjusted < Decimal::ZERO {
                    return Err(LedgerError::NegativeAdjustment);
                }
                (next.available_credit, next.balance_in_favor) =
                    settle(state.credit_limit, adjusted, state.balance_in_favor);
            }
            TransactionKind::Profit => {
                ensure_principal(amount)?;
                (next.available_credit, next.balance_in_favor) = fill(
                    state.credit_limit,
                    state.available_credit + amount,
                    state.balance_in_favor,
                );
                next.accumulated_profit = state.accumulated_profit + amount;
                movement.profit_earned = amount;
            }
        }

        next.assert_invariants();

        let snapshot = Snapshot {
            kind: request.kind,
            amount,
            profit_percentage: state.profit_percentage,
            previous_available_credit: state.available_credit,
            available_credit: next.available_credit,
            previous_balance_in_favor: state.balance_in_favor,
            current_balance_in_favor: next.balance_in_favor,
            credit_consumed: movement.balance_in_favor_used
                + movement.credit_used
                + movement.external_debt,
            balance_in_favor_used: movement.balance_in_favor_used,
            credit_used: movement.credit_used,
            external_debt: movement.external_debt,
            profit_earned: movement.profit_earned,
            accumulated_debt: next.debt(),
            accumulated_profit: next.accumulated_profit,
        };

        Ok(Transition {
            state: next,
            snapshot,
        })
    }

    /// Changes the credit limit.
    ///
    /// All liquidity is pooled with the limit delta and redistributed with the
    /// fill rule, so existing debt is kept whenever the new limit can hold it.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - negative limit.
    /// - [`LedgerError::NegativeAdjustment`] - current debt exceeds the new limit.
    pub fn set_credit_limit(
        state: &RetailerState,
        new_limit: Decimal,
    ) -> Result<RetailerState, LedgerError> {
        ensure_principal(new_limit)?;
        let pooled = state.liquidity() + (new_limit - state.credit_limit);
        if pooled < Decimal::ZERO {
            return Err(LedgerError::NegativeAdjustment);
        }
        let (available_credit, balance_in_favor) = if pooled > new_limit {
            (new_limit, pooled - new_limit)
        } else {
            (pooled, Decimal::ZERO)
        };
        let next = RetailerState {
            credit_limit: new_limit,
            available_credit,
            balance_in_favor,
            ..*state
        };
        next.assert_invariants();
        Ok(next)
    }

    /// Folds `requests` over `anchor`, stopping at the first rejected request.
    pub fn fold<'a>(
        anchor: &RetailerState,
        requests: impl IntoIterator<Item = &'a TransactionRequest>,
    ) -> Result<RetailerState, LedgerError> {
        requests
            .into_iter()
            .try_fold(*anchor, |state, request| {
                Self::transition(&state, request).map(|t| t.state)
            })
    }
}

fn ensure_principal(amount: Decimal) -> Result<(), LedgerError> {
    if amount < Decimal::ZERO {
        return Err(LedgerError::InvalidAmount);
    }
    Ok(())
}

/// Fill rule: funds above the limit overflow into balance-in-favor.
fn fill(limit: Decimal, funds: Decimal, balance_in_favor: Decimal) -> (Decimal, Decimal) {
    if funds > limit {
        (limit, balance_in_favor + (funds - limit))
    } else {
        (funds, balance_in_favor)
    }
}

/// Fill rule plus a top-up from balance-in-favor when available credit
/// dropped below the limit while a surplus is still held.
fn settle(limit: Decimal, available: Decimal, balance_in_favor: Decimal) -> (Decimal, Decimal) {
    if available >= limit {
        return fill(limit, available, balance_in_favor);
    }
    let top_up = balance_in_favor.min(limit - available);
    (available + top_up, balance_in_favor - top_up)
}
