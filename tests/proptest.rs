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


//! Property-based tests for the ledger engine and replay.
//!
//! These tests verify invariants that should hold for any valid state and
//! any sequence of requests.

use minorista_ledger::{
    ActorId, HistoryQuery, LedgerConfig, LedgerEngine, LedgerError, LedgerService,
    ReplayProjector, RetailerId, RetailerState, TransactionKind, TransactionRequest,
};
use proptest::prelude::*;
use rust_decimal::Decimal;

// =============================================================================
// Arbitrary Strategies
// =============================================================================

/// Generate a positive amount (0.0001 to 1000 with 4 decimal places).
fn arb_amount() -> impl Strategy<Value = Decimal> {
    (1i64..=10_000_000i64).prop_map(|units| Decimal::new(units, 4))
}

/// Profit percentage between 0 and 20%.
fn arb_percentage() -> impl Strategy<Value = Decimal> {
    (0i64..=2_000i64).prop_map(|bp| Decimal::new(bp, 4))
}

fn arb_kind() -> impl Strategy<Value = TransactionKind> {
    prop_oneof![
        Just(TransactionKind::Recharge),
        Just(TransactionKind::Discount),
        Just(TransactionKind::Adjustment),
        Just(TransactionKind::Refund),
        Just(TransactionKind::Profit),
    ]
}

/// Adjustments and recharges may be negative.
fn arb_request() -> impl Strategy<Value = TransactionRequest> {
    (arb_kind(), arb_amount(), any::<bool>()).prop_map(|(kind, amount, negative)| {
        let signed = matches!(kind, TransactionKind::Adjustment | TransactionKind::Recharge);
        let amount = if signed && negative { -amount } else { amount };
        TransactionRequest::new(kind, amount)
    })
}

/// Any state where a surplus implies a full limit and debt is not negative.
fn arb_state() -> impl Strategy<Value = RetailerState> {
    (arb_amount(), 0u32..=100, arb_amount(), any::<bool>(), arb_percentage()).prop_map(
        |(limit, used_pct, surplus, has_surplus, pct)| {
            let mut state = RetailerState::new(limit, pct);
            if has_surplus {
                state.balance_in_favor = surplus;
            } else {
                state.available_credit = limit - limit * Decimal::from(used_pct) / Decimal::from(100);
            }
            state
        },
    )
}

// =============================================================================
// Engine Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// The same state and request always give the same result.
    #[test]
    fn transition_is_deterministic(state in arb_state(), request in arb_request()) {
        let first = LedgerEngine::transition(&state, &request);
        let second = LedgerEngine::transition(&state, &request);
        prop_assert_eq!(first, second);
    }

    /// Aggregate invariants hold after every accepted transition, and in its snapshot.
    #[test]
    fn invariants_hold_after_every_transition(state in arb_state(), request in arb_request()) {
        prop_assert!(state.check_invariants().is_empty());
        if let Ok(t) = LedgerEngine::transition(&state, &request) {
            prop_assert!(t.state.check_invariants().is_empty(), "{:?}", t.state);
            prop_assert!(t.snapshot.accumulated_debt >= Decimal::ZERO);
            prop_assert_eq!(t.snapshot.accumulated_debt, t.state.debt());
            if t.snapshot.current_balance_in_favor > Decimal::ZERO {
                prop_assert_eq!(t.snapshot.available_credit, t.state.credit_limit);
            }
        }
    }

    /// Rejections are only the documented ones.
    #[test]
    fn rejections_are_typed(state in arb_state(), request in arb_request()) {
        match LedgerEngine::transition(&state, &request) {
            Ok(_) => {}
            Err(LedgerError::InsufficientBalance) => {
                prop_assert_eq!(request.kind, TransactionKind::Discount);
            }
            Err(LedgerError::NegativeAdjustment) => {
                prop_assert!(request.amount < Decimal::ZERO);
            }
            Err(e) => prop_assert!(false, "unexpected error {}", e),
        }
    }

    /// A discount moves liquidity by exactly its net cost.
    #[test]
    fn discount_conserves_liquidity(state in arb_state(), amount in arb_amount()) {
        if let Ok(t) = LedgerEngine::transition(&state, &TransactionRequest::discount(amount)) {
            // External debt is owed outside the ledger, so it is not drawn from liquidity.
            let net = amount - amount * state.profit_percentage - t.snapshot.external_debt;
            prop_assert_eq!(t.state.liquidity(), state.liquidity() - net);
            prop_assert_eq!(t.snapshot.credit_consumed, amount);
        }
    }

    /// A refund of a discount restores liquidity, plus whatever external debt the discount ran up.
    #[test]
    fn refund_reverses_discount(state in arb_state(), amount in arb_amount()) {
        if let Ok(d) = LedgerEngine::transition(&state, &TransactionRequest::discount(amount)) {
            let r = LedgerEngine::transition(&d.state, &TransactionRequest::refund(amount)).unwrap();
            let restored = state.liquidity() + d.snapshot.external_debt;
            prop_assert_eq!(r.state.liquidity(), restored);
            prop_assert_eq!(r.state.debt(), (state.credit_limit - restored).max(Decimal::ZERO));
        }
    }

    /// Credits never reduce liquidity and never go beyond the limit as available credit.
    #[test]
    fn credits_fill_to_limit(state in arb_state(), amount in arb_amount()) {
        for request in [TransactionRequest::recharge(amount), TransactionRequest::profit(amount)] {
            let t = LedgerEngine::transition(&state, &request).unwrap();
            prop_assert_eq!(t.state.liquidity(), state.liquidity() + amount);
            prop_assert!(t.state.available_credit <= t.state.credit_limit);
        }
    }
}

// =============================================================================
// Replay Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Replaying committed history reproduces the stored aggregate, every
    /// recorded snapshot, and extends by folding one more row.
    #[test]
    fn replay_reproduces_committed_history(
        limit in arb_amount(),
        pct in arb_percentage(),
        requests in prop::collection::vec(arb_request(), 1..30),
    ) {
        let retailer = RetailerId(1);
        let service = LedgerService::in_memory(&LedgerConfig::default());
        service.register_retailer(retailer, limit, pct).unwrap();
        for request in requests {
            let _ = service.apply(retailer, request, ActorId(1));
        }

        let history = service.history(retailer, &HistoryQuery::all()).unwrap();
        let anchor = RetailerState::new(limit, pct);
        let projection = ReplayProjector::project(retailer, &anchor, &history).unwrap();
        prop_assert_eq!(projection.state, service.aggregate(retailer).unwrap());
        prop_assert!(projection.steps.iter().all(|step| step.matches()));

        let again = ReplayProjector::project(retailer, &anchor, &history).unwrap();
        prop_assert_eq!(&projection, &again);

        if let Some((last, init)) = history.split_last() {
            let prefix = ReplayProjector::project(retailer, &anchor, init).unwrap();
            let extended = ReplayProjector::extend(&prefix, last).unwrap();
            prop_assert_eq!(extended, projection.state);
        }
    }

    /// Folding requests directly agrees with the service's committed result.
    #[test]
    fn fold_matches_service(
        limit in arb_amount(),
        pct in arb_percentage(),
        requests in prop::collection::vec(arb_request(), 1..30),
    ) {
        let retailer = RetailerId(2);
        let service = LedgerService::in_memory(&LedgerConfig::default());
        service.register_retailer(retailer, limit, pct).unwrap();

        let mut expected = RetailerState::new(limit, pct);
        for request in requests {
            let local = LedgerEngine::transition(&expected, &request);
            let committed = service.apply(retailer, request, ActorId(1));
            prop_assert_eq!(local.is_ok(), committed.is_ok());
            if let Ok(t) = local {
                expected = t.state;
            }
        }
        prop_assert_eq!(service.aggregate(retailer).unwrap(), expected);
    }
}
