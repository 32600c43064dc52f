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

//! Retailer aggregate.
//!
//! A retailer has a credit limit, the part of it still spendable
//! (`available_credit`) and a surplus beyond the limit (`balance_in_favor`).
//! Debt is derived, never stored.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use minorista_ledger::RetailerState;
//!
//! let state = RetailerState::new(dec!(1000), dec!(0.05));
//! assert_eq!(state.available_credit, dec!(1000));
//! assert_eq!(state.debt(), dec!(0));
//! ```

use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};

/// Balances of one retailer at a point in time.
///
/// # Invariants
///
/// - `balance_in_favor > 0` implies `available_credit == credit_limit`.
/// - `debt() >= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetailerState {
    pub credit_limit: Decimal,
    pub available_credit: Decimal,
    pub balance_in_favor: Decimal,
    /// Rate applied to discounts, e.g. `0.05`.
    pub profit_percentage: Decimal,
    /// Profit earned since the last recharge.
    pub accumulated_profit: Decimal,
}

/// A broken aggregate invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Surplus exists while the limit is not fully available.
    SurplusBelowLimit,
    /// Available credit above the limit or below zero.
    AvailableOutOfRange,
    /// Derived debt is negative.
    NegativeDebt,
    /// Negative surplus.
    NegativeSurplus,
}

impl RetailerState {
    pub const DECIMAL_PRECISION: u32 = 4;

    /// Canonical replay anchor: the whole limit is available and there is no surplus.
    pub fn new(credit_limit: Decimal, profit_percentage: Decimal) -> Self {
        Self {
            credit_limit,
            available_credit: credit_limit,
            balance_in_favor: Decimal::ZERO,
            profit_percentage,
            accumulated_profit: Decimal::ZERO,
        }
    }

    /// `0` while a surplus exists, otherwise `credit_limit - available_credit`.
    pub fn debt(&self) -> Decimal {
        if self.balance_in_favor > Decimal::ZERO {
            Decimal::ZERO
        } else {
            self.credit_limit - self.available_credit
        }
    }

    /// Total spendable funds: available credit plus surplus.
    pub fn liquidity(&self) -> Decimal {
        self.available_credit + self.balance_in_favor
    }

    /// Lists every invariant the aggregate currently breaks.
    pub fn check_invariants(&self) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();
        if self.balance_in_favor > Decimal::ZERO && self.available_credit != self.credit_limit {
            violations.push(InvariantViolation::SurplusBelowLimit);
        }
        if self.available_credit < Decimal::ZERO || self.available_credit > self.credit_limit {
            violations.push(InvariantViolation::AvailableOutOfRange);
        }
        if self.debt() < Decimal::ZERO {
            violations.push(InvariantViolation::NegativeDebt);
        }
        if self.balance_in_favor < Decimal::ZERO {
            violations.push(InvariantViolation::NegativeSurplus);
        }
        violations
    }

    pub(crate) fn assert_invariants(&self) {
        debug_assert!(
            !(self.balance_in_favor > Decimal::ZERO && self.available_credit != self.credit_limit),
            "Invariant violated: surplus {} with available {} below limit {}",
            self.balance_in_favor,
            self.available_credit,
            self.credit_limit
        );
        debug_assert!(
            self.debt() >= Decimal::ZERO,
            "Invariant violated: debt went negative: {}",
            self.debt()
        );
    }

    /// Returns a copy with every balance rounded to [`Self::DECIMAL_PRECISION`].
    pub fn rounded(&self) -> Self {
        Self {
            credit_limit: self.credit_limit.round_dp(Self::DECIMAL_PRECISION),
            available_credit: self.available_credit.round_dp(Self::DECIMAL_PRECISION),
            balance_in_favor: self.balance_in_favor.round_dp(Self::DECIMAL_PRECISION),
            profit_percentage: self.profit_percentage,
            accumulated_profit: self.accumulated_profit.round_dp(Self::DECIMAL_PRECISION),
        }
    }
}

impl Serialize for RetailerState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let rounded = self.rounded();
        let mut state = serializer.serialize_struct("RetailerState", 6)?;
        state.serialize_field("credit_limit", &rounded.credit_limit)?;
        state.serialize_field("available_credit", &rounded.available_credit)?;
        state.serialize_field("balance_in_favor", &rounded.balance_in_favor)?;
        state.serialize_field("debt", &rounded.debt())?;
        state.serialize_field("profit_percentage", &rounded.profit_percentage)?;
        state.serialize_field("accumulated_profit", &rounded.accumulated_profit)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn new_state_is_the_canonical_anchor() {
        let state = RetailerState::new(dec!(500000), dec!(0.05));
        assert_eq!(state.available_credit, dec!(500000));
        assert_eq!(state.balance_in_favor, Decimal::ZERO);
        assert_eq!(state.accumulated_profit, Decimal::ZERO);
        assert!(state.check_invariants().is_empty());
    }

    #[test]
    fn debt_is_zero_while_surplus_exists() {
        let state = RetailerState {
            balance_in_favor: dec!(20),
            ..RetailerState::new(dec!(100), dec!(0.05))
        };
        assert_eq!(state.debt(), Decimal::ZERO);
    }

    #[test]
    fn debt_is_limit_minus_available() {
        let state = RetailerState {
            available_credit: dec!(35),
            ..RetailerState::new(dec!(100), dec!(0.05))
        };
        assert_eq!(state.debt(), dec!(65));
        assert_eq!(state.liquidity(), dec!(35));
    }

    #[test]
    fn surplus_below_limit_is_reported() {
        let state = RetailerState {
            available_credit: dec!(90),
            balance_in_favor: dec!(5),
            ..RetailerState::new(dec!(100), dec!(0))
        };
        assert_eq!(
            state.check_invariants(),
            vec![InvariantViolation::SurplusBelowLimit]
        );
    }

    #[test]
    fn available_above_limit_yields_negative_debt() {
        let state = RetailerState {
            available_credit: dec!(120),
            ..RetailerState::new(dec!(100), dec!(0))
        };
        assert_eq!(
            state.check_invariants(),
            vec![
                InvariantViolation::AvailableOutOfRange,
                InvariantViolation::NegativeDebt
            ]
        );
    }

    // === Serialization Tests ===

    #[test]
    fn serializer_rounds_to_four_decimal_places() {
        let state = RetailerState {
            available_credit: dec!(123.456789),
            accumulated_profit: dec!(0.000001),
            ..RetailerState::new(dec!(1000), dec!(0.05))
        };

        let json = serde_json::to_string(&state).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["available_credit"].as_str().unwrap(), "123.4568");
        assert_eq!(parsed["accumulated_profit"].as_str().unwrap(), "0.0000");
        assert_eq!(parsed["debt"].as_str().unwrap(), "876.5432");
        assert_eq!(parsed["profit_percentage"].as_str().unwrap(), "0.05");
    }

    #[test]
    fn serializer_uses_bankers_rounding() {
        let state = RetailerState {
            available_credit: dec!(0.00015),
            balance_in_favor: dec!(0.00005),
            ..RetailerState::new(dec!(1), dec!(0))
        };

        let json = serde_json::to_string(&state).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["available_credit"].as_str().unwrap(), "0.0002");
        assert_eq!(parsed["balance_in_favor"].as_str().unwrap(), "0.0000");
    }
}
