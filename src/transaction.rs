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

//! Transaction records.
//!
//! A transaction is created once, inside a committed mutation, and never
//! rewritten afterwards. The only permitted change is the status moving
//! from [`Completed`](TransactionStatus::Completed) to
//! [`Cancelled`](TransactionStatus::Cancelled).

use crate::base::{ActorId, RequestId, RetailerId, TransactionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    /// Top-up or debt payment.
    Recharge,
    /// Spend, e.g. funding an outbound wire transfer. Earns profit.
    Discount,
    /// Signed manual correction of available credit.
    Adjustment,
    /// Reversal of a prior discount, net of its profit.
    Refund,
    /// Profit credited outside a discount.
    Profit,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recharge => "RECHARGE",
            Self::Discount => "DISCOUNT",
            Self::Adjustment => "ADJUSTMENT",
            Self::Refund => "REFUND",
            Self::Profit => "PROFIT",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RECHARGE" => Ok(Self::Recharge),
            "DISCOUNT" => Ok(Self::Discount),
            "ADJUSTMENT" => Ok(Self::Adjustment),
            "REFUND" => Ok(Self::Refund),
            "PROFIT" => Ok(Self::Profit),
            other => Err(format!("unknown transaction kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Cancelled,
}

/// What a caller asks the ledger to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub kind: TransactionKind,
    /// The principal. Only adjustments and recharges may be negative.
    pub amount: Decimal,
    pub request_id: Option<RequestId>,
}

impl TransactionRequest {
    pub fn new(kind: TransactionKind, amount: Decimal) -> Self {
        Self {
            kind,
            amount,
            request_id: None,
        }
    }

    pub fn recharge(amount: Decimal) -> Self {
        Self::new(TransactionKind::Recharge, amount)
    }

    pub fn discount(amount: Decimal) -> Self {
        Self::new(TransactionKind::Discount, amount)
    }

    pub fn adjustment(amount: Decimal) -> Self {
        Self::new(TransactionKind::Adjustment, amount)
    }

    pub fn refund(amount: Decimal) -> Self {
        Self::new(TransactionKind::Refund, amount)
    }

    pub fn profit(amount: Decimal) -> Self {
        Self::new(TransactionKind::Profit, amount)
    }

    /// Attaches an idempotency key.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(RequestId::new(request_id));
        self
    }
}

/// Balances captured by the engine when a transaction is computed.
///
/// These values are never recomputed after persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub kind: TransactionKind,
    pub amount: Decimal,
    /// Rate in force when the transaction was computed.
    pub profit_percentage: Decimal,
    pub previous_available_credit: Decimal,
    pub available_credit: Decimal,
    pub previous_balance_in_favor: Decimal,
    pub current_balance_in_favor: Decimal,
    /// Principal consumed by a discount: surplus used plus credit used plus external debt.
    pub credit_consumed: Decimal,
    pub balance_in_favor_used: Decimal,
    pub credit_used: Decimal,
    /// Part of a discount not covered by surplus or credit, paid from its own profit.
    pub external_debt: Decimal,
    pub profit_earned: Decimal,
    pub accumulated_debt: Decimal,
    pub accumulated_profit: Decimal,
}

/// A persisted ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub retailer_id: RetailerId,
    pub status: TransactionStatus,
    /// Store-assigned insertion order; breaks ties between equal timestamps.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub actor_id: ActorId,
    pub request_id: Option<RequestId>,
    pub snapshot: Snapshot,
}

impl Transaction {
    pub fn kind(&self) -> TransactionKind {
        self.snapshot.kind
    }

    pub fn amount(&self) -> Decimal {
        self.snapshot.amount
    }

    /// Every row except a cancelled one moves balances on replay.
    pub fn is_settled(&self) -> bool {
        self.status != TransactionStatus::Cancelled
    }

    /// The request that reproduces this transaction on replay.
    pub fn to_request(&self) -> TransactionRequest {
        TransactionRequest {
            kind: self.snapshot.kind,
            amount: self.snapshot.amount,
            request_id: self.request_id.clone(),
        }
    }
}
