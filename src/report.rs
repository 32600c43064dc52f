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

//! Profit and volume summaries over transaction history.

use crate::base::RetailerId;
use crate::transaction::{Transaction, TransactionKind};
use rust_decimal::Decimal;
use serde::Serialize;

/// Totals over the settled transactions of one retailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetailerSummary {
    pub retailer: RetailerId,
    pub transactions: usize,
    pub discount_volume: Decimal,
    pub refund_volume: Decimal,
    pub recharge_volume: Decimal,
    pub adjustment_total: Decimal,
    /// Profit from discounts and explicit profit credits.
    pub profit_earned: Decimal,
    /// Profit taken back by refunds.
    pub profit_reverted: Decimal,
}

impl RetailerSummary {
    pub fn net_profit(&self) -> Decimal {
        self.profit_earned - self.profit_reverted
    }
}

/// Summarizes `transactions`. Rows of other retailers and unsettled rows are ignored.
pub fn summarize<'a>(
    retailer_id: RetailerId,
    transactions: impl IntoIterator<Item = &'a Transaction>,
) -> RetailerSummary {
    let mut summary = RetailerSummary {
        retailer: retailer_id,
        transactions: 0,
        discount_volume: Decimal::ZERO,
        refund_volume: Decimal::ZERO,
        recharge_volume: Decimal::ZERO,
        adjustment_total: Decimal::ZERO,
        profit_earned: Decimal::ZERO,
        profit_reverted: Decimal::ZERO,
    };

    for tx in transactions
        .into_iter()
        .filter(|tx| tx.retailer_id == retailer_id && tx.is_settled())
    {
        summary.transactions += 1;
        summary.profit_earned += tx.snapshot.profit_earned;
        match tx.kind() {
            TransactionKind::Discount => summary.discount_volume += tx.amount(),
            TransactionKind::Refund => {
                summary.refund_volume += tx.amount();
                summary.profit_reverted += tx.amount() * tx.snapshot.profit_percentage;
            }
            TransactionKind::Recharge => summary.recharge_volume += tx.amount(),
            TransactionKind::Adjustment => summary.adjustment_total += tx.amount(),
            TransactionKind::Profit => {}
        }
    }
    summary
}
