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

//! CSV export of aggregates, transaction history and audits.
//!
//! All balances are written with 4 decimal places.

use crate::base::{ActorId, RetailerId, TransactionId};
use crate::reconciliation::{AuditReport, AuditStatus};
use crate::retailer::RetailerState;
use crate::transaction::{Transaction, TransactionKind, TransactionStatus};
use chrono::{DateTime, Utc};
use csv::Writer;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

const PRECISION: u32 = RetailerState::DECIMAL_PRECISION;

#[derive(Debug, Serialize)]
struct AggregateRow {
    retailer: RetailerId,
    credit_limit: Decimal,
    available_credit: Decimal,
    balance_in_favor: Decimal,
    debt: Decimal,
    accumulated_profit: Decimal,
}

#[derive(Debug, Serialize)]
struct HistoryRow {
    id: TransactionId,
    retailer: RetailerId,
    created_at: DateTime<Utc>,
    kind: TransactionKind,
    status: TransactionStatus,
    amount: Decimal,
    previous_available_credit: Decimal,
    available_credit: Decimal,
    previous_balance_in_favor: Decimal,
    balance_in_favor: Decimal,
    balance_in_favor_used: Decimal,
    credit_used: Decimal,
    external_debt: Decimal,
    profit_earned: Decimal,
    accumulated_debt: Decimal,
    accumulated_profit: Decimal,
    actor: ActorId,
}

#[derive(Debug, Serialize)]
struct AuditRow {
    retailer: RetailerId,
    status: &'static str,
    stored_available_credit: Decimal,
    recomputed_available_credit: Option<Decimal>,
    stored_balance_in_favor: Decimal,
    recomputed_balance_in_favor: Option<Decimal>,
    difference: Decimal,
    findings: usize,
}

/// Writes one row per retailer.
///
/// # CSV Format
///
/// ```csv
/// retailer,credit_limit,available_credit,balance_in_favor,debt,accumulated_profit
/// 1,1000.0000,905.0000,0.0000,95.0000,5.0000
/// ```
pub fn write_aggregates<W: Write>(
    aggregates: impl IntoIterator<Item = (RetailerId, RetailerState)>,
    writer: W,
) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for (retailer, state) in aggregates {
        let state = state.rounded();
        wtr.serialize(AggregateRow {
            retailer,
            credit_limit: fixed(state.credit_limit),
            available_credit: fixed(state.available_credit),
            balance_in_favor: fixed(state.balance_in_favor),
            debt: fixed(state.debt()),
            accumulated_profit: fixed(state.accumulated_profit),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes the full transaction list with the running balances each row recorded.
pub fn write_history<'a, W: Write>(
    transactions: impl IntoIterator<Item = &'a Transaction>,
    writer: W,
) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for tx in transactions {
        let s = &tx.snapshot;
        wtr.serialize(HistoryRow {
            id: tx.id,
            retailer: tx.retailer_id,
            created_at: tx.created_at,
            kind: s.kind,
            status: tx.status,
            amount: fixed(s.amount),
            previous_available_credit: fixed(s.previous_available_credit),
            available_credit: fixed(s.available_credit),
            previous_balance_in_favor: fixed(s.previous_balance_in_favor),
            balance_in_favor: fixed(s.current_balance_in_favor),
            balance_in_favor_used: fixed(s.balance_in_favor_used),
            credit_used: fixed(s.credit_used),
            external_debt: fixed(s.external_debt),
            profit_earned: fixed(s.profit_earned),
            accumulated_debt: fixed(s.accumulated_debt),
            accumulated_profit: fixed(s.accumulated_profit),
            actor: tx.actor_id,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes one row per audit report.
pub fn write_audits<'a, W: Write>(
    reports: impl IntoIterator<Item = &'a AuditReport>,
    writer: W,
) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for report in reports {
        let recomputed = report.recomputed.as_ref().ok();
        wtr.serialize(AuditRow {
            retailer: report.retailer_id,
            status: match report.status {
                AuditStatus::Ok => "OK",
                AuditStatus::Inconsistent => "INCONSISTENT",
            },
            stored_available_credit: fixed(report.stored.available_credit),
            recomputed_available_credit: recomputed.map(|s| fixed(s.available_credit)),
            stored_balance_in_favor: fixed(report.stored.balance_in_favor),
            recomputed_balance_in_favor: recomputed.map(|s| fixed(s.balance_in_favor)),
            difference: fixed(report.difference.magnitude()),
            findings: report.findings.len(),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

/// Rounds and pads to exactly [`PRECISION`] decimal places.
fn fixed(value: Decimal) -> Decimal {
    let mut value = value.round_dp(PRECISION);
    value.rescale(PRECISION);
    value
}
