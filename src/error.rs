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

//! Error types for ledger operations.

use crate::base::{RetailerId, TransactionId};
use thiserror::Error;

/// Ledger errors.
///
/// The engine only ever returns [`InvalidAmount`](LedgerError::InvalidAmount),
/// [`InsufficientBalance`](LedgerError::InsufficientBalance) and
/// [`NegativeAdjustment`](LedgerError::NegativeAdjustment). The remaining
/// variants originate at the service, store or guard boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amount is negative for a kind that only accepts a principal
    #[error("invalid amount (must not be negative)")]
    InvalidAmount,

    /// Discount exceeds the available liquidity and its own profit cannot cover the gap
    #[error("insufficient balance")]
    InsufficientBalance,

    /// Adjustment would drive available credit below zero
    #[error("adjustment would make available credit negative")]
    NegativeAdjustment,

    /// Unknown retailer id
    #[error("retailer {0} not found")]
    RetailerNotFound(RetailerId),

    /// Retailer is already registered
    #[error("retailer {0} already exists")]
    RetailerExists(RetailerId),

    /// The per-retailer lock could not be acquired in time
    #[error("timed out waiting for the ledger lock of retailer {0}")]
    LockTimeout(RetailerId),

    /// Referenced transaction does not exist for this retailer
    #[error("transaction {0} not found")]
    TransactionNotFound(TransactionId),

    /// Transaction belongs to a different retailer
    #[error("transaction {0} belongs to another retailer")]
    RetailerMismatch(TransactionId),

    /// Transaction is already cancelled
    #[error("transaction {0} is already cancelled")]
    AlreadyCancelled(TransactionId),

    /// Later settled transactions were computed from this transaction's output
    #[error("transaction {0} has successor transactions")]
    HasSuccessors(TransactionId),

    /// Stored aggregate and replayed history disagree
    #[error("ledger of retailer {0} is inconsistent, reconcile first")]
    Inconsistent(RetailerId),

    /// A stored transaction could not be replayed
    #[error("replay rejected transaction {transaction_id}: {reason}")]
    ReplayRejected {
        transaction_id: TransactionId,
        reason: Box<LedgerError>,
    },

    /// Persistence backend failure
    #[error("store error: {0}")]
    Store(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// Whether the caller may retry the same request.
    ///
    /// Only a lock timeout qualifies. A retry must reuse the original
    /// request id so a commit that did happen is not applied twice.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::LockTimeout(_))
    }
}
