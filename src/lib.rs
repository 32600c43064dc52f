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

//! # Minorista Ledger
//!
//! Credit ledger for retailers that sell on store credit. Every retailer has
//! a credit limit, the part of it still available, and a balance in favor
//! for money paid beyond the limit. Discounts consume that liquidity and earn
//! a profit percentage; recharges, refunds and profit credits restore it.
//!
//! ## Core Components
//!
//! - [`LedgerEngine`]: Pure state transition for one transaction request
//! - [`LedgerService`]: Serialized, idempotent application of requests per retailer
//! - [`TransactionStore`]: Atomic persistence of transactions and aggregates
//! - [`ReplayProjector`]: Recomputes balances from transaction history
//! - [`ReconciliationService`]: Audits stored balances against replay and repairs drift
//! - [`LedgerError`]: Error types for ledger operations
//!
//! ## Example
//!
//! ```
//! use minorista_ledger::{ActorId, LedgerConfig, LedgerService, RetailerId, TransactionRequest};
//! use rust_decimal_macros::dec;
//!
//! let service = LedgerService::in_memory(&LedgerConfig::default());
//! service
//!     .register_retailer(RetailerId(1), dec!(1000), dec!(0.05))
//!     .unwrap();
//!
//! // A discount consumes credit and earns 5% back
//! service
//!     .apply(RetailerId(1), TransactionRequest::discount(dec!(100)), ActorId(1))
//!     .unwrap();
//!
//! let state = service.aggregate(RetailerId(1)).unwrap();
//! assert_eq!(state.available_credit, dec!(905));
//! assert_eq!(state.debt(), dec!(95));
//! ```
//!
//! ## Thread Safety
//!
//! Mutations of one retailer are serialized in arrival order by a
//! [`KeyedLock`]; different retailers proceed in parallel. Reads never take
//! the retailer lock and always observe a committed state.

mod base;
pub mod config;
mod engine;
pub mod error;
pub mod export;
pub mod guard;
pub mod reconciliation;
pub mod replay;
pub mod report;
mod retailer;
pub mod service;
pub mod store;
mod transaction;

pub use base::{ActorId, RequestId, RetailerId, TransactionId};
pub use config::LedgerConfig;
pub use engine::{LedgerEngine, Transition};
pub use error::LedgerError;
pub use guard::{KeyedLock, LocalKeyedLock, RetailerLockGuard};
pub use reconciliation::{
    AuditFinding, AuditReport, AuditStatus, BalanceDifference, ReconcileOutcome,
    ReconciliationRecord, ReconciliationService,
};
pub use replay::{Projection, ReplayProjector, ReplayStep};
pub use retailer::{InvariantViolation, RetailerState};
pub use service::{BalanceChange, BalanceChanged, LedgerService};
pub use store::{
    CommitOutcome, HistoryQuery, InMemoryStore, LedgerView, PendingTransaction, ReplayAnchor,
    TransactionStore,
};
pub use transaction::{
    Snapshot, Transaction, TransactionKind, TransactionRequest, TransactionStatus,
};
