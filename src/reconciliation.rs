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

//! Drift detection and audited repair.
//!
//! An audit replays a retailer's history and compares the result with the
//! stored aggregate. Audits only report. The stored aggregate changes only
//! through [`ReconciliationService::reconcile`], which runs under the
//! retailer lock and leaves a [`ReconciliationRecord`] behind.

use crate::LedgerError;
use crate::base::{ActorId, RetailerId, TransactionId};
use crate::config::LedgerConfig;
use crate::guard::KeyedLock;
use crate::replay::{ReplayProjector, ReplayStep};
use crate::retailer::{InvariantViolation, RetailerState};
use crate::store::{LedgerView, TransactionStore};
use crate::transaction::{Transaction, TransactionStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Ok,
    Inconsistent,
}

/// `stored - recomputed`, field by field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceDifference {
    pub credit_limit: Decimal,
    pub available_credit: Decimal,
    pub balance_in_favor: Decimal,
    pub accumulated_profit: Decimal,
}

impl BalanceDifference {
    pub fn between(stored: &RetailerState, recomputed: &RetailerState) -> Self {
        Self {
            credit_limit: stored.credit_limit - recomputed.credit_limit,
            available_credit: stored.available_credit - recomputed.available_credit,
            balance_in_favor: stored.balance_in_favor - recomputed.balance_in_favor,
            accumulated_profit: stored.accumulated_profit - recomputed.accumulated_profit,
        }
    }

    /// Largest absolute deviation.
    pub fn magnitude(&self) -> Decimal {
        [
            self.credit_limit,
            self.available_credit,
            self.balance_in_favor,
            self.accumulated_profit,
        ]
        .into_iter()
        .map(|d| d.abs())
        .max()
        .unwrap_or(Decimal::ZERO)
    }
}

/// Something wrong with a retailer's history or aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditFinding {
    /// A row's recorded snapshot differs from what replay computes for it.
    SnapshotMismatch {
        transaction_id: TransactionId,
        sequence: u64,
    },
    /// A row's `previous_*` fields do not continue from the preceding settled row.
    BrokenChain {
        transaction_id: TransactionId,
        expected_available_credit: Decimal,
        recorded_available_credit: Decimal,
        expected_balance_in_favor: Decimal,
        recorded_balance_in_favor: Decimal,
    },
    /// A cancelled row has settled successors computed after it.
    CancelledWithSuccessors { transaction_id: TransactionId },
    /// History cannot be replayed past this row.
    ReplayRejected {
        transaction_id: Option<TransactionId>,
        reason: LedgerError,
    },
    /// The stored aggregate breaks an invariant.
    InvariantViolation(InvariantViolation),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditReport {
    pub retailer_id: RetailerId,
    pub status: AuditStatus,
    pub stored: RetailerState,
    /// The replay error when history could not be replayed.
    pub recomputed: Result<RetailerState, LedgerError>,
    pub difference: BalanceDifference,
    pub findings: Vec<AuditFinding>,
    pub trace: Vec<ReplayStep>,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.status == AuditStatus::Ok
    }
}

/// Audit trail entry of a repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationRecord {
    pub retailer_id: RetailerId,
    pub actor_id: ActorId,
    pub before: RetailerState,
    pub after: RetailerState,
    pub difference: BalanceDifference,
    pub reconciled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing written.
    AlreadyConsistent(AuditReport),
    Reconciled {
        report: AuditReport,
        record: ReconciliationRecord,
    },
}

/// Compares stored aggregates with replayed history.
pub struct ReconciliationService<S, L> {
    store: Arc<S>,
    guard: Arc<L>,
    tolerance: Decimal,
}

impl<S: TransactionStore, L: KeyedLock> ReconciliationService<S, L> {
    pub fn new(store: Arc<S>, guard: Arc<L>, config: &LedgerConfig) -> Self {
        Self {
            store,
            guard,
            tolerance: config.reconciliation_tolerance,
        }
    }

    pub fn tolerance(&self) -> Decimal {
        self.tolerance
    }

    /// Audits one retailer without taking the mutation lock.
    ///
    /// # Errors
    ///
    /// [`LedgerError::RetailerNotFound`] for unknown ids. Replay failures are
    /// findings, not errors.
    pub fn audit(&self, retailer_id: RetailerId) -> Result<AuditReport, LedgerError> {
        let view = self.store.read_view(retailer_id)?;
        let report = audit_view(retailer_id, &view, self.tolerance);
        if !report.is_consistent() {
            warn!(
                retailer = %retailer_id,
                difference = %report.difference.magnitude(),
                findings = report.findings.len(),
                "ledger drift detected"
            );
        }
        Ok(report)
    }

    /// Audits every registered retailer.
    pub fn audit_all(&self) -> Result<Vec<AuditReport>, LedgerError> {
        self.store
            .retailers()?
            .into_iter()
            .map(|retailer_id| self.audit(retailer_id))
            .collect()
    }

    /// Overwrites the stored aggregate with the replayed one, if they disagree.
    ///
    /// Runs under the retailer lock and records the repair.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::LockTimeout`] - retryable.
    /// - [`LedgerError::ReplayRejected`] - history cannot be replayed, there is nothing
    ///   trustworthy to write.
    pub fn reconcile(
        &self,
        retailer_id: RetailerId,
        actor_id: ActorId,
    ) -> Result<ReconcileOutcome, LedgerError> {
        let _lock = self.guard.lock(retailer_id)?;
        let report = self.audit(retailer_id)?;
        if report.is_consistent() {
            return Ok(ReconcileOutcome::AlreadyConsistent(report));
        }

        let recomputed = report.recomputed.clone()?;

        let after = RetailerState {
            profit_percentage: report.stored.profit_percentage,
            ..recomputed
        };
        let record = ReconciliationRecord {
            retailer_id,
            actor_id,
            before: report.stored,
            after,
            difference: report.difference,
            reconciled_at: Utc::now(),
        };
        self.store
            .replace_aggregate(retailer_id, after, record.clone())?;

        info!(
            retailer = %retailer_id,
            actor = %actor_id,
            available_before = %record.before.available_credit,
            available_after = %record.after.available_credit,
            "ledger reconciled"
        );
        Ok(ReconcileOutcome::Reconciled { report, record })
    }
}

/// Pure audit of a consistent view.
pub fn audit_view(retailer_id: RetailerId, view: &LedgerView, tolerance: Decimal) -> AuditReport {
    let mut findings: Vec<AuditFinding> = view
        .state
        .check_invariants()
        .into_iter()
        .map(AuditFinding::InvariantViolation)
        .collect();
    findings.extend(chain_findings(view, tolerance));

    let (recomputed, trace) = match ReplayProjector::project_view(retailer_id, view) {
        Ok(projection) => (Ok(projection.state), projection.steps),
        Err(error) => {
            let (transaction_id, reason) = match &error {
                LedgerError::ReplayRejected {
                    transaction_id,
                    reason,
                } => (Some(*transaction_id), (**reason).clone()),
                LedgerError::RetailerMismatch(transaction_id) => {
                    (Some(*transaction_id), error.clone())
                }
                other => (None, other.clone()),
            };
            findings.push(AuditFinding::ReplayRejected {
                transaction_id,
                reason,
            });
            (Err(error), Vec::new())
        }
    };

    findings.extend(
        trace
            .iter()
            .filter(|step| !step.matches())
            .map(|step| AuditFinding::SnapshotMismatch {
                transaction_id: step.transaction_id,
                sequence: step.sequence,
            }),
    );

    let difference = recomputed
        .as_ref()
        .map(|recomputed| BalanceDifference::between(&view.state, recomputed))
        .unwrap_or_default();

    let magnitude = difference.magnitude();
    let drifted = recomputed.is_err() || (magnitude > Decimal::ZERO && magnitude >= tolerance);
    let broken_invariants = findings
        .iter()
        .any(|f| matches!(f, AuditFinding::InvariantViolation(_)));
    let status = if drifted || broken_invariants {
        AuditStatus::Inconsistent
    } else {
        AuditStatus::Ok
    };

    AuditReport {
        retailer_id,
        status,
        stored: view.state,
        recomputed,
        difference,
        findings,
        trace,
    }
}

/// Walks the rows after the anchor and checks that every settled row starts
/// where the previous settled row ended.
///
/// A settled row that instead starts where a cancelled row ended was computed
/// from the cancelled output, so that cancellation left successors behind.
fn chain_findings(view: &LedgerView, tolerance: Decimal) -> Vec<AuditFinding> {
    let close = |a: Decimal, b: Decimal| a == b || (a - b).abs() < tolerance;
    let mut findings = Vec::new();
    let mut expected_available = view.anchor.state.available_credit;
    let mut expected_surplus = view.anchor.state.balance_in_favor;
    let mut last_cancelled: Option<&Transaction> = None;

    for tx in view.since_anchor() {
        match tx.status {
            TransactionStatus::Cancelled => last_cancelled = Some(tx),
            TransactionStatus::Pending | TransactionStatus::Completed => {
                let snapshot = &tx.snapshot;
                let continues = close(snapshot.previous_available_credit, expected_available)
                    && close(snapshot.previous_balance_in_favor, expected_surplus);
                if !continues {
                    if let Some(cancelled) = last_cancelled.filter(|c| {
                        close(snapshot.previous_available_credit, c.snapshot.available_credit)
                            && close(
                                snapshot.previous_balance_in_favor,
                                c.snapshot.current_balance_in_favor,
                            )
                    }) {
                        findings.push(AuditFinding::CancelledWithSuccessors {
                            transaction_id: cancelled.id,
                        });
                    }
                    findings.push(AuditFinding::BrokenChain {
                        transaction_id: tx.id,
                        expected_available_credit: expected_available,
                        recorded_available_credit: snapshot.previous_available_credit,
                        expected_balance_in_favor: expected_surplus,
                        recorded_balance_in_favor: snapshot.previous_balance_in_favor,
                    });
                }
                last_cancelled = None;
                expected_available = snapshot.available_credit;
                expected_surplus = snapshot.current_balance_in_favor;
            }
        }
    }
    findings
}
