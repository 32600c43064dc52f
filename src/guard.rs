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

//! Per-retailer mutual exclusion.
//!
//! [`KeyedLock`] is the seam the service locks through. A deployment with
//! several processes sharing one data store plugs in an implementation
//! backed by that store (row locks, advisory locks) or by a coordination
//! service. [`LocalKeyedLock`] covers a single process.
//!
//! Waiters for the same key are served in arrival order and give up after
//! the configured timeout with [`LedgerError::LockTimeout`]. Different keys
//! never contend beyond the [`DashMap`] shard lookup.

use crate::LedgerError;
use crate::base::RetailerId;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Keyed lock serializing mutations per retailer.
///
/// Dropping the returned guard releases the lock.
pub trait KeyedLock: Send + Sync {
    type Guard: Send;

    /// Blocks until the lock for `key` is held or the wait bound elapses.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::LockTimeout`] when the lock could not be acquired in time.
    fn lock(&self, key: RetailerId) -> Result<Self::Guard, LedgerError>;
}

#[derive(Debug, Default)]
struct SlotState {
    next_ticket: u64,
    /// Tickets in arrival order. The front ticket owns the lock.
    queue: VecDeque<u64>,
}

#[derive(Debug, Default)]
struct KeySlot {
    state: Mutex<SlotState>,
    released: Condvar,
}

/// In-process FIFO keyed lock with a bounded wait.
#[derive(Debug)]
pub struct LocalKeyedLock {
    slots: DashMap<RetailerId, Arc<KeySlot>>,
    timeout: Duration,
}

impl LocalKeyedLock {
    pub fn new(timeout: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of callers holding or waiting for `key`.
    pub fn queue_len(&self, key: RetailerId) -> usize {
        self.slots
            .get(&key)
            .map(|slot| slot.state.lock().queue.len())
            .unwrap_or(0)
    }
}

impl KeyedLock for LocalKeyedLock {
    type Guard = RetailerLockGuard;

    fn lock(&self, key: RetailerId) -> Result<RetailerLockGuard, LedgerError> {
        // Clone the slot out so the shard lock is released before blocking.
        let slot = Arc::clone(&self.slots.entry(key).or_default());
        let deadline = Instant::now() + self.timeout;

        let mut state = slot.state.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back(ticket);

        while state.queue.front() != Some(&ticket) {
            if slot.released.wait_until(&mut state, deadline).timed_out() {
                if state.queue.front() == Some(&ticket) {
                    break;
                }
                state.queue.retain(|t| *t != ticket);
                drop(state);
                warn!(
                    retailer = %key,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "ledger lock wait timed out"
                );
                return Err(LedgerError::LockTimeout(key));
            }
        }
        drop(state);

        debug!(retailer = %key, ticket, "ledger lock acquired");
        Ok(RetailerLockGuard { key, ticket, slot })
    }
}

/// Proof that the caller holds the lock of one retailer.
#[derive(Debug)]
pub struct RetailerLockGuard {
    key: RetailerId,
    ticket: u64,
    slot: Arc<KeySlot>,
}

impl RetailerLockGuard {
    pub fn key(&self) -> RetailerId {
        self.key
    }

    /// Releases the lock. Equivalent to dropping the guard.
    pub fn unlock(self) {}
}

impl Drop for RetailerLockGuard {
    fn drop(&mut self) {
        let mut state = self.slot.state.lock();
        let released = state.queue.pop_front();
        debug_assert_eq!(released, Some(self.ticket), "lock released out of order");
        drop(state);
        self.slot.released.notify_all();
        debug!(retailer = %self.key, ticket = self.ticket, "ledger lock released");
    }
}
