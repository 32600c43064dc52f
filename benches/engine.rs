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


//! Benchmarks for the ledger engine and service.
//!
//! Run with: cargo bench
//!
//! Benchmarks include:
//! - Pure engine transitions
//! - Service apply throughput on one retailer
//! - Replay and audit over growing histories
//! - Contention with a varying number of retailers

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use minorista_ledger::{
    ActorId, InMemoryStore, LedgerConfig, LedgerEngine, LedgerService, LocalKeyedLock,
    ReconciliationService, ReplayProjector, RetailerId, RetailerState, TransactionRequest,
    TransactionStore,
};
use rayon::prelude::*;
use rust_decimal::Decimal;

// =============================================================================
// Helper Functions
// =============================================================================

fn amount(units: i64) -> Decimal {
    Decimal::new(units, 4)
}

/// Alternates discounts with the recharge that pays them back.
fn cycle(i: usize) -> TransactionRequest {
    if i % 2 == 0 {
        TransactionRequest::discount(amount(1_000_000))
    } else {
        TransactionRequest::recharge(amount(950_000))
    }
}

fn ledger(retailers: u32) -> LedgerService<InMemoryStore, LocalKeyedLock> {
    let service = LedgerService::in_memory(&LedgerConfig::default());
    for id in 1..=retailers {
        service
            .register_retailer(RetailerId(id), amount(100_000_000), amount(500))
            .unwrap();
    }
    service
}

// =============================================================================
// Engine Benchmarks
// =============================================================================

fn bench_transition(c: &mut Criterion) {
    let state = RetailerState::new(amount(100_000_000), amount(500));
    let mut group = c.benchmark_group("transition");

    group.bench_function("discount", |b| {
        let request = TransactionRequest::discount(amount(1_000_000));
        b.iter(|| LedgerEngine::transition(black_box(&state), black_box(&request)).unwrap())
    });
    group.bench_function("recharge_overflow", |b| {
        let request = TransactionRequest::recharge(amount(500_000_000));
        b.iter(|| LedgerEngine::transition(black_box(&state), black_box(&request)).unwrap())
    });
    group.bench_function("refund", |b| {
        let request = TransactionRequest::refund(amount(1_000_000));
        b.iter(|| LedgerEngine::transition(black_box(&state), black_box(&request)).unwrap())
    });

    group.finish();
}

// =============================================================================
// Service Benchmarks
// =============================================================================

fn bench_apply_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_throughput");

    for count in [100, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let service = ledger(1);
                for i in 0..count {
                    service.apply(RetailerId(1), cycle(i), ActorId(1)).unwrap();
                }
                black_box(&service);
            })
        });
    }

    group.finish();
}

// =============================================================================
// Replay and Audit Benchmarks
// =============================================================================

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");

    for count in [100, 1_000, 10_000].iter() {
        let service = ledger(1);
        for i in 0..*count {
            service.apply(RetailerId(1), cycle(i), ActorId(1)).unwrap();
        }
        let view = service.store().read_view(RetailerId(1)).unwrap();
        let auditor = ReconciliationService::new(
            service.store().clone(),
            service.guard().clone(),
            &LedgerConfig::default(),
        );

        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("project", count), &view, |b, view| {
            b.iter(|| ReplayProjector::project_view(RetailerId(1), black_box(view)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("audit", count), &auditor, |b, auditor| {
            b.iter(|| auditor.audit(black_box(RetailerId(1))).unwrap())
        });
    }

    group.finish();
}

// =============================================================================
// Multi-Threaded Benchmarks
// =============================================================================

fn bench_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("contention");
    let total_ops = 10_000usize;

    // Fewer retailers = more threads queueing on the same keyed lock
    for num_retailers in [1u32, 10, 100, 1_000].iter() {
        group.throughput(Throughput::Elements(total_ops as u64));
        group.bench_with_input(
            BenchmarkId::new("retailers", num_retailers),
            num_retailers,
            |b, &num_retailers| {
                b.iter_batched(
                    || ledger(num_retailers),
                    |service| {
                        (0..total_ops).into_par_iter().for_each(|i| {
                            let retailer = RetailerId((i as u32 % num_retailers) + 1);
                            let _ = service.apply(retailer, cycle(i), ActorId(1));
                        });
                        black_box(&service);
                    },
                    criterion::BatchSize::SmallInput,
                )
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_transition,
    bench_apply_throughput,
    bench_replay,
    bench_contention,
);
criterion_main!(benches);
