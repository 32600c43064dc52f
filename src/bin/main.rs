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


use clap::{Parser, Subcommand};
use csv::{ReaderBuilder, Trim, Writer};
use minorista_ledger::export::{write_aggregates, write_audits, write_history};
use minorista_ledger::report::summarize;
use minorista_ledger::{
    ActorId, HistoryQuery, InMemoryStore, KeyedLock, LedgerConfig, LedgerService, LocalKeyedLock,
    ReconciliationService, RetailerId, TransactionKind, TransactionRequest, TransactionStore,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::error::Error;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Actor recorded for request rows without an `actor` column.
const SYSTEM_ACTOR: ActorId = ActorId(0);

/// Minorista Ledger - Apply retailer credit requests from CSV files
///
/// Registers retailers, applies their requests in file order and writes
/// balances, history, audits or summaries to stdout. Logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "minorista-ledger")]
#[command(about = "A retailer credit ledger that processes request CSVs", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Overrides `lock_timeout_ms` from the configuration
    #[arg(long, global = true, value_name = "MS")]
    lock_timeout_ms: Option<u64>,

    /// Overrides `reconciliation_tolerance` from the configuration
    #[arg(long, global = true, value_name = "AMOUNT")]
    tolerance: Option<Decimal>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply requests and print the resulting balances
    Process {
        #[command(flatten)]
        inputs: Inputs,

        /// Print every transaction with its running balances instead
        #[arg(long)]
        history: bool,
    },
    /// Apply requests, then audit every retailer against its replayed history
    Audit {
        #[command(flatten)]
        inputs: Inputs,
    },
    /// Apply requests and print profit and volume per retailer
    Report {
        #[command(flatten)]
        inputs: Inputs,
    },
}

#[derive(clap::Args, Debug)]
struct Inputs {
    /// Retailers CSV
    ///
    /// Expected format: retailer,credit_limit,profit_percentage
    #[arg(value_name = "RETAILERS")]
    retailers: PathBuf,

    /// Requests CSV
    ///
    /// Expected format: retailer,type,amount,request_id,actor
    #[arg(value_name = "REQUESTS")]
    requests: PathBuf,
}

type Ledger = LedgerService<InMemoryStore, LocalKeyedLock>;

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            process::exit(1);
        }
    };

    // RUST_LOG wins over the configured filter.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(&cli.command, &config, std::io::stdout()) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// Reads the configuration file, if any, and applies command line overrides.
fn load_config(cli: &Cli) -> Result<LedgerConfig, minorista_ledger::LedgerError> {
    let mut config = match &cli.config {
        Some(path) => LedgerConfig::from_file(path)?,
        None => LedgerConfig::default(),
    };
    if let Some(timeout) = cli.lock_timeout_ms {
        config.lock_timeout_ms = timeout;
    }
    if let Some(tolerance) = cli.tolerance {
        config.reconciliation_tolerance = tolerance;
    }
    config.validate()?;
    Ok(config)
}

fn run<W: Write>(command: &Command, config: &LedgerConfig, out: W) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Process { inputs, history } => {
            let ledger = load_ledger(inputs, config)?;
            if *history {
                let mut transactions = Vec::new();
                for retailer_id in ledger.retailers()? {
                    transactions.extend(ledger.history(retailer_id, &HistoryQuery::all())?);
                }
                write_history(&transactions, out)?;
            } else {
                let mut aggregates = Vec::new();
                for retailer_id in ledger.retailers()? {
                    aggregates.push((retailer_id, ledger.aggregate(retailer_id)?));
                }
                write_aggregates(aggregates, out)?;
            }
        }
        Command::Audit { inputs } => {
            let ledger = load_ledger(inputs, config)?;
            let auditor =
                ReconciliationService::new(ledger.store().clone(), ledger.guard().clone(), config);
            write_audits(&auditor.audit_all()?, out)?;
        }
        Command::Report { inputs } => {
            let ledger = load_ledger(inputs, config)?;
            let mut wtr = Writer::from_writer(out);
            for retailer_id in ledger.retailers()? {
                let history = ledger.history(retailer_id, &HistoryQuery::all())?;
                wtr.serialize(summarize(retailer_id, &history))?;
            }
            wtr.flush()?;
        }
    }
    Ok(())
}

fn load_ledger(inputs: &Inputs, config: &LedgerConfig) -> Result<Ledger, Box<dyn Error>> {
    let ledger = LedgerService::in_memory(config);

    let retailers = open(&inputs.retailers)?;
    load_retailers(BufReader::new(retailers), &ledger)?;

    let requests = open(&inputs.requests)?;
    let processed = process_requests(BufReader::new(requests), &ledger)?;
    info!(
        applied = processed.applied,
        malformed = processed.malformed,
        rejected = processed.rejected,
        "requests processed"
    );

    Ok(ledger)
}

fn open(path: &Path) -> Result<File, Box<dyn Error>> {
    File::open(path).map_err(|e| format!("cannot open '{}': {e}", path.display()).into())
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader)
}

/// Raw retailer row. Fields: `retailer, credit_limit, profit_percentage`
#[derive(Debug, Deserialize)]
struct RetailerRecord {
    retailer: u32,
    credit_limit: Decimal,
    profit_percentage: Decimal,
}

/// Raw request row. Fields: `retailer, type, amount, request_id, actor`
#[derive(Debug, Deserialize)]
struct RequestRecord {
    retailer: u32,
    #[serde(rename = "type")]
    kind: String,
    amount: Decimal,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    actor: Option<u32>,
}

impl RequestRecord {
    /// Returns `None` for unknown transaction types.
    fn into_request(self) -> Option<(RetailerId, TransactionRequest, ActorId)> {
        let kind = self.kind.parse::<TransactionKind>().ok()?;
        let mut request = TransactionRequest::new(kind, self.amount);
        if let Some(request_id) = self.request_id {
            request = request.with_request_id(request_id);
        }
        let actor = self.actor.map(ActorId).unwrap_or(SYSTEM_ACTOR);
        Some((RetailerId(self.retailer), request, actor))
    }
}

/// Registers every retailer row. Returns the number registered.
///
/// Malformed rows and rejected registrations (duplicate id, negative limit)
/// are skipped with a warning.
pub fn load_retailers<R, S, L>(reader: R, ledger: &LedgerService<S, L>) -> Result<usize, csv::Error>
where
    R: Read,
    S: TransactionStore,
    L: KeyedLock,
{
    let mut registered = 0;
    for result in csv_reader(reader).deserialize::<RetailerRecord>() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "skipping malformed retailer row");
                continue;
            }
        };
        let retailer_id = RetailerId(record.retailer);
        match ledger.register_retailer(retailer_id, record.credit_limit, record.profit_percentage) {
            Ok(_) => registered += 1,
            Err(e) => warn!(retailer = %retailer_id, reason = %e, "skipping retailer"),
        }
    }
    Ok(registered)
}

/// Row counts of one [`process_requests`] run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Processed {
    pub applied: usize,
    /// Rows that could not be parsed or name an unknown transaction type.
    pub malformed: usize,
    /// Well-formed rows the ledger refused.
    pub rejected: usize,
}

/// Applies request rows in file order.
///
/// This streams the file, so arbitrarily large inputs are never held in
/// memory. Malformed rows and rejected requests are skipped with a warning.
///
/// # Example
///
/// ```csv
/// retailer,type,amount,request_id,actor
/// 1,discount,400.0,wire-17,3
/// 1,recharge,400.0,,
/// ```
pub fn process_requests<R, S, L>(
    reader: R,
    ledger: &LedgerService<S, L>,
) -> Result<Processed, csv::Error>
where
    R: Read,
    S: TransactionStore,
    L: KeyedLock,
{
    let mut processed = Processed::default();
    for result in csv_reader(reader).deserialize::<RequestRecord>() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "skipping malformed request row");
                processed.malformed += 1;
                continue;
            }
        };
        let Some((retailer_id, request, actor)) = record.into_request() else {
            warn!("skipping request with unknown type");
            processed.malformed += 1;
            continue;
        };
        match ledger.apply(retailer_id, request, actor) {
            Ok(_) => processed.applied += 1,
            Err(e) => {
                warn!(retailer = %retailer_id, reason = %e, "skipping request");
                processed.rejected += 1;
            }
        }
    }
    Ok(processed)
}
