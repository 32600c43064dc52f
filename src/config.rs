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

//! Ledger configuration.
//!
//! ```toml
//! lock_timeout_ms = 5000
//! reconciliation_tolerance = "1"
//! log_filter = "info"
//! ```

use crate::LedgerError;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    /// How long a mutation waits for the retailer lock before failing.
    pub lock_timeout_ms: u64,
    /// Absolute difference below which an audit treats balances as equal.
    pub reconciliation_tolerance: Decimal,
    /// `tracing` filter directive used by the CLI when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            reconciliation_tolerance: Decimal::ONE,
            log_filter: "info".to_string(),
        }
    }
}

impl LedgerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn from_toml_str(input: &str) -> Result<Self, LedgerError> {
        let config: Self =
            toml::from_str(input).map_err(|e| LedgerError::Config(e.message().to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .map_err(|e| LedgerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&input)
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.lock_timeout_ms == 0 {
            return Err(LedgerError::Config(
                "lock_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.reconciliation_tolerance < Decimal::ZERO {
            return Err(LedgerError::Config(
                "reconciliation_tolerance must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}
