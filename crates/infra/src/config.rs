//! Configuration loading and representation.
//!
//! All settings come from environment variables:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `DATABASE_URL` | unset | Postgres URL; unset selects the in-memory store |
//! | `DATABASE_MAX_CONNECTIONS` | `10` | pool size |
//! | `BIND_ADDR` | `0.0.0.0:8080` | HTTP listen address |
//! | `STORE_DEADLINE_MS` | `2000` | per-operation deadline, `0` disables |
//! | `LEDGER_ACCOUNTS` | five-account catalogue | `id:limit` pairs, comma-separated |

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use ledgerd_core::{Account, AccountId};

/// Accounts provisioned when `LEDGER_ACCOUNTS` is not set.
pub const DEFAULT_ACCOUNTS: [(i64, i64); 5] = [
    (1, 100_000),
    (2, 80_000),
    (3, 1_000_000),
    (4, 10_000_000),
    (5, 500_000),
];

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_STORE_DEADLINE_MS: u64 = 2000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

impl ConfigError {
    fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// `None` selects the in-memory store.
    pub database: Option<DatabaseConfig>,
    pub bind_addr: SocketAddr,
    pub store_deadline: Option<Duration>,
    pub accounts: Vec<Account>,
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let max_connections = match get("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(0) => {
                    return Err(ConfigError::invalid(
                        "DATABASE_MAX_CONNECTIONS",
                        "must be at least 1",
                    ));
                }
                Ok(n) => n,
                Err(e) => return Err(ConfigError::invalid("DATABASE_MAX_CONNECTIONS", e.to_string())),
            },
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let database = get("DATABASE_URL").map(|url| DatabaseConfig {
            url,
            max_connections,
        });

        let bind_addr = get("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .trim()
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::invalid("BIND_ADDR", e.to_string()))?;

        let deadline_ms = match get("STORE_DEADLINE_MS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::invalid("STORE_DEADLINE_MS", e.to_string()))?,
            None => DEFAULT_STORE_DEADLINE_MS,
        };
        let store_deadline = (deadline_ms > 0).then(|| Duration::from_millis(deadline_ms));

        let accounts = match get("LEDGER_ACCOUNTS") {
            Some(raw) => parse_accounts(&raw)?,
            None => default_accounts()?,
        };

        Ok(Self {
            database,
            bind_addr,
            store_deadline,
            accounts,
        })
    }
}

fn default_accounts() -> Result<Vec<Account>, ConfigError> {
    DEFAULT_ACCOUNTS
        .iter()
        .map(|&(id, limit)| {
            Account::new(AccountId::new(id), limit)
                .map_err(|e| ConfigError::invalid("LEDGER_ACCOUNTS", e.to_string()))
        })
        .collect()
}

/// Parse `"1:100000, 2:80000"`. Duplicate ids are rejected.
fn parse_accounts(raw: &str) -> Result<Vec<Account>, ConfigError> {
    let invalid = |message: String| ConfigError::invalid("LEDGER_ACCOUNTS", message);
    let mut accounts: Vec<Account> = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (id, limit) = entry
            .split_once(':')
            .ok_or_else(|| invalid(format!("expected id:limit, got {entry:?}")))?;
        let id: AccountId = id.parse().map_err(|e| invalid(format!("{e}")))?;
        let limit: i64 = limit
            .trim()
            .parse()
            .map_err(|e| invalid(format!("limit of account {id}: {e}")))?;
        let account = Account::new(id, limit).map_err(|e| invalid(e.to_string()))?;

        if accounts.iter().any(|a| a.id == id) {
            return Err(invalid(format!("account {id} listed twice")));
        }
        accounts.push(account);
    }

    if accounts.is_empty() {
        return Err(invalid("no accounts listed".to_string()));
    }
    Ok(accounts)
}
