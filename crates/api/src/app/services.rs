//! Infrastructure wiring: pick a store, provision accounts, build the engine.

use std::sync::Arc;

use thiserror::Error;

use ledgerd_core::Account;
use ledgerd_infra::config::LedgerConfig;
use ledgerd_infra::ledger_engine::{LedgerEngine, LedgerError};
use ledgerd_infra::ledger_store::{InMemoryLedgerStore, LedgerStore, PostgresLedgerStore, StoreError};

/// Store handle shared by every request.
pub type SharedStore = Arc<dyn LedgerStore>;

/// Startup failure. Any of these aborts the process before it binds.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to connect to the ledger database: {0}")]
    Connect(#[source] StoreError),

    #[error("failed to migrate the ledger schema: {0}")]
    Migrate(#[source] StoreError),

    #[error("failed to provision accounts: {0}")]
    Provision(#[source] LedgerError),
}

/// Application services shared by all handlers.
#[derive(Debug, Clone)]
pub struct AppServices {
    pub ledger: LedgerEngine<SharedStore>,
}

impl AppServices {
    pub fn new(ledger: LedgerEngine<SharedStore>) -> Self {
        Self { ledger }
    }

    /// In-memory ledger with the given accounts (tests/dev).
    pub async fn in_memory(accounts: Vec<Account>) -> Result<Self, StartupError> {
        let store: SharedStore = Arc::new(InMemoryLedgerStore::new());
        Self::provisioned(store, accounts, None).await
    }

    async fn provisioned(
        store: SharedStore,
        accounts: Vec<Account>,
        deadline: Option<std::time::Duration>,
    ) -> Result<Self, StartupError> {
        let ledger = LedgerEngine::new(store).with_deadline(deadline);
        ledger
            .provision(accounts)
            .await
            .map_err(StartupError::Provision)?;
        Ok(Self::new(ledger))
    }
}

/// Build services from configuration.
///
/// With `DATABASE_URL` set the Postgres store is used and must be reachable;
/// otherwise balances live in process memory and vanish on restart.
pub async fn build_services(config: &LedgerConfig) -> Result<AppServices, StartupError> {
    let store: SharedStore = match &config.database {
        Some(db) => {
            let store = PostgresLedgerStore::connect(&db.url, db.max_connections)
                .await
                .map_err(StartupError::Connect)?;
            store.migrate().await.map_err(StartupError::Migrate)?;
            tracing::info!(max_connections = db.max_connections, "using postgres ledger store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory ledger store");
            Arc::new(InMemoryLedgerStore::new())
        }
    };

    let services =
        AppServices::provisioned(store, config.accounts.clone(), config.store_deadline).await?;
    tracing::info!(
        accounts = config.accounts.len(),
        deadline_ms = config.store_deadline.map(|d| d.as_millis() as u64),
        "ledger ready"
    );
    Ok(services)
}
