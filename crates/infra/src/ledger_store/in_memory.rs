use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use ledgerd_core::{Account, AccountId, BalanceSnapshot, Movement, MovementDraft};

use super::r#trait::{LedgerStore, MutationOutcome, StoreError};

#[derive(Debug)]
struct AccountCell {
    snapshot: BalanceSnapshot,
    movements: Vec<Movement>,
}

/// In-memory ledger store.
///
/// Intended for tests/dev. Each account lives behind its own mutex; the outer
/// map is only write-locked while provisioning, so movements on different
/// accounts never wait on each other.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    accounts: RwLock<HashMap<AccountId, Arc<Mutex<AccountCell>>>>,
    last_sequence: AtomicU64,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store with the given accounts already provisioned.
    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Result<Self, StoreError> {
        let store = Self::new();
        for account in accounts {
            store.insert_account(account)?;
        }
        Ok(store)
    }

    fn insert_account(&self, account: Account) -> Result<(), StoreError> {
        let mut accounts = self
            .accounts
            .write()
            .map_err(|_| StoreError::corrupt("account map lock poisoned"))?;

        accounts.entry(account.id).or_insert_with(|| {
            Arc::new(Mutex::new(AccountCell {
                snapshot: account.opening_snapshot(),
                movements: Vec::new(),
            }))
        });
        Ok(())
    }

    fn cell(&self, account_id: AccountId) -> Result<Option<Arc<Mutex<AccountCell>>>, StoreError> {
        let accounts = self
            .accounts
            .read()
            .map_err(|_| StoreError::corrupt("account map lock poisoned"))?;
        Ok(accounts.get(&account_id).cloned())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn provision_account(&self, account: Account) -> Result<(), StoreError> {
        self.insert_account(account)
    }

    async fn account_exists(&self, account_id: AccountId) -> Result<bool, StoreError> {
        Ok(self.cell(account_id)?.is_some())
    }

    async fn apply_movement(&self, draft: MovementDraft) -> Result<MutationOutcome, StoreError> {
        let Some(cell) = self.cell(draft.account_id)? else {
            return Ok(MutationOutcome::AccountMissing);
        };

        // Check, update and append all happen while holding the account's lock.
        let mut cell = cell
            .lock()
            .map_err(|_| StoreError::corrupt(format!("account {} lock poisoned", draft.account_id)))?;

        let Some(next) = cell.snapshot.apply(draft.delta()) else {
            return Ok(MutationOutcome::Rejected {
                snapshot: cell.snapshot,
            });
        };

        let sequence = self.last_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let movement = draft.commit(Utc::now(), sequence);

        cell.snapshot = next;
        cell.movements.push(movement.clone());

        Ok(MutationOutcome::Applied {
            snapshot: next,
            movement,
        })
    }

    async fn snapshot(&self, account_id: AccountId) -> Result<Option<BalanceSnapshot>, StoreError> {
        let Some(cell) = self.cell(account_id)? else {
            return Ok(None);
        };
        let cell = cell
            .lock()
            .map_err(|_| StoreError::corrupt(format!("account {account_id} lock poisoned")))?;
        Ok(Some(cell.snapshot))
    }

    async fn recent_movements(
        &self,
        account_id: AccountId,
        limit: usize,
    ) -> Result<Vec<Movement>, StoreError> {
        let Some(cell) = self.cell(account_id)? else {
            return Ok(vec![]);
        };
        let cell = cell
            .lock()
            .map_err(|_| StoreError::corrupt(format!("account {account_id} lock poisoned")))?;

        let mut newest_first: Vec<&Movement> = cell.movements.iter().collect();
        newest_first.sort_unstable_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then(b.sequence.cmp(&a.sequence))
        });

        Ok(newest_first.into_iter().take(limit).cloned().collect())
    }
}
