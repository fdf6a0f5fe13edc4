use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use ledgerd_core::{Account, AccountId, BalanceSnapshot, Movement, MovementDraft};

/// Ledger store operation error.
///
/// These are **infrastructure errors** (connectivity, query failures, broken
/// state) as opposed to business outcomes. A floor violation is not an error
/// at this level; it is reported as [`MutationOutcome::Rejected`].
///
/// ## Error Categories
///
/// - **Unavailable**: the backend could not be reached (pool closed, IO, pool timeout)
/// - **Query**: the backend answered with an error
/// - **Corrupt**: stored data could not be decoded, or in-process state is poisoned
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable in {operation}: {message}")]
    Unavailable {
        operation: &'static str,
        message: String,
    },

    #[error("query failed in {operation}: {message}")]
    Query {
        operation: &'static str,
        message: String,
    },

    #[error("corrupt store state: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn unavailable(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            operation,
            message: message.into(),
        }
    }

    pub fn query(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Query {
            operation,
            message: message.into(),
        }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt(message.into())
    }
}

/// Result of the atomic conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Balance updated and movement appended, both as one step.
    Applied {
        snapshot: BalanceSnapshot,
        movement: Movement,
    },
    /// The new balance would have crossed the floor; nothing was written.
    /// `snapshot` is the unchanged state observed by the guard.
    Rejected { snapshot: BalanceSnapshot },
    /// No balance row exists for the account.
    AccountMissing,
}

/// Durable home of accounts, balances and the movement log.
///
/// ## Atomicity
///
/// `apply_movement` is the only write path for balances. Implementations must
/// perform the floor check, the balance update and the movement append as one
/// indivisible step relative to other writers of the **same** account
/// (a conditional SQL update, a per-account lock, ...). Writers of different
/// accounts must not serialize on each other. Reading the balance in one call
/// and writing it in another is never correct.
///
/// ## Ordering
///
/// Each committed movement gets an `occurred_at` timestamp and a `sequence`
/// number that strictly increases across the whole store. `recent_movements`
/// orders by `occurred_at` descending, then `sequence` descending.
///
/// ## Cancellation
///
/// Dropping a pending future must leave either the full effect of the call or
/// none of it.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create the account with a zero balance. Existing accounts are left untouched.
    async fn provision_account(&self, account: Account) -> Result<(), StoreError>;

    /// Cheap existence check (index lookup).
    async fn account_exists(&self, account_id: AccountId) -> Result<bool, StoreError>;

    /// Apply the draft's signed delta if the floor invariant still holds afterwards.
    async fn apply_movement(&self, draft: MovementDraft) -> Result<MutationOutcome, StoreError>;

    /// Current limit and balance, or `None` for an unknown account.
    async fn snapshot(&self, account_id: AccountId) -> Result<Option<BalanceSnapshot>, StoreError>;

    /// Up to `limit` movements of the account, newest first.
    async fn recent_movements(
        &self,
        account_id: AccountId,
        limit: usize,
    ) -> Result<Vec<Movement>, StoreError>;
}

impl std::fmt::Debug for dyn LedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn LedgerStore")
    }
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn provision_account(&self, account: Account) -> Result<(), StoreError> {
        (**self).provision_account(account).await
    }

    async fn account_exists(&self, account_id: AccountId) -> Result<bool, StoreError> {
        (**self).account_exists(account_id).await
    }

    async fn apply_movement(&self, draft: MovementDraft) -> Result<MutationOutcome, StoreError> {
        (**self).apply_movement(draft).await
    }

    async fn snapshot(&self, account_id: AccountId) -> Result<Option<BalanceSnapshot>, StoreError> {
        (**self).snapshot(account_id).await
    }

    async fn recent_movements(
        &self,
        account_id: AccountId,
        limit: usize,
    ) -> Result<Vec<Movement>, StoreError> {
        (**self).recent_movements(account_id, limit).await
    }
}
