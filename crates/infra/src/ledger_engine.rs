//! Ledger engine (application-level orchestration).
//!
//! The engine owns the floor invariant `balance >= -limit`. It validates
//! caller input, checks that the account exists, and delegates the
//! check-and-write to the store's atomic conditional update. It never reads a
//! balance in one step and writes it in another.
//!
//! ```text
//! MovementRequest
//!   ↓
//! 1. Validate amount / kind / note        → InvalidMovement
//!   ↓
//! 2. Exists(account)                      → NotFound
//!   ↓
//! 3. store.apply_movement (atomic guard)  → InsufficientLimit / StorageFailure
//!   ↓
//! {limit, balance} as of commit
//! ```
//!
//! ## Deadlines
//!
//! An optional deadline bounds each operation as a whole. When it elapses the
//! pending store future is dropped, which aborts the round trip. A statement
//! that had not committed has no effect; one that committed just before the
//! deadline fired is reported as `DeadlineExceeded` even though it took effect.
//! Callers must treat that outcome as at-least-once-uncertain.
//!
//! No retries happen inside the engine. `LedgerError::is_retryable` tells the
//! caller which failures are worth retrying.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::instrument;

use ledgerd_core::{
    Account, AccountId, BalanceSnapshot, DomainError, HISTORY_LIMIT, MovementDraft, MovementKind,
    Statement,
};

use crate::ledger_store::{LedgerStore, MutationOutcome, StoreError};

/// Ledger engine failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The account does not exist.
    #[error("account {account_id} not found")]
    NotFound { account_id: AccountId },

    /// Malformed amount, kind or note. Nothing was written.
    #[error("invalid movement: {0}")]
    InvalidMovement(String),

    /// The debit would take the balance below `-limit`. Nothing was written.
    #[error(
        "insufficient limit on account {account_id}: debit of {amount} from balance {balance} exceeds limit {limit}"
    )]
    InsufficientLimit {
        account_id: AccountId,
        amount: i64,
        balance: i64,
        limit: i64,
    },

    /// The durable store failed. Nothing was written; safe to retry.
    #[error("storage failure: {0}")]
    StorageFailure(#[from] StoreError),

    /// The operation did not finish before the deadline. The outcome of a
    /// mutation is uncertain.
    #[error("{operation} exceeded its {timeout:?} deadline")]
    DeadlineExceeded {
        operation: &'static str,
        timeout: Duration,
    },
}

impl LedgerError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::StorageFailure(_) | LedgerError::DeadlineExceeded { .. }
        )
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        // Domain errors surface at the engine boundary only from caller input.
        LedgerError::InvalidMovement(value.to_string())
    }
}

/// Raw movement fields as received from a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovementRequest {
    pub amount: Option<i64>,
    pub kind: Option<String>,
    pub note: Option<String>,
}

impl MovementRequest {
    pub fn new(amount: i64, kind: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            amount: Some(amount),
            kind: Some(kind.into()),
            note: Some(note.into()),
        }
    }

    pub fn credit(amount: i64, note: impl Into<String>) -> Self {
        Self::new(amount, MovementKind::Credit.code(), note)
    }

    pub fn debit(amount: i64, note: impl Into<String>) -> Self {
        Self::new(amount, MovementKind::Debit.code(), note)
    }
}

/// Ledger engine over an injected store handle.
///
/// `S` is typically `Arc<InMemoryLedgerStore>` (tests/dev) or
/// `Arc<PostgresLedgerStore>` (production). The engine holds no locks of its
/// own; movements on different accounts only meet inside the store.
#[derive(Debug, Clone)]
pub struct LedgerEngine<S> {
    store: S,
    deadline: Option<Duration>,
}

impl<S> LedgerEngine<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            deadline: None,
        }
    }

    /// Bound every operation by `deadline` (`None` disables the bound).
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S> LedgerEngine<S>
where
    S: LedgerStore,
{
    /// Provision accounts before serving traffic. Existing accounts are untouched.
    #[instrument(skip(self, accounts))]
    pub async fn provision(
        &self,
        accounts: impl IntoIterator<Item = Account>,
    ) -> Result<(), LedgerError> {
        for account in accounts {
            self.store.provision_account(account).await?;
            tracing::debug!(account_id = %account.id, limit = account.limit, "account provisioned");
        }
        Ok(())
    }

    /// Whether the account exists.
    pub async fn exists(&self, account_id: AccountId) -> Result<bool, LedgerError> {
        self.bounded("exists", self.lookup(account_id)).await
    }

    /// Apply a credit or debit and return `{limit, balance}` as of commit.
    ///
    /// Credits always succeed for an existing account. A debit succeeds only
    /// if the resulting balance stays `>= -limit`; otherwise the call fails
    /// with `InsufficientLimit` and neither the balance nor the movement log
    /// changes.
    #[instrument(skip(self, request), fields(account_id = %account_id))]
    pub async fn apply_movement(
        &self,
        account_id: AccountId,
        request: MovementRequest,
    ) -> Result<BalanceSnapshot, LedgerError> {
        let draft = MovementDraft::parse(
            account_id,
            request.amount,
            request.kind.as_deref(),
            request.note.as_deref(),
        )
        .inspect_err(|e| tracing::debug!(error = %e, "movement rejected by validation"))?;

        let result = self
            .bounded("apply_movement", self.apply_draft(draft))
            .await;
        log_outcome(&result);
        result
    }

    /// Current `{limit, balance}` plus the fixed-size recent history.
    pub async fn statement(&self, account_id: AccountId) -> Result<Statement, LedgerError> {
        self.recent_history(account_id, HISTORY_LIMIT).await
    }

    /// Current `{limit, balance}` plus up to `n` most recent movements, newest
    /// first. Never mutates state; an account without movements yields an
    /// empty list.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn recent_history(
        &self,
        account_id: AccountId,
        n: usize,
    ) -> Result<Statement, LedgerError> {
        let result = self
            .bounded("recent_history", self.read_history(account_id, n))
            .await;
        if let Err(e) = &result {
            if e.is_retryable() {
                tracing::warn!(error = %e, "statement read failed");
            }
        }
        result
    }

    async fn lookup(&self, account_id: AccountId) -> Result<bool, LedgerError> {
        Ok(self.store.account_exists(account_id).await?)
    }

    async fn require_account(&self, account_id: AccountId) -> Result<(), LedgerError> {
        if self.lookup(account_id).await? {
            Ok(())
        } else {
            Err(LedgerError::NotFound { account_id })
        }
    }

    async fn apply_draft(&self, draft: MovementDraft) -> Result<BalanceSnapshot, LedgerError> {
        let account_id = draft.account_id;
        let kind = draft.kind;
        let amount = draft.amount.cents();

        self.require_account(account_id).await?;

        match self.store.apply_movement(draft).await? {
            MutationOutcome::Applied { snapshot, movement } => {
                tracing::debug!(
                    sequence = movement.sequence,
                    balance = snapshot.balance,
                    "movement applied"
                );
                Ok(snapshot)
            }
            MutationOutcome::Rejected { snapshot } => match kind {
                MovementKind::Debit => Err(LedgerError::InsufficientLimit {
                    account_id,
                    amount,
                    balance: snapshot.balance,
                    limit: snapshot.limit,
                }),
                // Only reachable when the credit would overflow the balance.
                MovementKind::Credit => Err(LedgerError::InvalidMovement(format!(
                    "credit of {amount} would overflow balance {}",
                    snapshot.balance
                ))),
            },
            MutationOutcome::AccountMissing => Err(LedgerError::NotFound { account_id }),
        }
    }

    async fn read_history(&self, account_id: AccountId, n: usize) -> Result<Statement, LedgerError> {
        self.require_account(account_id).await?;

        let balance = self
            .store
            .snapshot(account_id)
            .await?
            .ok_or(LedgerError::NotFound { account_id })?;
        let movements = self.store.recent_movements(account_id, n).await?;

        if let Some(stray) = movements.iter().find(|m| m.account_id != account_id) {
            return Err(StoreError::corrupt(format!(
                "history of account {account_id} returned movement {} of account {}",
                stray.sequence, stray.account_id
            ))
            .into());
        }

        Ok(Statement {
            account_id,
            balance,
            taken_at: Utc::now(),
            movements: movements.into_iter().take(n).collect(),
        })
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, LedgerError>>,
    ) -> Result<T, LedgerError> {
        match self.deadline {
            None => fut.await,
            Some(timeout) => tokio::time::timeout(timeout, fut)
                .await
                .map_err(|_| LedgerError::DeadlineExceeded { operation, timeout })?,
        }
    }
}

fn log_outcome(result: &Result<BalanceSnapshot, LedgerError>) {
    match result {
        Ok(_) => {}
        Err(e @ (LedgerError::NotFound { .. } | LedgerError::InvalidMovement(_))) => {
            tracing::debug!(error = %e, "movement refused");
        }
        Err(e @ LedgerError::InsufficientLimit { .. }) => {
            tracing::debug!(error = %e, "debit rejected by floor check");
        }
        Err(e) => tracing::warn!(error = %e, "movement failed"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use ledgerd_core::Movement;

    use super::*;
    use crate::ledger_store::InMemoryLedgerStore;

    fn account(id: i64, limit: i64) -> Account {
        Account::new(AccountId::new(id), limit).unwrap()
    }

    fn engine_with(accounts: &[(i64, i64)]) -> LedgerEngine<Arc<InMemoryLedgerStore>> {
        let store = InMemoryLedgerStore::with_accounts(
            accounts.iter().map(|&(id, limit)| account(id, limit)),
        )
        .unwrap();
        LedgerEngine::new(Arc::new(store))
    }

    #[tokio::test]
    async fn worked_example_debit_reject_credit() {
        let engine = engine_with(&[(1, 1000)]);
        let id = AccountId::new(1);

        let snap = engine
            .apply_movement(id, MovementRequest::debit(500, "first"))
            .await
            .unwrap();
        assert_eq!(snap, BalanceSnapshot { limit: 1000, balance: -500 });

        let err = engine
            .apply_movement(id, MovementRequest::debit(600, "second"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientLimit {
                account_id: id,
                amount: 600,
                balance: -500,
                limit: 1000,
            }
        );

        let snap = engine
            .apply_movement(id, MovementRequest::credit(300, "third"))
            .await
            .unwrap();
        assert_eq!(snap.balance, -200);

        let statement = engine.statement(id).await.unwrap();
        let notes: Vec<_> = statement.movements.iter().map(|m| m.note.as_str()).collect();
        assert_eq!(notes, ["third", "first"]);
    }

    #[tokio::test]
    async fn unknown_account_is_not_found_for_both_operations() {
        let engine = engine_with(&[(1, 1000)]);
        let missing = AccountId::new(6);

        assert_eq!(
            engine
                .apply_movement(missing, MovementRequest::credit(1, "x"))
                .await
                .unwrap_err(),
            LedgerError::NotFound { account_id: missing }
        );
        assert_eq!(
            engine.statement(missing).await.unwrap_err(),
            LedgerError::NotFound { account_id: missing }
        );
        assert!(!engine.exists(missing).await.unwrap());
        assert!(engine.exists(AccountId::new(1)).await.unwrap());
    }

    #[tokio::test]
    async fn eleven_character_note_is_invalid_and_not_recorded() {
        let engine = engine_with(&[(1, 1000)]);
        let id = AccountId::new(1);

        let err = engine
            .apply_movement(id, MovementRequest::credit(100, "abcdefghijk"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidMovement(_)));

        let statement = engine.statement(id).await.unwrap();
        assert!(statement.movements.is_empty());
        assert_eq!(statement.balance.balance, 0);
    }

    #[tokio::test]
    async fn malformed_requests_are_invalid_movements() {
        let engine = engine_with(&[(1, 1000)]);
        let id = AccountId::new(1);
        let requests = [
            MovementRequest::default(),
            MovementRequest::new(0, "c", "zero"),
            MovementRequest::new(10, "x", "kind"),
            MovementRequest::new(10, "c", ""),
            MovementRequest {
                amount: Some(10),
                kind: Some("d".to_string()),
                note: None,
            },
        ];

        for request in requests {
            let err = engine.apply_movement(id, request.clone()).await.unwrap_err();
            assert!(matches!(err, LedgerError::InvalidMovement(_)), "{request:?}");
            assert!(!err.is_retryable());
        }
    }

    #[tokio::test]
    async fn invalid_input_wins_over_unknown_account() {
        let engine = engine_with(&[]);
        let err = engine
            .apply_movement(AccountId::new(99), MovementRequest::new(0, "c", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidMovement(_)));
    }

    #[tokio::test]
    async fn statement_of_quiet_account_is_populated_and_empty() {
        let engine = engine_with(&[(2, 80000)]);
        let statement = engine.statement(AccountId::new(2)).await.unwrap();
        assert_eq!(statement.balance, BalanceSnapshot { limit: 80000, balance: 0 });
        assert!(statement.movements.is_empty());
    }

    #[tokio::test]
    async fn statement_is_capped_and_reads_are_idempotent() {
        let engine = engine_with(&[(1, 0), (2, 0)]);
        for i in 1..=12 {
            engine
                .apply_movement(AccountId::new(1), MovementRequest::credit(i, "one"))
                .await
                .unwrap();
        }
        engine
            .apply_movement(AccountId::new(2), MovementRequest::credit(5, "two"))
            .await
            .unwrap();

        let first = engine.statement(AccountId::new(1)).await.unwrap();
        let second = engine.statement(AccountId::new(1)).await.unwrap();

        assert_eq!(first.movements.len(), HISTORY_LIMIT);
        assert!(first.movements.iter().all(|m| m.account_id == AccountId::new(1)));
        assert_eq!(first.balance, second.balance);
        assert_eq!(first.movements, second.movements);
        assert_eq!(first.movements[0].amount.cents(), 12);
    }

    #[tokio::test]
    async fn recent_history_honours_smaller_n() {
        let engine = engine_with(&[(1, 0)]);
        for i in 1..=4 {
            engine
                .apply_movement(AccountId::new(1), MovementRequest::credit(i, "c"))
                .await
                .unwrap();
        }
        let statement = engine.recent_history(AccountId::new(1), 2).await.unwrap();
        let amounts: Vec<_> = statement.movements.iter().map(|m| m.amount.cents()).collect();
        assert_eq!(amounts, [4, 3]);
    }

    /// Store whose every call fails as if the database were down.
    struct UnavailableStore;

    #[async_trait]
    impl LedgerStore for UnavailableStore {
        async fn provision_account(&self, _account: Account) -> Result<(), StoreError> {
            Err(StoreError::unavailable("provision_account", "down"))
        }

        async fn account_exists(&self, _account_id: AccountId) -> Result<bool, StoreError> {
            Err(StoreError::unavailable("account_exists", "down"))
        }

        async fn apply_movement(&self, _draft: MovementDraft) -> Result<MutationOutcome, StoreError> {
            Err(StoreError::unavailable("apply_movement", "down"))
        }

        async fn snapshot(&self, _account_id: AccountId) -> Result<Option<BalanceSnapshot>, StoreError> {
            Err(StoreError::unavailable("snapshot", "down"))
        }

        async fn recent_movements(
            &self,
            _account_id: AccountId,
            _limit: usize,
        ) -> Result<Vec<Movement>, StoreError> {
            Err(StoreError::unavailable("recent_movements", "down"))
        }
    }

    #[tokio::test]
    async fn store_failures_surface_as_retryable_storage_failures() {
        let engine = LedgerEngine::new(UnavailableStore);

        let err = engine
            .apply_movement(AccountId::new(1), MovementRequest::credit(1, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::StorageFailure(StoreError::Unavailable { .. })));
        assert!(err.is_retryable());

        let err = engine.statement(AccountId::new(1)).await.unwrap_err();
        assert!(matches!(err, LedgerError::StorageFailure(_)));

        let err = engine.provision([account(1, 10)]).await.unwrap_err();
        assert!(matches!(err, LedgerError::StorageFailure(_)));
    }

    /// Store that never answers, to exercise deadlines.
    struct StalledStore;

    #[async_trait]
    impl LedgerStore for StalledStore {
        async fn provision_account(&self, _account: Account) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn account_exists(&self, _account_id: AccountId) -> Result<bool, StoreError> {
            std::future::pending().await
        }

        async fn apply_movement(&self, _draft: MovementDraft) -> Result<MutationOutcome, StoreError> {
            std::future::pending().await
        }

        async fn snapshot(&self, _account_id: AccountId) -> Result<Option<BalanceSnapshot>, StoreError> {
            std::future::pending().await
        }

        async fn recent_movements(
            &self,
            _account_id: AccountId,
            _limit: usize,
        ) -> Result<Vec<Movement>, StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn deadline_aborts_stalled_store_calls() {
        let timeout = Duration::from_millis(20);
        let engine = LedgerEngine::new(StalledStore).with_deadline(Some(timeout));

        let err = engine
            .apply_movement(AccountId::new(1), MovementRequest::debit(1, "x"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::DeadlineExceeded {
                operation: "apply_movement",
                timeout
            }
        );
        assert!(err.is_retryable());

        let err = engine.statement(AccountId::new(1)).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::DeadlineExceeded { operation: "recent_history", .. }
        ));
    }

    #[tokio::test]
    async fn validation_does_not_wait_for_the_store() {
        let engine = LedgerEngine::new(StalledStore).with_deadline(Some(Duration::from_secs(60)));
        let err = engine
            .apply_movement(AccountId::new(1), MovementRequest::new(10, "z", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidMovement(_)));
    }
}
