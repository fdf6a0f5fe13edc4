//! Postgres-backed ledger store implementation.
//!
//! Every balance mutation is a **single SQL statement**: a data-modifying CTE
//! updates the balance row only when the guarded result stays above the floor
//! and feeds the same statement's movement insert. Postgres runs the statement
//! atomically, and the row lock taken by `UPDATE` serializes writers of one
//! account. Under `READ COMMITTED` a writer that waited for the lock
//! re-evaluates the guard against the freshly committed balance, so two debits
//! that only fit one at a time can never both pass.
//!
//! ## Error Mapping
//!
//! | SQLx Error | StoreError |
//! |------------|------------|
//! | `PoolClosed`, `PoolTimedOut`, `Io`, `Tls` | `Unavailable` |
//! | `Database` and anything else | `Query` |
//! | Row decoding / domain validation of stored values | `Corrupt` |
//!
//! ## Thread Safety
//!
//! `PostgresLedgerStore` is `Send + Sync`; all access goes through the SQLx pool.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{Span, instrument};

use ledgerd_core::{
    Account, AccountId, Amount, BalanceSnapshot, Movement, MovementDraft, MovementKind, Note,
};

use super::r#trait::{LedgerStore, MutationOutcome, StoreError};

/// Embedded schema migrations (`crates/infra/migrations`).
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Postgres-backed ledger store.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    /// Create a new store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool and verify the database answers.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply pending schema migrations.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR
            .run(&*self.pool)
            .await
            .map_err(|e| StoreError::query("migrate", e.to_string()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self), fields(account_id = %account.id, limit = account.limit), err)]
    async fn provision_account(&self, account: Account) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            WITH created AS (
                INSERT INTO accounts (id, credit_limit)
                VALUES ($1, $2)
                ON CONFLICT (id) DO NOTHING
                RETURNING id
            )
            INSERT INTO balances (account_id, value)
            SELECT id, 0 FROM created
            "#,
        )
        .bind(account.id.get())
        .bind(account.limit)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("provision_account", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(account_id = %account_id), err)]
    async fn account_exists(&self, account_id: AccountId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM accounts WHERE id = $1) AS found")
            .bind(account_id.get())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("account_exists", e))?;

        row.try_get::<bool, _>("found")
            .map_err(|e| StoreError::corrupt(format!("failed to read exists flag: {e}")))
    }

    #[instrument(
        skip(self, draft),
        fields(
            account_id = %draft.account_id,
            kind = %draft.kind,
            amount = draft.amount.cents(),
            outcome = tracing::field::Empty
        ),
        err
    )]
    async fn apply_movement(&self, draft: MovementDraft) -> Result<MutationOutcome, StoreError> {
        let span = Span::current();

        let row = sqlx::query(
            r#"
            WITH updated AS (
                UPDATE balances AS b
                SET value = b.value + $2
                FROM accounts AS a
                WHERE b.account_id = $1
                  AND a.id = b.account_id
                  AND b.value + $2 >= -a.credit_limit
                RETURNING a.credit_limit, b.value
            ),
            inserted AS (
                INSERT INTO movements (account_id, amount, kind, note, occurred_at)
                SELECT $1, $3, $4, $5, clock_timestamp() FROM updated
                RETURNING seq, occurred_at
            )
            SELECT u.credit_limit, u.value, i.seq, i.occurred_at
            FROM updated AS u CROSS JOIN inserted AS i
            "#,
        )
        .bind(draft.account_id.get())
        .bind(draft.delta())
        .bind(draft.amount.cents())
        .bind(draft.kind.code())
        .bind(draft.note.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("apply_movement", e))?;

        if let Some(row) = row {
            let snapshot = BalanceSnapshot {
                limit: read(&row, "credit_limit")?,
                balance: read(&row, "value")?,
            };
            let sequence: i64 = read(&row, "seq")?;
            let occurred_at: DateTime<Utc> = read(&row, "occurred_at")?;

            span.record("outcome", "applied");
            return Ok(MutationOutcome::Applied {
                snapshot,
                movement: draft.commit(occurred_at, sequence as u64),
            });
        }

        // Nothing was written: either the guard failed or the account is unknown.
        match self.snapshot(draft.account_id).await? {
            Some(snapshot) => {
                span.record("outcome", "rejected");
                Ok(MutationOutcome::Rejected { snapshot })
            }
            None => {
                span.record("outcome", "account_missing");
                Ok(MutationOutcome::AccountMissing)
            }
        }
    }

    #[instrument(skip(self), fields(account_id = %account_id), err)]
    async fn snapshot(&self, account_id: AccountId) -> Result<Option<BalanceSnapshot>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT a.credit_limit, b.value
            FROM accounts AS a
            JOIN balances AS b ON b.account_id = a.id
            WHERE a.id = $1
            "#,
        )
        .bind(account_id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("snapshot", e))?;

        row.map(|row| {
            Ok(BalanceSnapshot {
                limit: read(&row, "credit_limit")?,
                balance: read(&row, "value")?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self), fields(account_id = %account_id, returned = tracing::field::Empty), err)]
    async fn recent_movements(
        &self,
        account_id: AccountId,
        limit: usize,
    ) -> Result<Vec<Movement>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT seq, account_id, amount, kind, note, occurred_at
            FROM movements
            WHERE account_id = $1
            ORDER BY occurred_at DESC, seq DESC
            LIMIT $2
            "#,
        )
        .bind(account_id.get())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("recent_movements", e))?;

        let movements = rows
            .iter()
            .map(movement_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Span::current().record("returned", movements.len());
        Ok(movements)
    }
}

fn read<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::corrupt(format!("failed to read column {column}: {e}")))
}

fn movement_from_row(row: &PgRow) -> Result<Movement, StoreError> {
    let sequence: i64 = read(row, "seq")?;
    let account_id: i64 = read(row, "account_id")?;
    let amount: i64 = read(row, "amount")?;
    let kind: String = read(row, "kind")?;
    let note: String = read(row, "note")?;
    let occurred_at: DateTime<Utc> = read(row, "occurred_at")?;

    let corrupt = |e: ledgerd_core::DomainError| {
        StoreError::corrupt(format!("movement {sequence} failed validation: {e}"))
    };

    Ok(Movement {
        account_id: AccountId::new(account_id),
        kind: MovementKind::parse(&kind).map_err(corrupt)?,
        amount: Amount::new(amount).map_err(corrupt)?,
        note: Note::new(note).map_err(corrupt)?,
        occurred_at,
        sequence: sequence as u64,
    })
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolClosed => StoreError::unavailable(operation, "connection pool closed"),
        sqlx::Error::PoolTimedOut => {
            StoreError::unavailable(operation, "timed out waiting for a connection")
        }
        sqlx::Error::Io(e) => StoreError::unavailable(operation, e.to_string()),
        sqlx::Error::Tls(e) => StoreError::unavailable(operation, e.to_string()),
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
            StoreError::query(operation, format!("{} (code {code})", db_err.message()))
        }
        other => StoreError::query(operation, other.to_string()),
    }
}
