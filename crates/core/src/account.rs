//! Accounts, balances and statements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::AccountId;
use crate::movement::Movement;

/// Number of movements returned by a statement.
pub const HISTORY_LIMIT: usize = 10;

/// A ledger account with its fixed overdraft limit (cents).
///
/// Accounts are provisioned once and never mutated by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub limit: i64,
}

impl Account {
    pub fn new(id: AccountId, limit: i64) -> DomainResult<Self> {
        if limit < 0 {
            return Err(DomainError::invalid_account(format!(
                "account {id} limit must be >= 0, got {limit}"
            )));
        }
        Ok(Self { id, limit })
    }

    /// Balance of a freshly provisioned account.
    pub fn opening_snapshot(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            limit: self.limit,
            balance: 0,
        }
    }
}

/// Limit and balance of an account at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub limit: i64,
    pub balance: i64,
}

impl BalanceSnapshot {
    /// Lowest balance the account may reach.
    pub fn floor(&self) -> i64 {
        -self.limit
    }

    /// Whether the floor invariant holds for this snapshot.
    pub fn is_within_limit(&self) -> bool {
        self.balance >= self.floor()
    }

    /// Snapshot after adding `delta`, or `None` when the result would fall
    /// below the floor (or overflow).
    pub fn apply(&self, delta: i64) -> Option<Self> {
        let balance = self.balance.checked_add(delta)?;
        let next = Self {
            limit: self.limit,
            balance,
        };
        next.is_within_limit().then_some(next)
    }
}

/// Current position of an account plus its most recent movements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub account_id: AccountId,
    pub balance: BalanceSnapshot,
    pub taken_at: DateTime<Utc>,
    /// Newest first.
    pub movements: Vec<Movement>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn negative_limit_is_rejected() {
        assert!(Account::new(AccountId::new(1), -1).is_err());
        assert!(Account::new(AccountId::new(1), 0).is_ok());
    }

    #[test]
    fn opening_snapshot_starts_at_zero() {
        let account = Account::new(AccountId::new(1), 1000).unwrap();
        assert_eq!(
            account.opening_snapshot(),
            BalanceSnapshot {
                limit: 1000,
                balance: 0
            }
        );
    }

    #[test]
    fn apply_follows_worked_example() {
        let start = BalanceSnapshot {
            limit: 1000,
            balance: 0,
        };
        let after_debit = start.apply(-500).unwrap();
        assert_eq!(after_debit.balance, -500);
        assert_eq!(after_debit.apply(-600), None);
        assert_eq!(after_debit.apply(300).unwrap().balance, -200);
    }

    #[test]
    fn apply_allows_reaching_the_floor_exactly() {
        let start = BalanceSnapshot {
            limit: 1000,
            balance: 0,
        };
        assert_eq!(start.apply(-1000).unwrap().balance, -1000);
        assert_eq!(start.apply(-1001), None);
    }

    #[test]
    fn apply_rejects_overflow() {
        let start = BalanceSnapshot {
            limit: 0,
            balance: i64::MAX,
        };
        assert_eq!(start.apply(1), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: any accepted delta sequence keeps the balance above the
        /// floor and equal to the sum of accepted deltas.
        #[test]
        fn accepted_deltas_never_cross_the_floor(
            limit in 0i64..1_000_000,
            deltas in prop::collection::vec(-500_000i64..500_000, 0..64)
        ) {
            let mut snap = BalanceSnapshot { limit, balance: 0 };
            let mut accepted_sum = 0i64;
            for delta in deltas {
                if let Some(next) = snap.apply(delta) {
                    accepted_sum += delta;
                    snap = next;
                }
                prop_assert!(snap.is_within_limit());
            }
            prop_assert_eq!(snap.balance, accepted_sum);
        }
    }
}
