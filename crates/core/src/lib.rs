//! `ledgerd-core` - ledger domain building blocks.
//!
//! This crate contains **pure domain** types (no infrastructure concerns):
//! identifiers, validated value objects and the account/movement data model.

pub mod account;
pub mod error;
pub mod id;
pub mod movement;

pub use account::{Account, BalanceSnapshot, Statement, HISTORY_LIMIT};
pub use error::{DomainError, DomainResult};
pub use id::AccountId;
pub use movement::{Amount, Movement, MovementDraft, MovementKind, Note};
