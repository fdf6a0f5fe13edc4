//! Ledger storage boundary.
//!
//! This module defines the infrastructure-facing abstraction for provisioning
//! accounts, applying guarded balance mutations and reading the movement log,
//! plus the in-memory (tests/dev) and Postgres (production) backends.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use r#trait::{LedgerStore, MutationOutcome, StoreError};
