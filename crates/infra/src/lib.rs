//! Infrastructure layer: ledger storage, the ledger engine and configuration.

pub mod config;
pub mod ledger_engine;
pub mod ledger_store;
