//! HTTP handlers for fee-ledger-service.

pub mod collections;
pub mod health;
pub mod structures;
pub mod students;
pub mod wallets;
