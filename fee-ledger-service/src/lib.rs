//! Fee Ledger Service - school fee structures, assignments, collections and
//! staff cash custody.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;

pub use startup::{AppState, Application};
