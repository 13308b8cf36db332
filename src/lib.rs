//! Payment lifecycle and referral-reward reconciliation backend for paid polls.

pub mod api;
pub mod config;
pub mod error;
pub mod health;
pub mod ledger;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod store;
pub mod workers;
