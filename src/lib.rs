pub mod api;
pub mod bootstrap;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod rail;
pub mod rotation;
pub mod schedule;
pub mod server;
pub mod settlement;
