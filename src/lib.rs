pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod jupiter;
pub mod ledger;
pub mod logger;
pub mod notifier;
pub mod risk;
pub mod safety;
pub mod signal;
pub mod time;
pub mod wallet;
