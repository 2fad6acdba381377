pub mod catalog;
pub mod config;
pub mod gateway;
pub mod ledger;
pub mod locking;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod persistence;
pub mod resolver;
pub mod sqlite;
